use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use rovelink_common::{ErrorCode, Role, SignalMessage};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::registry::ConnectionId;
use crate::router::{MessageRouter, RouteError};

const WS_OUTBOX_CAPACITY: usize = 128;
const WS_MAX_TEXT_BYTES: usize = 64 * 1024;

/// Outbox of one websocket connection.
#[derive(Clone)]
pub struct Signaler(mpsc::Sender<Message>);

impl Signaler {
    /// Queues `signal` without waiting; a full or closed outbox drops it.
    pub fn try_send(&self, signal: &SignalMessage) -> bool {
        match signal.to_json() {
            Ok(json) => self.0.try_send(Message::Text(json)).is_ok(),
            Err(_) => false,
        }
    }
}

#[derive(Default)]
struct RelayState {
    router: MessageRouter,
    outboxes: HashMap<ConnectionId, Signaler>,
}

/// The signaling relay: every registry mutation and routing decision runs under one lock.
#[derive(Clone, Default)]
pub struct Relay {
    state: Arc<Mutex<RelayState>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection. A device that registered earlier is announced to it right away.
    pub async fn connect(&self, outbox: Signaler) -> ConnectionId {
        let conn = ConnectionId::new();
        let mut state = self.state.lock().await;
        state.router.connect(conn);
        if state.router.registry().lookup(Role::Device).is_some()
            && !outbox.try_send(&SignalMessage::registered(Role::Device))
        {
            warn!("failed to announce registered device to {}", conn);
        }
        state.outboxes.insert(conn, outbox);
        conn
    }

    pub async fn disconnect(&self, conn: ConnectionId) {
        let mut state = self.state.lock().await;
        state.outboxes.remove(&conn);
        state.router.disconnect(conn);
    }

    /// Routes `message` from `sender` and queues every resulting delivery.
    ///
    /// Returns how many deliveries were queued.
    pub async fn dispatch(
        &self,
        message: SignalMessage,
        sender: ConnectionId,
    ) -> Result<usize, RouteError> {
        let mut state = self.state.lock().await;
        let deliveries = state.router.route(message, sender)?;
        let mut queued = 0;
        for delivery in deliveries {
            match state.outboxes.get(&delivery.target) {
                Some(outbox) if outbox.try_send(&delivery.message) => queued += 1,
                Some(_) => warn!(
                    "failed to queue {} for {}",
                    delivery.message.kind(),
                    delivery.target
                ),
                None => warn!("no outbox for {}", delivery.target),
            }
        }
        Ok(queued)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.router.connection_count()
    }

    pub async fn lookup(&self, role: Role) -> Option<ConnectionId> {
        self.state.lock().await.router.registry().lookup(role)
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(relay): State<Relay>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.max_message_size(WS_MAX_TEXT_BYTES)
        .max_frame_size(WS_MAX_TEXT_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, relay, addr))
}

async fn handle_socket(stream: WebSocket, relay: Relay, addr: SocketAddr) {
    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(WS_OUTBOX_CAPACITY);
    let outbox = Signaler(tx);

    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = disconnect_tx.try_send(());
    });

    let conn = relay.connect(outbox.clone()).await;
    info!("client {} connected from {}", conn, addr);

    loop {
        tokio::select! {
            _ = disconnect_rx.recv() => {
                break;
            }
            msg = receiver.next() => {
                let Some(msg) = msg else { break; };
                let Ok(msg) = msg else { break; };

                let text = match msg {
                    Message::Text(text) => text,
                    Message::Binary(_) => {
                        let notice = SignalMessage::error(
                            ErrorCode::Rejected,
                            "Binary messages are not supported",
                        );
                        if !outbox.try_send(&notice) {
                            warn!("failed to queue rejection notice for {}", conn);
                        }
                        break;
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                let signal = match SignalMessage::from_json(&text) {
                    Ok(signal) => signal,
                    Err(err) => {
                        warn!("invalid signaling message from {}: {}", conn, err);
                        let notice = SignalMessage::error(
                            ErrorCode::InvalidMessage,
                            "Invalid signaling message",
                        );
                        if !outbox.try_send(&notice) {
                            warn!("failed to queue error notice for {}", conn);
                        }
                        continue;
                    }
                };

                let kind = signal.kind();
                match relay.dispatch(signal, conn).await {
                    Ok(queued) => {
                        debug!("{} from {} queued for {} connection(s)", kind, conn, queued)
                    }
                    Err(err) => {
                        warn!("{} from {} not routed: {}", kind, conn, err);
                        if !outbox.try_send(&err.notice()) {
                            warn!("failed to queue routing notice for {}", conn);
                        }
                    }
                }
            }
        }
    }

    relay.disconnect(conn).await;
    info!("client {} disconnected", conn);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_send_reports_full_outbox() {
        let (tx, mut rx) = mpsc::channel::<Message>(1);
        let outbox = Signaler(tx);
        let notice = SignalMessage::error(ErrorCode::InvalidMessage, "Invalid signaling message");

        assert!(outbox.try_send(&notice));
        assert!(!outbox.try_send(&notice));

        match rx.try_recv() {
            Ok(Message::Text(text)) => {
                assert_eq!(SignalMessage::from_json(&text).unwrap(), notice)
            }
            other => panic!("expected queued notice, got {other:?}"),
        }
    }

    #[test]
    fn test_try_send_reports_closed_outbox() {
        let (tx, rx) = mpsc::channel::<Message>(4);
        drop(rx);
        let outbox = Signaler(tx);
        assert!(!outbox.try_send(&SignalMessage::registered(Role::Device)));
    }

    #[tokio::test]
    async fn test_connect_with_full_outbox_still_registers_connection() {
        let relay = Relay::new();
        let (device_tx, _device_rx) = mpsc::channel::<Message>(4);
        let device = relay.connect(Signaler(device_tx)).await;
        relay
            .dispatch(SignalMessage::register(Role::Device), device)
            .await
            .unwrap();

        let (tx, _rx) = mpsc::channel::<Message>(1);
        let filler = Signaler(tx.clone());
        assert!(filler.try_send(&SignalMessage::registered(Role::Device)));
        relay.connect(Signaler(tx)).await;

        assert_eq!(relay.connection_count().await, 2);
    }
}
