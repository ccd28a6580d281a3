use futures_util::{SinkExt, StreamExt};
use rovelink_common::{Error, Result, SignalMessage};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const SIGNAL_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct SignalSender(mpsc::Sender<SignalMessage>);

impl SignalSender {
    pub async fn send(&self, message: SignalMessage) -> Result<()> {
        debug!("signal out: {}", message.kind());
        self.0
            .send(message)
            .await
            .map_err(|_| Error::transport_drop("signaling writer closed"))
    }
}

/// Websocket connection to the signaling relay, split into a reader and a writer task.
pub struct SignalingClient {
    outgoing: mpsc::Sender<SignalMessage>,
    incoming: mpsc::Receiver<SignalMessage>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|err| Error::transport_drop(format!("connect {url}: {err}")))?;
        info!("connected to signaling relay: {url}");

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<SignalMessage>(SIGNAL_QUEUE);
        let (in_tx, in_rx) = mpsc::channel::<SignalMessage>(SIGNAL_QUEUE);

        tokio::spawn(async move {
            while let Some(signal) = out_rx.recv().await {
                let text = match signal.to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("failed to encode {} message: {err}", signal.kind());
                        continue;
                    }
                };
                if let Err(err) = write.send(Message::Text(text)).await {
                    error!("failed to send signaling message: {err}");
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match SignalMessage::from_json(&text) {
                        Ok(signal) => {
                            debug!("signal in: {}", signal.kind());
                            if in_tx.send(signal).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!("failed to parse signaling message: {err}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Err(err) => {
                        error!("signaling websocket error: {err}");
                        break;
                    }
                    _ => {}
                }
            }
            info!("signaling relay connection closed");
        });

        Ok(Self {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }

    pub async fn send(&self, message: SignalMessage) -> Result<()> {
        self.sender().send(message).await
    }

    /// Cloneable sending half, usable while `recv` is pending elsewhere.
    pub fn sender(&self) -> SignalSender {
        SignalSender(self.outgoing.clone())
    }

    /// Next message from the relay; `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        self.incoming.recv().await
    }
}
