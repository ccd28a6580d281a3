//! Per-type routing of signaling messages.
//!
//! Routing is a pure function of the message, the sender and the current registry; the
//! websocket layer executes the returned deliveries. Answers and candidates are broadcast to
//! every other connection, which is only sound while exactly two parties are connected.

use std::collections::BTreeSet;

use rovelink_common::{ErrorCode, Role, SignalMessage};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::registry::{ConnectionId, ConnectionRegistry};

/// One message to put on one connection's outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub target: ConnectionId,
    pub message: SignalMessage,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// Offer arrived while no connection holds the role it is addressed to.
    #[error("no {0} registered, offer dropped")]
    RoutingMiss(Role),

    #[error("unknown sender connection {0}")]
    UnknownSender(ConnectionId),

    /// Clients may not send relay-originated message types.
    #[error("{0} messages are relay-originated")]
    Unsupported(&'static str),
}

impl RouteError {
    /// Notice sent back to the connection whose message could not be routed.
    pub fn notice(&self) -> SignalMessage {
        let code = match self {
            RouteError::RoutingMiss(_) => ErrorCode::RoutingMiss,
            RouteError::UnknownSender(_) => ErrorCode::InvalidMessage,
            RouteError::Unsupported(_) => ErrorCode::Unsupported,
        };
        SignalMessage::error(code, self.to_string())
    }
}

#[derive(Debug, Default)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
    connections: BTreeSet<ConnectionId>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connect(&mut self, conn: ConnectionId) {
        self.connections.insert(conn);
    }

    /// Forgets `conn` and releases every role it held.
    pub fn disconnect(&mut self, conn: ConnectionId) -> Vec<Role> {
        self.connections.remove(&conn);
        let released = self.registry.unregister(conn);
        for role in &released {
            info!("{} connection {} left, role released", role, conn);
        }
        released
    }

    pub fn route(
        &mut self,
        message: SignalMessage,
        sender: ConnectionId,
    ) -> Result<Vec<Delivery>, RouteError> {
        if !self.connections.contains(&sender) {
            return Err(RouteError::UnknownSender(sender));
        }

        match message {
            SignalMessage::Register(payload) => {
                if let Some(previous) = self.registry.register(payload.role, sender) {
                    info!(
                        "{} registration moved from {} to {}",
                        payload.role, previous, sender
                    );
                } else {
                    info!("{} registered as {}", sender, payload.role);
                }
                Ok(self.broadcast(sender, SignalMessage::registered(payload.role)))
            }
            SignalMessage::Offer(description) => {
                let Some(device) = self.registry.lookup(Role::Device) else {
                    warn!("offer from {} dropped: no device registered", sender);
                    return Err(RouteError::RoutingMiss(Role::Device));
                };
                debug!("offer from {} delivered to device {}", sender, device);
                Ok(vec![Delivery {
                    target: device,
                    message: SignalMessage::Offer(description),
                }])
            }
            message @ (SignalMessage::Answer(_) | SignalMessage::Candidate(_)) => {
                let deliveries = self.broadcast(sender, message);
                if deliveries.len() > 1 {
                    warn!(
                        "{} from {} broadcast to {} connections; routing assumes exactly two parties",
                        deliveries
                            .first()
                            .map(|d| d.message.kind())
                            .unwrap_or("message"),
                        sender,
                        deliveries.len()
                    );
                }
                Ok(deliveries)
            }
            message @ (SignalMessage::Registered(_) | SignalMessage::Error(_)) => {
                Err(RouteError::Unsupported(message.kind()))
            }
        }
    }

    fn broadcast(&self, sender: ConnectionId, message: SignalMessage) -> Vec<Delivery> {
        self.connections
            .iter()
            .filter(|conn| **conn != sender)
            .map(|conn| Delivery {
                target: *conn,
                message: message.clone(),
            })
            .collect()
    }
}
