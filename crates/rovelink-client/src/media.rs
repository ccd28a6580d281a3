//! Seam between the negotiation runtime and the real-time media stack.

use std::future::Future;

use rovelink_common::{IceCandidate, Result, SessionDescription};
use tokio::sync::mpsc;

use crate::data_channel::{ChannelId, ChannelOrigin};
use crate::ice::IceServer;
use crate::negotiation::ConnectivityState;

/// Callbacks from the media session, delivered in the order they fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    Connectivity(ConnectivityState),
    TrackReceived { kind: String },
    ChannelAnnounced {
        channel: ChannelId,
        origin: ChannelOrigin,
        label: String,
    },
    ChannelOpen(ChannelId),
    ChannelMessage { channel: ChannelId, text: String },
    ChannelClosed(ChannelId),
}

pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;
pub type MediaEventReceiver = mpsc::UnboundedReceiver<MediaEvent>;

pub trait MediaSession: Send + Sync + 'static {
    /// Creates an offer, installs it as the local description and returns it.
    fn create_offer(
        &self,
        ice_restart: bool,
    ) -> impl Future<Output = Result<SessionDescription>> + Send;

    fn apply_remote_description(
        &self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<()>> + Send;

    fn add_remote_candidate(&self, candidate: IceCandidate)
        -> impl Future<Output = Result<()>> + Send;

    fn send_text(&self, channel: ChannelId, text: String)
        -> impl Future<Output = Result<()>> + Send;

    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

pub trait MediaBackend: Send + Sync + 'static {
    type Session: MediaSession;

    /// Builds a receive-only video session plus the local chat channel.
    fn open(
        &self,
        ice_servers: Vec<IceServer>,
        events: MediaEventSender,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}
