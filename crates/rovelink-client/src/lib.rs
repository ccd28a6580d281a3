pub mod client;
pub mod data_channel;
pub mod ice;
pub mod media;
pub mod negotiation;
pub mod signaling;
pub mod status;
pub mod types;
pub mod webrtc_session;

pub use client::{ClientHandle, ViewerClient};
pub use data_channel::{ChannelId, ChannelOrigin, ChannelState, ChatLog, DataChannelManager};
pub use ice::{fallback_ice_servers, IceServer, IceServerProvider};
pub use media::{MediaBackend, MediaEvent, MediaEventSender, MediaSession};
pub use negotiation::{ConnectivityState, NegotiationState, NegotiationStateMachine, Notice};
pub use signaling::SignalingClient;
pub use status::{StatusEvent, StatusHub};
pub use types::{ClientConfig, RestartPolicy, TransportPolicy};
pub use webrtc_session::{WebRtcBackend, WebRtcSession};
