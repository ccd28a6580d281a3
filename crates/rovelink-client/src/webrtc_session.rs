//! `MediaBackend` on top of webrtc-rs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rovelink_common::{
    CandidateComponent, Error, IceCandidate, Result, SdpType, SessionDescription,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use crate::data_channel::{ChannelId, ChannelOrigin, CHAT_CHANNEL_LABEL};
use crate::ice::IceServer;
use crate::media::{MediaBackend, MediaEvent, MediaEventSender, MediaSession};
use crate::negotiation::ConnectivityState;
use crate::types::TransportPolicy;

fn webrtc_err(context: &str, err: webrtc::Error) -> Error {
    Error::negotiation(format!("{context}: {err}"))
}

fn to_rtc_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn to_connectivity(state: RTCIceConnectionState) -> Option<ConnectivityState> {
    Some(match state {
        RTCIceConnectionState::New => ConnectivityState::New,
        RTCIceConnectionState::Checking => ConnectivityState::Checking,
        RTCIceConnectionState::Connected => ConnectivityState::Connected,
        RTCIceConnectionState::Completed => ConnectivityState::Completed,
        RTCIceConnectionState::Disconnected => ConnectivityState::Disconnected,
        RTCIceConnectionState::Failed => ConnectivityState::Failed,
        RTCIceConnectionState::Closed => ConnectivityState::Closed,
        _ => return None,
    })
}

fn to_wire_candidate(candidate: &RTCIceCandidate) -> Result<IceCandidate> {
    let init = candidate
        .to_json()
        .map_err(|err| webrtc_err("serialize local candidate", err))?;
    Ok(IceCandidate {
        component: CandidateComponent::from_id(candidate.component),
        foundation: candidate.foundation.clone(),
        priority: candidate.priority,
        protocol: candidate.protocol.to_string(),
        ip: candidate.address.clone(),
        port: candidate.port,
        kind: candidate.typ.to_string(),
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
    })
}

#[derive(Debug, Clone, Default)]
pub struct WebRtcBackend {
    transport_policy: TransportPolicy,
}

impl WebRtcBackend {
    pub fn new(transport_policy: TransportPolicy) -> Self {
        Self { transport_policy }
    }
}

type ChannelMap = Arc<Mutex<HashMap<ChannelId, Arc<RTCDataChannel>>>>;

pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    channels: ChannelMap,
}

/// Registers `dc` under a fresh id and forwards its callbacks as media events.
async fn wire_channel(
    dc: Arc<RTCDataChannel>,
    origin: ChannelOrigin,
    channels: &ChannelMap,
    next_id: &AtomicU64,
    events: &MediaEventSender,
) {
    let channel = ChannelId(next_id.fetch_add(1, Ordering::Relaxed));
    channels.lock().await.insert(channel, Arc::clone(&dc));

    let _ = events.send(MediaEvent::ChannelAnnounced {
        channel,
        origin,
        label: dc.label().to_string(),
    });

    let tx = events.clone();
    dc.on_open(Box::new(move || {
        let _ = tx.send(MediaEvent::ChannelOpen(channel));
        Box::pin(async {})
    }));

    let tx = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let text = String::from_utf8_lossy(&msg.data).into_owned();
        let _ = tx.send(MediaEvent::ChannelMessage { channel, text });
        Box::pin(async {})
    }));

    let tx = events.clone();
    dc.on_close(Box::new(move || {
        let _ = tx.send(MediaEvent::ChannelClosed(channel));
        Box::pin(async {})
    }));
}

impl MediaBackend for WebRtcBackend {
    type Session = WebRtcSession;

    async fn open(
        &self,
        ice_servers: Vec<IceServer>,
        events: MediaEventSender,
    ) -> Result<WebRtcSession> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()
            .map_err(|err| webrtc_err("register codecs", err))?;
        let registry = register_default_interceptors(Registry::new(), &mut m)
            .map_err(|err| webrtc_err("register interceptors", err))?;
        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: to_rtc_ice_servers(&ice_servers),
            ice_transport_policy: match self.transport_policy {
                TransportPolicy::All => RTCIceTransportPolicy::All,
                TransportPolicy::Relay => RTCIceTransportPolicy::Relay,
            },
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|err| webrtc_err("create peer connection", err))?,
        );

        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .map_err(|err| webrtc_err("add video transceiver", err))?;

        let channels: ChannelMap = Arc::new(Mutex::new(HashMap::new()));
        let next_id = Arc::new(AtomicU64::new(1));

        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                match candidate {
                    Some(candidate) => match to_wire_candidate(&candidate) {
                        Ok(wire) => {
                            let _ = tx.send(MediaEvent::LocalCandidate(wire));
                        }
                        Err(err) => warn!("dropping local candidate: {err}"),
                    },
                    None => {
                        let _ = tx.send(MediaEvent::GatheringComplete);
                    }
                }
            })
        }));

        let tx = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            debug!("ice connection state: {state}");
            if let Some(state) = to_connectivity(state) {
                let _ = tx.send(MediaEvent::Connectivity(state));
            }
            Box::pin(async {})
        }));

        let tx = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let kind = track.kind().to_string();
            info!("remote {kind} track received");
            let _ = tx.send(MediaEvent::TrackReceived { kind });
            Box::pin(async {})
        }));

        {
            let tx = events.clone();
            let channels = Arc::clone(&channels);
            let next_id = Arc::clone(&next_id);
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let tx = tx.clone();
                let channels = Arc::clone(&channels);
                let next_id = Arc::clone(&next_id);
                Box::pin(async move {
                    info!("remote data channel '{}' announced", dc.label());
                    wire_channel(dc, ChannelOrigin::Remote, &channels, &next_id, &tx).await;
                })
            }));
        }

        let dc = pc
            .create_data_channel(CHAT_CHANNEL_LABEL, None)
            .await
            .map_err(|err| webrtc_err("create chat channel", err))?;
        wire_channel(dc, ChannelOrigin::Local, &channels, &next_id, &events).await;

        Ok(WebRtcSession { pc, channels })
    }
}

impl MediaSession for WebRtcSession {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self
            .pc
            .create_offer(Some(options))
            .await
            .map_err(|err| webrtc_err("create offer", err))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|err| webrtc_err("set local description", err))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn apply_remote_description(&self, description: SessionDescription) -> Result<()> {
        let remote = match description.kind {
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        }
        .map_err(|err| webrtc_err("parse remote description", err))?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|err| webrtc_err("set remote description", err))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.to_candidate_line(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|err| webrtc_err("add remote candidate", err))
    }

    async fn send_text(&self, channel: ChannelId, text: String) -> Result<()> {
        let dc = self
            .channels
            .lock()
            .await
            .get(&channel)
            .cloned()
            .ok_or_else(|| Error::precondition(format!("unknown data channel {channel}")))?;
        dc.send_text(text)
            .await
            .map_err(|err| webrtc_err("send chat text", err))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.channels.lock().await.clear();
        self.pc
            .close()
            .await
            .map_err(|err| webrtc_err("close peer connection", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_servers_carry_credentials() {
        let servers = vec![
            IceServer::stun("stun:stun.example:3478"),
            IceServer {
                urls: vec!["turn:turn.example:443".into()],
                username: Some("user".into()),
                credential: Some("secret".into()),
            },
        ];
        let rtc = to_rtc_ice_servers(&servers);
        assert_eq!(rtc.len(), 2);
        assert!(rtc[0].username.is_empty());
        assert_eq!(rtc[1].username, "user");
        assert_eq!(rtc[1].credential, "secret");
    }

    #[test]
    fn test_connectivity_mapping() {
        assert_eq!(
            to_connectivity(RTCIceConnectionState::Failed),
            Some(ConnectivityState::Failed)
        );
        assert_eq!(
            to_connectivity(RTCIceConnectionState::Completed),
            Some(ConnectivityState::Completed)
        );
        assert_eq!(to_connectivity(RTCIceConnectionState::Unspecified), None);
    }
}
