use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Role a connection can claim on the relay.
///
/// Connections that never register stay unassigned and are addressed only by broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Device,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Device => write!(f, "device"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePayload {
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// One half of the offer/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpType::Answer,
        }
    }
}

/// Serialized as `"rtp"`/`"rtcp"`; also accepts the numeric ids 1 and 2 that flattened
/// candidates from non-browser stacks carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateComponent {
    Rtp,
    Rtcp,
}

impl<'de> Deserialize<'de> for CandidateComponent {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Component {
            Id(u16),
            Name(String),
        }

        match Component::deserialize(deserializer)? {
            Component::Id(1) => Ok(CandidateComponent::Rtp),
            Component::Id(2) => Ok(CandidateComponent::Rtcp),
            Component::Id(id) => Err(de::Error::custom(format!(
                "unknown candidate component id {id}"
            ))),
            Component::Name(name) => match name.as_str() {
                "rtp" => Ok(CandidateComponent::Rtp),
                "rtcp" => Ok(CandidateComponent::Rtcp),
                other => Err(de::Error::custom(format!(
                    "unknown candidate component {other:?}"
                ))),
            },
        }
    }
}

impl CandidateComponent {
    /// Numeric component id as written in an SDP candidate line.
    pub fn id(self) -> u16 {
        match self {
            CandidateComponent::Rtp => 1,
            CandidateComponent::Rtcp => 2,
        }
    }

    pub fn from_id(id: u16) -> Self {
        if id == 2 {
            CandidateComponent::Rtcp
        } else {
            CandidateComponent::Rtp
        }
    }
}

/// A discovered network path, in the flattened shape browsers expose on `RTCIceCandidate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub component: CandidateComponent,
    pub foundation: String,
    pub priority: u32,
    pub protocol: String,
    pub ip: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Rebuilds the `candidate:` attribute value the payload was flattened from.
    pub fn to_candidate_line(&self) -> String {
        format!(
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component.id(),
            self.protocol,
            self.priority,
            self.ip,
            self.port,
            self.kind
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Offer dropped because no device is registered.
    RoutingMiss,
    /// Frame could not be parsed as a signaling message.
    InvalidMessage,
    /// Message type is relay-originated and may not be sent by clients.
    Unsupported,
    /// Frame exceeded the size limit or was binary.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub code: ErrorCode,
    pub message: String,
}

/// Signaling message exchanged over the relay websocket.
///
/// Encoded as `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum SignalMessage {
    /// Claim a role on the relay (client → relay).
    Register(RolePayload),
    /// A role was claimed by another connection (relay → others).
    Registered(RolePayload),
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
    /// Relay-originated notice about the sender's last message.
    Error(ErrorNotice),
}

impl SignalMessage {
    pub fn register(role: Role) -> Self {
        SignalMessage::Register(RolePayload { role })
    }

    pub fn registered(role: Role) -> Self {
        SignalMessage::Registered(RolePayload { role })
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        SignalMessage::Error(ErrorNotice {
            code,
            message: message.into(),
        })
    }

    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Register(_) => "register",
            SignalMessage::Registered(_) => "registered",
            SignalMessage::Offer(_) => "offer",
            SignalMessage::Answer(_) => "answer",
            SignalMessage::Candidate(_) => "candidate",
            SignalMessage::Error(_) => "error",
        }
    }

    /// Whether only the relay may originate this message.
    pub fn is_relay_originated(&self) -> bool {
        matches!(self, SignalMessage::Registered(_) | SignalMessage::Error(_))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_candidate() -> IceCandidate {
        IceCandidate {
            component: CandidateComponent::Rtp,
            foundation: "842163049".into(),
            priority: 1677729535,
            protocol: "udp".into(),
            ip: "203.0.113.7".into(),
            port: 50123,
            kind: "srflx".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    #[test]
    fn test_register_wire_shape() {
        let value = serde_json::to_value(SignalMessage::register(Role::Device)).unwrap();
        assert_eq!(
            value,
            json!({"type": "register", "payload": {"role": "device"}})
        );
    }

    #[test]
    fn test_offer_payload_keeps_inner_type() {
        let value =
            serde_json::to_value(SignalMessage::Offer(SessionDescription::offer("v=0"))).unwrap();
        assert_eq!(
            value,
            json!({"type": "offer", "payload": {"sdp": "v=0", "type": "offer"}})
        );
    }

    #[test]
    fn test_candidate_uses_browser_field_names() {
        let value = serde_json::to_value(SignalMessage::Candidate(sample_candidate())).unwrap();
        let payload = &value["payload"];
        assert_eq!(payload["component"], "rtp");
        assert_eq!(payload["type"], "srflx");
        assert_eq!(payload["sdpMid"], "0");
        assert_eq!(payload["sdpMLineIndex"], 0);
        assert_eq!(payload["ip"], "203.0.113.7");
    }

    #[test]
    fn test_candidate_from_browser_without_mid() {
        let text = r#"{"type":"candidate","payload":{"component":"rtcp","foundation":"1","priority":2130706431,"protocol":"tcp","ip":"10.0.0.2","port":9,"type":"host"}}"#;
        let SignalMessage::Candidate(candidate) = SignalMessage::from_json(text).unwrap() else {
            panic!("expected candidate");
        };
        assert_eq!(candidate.component, CandidateComponent::Rtcp);
        assert_eq!(candidate.sdp_mid, None);
        assert_eq!(candidate.sdp_mline_index, None);
    }

    #[test]
    fn test_candidate_with_numeric_component() {
        let text = r#"{"type":"candidate","payload":{"component":1,"foundation":"3dbe0f3a","priority":2130706431,"protocol":"udp","ip":"192.168.1.20","port":51234,"type":"host","sdpMid":"0","sdpMLineIndex":0}}"#;
        let SignalMessage::Candidate(candidate) = SignalMessage::from_json(text).unwrap() else {
            panic!("expected candidate");
        };
        assert_eq!(candidate.component, CandidateComponent::Rtp);
        assert_eq!(
            candidate.to_candidate_line(),
            "candidate:3dbe0f3a 1 udp 2130706431 192.168.1.20 51234 typ host"
        );

        let rtcp = text.replace(r#""component":1"#, r#""component":2"#);
        let SignalMessage::Candidate(candidate) = SignalMessage::from_json(&rtcp).unwrap() else {
            panic!("expected candidate");
        };
        assert_eq!(candidate.component, CandidateComponent::Rtcp);
    }

    #[test]
    fn test_candidate_with_unknown_component_is_rejected() {
        let text = r#"{"type":"candidate","payload":{"component":7,"foundation":"1","priority":1,"protocol":"udp","ip":"10.0.0.2","port":9,"type":"host"}}"#;
        assert!(SignalMessage::from_json(text).is_err());
        let text = text.replace(r#""component":7"#, r#""component":"data""#);
        assert!(SignalMessage::from_json(&text).is_err());
    }

    #[test]
    fn test_candidate_line() {
        assert_eq!(
            sample_candidate().to_candidate_line(),
            "candidate:842163049 1 udp 1677729535 203.0.113.7 50123 typ srflx"
        );
    }

    #[test]
    fn test_error_notice_code_is_kebab_case() {
        let value = serde_json::to_value(SignalMessage::error(
            ErrorCode::RoutingMiss,
            "no device registered",
        ))
        .unwrap();
        assert_eq!(value["payload"]["code"], "routing-miss");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = SignalMessage::from_json(r#"{"type":"hello","payload":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        assert!(SignalMessage::from_json(r#"{"type":"register","payload":{"role":"viewer"}}"#)
            .is_err());
    }

    #[test]
    fn test_relay_originated() {
        assert!(SignalMessage::registered(Role::Device).is_relay_originated());
        assert!(!SignalMessage::register(Role::Device).is_relay_originated());
        assert_eq!(SignalMessage::Answer(SessionDescription::answer("x")).kind(), "answer");
    }
}
