use std::time::Duration;

pub const DEFAULT_GREETING: &str = "Hello from viewer!";
pub const DEFAULT_PEER_LABEL: &str = "Device";
pub const DEFAULT_LOG_CAPACITY: usize = 500;
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RESTARTS: u32 = 3;
pub const DEFAULT_RESTART_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Which candidate types the media session may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TransportPolicy {
    /// Host, reflexive and relay candidates.
    #[default]
    All,
    /// Relay candidates only; needs working relay credentials.
    Relay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Automatic restarts allowed before giving up; the budget refills on reaching `Connected`.
    pub max_restarts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub signaling_url: String,
    /// Endpoint returning relay/STUN descriptors; `None` uses the static fallback.
    pub ice_credentials_url: Option<String>,
    pub transport_policy: TransportPolicy,
    /// Sent as a liveness check when the data channel opens.
    pub greeting: String,
    /// Prefix for inbound chat lines.
    pub peer_label: String,
    pub log_capacity: usize,
    pub registration_timeout: Duration,
    pub negotiation_timeout: Duration,
    pub restart_policy: RestartPolicy,
    /// Wait before retrying a restart whose offer could not be created.
    pub restart_retry_delay: Duration,
}

impl ClientConfig {
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            ice_credentials_url: None,
            transport_policy: TransportPolicy::default(),
            greeting: DEFAULT_GREETING.to_string(),
            peer_label: DEFAULT_PEER_LABEL.to_string(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            restart_policy: RestartPolicy::default(),
            restart_retry_delay: DEFAULT_RESTART_RETRY_DELAY,
        }
    }
}
