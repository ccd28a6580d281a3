//! Traversal server discovery.
//!
//! The credential endpoint is an external service. Anything that goes wrong while talking to
//! it degrades to a STUN-only fallback; callers never see an error.

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

pub const FALLBACK_STUN_URL: &str = "stun:stun.l.google.com:19302";
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// One relay/STUN server descriptor, in the shape browsers accept for `iceServers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn is_stun(&self) -> bool {
        self.urls
            .iter()
            .any(|url| url.starts_with("stun:") || url.starts_with("stuns:"))
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Urls {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Urls::deserialize(deserializer)? {
        Urls::One(url) => vec![url],
        Urls::Many(urls) => urls,
    })
}

/// STUN-only list used whenever the credential endpoint cannot be used.
pub fn fallback_ice_servers() -> Vec<IceServer> {
    vec![IceServer::stun(FALLBACK_STUN_URL)]
}

pub fn parse_ice_servers(body: &str) -> Result<Vec<IceServer>> {
    let servers: Vec<IceServer> = serde_json::from_str(body)?;
    if servers.iter().any(|server| server.urls.is_empty()) {
        return Err(anyhow!("ice server descriptor without urls"));
    }
    Ok(servers)
}

#[derive(Debug, Clone)]
pub struct IceServerProvider {
    url: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl IceServerProvider {
    pub fn new(url: Option<String>) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            timeout: FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the configured servers, or the fallback list on any failure.
    pub async fn fetch(&self) -> Vec<IceServer> {
        let Some(url) = self.url.as_deref() else {
            info!("no ice credential endpoint configured, using fallback servers");
            return fallback_ice_servers();
        };

        match self.try_fetch(url).await {
            Ok(servers) if !servers.is_empty() => {
                info!("fetched {} ice server(s)", servers.len());
                servers
            }
            Ok(_) => {
                warn!("ice credential endpoint returned no servers, using fallback");
                fallback_ice_servers()
            }
            Err(err) => {
                warn!("failed to fetch ice servers: {err:#}, using fallback");
                fallback_ice_servers()
            }
        }
    }

    async fn try_fetch(&self, url: &str) -> Result<Vec<IceServer>> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("ice credential endpoint returned {status}"));
        }
        let body = response.text().await?;
        parse_ice_servers(&body)
    }
}
