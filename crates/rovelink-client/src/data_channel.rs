//! Chat data channel bookkeeping.
//!
//! Only one channel is active at a time. Whichever side created it, the most recently announced
//! channel replaces the previous one and its callbacks stop mattering.

use std::collections::VecDeque;

use rovelink_common::{Error, Result};
use tracing::{debug, info};

pub const CHAT_CHANNEL_LABEL: &str = "chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAction {
    Send { channel: ChannelId, text: String },
    Logged(String),
    StateChanged(ChannelState),
}

/// Append-only chat transcript that drops the oldest lines past `capacity`.
#[derive(Debug, Clone)]
pub struct ChatLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl ChatLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Debug)]
pub struct DataChannelManager {
    active: Option<(ChannelId, ChannelState)>,
    log: ChatLog,
    greeting: String,
    peer_label: String,
}

impl DataChannelManager {
    pub fn new(
        greeting: impl Into<String>,
        peer_label: impl Into<String>,
        capacity: usize,
    ) -> Self {
        Self {
            active: None,
            log: ChatLog::new(capacity),
            greeting: greeting.into(),
            peer_label: peer_label.into(),
        }
    }

    pub fn active(&self) -> Option<ChannelId> {
        self.active.map(|(id, _)| id)
    }

    pub fn state(&self) -> Option<ChannelState> {
        self.active.map(|(_, state)| state)
    }

    pub fn log(&self) -> &ChatLog {
        &self.log
    }

    /// Makes `channel` the active channel. A previous channel is abandoned without a close line.
    pub fn attach(&mut self, channel: ChannelId, origin: ChannelOrigin) -> Vec<ChannelAction> {
        if let Some((previous, _)) = self.active {
            if previous != channel {
                debug!("data channel {channel} ({origin:?}) replaces {previous}");
            }
        }
        self.active = Some((channel, ChannelState::Connecting));
        vec![ChannelAction::StateChanged(ChannelState::Connecting)]
    }

    pub fn on_open(&mut self, channel: ChannelId) -> Vec<ChannelAction> {
        match self.active {
            Some((id, ChannelState::Connecting)) if id == channel => {}
            _ => return Vec::new(),
        }
        self.active = Some((channel, ChannelState::Open));
        info!("data channel {channel} open");

        let mut actions = vec![ChannelAction::StateChanged(ChannelState::Open)];
        actions.push(self.record("[System] Chat is ready".to_string()));
        actions.push(ChannelAction::Send {
            channel,
            text: self.greeting.clone(),
        });
        actions.push(self.record(format!("You: {}", self.greeting)));
        actions
    }

    pub fn on_message(&mut self, channel: ChannelId, text: &str) -> Vec<ChannelAction> {
        if self.active() != Some(channel) {
            return Vec::new();
        }
        vec![self.record(format!("{}: {}", self.peer_label, text))]
    }

    pub fn on_close(&mut self, channel: ChannelId, cause: &str) -> Vec<ChannelAction> {
        match self.active {
            Some((id, ChannelState::Connecting | ChannelState::Open)) if id == channel => {}
            _ => return Vec::new(),
        }
        self.close_active(channel, cause)
    }

    /// Closes whatever channel is active, used when the session itself is torn down.
    pub fn force_close(&mut self, cause: &str) -> Vec<ChannelAction> {
        match self.active {
            Some((id, ChannelState::Connecting | ChannelState::Open)) => {
                self.close_active(id, cause)
            }
            _ => Vec::new(),
        }
    }

    pub fn send(&mut self, text: &str) -> Result<Vec<ChannelAction>> {
        let channel = match self.active {
            Some((id, ChannelState::Open)) => id,
            _ => return Err(Error::precondition("chat channel is not open")),
        };
        Ok(vec![
            ChannelAction::Send {
                channel,
                text: text.to_string(),
            },
            self.record(format!("You: {text}")),
        ])
    }

    fn close_active(&mut self, channel: ChannelId, cause: &str) -> Vec<ChannelAction> {
        self.active = Some((channel, ChannelState::Closed));
        info!("data channel {channel} closed: {cause}");
        vec![
            ChannelAction::StateChanged(ChannelState::Closed),
            self.record(format!("[System] Chat closed due to {cause}")),
        ]
    }

    fn record(&mut self, line: String) -> ChannelAction {
        self.log.push(line.clone());
        ChannelAction::Logged(line)
    }
}
