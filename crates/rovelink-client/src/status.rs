use std::sync::Arc;

use rovelink_common::ErrorNotice;
use tokio::sync::{broadcast, watch};

use crate::data_channel::ChannelState;
use crate::negotiation::{NegotiationState, Notice};

const STATUS_CAPACITY: usize = 256;

/// Everything a viewer front end needs to render progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    StateChanged(NegotiationState),
    Notice(Notice),
    Channel(ChannelState),
    ChatLine(String),
    RelayError(ErrorNotice),
}

/// Fan-out for status updates. Lagging subscribers lose old events; the current negotiation
/// state is always available through [`StatusHub::watch_state`].
#[derive(Debug, Clone)]
pub struct StatusHub {
    events: broadcast::Sender<StatusEvent>,
    state: Arc<watch::Sender<NegotiationState>>,
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHub {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(STATUS_CAPACITY);
        let (state, _) = watch::channel(NegotiationState::Idle);
        Self {
            events,
            state: Arc::new(state),
        }
    }

    pub fn publish(&self, event: StatusEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn set_state(&self, state: NegotiationState) {
        self.state.send_replace(state);
        self.publish(StatusEvent::StateChanged(state));
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<NegotiationState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_changes_reach_both_channels() {
        let hub = StatusHub::new();
        let mut events = hub.subscribe();
        let mut watch = hub.watch_state();

        hub.set_state(NegotiationState::Initializing);

        assert_eq!(
            events.recv().await.unwrap(),
            StatusEvent::StateChanged(NegotiationState::Initializing)
        );
        watch.changed().await.unwrap();
        assert_eq!(*watch.borrow(), NegotiationState::Initializing);
        assert_eq!(hub.state(), NegotiationState::Initializing);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let hub = StatusHub::new();
        hub.publish(StatusEvent::ChatLine("nobody listening".into()));
        hub.set_state(NegotiationState::Ready);
        assert_eq!(hub.state(), NegotiationState::Ready);
    }
}
