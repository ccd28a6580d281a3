//! Viewer-side negotiation state machine.
//!
//! States:
//! - IDLE: nothing set up
//! - INITIALIZING: fetching traversal servers, building the media session, waiting for the device
//! - READY: session built and device registered; `start` accepted
//! - OFFERING: offer being created
//! - NEGOTIATING: offer sent, waiting for answer and connectivity
//! - CONNECTED: connectivity established and a media track received
//! - FAILED: connectivity failed
//! - RESTARTING: automatic ICE restart offer being created
//!
//! The machine does no I/O. Each event returns the states it passed through and the actions the
//! runtime has to carry out, in order.

use std::collections::VecDeque;

use rovelink_common::{
    Error, IceCandidate, Result, Role, SdpType, SessionDescription, SignalMessage,
};
use tracing::{debug, info, warn};

use crate::types::RestartPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    #[default]
    Idle,
    Initializing,
    Ready,
    Offering,
    Negotiating,
    Connected,
    Failed,
    Restarting,
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::Initializing => "initializing",
            NegotiationState::Ready => "ready",
            NegotiationState::Offering => "offering",
            NegotiationState::Negotiating => "negotiating",
            NegotiationState::Connected => "connected",
            NegotiationState::Failed => "failed",
            NegotiationState::Restarting => "restarting",
        };
        f.write_str(name)
    }
}

/// Connectivity check state reported by the media session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationEvent {
    Startup,
    SessionConstructed,
    Registered(Role),
    StartRequested,
    OfferCreated(SessionDescription),
    /// The relay dropped our offer because no device is registered.
    OfferUndeliverable,
    DescriptionReceived(SessionDescription),
    CandidateReceived(IceCandidate),
    LocalCandidate(IceCandidate),
    TrackReceived,
    Connectivity(ConnectivityState),
    MediaError(String),
    TimedOut,
    TransportDropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Fetch traversal servers and construct the media session.
    FetchIceServers,
    CreateOffer { ice_restart: bool },
    Send(SignalMessage),
    ApplyRemoteDescription(SessionDescription),
    AddCandidate(IceCandidate),
    Report(Notice),
}

/// Conditions worth surfacing to whoever watches the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ConnectivityFailed,
    RestartScheduled { attempt: u32 },
    /// A failure arrived while a restart was already outstanding.
    FailureWhileRestarting { suppressed: u32 },
    RestartsExhausted,
    OfferUndeliverable,
    TimedOut(NegotiationState),
    MediaError(String),
    TransportDropped,
}

/// Result of feeding one event to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: NegotiationState,
    /// States entered while handling the event, in order.
    pub visited: Vec<NegotiationState>,
    pub actions: Vec<Action>,
}

impl Transition {
    fn stay(from: NegotiationState) -> Self {
        Self {
            from,
            visited: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn to(&self) -> NegotiationState {
        self.visited.last().copied().unwrap_or(self.from)
    }
}

#[derive(Debug, Default)]
pub struct NegotiationStateMachine {
    state: NegotiationState,
    policy: RestartPolicy,
    session_constructed: bool,
    device_registered: bool,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    /// True once the answer to the current offer has been applied.
    remote_applied: bool,
    awaiting_answer: bool,
    pending_candidates: VecDeque<IceCandidate>,
    ice_connected: bool,
    track_received: bool,
    restart_outstanding: bool,
    restarts_used: u32,
    suppressed_failures: u32,
}

impl NegotiationStateMachine {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn restart_outstanding(&self) -> bool {
        self.restart_outstanding
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    /// True when the machine sits in `Failed` with restart budget left and no offer in flight.
    /// The runtime arms a retry deadline for this case.
    pub fn retry_pending(&self) -> bool {
        self.state == NegotiationState::Failed
            && !self.restart_outstanding
            && !self.restarts_exhausted()
    }

    /// Failures recorded while a restart was outstanding.
    pub fn suppressed_failures(&self) -> u32 {
        self.suppressed_failures
    }

    pub fn handle(&mut self, event: NegotiationEvent) -> Result<Transition> {
        let mut transition = Transition::stay(self.state);

        match event {
            NegotiationEvent::Startup => {
                if self.state != NegotiationState::Idle {
                    return Err(Error::precondition(format!(
                        "startup requires idle, state is {}",
                        self.state
                    )));
                }
                self.enter(&mut transition, NegotiationState::Initializing);
                transition.actions.push(Action::FetchIceServers);
            }
            NegotiationEvent::SessionConstructed => {
                self.session_constructed = true;
                self.maybe_ready(&mut transition);
            }
            NegotiationEvent::Registered(role) => {
                if role == Role::Device {
                    self.device_registered = true;
                    self.maybe_ready(&mut transition);
                }
            }
            NegotiationEvent::StartRequested => {
                if self.state != NegotiationState::Ready {
                    return Err(Error::precondition(format!(
                        "device not ready or session not initialized (state is {})",
                        self.state
                    )));
                }
                self.enter(&mut transition, NegotiationState::Offering);
                transition
                    .actions
                    .push(Action::CreateOffer { ice_restart: true });
            }
            NegotiationEvent::OfferCreated(offer) => match self.state {
                NegotiationState::Offering | NegotiationState::Restarting => {
                    if self.state == NegotiationState::Restarting {
                        self.enter(&mut transition, NegotiationState::Offering);
                    }
                    self.local_description = Some(offer.clone());
                    self.remote_applied = false;
                    self.awaiting_answer = true;
                    transition.actions.push(Action::Send(SignalMessage::Offer(offer)));
                    self.enter(&mut transition, NegotiationState::Negotiating);
                }
                _ => debug!("stale offer ignored in state {}", self.state),
            },
            NegotiationEvent::OfferUndeliverable => {
                if self.awaiting_answer {
                    self.awaiting_answer = false;
                    self.restart_outstanding = false;
                    self.device_registered = false;
                    transition
                        .actions
                        .push(Action::Report(Notice::OfferUndeliverable));
                    self.enter(&mut transition, NegotiationState::Initializing);
                }
            }
            NegotiationEvent::DescriptionReceived(description) => {
                self.on_description(&mut transition, description);
            }
            NegotiationEvent::CandidateReceived(candidate) => {
                if self.remote_applied {
                    transition.actions.push(Action::AddCandidate(candidate));
                } else {
                    debug!(
                        "queueing remote candidate until the answer is applied ({} pending)",
                        self.pending_candidates.len() + 1
                    );
                    self.pending_candidates.push_back(candidate);
                }
            }
            NegotiationEvent::LocalCandidate(candidate) => {
                transition
                    .actions
                    .push(Action::Send(SignalMessage::Candidate(candidate)));
            }
            NegotiationEvent::TrackReceived => {
                self.track_received = true;
                self.maybe_connected(&mut transition);
            }
            NegotiationEvent::Connectivity(connectivity) => match connectivity {
                ConnectivityState::Connected | ConnectivityState::Completed => {
                    self.ice_connected = true;
                    self.maybe_connected(&mut transition);
                }
                ConnectivityState::Failed => {
                    self.ice_connected = false;
                    self.on_failure(&mut transition, Notice::ConnectivityFailed);
                }
                ConnectivityState::Disconnected | ConnectivityState::Closed => {
                    self.ice_connected = false;
                }
                ConnectivityState::New | ConnectivityState::Checking => {}
            },
            NegotiationEvent::MediaError(message) => {
                let notice = Notice::MediaError(message);
                match self.state {
                    NegotiationState::Offering => {
                        transition.actions.push(Action::Report(notice));
                        self.enter(&mut transition, NegotiationState::Ready);
                    }
                    NegotiationState::Restarting => {
                        self.restart_outstanding = false;
                        transition.actions.push(Action::Report(notice));
                        self.enter(&mut transition, NegotiationState::Failed);
                    }
                    NegotiationState::Negotiating | NegotiationState::Connected => {
                        self.on_failure(&mut transition, notice);
                    }
                    _ => transition.actions.push(Action::Report(notice)),
                }
            }
            NegotiationEvent::TimedOut => match self.state {
                NegotiationState::Initializing => {
                    transition
                        .actions
                        .push(Action::Report(Notice::TimedOut(self.state)));
                }
                NegotiationState::Negotiating => {
                    // The outstanding restart (if any) is abandoned so a fresh one can be issued.
                    self.restart_outstanding = false;
                    self.on_failure(&mut transition, Notice::TimedOut(self.state));
                }
                NegotiationState::Failed => {
                    self.on_failure(&mut transition, Notice::TimedOut(self.state));
                }
                _ => {}
            },
            NegotiationEvent::TransportDropped => {
                let from = self.state;
                *self = Self::new(self.policy);
                transition
                    .actions
                    .push(Action::Report(Notice::TransportDropped));
                if from != NegotiationState::Idle {
                    transition.visited.push(NegotiationState::Idle);
                }
            }
        }

        Ok(transition)
    }

    fn enter(&mut self, transition: &mut Transition, next: NegotiationState) {
        if self.state != next {
            info!("negotiation {} -> {}", self.state, next);
        }
        self.state = next;
        transition.visited.push(next);
    }

    fn maybe_ready(&mut self, transition: &mut Transition) {
        if self.state == NegotiationState::Initializing
            && self.session_constructed
            && self.device_registered
        {
            self.enter(transition, NegotiationState::Ready);
        }
    }

    fn maybe_connected(&mut self, transition: &mut Transition) {
        if self.state == NegotiationState::Negotiating && self.ice_connected && self.track_received
        {
            self.restart_outstanding = false;
            self.restarts_used = 0;
            self.enter(transition, NegotiationState::Connected);
        }
    }

    fn on_description(&mut self, transition: &mut Transition, description: SessionDescription) {
        if description.kind != SdpType::Answer {
            warn!("viewer received an {:?} description, ignoring", description.kind);
            return;
        }
        if !self.awaiting_answer {
            debug!("answer ignored in state {}: no offer outstanding", self.state);
            return;
        }

        self.awaiting_answer = false;
        self.remote_applied = true;
        self.remote_description = Some(description.clone());
        transition
            .actions
            .push(Action::ApplyRemoteDescription(description));
        transition
            .actions
            .extend(self.pending_candidates.drain(..).map(Action::AddCandidate));
    }

    fn on_failure(&mut self, transition: &mut Transition, notice: Notice) {
        if !matches!(
            self.state,
            NegotiationState::Negotiating | NegotiationState::Connected | NegotiationState::Failed
        ) {
            debug!("failure signal ignored in state {}", self.state);
            return;
        }

        if self.restart_outstanding {
            self.suppressed_failures += 1;
            warn!(
                "failure while a restart is outstanding; not issuing another offer ({} suppressed)",
                self.suppressed_failures
            );
            transition
                .actions
                .push(Action::Report(Notice::FailureWhileRestarting {
                    suppressed: self.suppressed_failures,
                }));
            return;
        }

        if self.state == NegotiationState::Failed {
            if self.restarts_exhausted() {
                debug!("failure signal ignored: restart budget exhausted");
                return;
            }
            transition.actions.push(Action::Report(notice));
            self.schedule_restart(transition);
            return;
        }

        transition.actions.push(Action::Report(notice));
        self.enter(transition, NegotiationState::Failed);

        if self.restarts_exhausted() {
            warn!(
                "giving up after {} automatic restart(s)",
                self.restarts_used
            );
            transition.actions.push(Action::Report(Notice::RestartsExhausted));
            return;
        }
        self.schedule_restart(transition);
    }

    fn restarts_exhausted(&self) -> bool {
        self.restarts_used >= self.policy.max_restarts
    }

    fn schedule_restart(&mut self, transition: &mut Transition) {
        self.restarts_used += 1;
        self.restart_outstanding = true;
        transition
            .actions
            .push(Action::Report(Notice::RestartScheduled {
                attempt: self.restarts_used,
            }));
        self.enter(transition, NegotiationState::Restarting);
        transition
            .actions
            .push(Action::CreateOffer { ice_restart: true });
    }
}
