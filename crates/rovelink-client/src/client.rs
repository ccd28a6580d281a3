use std::collections::VecDeque;

use rovelink_common::{Error, ErrorCode, Result, SignalMessage};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::data_channel::{ChannelAction, DataChannelManager};
use crate::ice::IceServerProvider;
use crate::media::{MediaBackend, MediaEvent, MediaEventReceiver, MediaEventSender, MediaSession};
use crate::negotiation::{
    Action, ConnectivityState, NegotiationEvent, NegotiationState, NegotiationStateMachine,
    Transition,
};
use crate::signaling::{SignalSender, SignalingClient};
use crate::status::{StatusEvent, StatusHub};
use crate::types::ClientConfig;

const COMMAND_QUEUE: usize = 16;
const CLOSE_CAUSE_ICE: &str = "ICE failure";
const CLOSE_CAUSE_REMOTE: &str = "remote close";
const CLOSE_CAUSE_SIGNALING: &str = "signaling disconnect";
const CLOSE_CAUSE_SHUTDOWN: &str = "shutdown";

enum Command {
    Start(oneshot::Sender<Result<()>>),
    SendText(String, oneshot::Sender<Result<()>>),
}

/// Control surface for a running [`ViewerClient`].
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<Command>,
    status: StatusHub,
}

impl ClientHandle {
    /// Begins negotiation. Fails unless the session is built and the device is registered.
    pub async fn start(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Start(tx), rx).await
    }

    /// Sends a chat line over the open data channel.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::SendText(text.into(), tx), rx).await
    }

    async fn request(&self, command: Command, reply: oneshot::Receiver<Result<()>>) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::internal("viewer client is not running"))?;
        reply
            .await
            .map_err(|_| Error::internal("viewer client stopped before replying"))?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<NegotiationState> {
        self.status.watch_state()
    }

    pub fn state(&self) -> NegotiationState {
        self.status.state()
    }
}

pub struct ViewerClient<B: MediaBackend> {
    config: ClientConfig,
    backend: B,
    status: StatusHub,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
}

impl<B: MediaBackend> ViewerClient<B> {
    pub fn new(config: ClientConfig, backend: B) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        Self {
            config,
            backend,
            status: StatusHub::new(),
            commands_tx,
            commands_rx,
        }
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            commands: self.commands_tx.clone(),
            status: self.status.clone(),
        }
    }

    pub async fn run(self) -> Result<()> {
        self.run_inner(None).await
    }

    pub async fn run_with_shutdown(self, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        self.run_inner(Some(shutdown_rx)).await
    }

    async fn run_inner(self, mut shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let Self {
            config,
            backend,
            status,
            commands_tx: _commands_tx,
            mut commands_rx,
        } = self;

        let mut signaling = SignalingClient::connect(&config.signaling_url).await?;
        let (media_tx, mut media_rx): (MediaEventSender, MediaEventReceiver) =
            mpsc::unbounded_channel();

        let mut runtime = Runtime {
            ice: IceServerProvider::new(config.ice_credentials_url.clone()),
            machine: NegotiationStateMachine::new(config.restart_policy),
            chat: DataChannelManager::new(
                config.greeting.clone(),
                config.peer_label.clone(),
                config.log_capacity,
            ),
            signal: signaling.sender(),
            config,
            backend,
            session: None,
            media_tx,
            status,
            deadline: None,
            last_failure: None,
            offer_error: None,
        };

        runtime.dispatch(NegotiationEvent::Startup).await?;

        loop {
            let deadline = runtime.deadline;
            tokio::select! {
                _ = async {
                    if let Some(rx) = &mut shutdown_rx {
                        let _ = rx.await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                } => {
                    info!("viewer shutdown requested");
                    runtime.teardown(CLOSE_CAUSE_SHUTDOWN).await;
                    return Ok(());
                }

                message = signaling.recv() => {
                    match message {
                        Some(message) => runtime.on_signal(message).await,
                        None => {
                            warn!("signaling relay connection lost");
                            runtime.teardown(CLOSE_CAUSE_SIGNALING).await;
                            let dropped = runtime.dispatch(NegotiationEvent::TransportDropped).await;
                            if let Err(err) = dropped {
                                debug!("transport drop handling: {err}");
                            }
                            return Err(Error::transport_drop("signaling relay connection closed"));
                        }
                    }
                }

                Some(event) = media_rx.recv() => {
                    runtime.on_media(event).await;
                }

                Some(command) = commands_rx.recv() => {
                    runtime.on_command(command).await;
                }

                _ = async {
                    match deadline {
                        Some(at) => time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let state = runtime.machine.state();
                    runtime.deadline = None;
                    warn!("deadline expired in state {state}");
                    if let Err(err) = runtime.dispatch(NegotiationEvent::TimedOut).await {
                        warn!("timeout handling failed: {err}");
                    }
                    if state == NegotiationState::Initializing {
                        runtime.teardown(CLOSE_CAUSE_SHUTDOWN).await;
                        return Err(Error::timeout(
                            "device did not register before the registration deadline",
                        ));
                    }
                }
            }
        }
    }
}

struct Runtime<B: MediaBackend> {
    config: ClientConfig,
    backend: B,
    session: Option<B::Session>,
    media_tx: MediaEventSender,
    ice: IceServerProvider,
    machine: NegotiationStateMachine,
    chat: DataChannelManager,
    signal: SignalSender,
    status: StatusHub,
    deadline: Option<Instant>,
    /// Cause reported when the chat channel closes underneath us.
    last_failure: Option<&'static str>,
    /// Set when the most recent offer could not be created.
    offer_error: Option<String>,
}

impl<B: MediaBackend> Runtime<B> {
    async fn dispatch(&mut self, event: NegotiationEvent) -> Result<()> {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let transition = self.machine.handle(event)?;
            self.apply(transition, &mut queue).await?;
        }
        Ok(())
    }

    async fn apply(
        &mut self,
        transition: Transition,
        queue: &mut VecDeque<NegotiationEvent>,
    ) -> Result<()> {
        for state in &transition.visited {
            self.status.set_state(*state);
        }
        if !transition.visited.is_empty() {
            self.deadline = match transition.to() {
                NegotiationState::Initializing => {
                    Some(Instant::now() + self.config.registration_timeout)
                }
                NegotiationState::Negotiating => {
                    Some(Instant::now() + self.config.negotiation_timeout)
                }
                NegotiationState::Failed if self.machine.retry_pending() => {
                    Some(Instant::now() + self.config.restart_retry_delay)
                }
                _ => None,
            };
        }

        for action in transition.actions {
            self.execute(action, queue).await?;
        }
        Ok(())
    }

    async fn execute(
        &mut self,
        action: Action,
        queue: &mut VecDeque<NegotiationEvent>,
    ) -> Result<()> {
        match action {
            Action::FetchIceServers => {
                if self.session.is_some() {
                    queue.push_back(NegotiationEvent::SessionConstructed);
                    return Ok(());
                }
                let servers = self.ice.fetch().await;
                let session = self.backend.open(servers, self.media_tx.clone()).await?;
                info!("media session constructed");
                self.session = Some(session);
                queue.push_back(NegotiationEvent::SessionConstructed);
            }
            Action::CreateOffer { ice_restart } => {
                let Some(session) = self.session.as_ref() else {
                    self.offer_error = Some("no media session".into());
                    queue.push_back(NegotiationEvent::MediaError("no media session".into()));
                    return Ok(());
                };
                match session.create_offer(ice_restart).await {
                    Ok(offer) => queue.push_back(NegotiationEvent::OfferCreated(offer)),
                    Err(err) => {
                        warn!("offer creation failed: {err}");
                        self.offer_error = Some(err.to_string());
                        queue.push_back(NegotiationEvent::MediaError(err.to_string()));
                    }
                }
            }
            Action::Send(message) => self.signal.send(message).await?,
            Action::ApplyRemoteDescription(description) => {
                if let Some(session) = self.session.as_ref() {
                    if let Err(err) = session.apply_remote_description(description).await {
                        warn!("failed to apply answer: {err}");
                        queue.push_back(NegotiationEvent::MediaError(err.to_string()));
                    }
                }
            }
            Action::AddCandidate(candidate) => {
                if let Some(session) = self.session.as_ref() {
                    if let Err(err) = session.add_remote_candidate(candidate).await {
                        warn!("failed to add remote candidate: {err}");
                    }
                }
            }
            Action::Report(notice) => {
                info!("notice: {notice:?}");
                self.status.publish(StatusEvent::Notice(notice));
            }
        }
        Ok(())
    }

    async fn on_signal(&mut self, message: SignalMessage) {
        let event = match message {
            SignalMessage::Registered(payload) => NegotiationEvent::Registered(payload.role),
            SignalMessage::Answer(description) | SignalMessage::Offer(description) => {
                NegotiationEvent::DescriptionReceived(description)
            }
            SignalMessage::Candidate(candidate) => NegotiationEvent::CandidateReceived(candidate),
            SignalMessage::Error(notice) => {
                warn!("relay reported {:?}: {}", notice.code, notice.message);
                let undeliverable = notice.code == ErrorCode::RoutingMiss;
                self.status.publish(StatusEvent::RelayError(notice));
                if !undeliverable {
                    return;
                }
                NegotiationEvent::OfferUndeliverable
            }
            SignalMessage::Register(_) => {
                debug!("ignoring register message addressed to a viewer");
                return;
            }
        };
        if let Err(err) = self.dispatch(event).await {
            warn!("signal handling failed: {err}");
        }
    }

    async fn on_media(&mut self, event: MediaEvent) {
        let result = match event {
            MediaEvent::LocalCandidate(candidate) => {
                self.dispatch(NegotiationEvent::LocalCandidate(candidate)).await
            }
            MediaEvent::GatheringComplete => {
                debug!("local candidate gathering complete");
                Ok(())
            }
            MediaEvent::Connectivity(state) => {
                match state {
                    ConnectivityState::Failed => self.last_failure = Some(CLOSE_CAUSE_ICE),
                    ConnectivityState::Connected | ConnectivityState::Completed => {
                        self.last_failure = None
                    }
                    _ => {}
                }
                self.dispatch(NegotiationEvent::Connectivity(state)).await
            }
            MediaEvent::TrackReceived { kind } => {
                debug!("track received: {kind}");
                self.dispatch(NegotiationEvent::TrackReceived).await
            }
            MediaEvent::ChannelAnnounced {
                channel,
                origin,
                label,
            } => {
                debug!("data channel '{label}' announced as {channel}");
                let actions = self.chat.attach(channel, origin);
                self.apply_channel(actions).await;
                Ok(())
            }
            MediaEvent::ChannelOpen(channel) => {
                let actions = self.chat.on_open(channel);
                self.apply_channel(actions).await;
                Ok(())
            }
            MediaEvent::ChannelMessage { channel, text } => {
                let actions = self.chat.on_message(channel, &text);
                self.apply_channel(actions).await;
                Ok(())
            }
            MediaEvent::ChannelClosed(channel) => {
                let cause = self.last_failure.unwrap_or(CLOSE_CAUSE_REMOTE);
                let actions = self.chat.on_close(channel, cause);
                self.apply_channel(actions).await;
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!("media event handling failed: {err}");
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                self.offer_error = None;
                let result = match self.dispatch(NegotiationEvent::StartRequested).await {
                    Ok(()) => match self.offer_error.take() {
                        Some(message) => Err(Error::negotiation(format!(
                            "offer creation failed: {message}"
                        ))),
                        None => Ok(()),
                    },
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            Command::SendText(text, reply) => {
                let result = match self.chat.send(&text) {
                    Ok(actions) => {
                        self.apply_channel(actions).await;
                        Ok(())
                    }
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn apply_channel(&mut self, actions: Vec<ChannelAction>) {
        for action in actions {
            match action {
                ChannelAction::Send { channel, text } => {
                    if let Some(session) = self.session.as_ref() {
                        if let Err(err) = session.send_text(channel, text).await {
                            warn!("chat send failed: {err}");
                        }
                    }
                }
                ChannelAction::Logged(line) => {
                    info!("{line}");
                    self.status.publish(StatusEvent::ChatLine(line));
                }
                ChannelAction::StateChanged(state) => {
                    self.status.publish(StatusEvent::Channel(state));
                }
            }
        }
    }

    async fn teardown(&mut self, cause: &str) {
        let actions = self.chat.force_close(cause);
        self.apply_channel(actions).await;
        if let Some(session) = self.session.take() {
            if let Err(err) = session.close().await {
                debug!("media session close: {err}");
            }
        }
    }
}
