#![forbid(unsafe_code)]

//! Rovelink viewer.
//!
//! Connects to the signaling relay, waits for the device, and after `/start` negotiates a
//! receive-only video session with a chat channel. Lines typed on stdin are sent as chat.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use rovelink_client::types::{
    DEFAULT_GREETING, DEFAULT_LOG_CAPACITY, DEFAULT_MAX_RESTARTS, DEFAULT_PEER_LABEL,
};
use rovelink_client::{
    ClientConfig, ClientHandle, RestartPolicy, StatusEvent, TransportPolicy, ViewerClient,
    WebRtcBackend,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rovelink-viewer")]
#[command(about = "Rovelink viewer - receive video and chat with a device")]
struct Args {
    /// Signaling relay websocket URL
    #[arg(
        long,
        env = "ROVELINK_SIGNAL_URL",
        default_value = "ws://127.0.0.1:3000/ws"
    )]
    signal_url: String,

    /// Endpoint returning relay/STUN server descriptors
    #[arg(long, env = "ROVELINK_ICE_URL")]
    ice_url: Option<String>,

    #[arg(
        long,
        env = "ROVELINK_TRANSPORT_POLICY",
        value_enum,
        default_value_t = TransportPolicy::All
    )]
    transport_policy: TransportPolicy,

    /// Sent when the chat channel opens
    #[arg(long, env = "ROVELINK_GREETING", default_value = DEFAULT_GREETING)]
    greeting: String,

    #[arg(long, env = "ROVELINK_PEER_LABEL", default_value = DEFAULT_PEER_LABEL)]
    peer_label: String,

    #[arg(long, env = "ROVELINK_LOG_CAPACITY", default_value_t = DEFAULT_LOG_CAPACITY)]
    log_capacity: usize,

    /// Seconds to wait for the device to register
    #[arg(long, env = "ROVELINK_REGISTRATION_TIMEOUT_SECS", default_value_t = 120)]
    registration_timeout_secs: u64,

    /// Seconds an offer may stay unanswered or unconnected
    #[arg(long, env = "ROVELINK_NEGOTIATION_TIMEOUT_SECS", default_value_t = 30)]
    negotiation_timeout_secs: u64,

    #[arg(long, env = "ROVELINK_MAX_RESTARTS", default_value_t = DEFAULT_MAX_RESTARTS)]
    max_restarts: u32,

    /// Milliseconds before retrying a restart whose offer could not be created
    #[arg(long, env = "ROVELINK_RESTART_RETRY_MS", default_value_t = 2000)]
    restart_retry_ms: u64,

    /// Begin negotiating as soon as the device is ready
    #[arg(long, default_value = "false")]
    auto_start: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "rovelink_client=info,rovelink_viewer=info")]
    log_level: String,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.signal_url.clone());
        config.ice_credentials_url = self.ice_url.clone();
        config.transport_policy = self.transport_policy;
        config.greeting = self.greeting.clone();
        config.peer_label = self.peer_label.clone();
        config.log_capacity = self.log_capacity;
        config.registration_timeout = Duration::from_secs(self.registration_timeout_secs);
        config.negotiation_timeout = Duration::from_secs(self.negotiation_timeout_secs);
        config.restart_policy = RestartPolicy {
            max_restarts: self.max_restarts,
        };
        config.restart_retry_delay = Duration::from_millis(self.restart_retry_ms);
        config
    }
}

async fn print_status(
    mut events: broadcast::Receiver<StatusEvent>,
    handle: ClientHandle,
    auto_start: bool,
) {
    loop {
        match events.recv().await {
            Ok(StatusEvent::StateChanged(state)) => {
                println!("[state] {state}");
                if auto_start && state == rovelink_client::NegotiationState::Ready {
                    if let Err(err) = handle.start().await {
                        warn!("auto start failed: {err}");
                    }
                }
            }
            Ok(StatusEvent::ChatLine(line)) => println!("{line}"),
            Ok(StatusEvent::Notice(notice)) => println!("[notice] {notice:?}"),
            Ok(StatusEvent::Channel(state)) => println!("[chat] {state:?}"),
            Ok(StatusEvent::RelayError(notice)) => {
                println!("[relay] {:?}: {}", notice.code, notice.message)
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("status output skipped {skipped} event(s)")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn read_commands(handle: ClientHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let result = if line == "/start" {
            handle.start().await
        } else {
            handle.send_text(line).await
        };
        if let Err(err) = result {
            println!("[error] {err}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    rovelink_common::init_tracing_with_default(&args.log_level);

    let config = args.client_config();
    let backend = WebRtcBackend::new(config.transport_policy);
    let client = ViewerClient::new(config, backend);
    let handle = client.handle();

    tokio::spawn(print_status(handle.subscribe(), handle.clone(), args.auto_start));
    tokio::spawn({
        let handle = handle.clone();
        async move {
            if let Err(err) = read_commands(handle).await {
                warn!("stdin reader stopped: {err}");
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            let _ = shutdown_tx.send(());
        }
    });

    client.run_with_shutdown(shutdown_rx).await?;
    Ok(())
}
