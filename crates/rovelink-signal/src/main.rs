#![forbid(unsafe_code)]

//! Rovelink signaling relay.
//!
//! The relay:
//! 1. Registers the device connection by role
//! 2. Delivers viewer offers to the device
//! 3. Relays answers and candidates back
//! 4. Never sees media

use std::io::ErrorKind;
use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use rovelink_common::helpers::env_bool;
use rovelink_signal::{serve, ws_signaling_url_for_bound_addr, Relay};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rovelink-signal")]
#[command(about = "Rovelink signaling relay - brokers device/viewer handshakes")]
struct Args {
    /// HTTP/websocket listen address
    #[arg(long, env = "ROVELINK_SIGNAL_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "rovelink_signal=info,tower_http=info")]
    log_level: String,
}

fn check_public_bind_allowed(addr: SocketAddr) -> Result<()> {
    if addr.ip().is_loopback() {
        return Ok(());
    }
    if env_bool("ROVELINK_ALLOW_PUBLIC_BIND", false) {
        return Ok(());
    }
    Err(anyhow::anyhow!(
        "refusing non-loopback bind without ROVELINK_ALLOW_PUBLIC_BIND=1"
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    rovelink_common::init_tracing_with_default(&args.log_level);

    check_public_bind_allowed(args.listen)?;

    let listener = match TcpListener::bind(args.listen).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::AddrInUse => {
            let fallback_addr = SocketAddr::new(args.listen.ip(), 0);
            warn!(
                "relay bind {} is already in use, falling back to {}",
                args.listen, fallback_addr
            );
            TcpListener::bind(fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };
    let bound_addr = listener.local_addr()?;
    info!("relay listening on {}", bound_addr);
    info!(
        "relay signaling url {}",
        ws_signaling_url_for_bound_addr(bound_addr)
    );

    serve(listener, Relay::new()).await?;
    Ok(())
}
