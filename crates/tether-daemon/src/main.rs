//! tether-daemon: companion-link stack host.
//!
//! Single OS process running a Tokio async runtime. The daemon owns the
//! associated-peer store and the stack services; platform integrations
//! (Bluetooth peripherals, the calendar provider) register against the
//! running [`Stack`](stack::Stack).

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{info, warn};

use tether_crypto::AesGcmKeyWrapper;
use tether_daemon::config::DaemonConfig;
use tether_daemon::stack::Stack;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tether=info".parse()?),
        )
        .init();

    info!("tether daemon starting");

    let config = DaemonConfig::load()?;
    let stack = Stack::start(config, Arc::new(AesGcmKeyWrapper::new(load_kek()?)))?;

    let peers = stack.store().retrieve_all().await?;
    info!(associated_peers = peers.len(), "stack ready");

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");

    stack.shutdown();
    info!("daemon stopped");
    Ok(())
}

/// Key-encryption key for at-rest wrapping.
///
/// Production hosts inject a platform-keystore-backed wrapper instead;
/// the daemon falls back to `TETHER_KEK` (64 hex chars) or a boot-scoped
/// random key.
fn load_kek() -> anyhow::Result<[u8; 32]> {
    if let Ok(raw) = std::env::var("TETHER_KEK") {
        let bytes = hex::decode(&raw)?;
        let kek: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("TETHER_KEK must be 32 bytes of hex"))?;
        return Ok(kek);
    }
    warn!("TETHER_KEK not set; using a boot-scoped key (peers will not survive restart)");
    let mut kek = [0u8; 32];
    OsRng.fill_bytes(&mut kek);
    Ok(kek)
}
