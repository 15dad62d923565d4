//! tessera-relayer: the swap relayer daemon.
//!
//! Single OS process running a Tokio runtime. Makers and resolvers connect
//! over TCP and exchange newline-delimited JSON envelopes; a background
//! sweeper settles, times out and expires orders.

mod config;
mod rpc;

use std::sync::Arc;
use std::time::Duration;

use tessera_coordinator::{ChainAdapter, Clock, LocalChain, SwapCoordinator, SystemClock};
use tessera_types::ChainId;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{load_or_create_signing_key, ChainKind, RelayerConfig};
use crate::rpc::RpcServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayerConfig::load()?;
    init_tracing(&config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Tessera relayer starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let signing_key = load_or_create_signing_key(&config.signing_key_path())?;
    info!(
        relayer_key = %hex::encode(signing_key.verifying_key().as_bytes()),
        "grant signing key loaded"
    );

    let db = Arc::new(tokio::sync::Mutex::new(tessera_db::open(
        &data_dir.join("tessera.db"),
    )?));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut builder = SwapCoordinator::builder(signing_key.clone(), clock.clone())
        .timeouts(config.timeouts.stage_timeouts())
        .event_buffer(config.relayer.event_buffer)
        .database(db);
    for chain in &config.chains {
        let adapter: Arc<dyn ChainAdapter> = match chain.kind {
            ChainKind::Local => Arc::new(LocalChain::new(
                ChainId::new(chain.id.as_str()),
                signing_key.verifying_key(),
                clock.clone(),
            )),
        };
        info!(chain = %chain.id, kind = ?chain.kind, "chain registered");
        builder = builder.chain(adapter);
    }
    let coordinator = Arc::new(builder.build().await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(coordinator.clone().run_sweeper(
        Duration::from_secs(config.timeouts.sweep_interval_secs.max(1)),
        shutdown_rx,
    ));

    let server = RpcServer::bind(
        coordinator,
        &config.network.listen_addr,
        config.network.max_connections,
    )
    .await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        error!(error = %e, "sweeper task failed");
    }

    info!("Tessera relayer stopped");
    Ok(())
}

/// `RUST_LOG` wins over the configured level; logs go to stderr unless a
/// file is configured.
fn init_tracing(config: &RelayerConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.logging.level)?,
    };

    if config.logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    }
    Ok(())
}
