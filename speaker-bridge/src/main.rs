use std::process::ExitCode;
use std::sync::Arc;

use accessory_host::{AccessoryInfo, AccessoryServer, SpeakerAccessory};
use anyhow::{Context, Result};
use tracing::{error, info, warn};
use volume_sync::{init_logging_from_env, SyncController, SystemVolume};

pub mod config;
pub mod identity;

use config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_logging_from_env() {
        eprintln!("speaker-bridge: {e}");
        return ExitCode::FAILURE;
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Start the bridge and serve until a termination signal or a fatal error
async fn run() -> Result<()> {
    let config = Config::from_env()?;
    config.log_summary();

    let name = match config.accessory_name {
        Some(name) => name,
        None => {
            let user = identity::current_user_name()?;
            info!(%user, "Creating speaker accessory for current user");
            identity::accessory_name(&user)
        }
    };

    let accessory = Arc::new(SpeakerAccessory::new(AccessoryInfo::new(name)));
    let source = Arc::new(SystemVolume::new(config.backend));

    let controller = SyncController::initialize(source, Arc::clone(&accessory), config.sync)
        .await
        .context("Failed to read the initial desktop volume")?;

    let pin = config.server.pin.clone();
    let server = AccessoryServer::start(config.server, accessory)
        .await
        .context("Failed to start the accessory host")?;
    info!(url = server.base_url(), %pin, "Accessory ready for pairing");

    let mut sync = controller.spawn();

    let outcome = tokio::select! {
        result = sync.wait() => result.context("Desktop volume sync stopped"),
        signal = termination_signal() => {
            info!(signal, "Shutting down");
            Ok(())
        }
    };

    let sync_stopped = sync.shutdown().await;
    server
        .shutdown()
        .await
        .context("Failed to stop the accessory host")?;

    outcome?;
    sync_stopped.context("Desktop volume sync did not stop cleanly")
}

/// Resolves with the name of the first termination signal received
async fn termination_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => tokio::select! {
                _ = ctrl_c() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
        "Ctrl-C"
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
