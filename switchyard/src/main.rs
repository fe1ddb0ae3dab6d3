#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;

use args::Args;
use clap::Parser;
use switchyard_config::Config;
use switchyard_server::Server;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let _telemetry_guard = switchyard_telemetry::init(config.telemetry.as_ref(), &args.log)?;

    tracing::info!(config_path = %args.config.display(), "starting switchyard");
    log_pools(&config);

    let server = match args.listen {
        Some(listen) => Server::new(&config, None)?.with_listen_address(listen),
        None => Server::new(&config, None)?,
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    server.serve(shutdown).await?;

    tracing::info!("switchyard stopped");
    Ok(())
}

/// One line per configured provider pool
fn log_pools(config: &Config) {
    if config.providers.is_empty() {
        tracing::warn!("no providers configured; every request will fail");
    }

    for (provider, settings) in &config.providers {
        let active = settings.credentials.iter().filter(|credential| !credential.disabled).count();
        let fallbacks = config
            .fallback_chain
            .get(provider)
            .map(|chain| chain.iter().map(ToString::to_string).collect::<Vec<_>>().join(","))
            .unwrap_or_default();

        tracing::info!(
            %provider,
            credentials = settings.credentials.len(),
            active,
            fallbacks = %fallbacks,
            "credential pool loaded"
        );
    }
}

/// Cancel `shutdown` on `SIGINT` or `SIGTERM`
///
/// A handler that cannot be installed never fires; the other still does.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => tracing::info!("SIGINT received, draining"),
        () = terminate => tracing::info!("SIGTERM received, draining"),
    }

    shutdown.cancel();
}
