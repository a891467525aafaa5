//! pairgate binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use pairgate::api::{serve, AppState};
use pairgate::cli::{parse_args, print_help, print_version};
use pairgate::config::{Config, StoreBackend};
use pairgate::{
    logging, LoopbackFactory, MemorySessionStore, SessionManager, SessionStore,
    SqliteSessionStore,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("Try 'pairgate --help' for more information.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_with_filter(Some(config.log_filter()), config.log_format()) {
        eprintln!("warning: logging already initialized: {e}");
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "pairgate terminated");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> pairgate::Result<()> {
    info!("pairgate v{}", env!("CARGO_PKG_VERSION"));

    let server_config = config
        .to_server_config()
        .map_err(|e| pairgate::GatewayError::Validation(e.to_string()))?;

    let sqlite = match config.store.backend {
        StoreBackend::Sqlite => {
            let store = SqliteSessionStore::open(&config.store.database_url).await?;
            info!(url = %config.store.database_url, "sqlite session store ready");
            Some(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("using in-memory session store; sessions are lost on exit");
            None
        }
    };
    let store: Arc<dyn SessionStore> = match &sqlite {
        Some(store) => Arc::clone(store) as Arc<dyn SessionStore>,
        None => Arc::new(MemorySessionStore::new()),
    };

    let orchestrator = config.orchestrator_config();
    let stop_timeout = orchestrator.stop_timeout;
    let manager = Arc::new(SessionManager::new(
        store,
        Arc::new(LoopbackFactory::default()),
        orchestrator,
    ));

    let resumer = manager.spawn_resumer();

    let served = serve(
        server_config,
        AppState::new(Arc::clone(&manager)),
        shutdown_signal(),
    )
    .await;

    info!("shutting down");
    resumer.abort();
    // Each worker is bounded by the stop timeout; allow one extra round.
    match tokio::time::timeout(stop_timeout * 2, manager.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "failed to stop sessions"),
        Err(_) => warn!("sessions did not stop in time"),
    }

    if let Some(store) = sqlite {
        store.close().await;
    }

    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
