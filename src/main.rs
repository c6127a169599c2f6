use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use toolgate::config::Config;
use toolgate::gateway::GatewayServer;
use toolgate::handlers::AppState;
use toolgate::logging::TracingSink;
use toolgate::supervisor::Supervisor;
use tracing::{error, info, warn};

/// Config file picked up from the working directory when no path is given
const DEFAULT_CONFIG_FILE: &str = "toolgate.toml";

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("toolgate=debug".parse().expect("valid log directive")),
        )
        .init();

    match dotenvy::dotenv() {
        Ok(path) => info!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Failed to load .env file"),
    }

    let config = Arc::new(load_config().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?);

    print_startup_banner(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Backends start in parallel with the gateway; nothing waits for them to be ready
    let supervisor = if config.supervisor.enabled {
        let services = config.backends.services();
        Some(Supervisor::launch(
            &config.supervisor,
            &services,
            Arc::new(TracingSink),
        ))
    } else {
        info!("Backend supervision disabled, expecting backends to be managed externally");
        None
    };

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let state = Arc::new(AppState::new(Arc::clone(&config)));
    let gateway = GatewayServer::new(bind_addr, state, shutdown_rx);
    let mut gateway_handle = tokio::spawn(async move {
        if let Err(e) = gateway.run().await {
            error!(error = %e, "Gateway server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM), or the gateway dying on its own
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
            _ = &mut gateway_handle => {
                warn!("Gateway stopped unexpectedly, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
            }
            _ = &mut gateway_handle => {
                warn!("Gateway stopped unexpectedly, shutting down...");
            }
        }
    }

    let _ = shutdown_tx.send(true);

    if let Some(ref supervisor) = supervisor {
        info!("Stopping backend processes...");
        supervisor.stop_all().await;
    }

    if !gateway_handle.is_finished() {
        let _ = tokio::time::timeout(Duration::from_secs(5), gateway_handle).await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Defaults, then the TOML file (first CLI argument or `toolgate.toml`), then the environment
fn load_config() -> anyhow::Result<Config> {
    let explicit = std::env::args().nth(1).map(PathBuf::from);

    let mut config = match explicit {
        Some(path) => {
            let config = Config::load(&path)?;
            info!(path = %path.display(), "Configuration loaded");
            config
        }
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            let config = Config::load(DEFAULT_CONFIG_FILE)?;
            info!(path = DEFAULT_CONFIG_FILE, "Configuration loaded");
            config
        }
        None => {
            info!("No configuration file, using defaults");
            Config::default()
        }
    };

    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting gateway");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        max_body_bytes = config.server.max_body_bytes,
        request_timeout_secs = config.server.request_timeout_secs,
        "Server configuration"
    );
    info!(
        pool_max_idle = config.server.pool_max_idle_per_host,
        pool_idle_timeout_secs = config.server.pool_idle_timeout_secs,
        "Backend client settings"
    );
    info!(
        enabled = config.supervisor.enabled,
        interpreter = %config.supervisor.interpreter,
        working_dir = ?config.supervisor.working_dir,
        shutdown_grace_period_secs = config.supervisor.shutdown_grace_period_secs,
        "Supervisor settings"
    );
    for (name, backend) in config.backends.named() {
        info!(backend = name, script = %backend.script, url = %backend.url, "Configured backend");
    }
    // Never log the token itself
    info!(
        configured = config.server.inference_auth_header().is_some(),
        "Inference API token"
    );
}
