use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use wayback_proxy::args::Args;
use wayback_proxy::config::{load_config, SharedConfig};
use wayback_proxy::reload;
use wayback_proxy::ProxyServer;

fn main() -> Result<()> {
    wayback_proxy::logging::init_dual_logging();

    let args = Args::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_proxy(args))
}

async fn run_proxy(args: Args) -> Result<()> {
    // Load configuration; a bad file or flag is a fatal startup error
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    info!("Target date: {}", config.proxy.target_date);
    info!("Redis: {}", config.cache.redis_url);
    info!("Access mode: {:?}", config.access.mode);
    if config.throttle.default_speed() != wayback_proxy::Speed::Unlimited {
        info!("Throttle: {}", config.throttle.speed);
    }
    if config.header_bar.enabled {
        info!("Header bar: {:?}", config.header_bar.position);
    }
    if config.landing_page.enabled {
        info!("Landing page: enabled");
    }
    if config.admin.enabled {
        let auth = if config.admin.password.is_empty() {
            "NO PASSWORD - surface will refuse requests"
        } else {
            "password"
        };
        info!("Admin: enabled (auth: {})", auth);
    }

    let listen_addr = format!("{}:{}", config.proxy.host, config.proxy.port);
    let has_config_file = config.config_path.is_some();

    let shared = SharedConfig::new(config);
    let server = Arc::new(ProxyServer::new(shared.clone())?);
    server.startup().await;

    // Live reload only makes sense with a file to re-read
    if has_config_file {
        tokio::spawn(reload::run_reload_listener(shared.clone()));
    }

    let listener = match TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", listen_addr, e);
            return Err(e.into());
        }
    };
    info!("Wayback proxy listening on {}", listen_addr);

    // Graceful shutdown: stop accepting, cancel the crawler, give active
    // responses a grace window
    let server_for_shutdown = Arc::clone(&server);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        server_for_shutdown.graceful_shutdown().await;
        info!("Shutdown complete");
        std::process::exit(0);
    });

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    if let Err(e) = server.handle_client(stream, addr).await {
                        error!("Error handling client {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Resolve when the operator asks the proxy to exit.
///
/// An exhibition box gets Ctrl+C from a console and SIGTERM from its
/// service manager; either one starts the graceful shutdown.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    let _ = signal::ctrl_c().await;
}
