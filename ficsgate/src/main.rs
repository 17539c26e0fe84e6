use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ficsgate::config::Config;
use ficsgate::gate;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Arc::new(Config::from_env());

    let listener = match TcpListener::bind(("0.0.0.0", cfg.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(port = cfg.port, err = %e, "unable to bind listener");
            std::process::exit(1);
        }
    };
    info!(port = cfg.port, upstream = %cfg.fics_addr, "gateway listening");

    tokio::select! {
        res = gate::run(listener, Arc::clone(&cfg)) => {
            if let Err(e) = res {
                error!(err = %e, "accept loop failed");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }
}
