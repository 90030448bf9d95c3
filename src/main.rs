//! emberd - a small multi-client IRC daemon.

use std::time::Duration;

use emberd::config::Config;
use emberd::{
    with_address, with_graceful_shutdown, with_hostname, with_motd, with_network, with_tls,
    with_welcome, Server, ServerError, ServerOption,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_owned());
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .with_target(true)
        .init();

    info!(
        hostname = %config.server.hostname,
        network = %config.server.network,
        "starting emberd"
    );

    let shutdown = CancellationToken::new();

    let mut options: Vec<ServerOption> = vec![
        with_hostname(config.server.hostname.as_str()),
        with_address(config.listen.address.as_str()),
        with_graceful_shutdown(shutdown.clone(), SHUTDOWN_TIMEOUT),
    ];
    if !config.server.network.is_empty() {
        options.push(with_network(config.server.network.as_str()));
    }
    if !config.server.motd.is_empty() {
        options.push(with_motd(config.server.motd.as_str()));
    }
    if !config.server.welcome.is_empty() {
        options.push(with_welcome(config.server.welcome.as_str()));
    }
    if let Some(tls) = &config.tls {
        options.push(with_tls(tls.cert.as_str(), tls.key.as_str()));
    }

    let server = Server::new(options).map_err(|err| {
        error!(error = %err, "failed to configure server");
        err
    })?;

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    if let Some(tls) = config.tls.clone() {
        let server = server.clone();
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&tls.address).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!(addr = %tls.address, error = %err, "failed to bind TLS listener");
                    return;
                }
            };
            match server.serve(listener, server.tls_acceptor()).await {
                Ok(()) | Err(ServerError::Closed) => {}
                Err(err) => error!(error = %err, "TLS listener failed"),
            }
        });
    }

    let result = server.listen_and_serve().await;

    // Give the graceful-shutdown watcher time to drain the sessions the
    // listener left behind.
    let drain_deadline = tokio::time::Instant::now() + SHUTDOWN_TIMEOUT + Duration::from_secs(5);
    while !server.conns().is_empty() && tokio::time::Instant::now() < drain_deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    match result {
        Ok(()) | Err(ServerError::Closed) => Ok(()),
        Err(err) => Err(err.into()),
    }
}
