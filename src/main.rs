use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use http_forward_proxy::{
    AuthConfig, Config, ConnectionHandler, DirectTcp, Relay, Server, load_config,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// HTTP proxy
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML config file; flags and environment override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// http proxy address [default: 127.0.0.1:3000]
    #[arg(long, env = "PROXY_ADDRESS")]
    proxy_addr: Option<String>,

    /// proxy auth username
    #[arg(long, env = "PROXY_USERNAME")]
    proxy_username: Option<String>,

    /// proxy auth password
    #[arg(long, env = "PROXY_PASSWORD", hide_env_values = true)]
    proxy_password: Option<String>,

    /// enable debug log level
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => Config::default(),
        };

        if self.proxy_username.is_some() || self.proxy_password.is_some() {
            let file_auth = config.auth.take().unwrap_or_default();
            config.auth = Some(AuthConfig {
                username: self.proxy_username.unwrap_or(file_auth.username),
                password: self.proxy_password.unwrap_or(file_auth.password),
            });
        }

        if let Some(addr) = self.proxy_addr {
            let (ip, port) = addr
                .rsplit_once(':')
                .with_context(|| format!("Proxy address {addr} has no port"))?;
            config.listen.ip = ip.to_string();
            config.listen.port = port
                .parse()
                .with_context(|| format!("Invalid port in proxy address {addr}"))?;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = args.into_config()?;
    let addr = config.listen_addr();
    info!(
        listen_addr = %addr,
        auth = config.auth_enabled(),
        max_connections = ?config.listen.max_connections,
        relay_max_secs = config.relay.max_duration_secs,
        "Configuration loaded"
    );

    let handler = ConnectionHandler::new(
        config.authenticator(),
        Arc::new(DirectTcp),
        Relay::new(config.relay.max_duration()),
    );
    let mut server = Server::bind(&addr, handler)
        .await
        .context("proxy server")?
        .with_shutdown_grace(config.relay.shutdown_grace());
    if let Some(max) = config.listen.max_connections {
        server = server.with_max_connections(max);
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    server.serve(cancel).await.context("proxy server")?;
    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
        }
        () = terminate => {}
    }

    info!("Shutdown signal received");
    cancel.cancel();
}
