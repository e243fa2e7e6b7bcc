//! mcp-proxy binary: load the server list, connect every backend, then serve
//! the aggregated session over stdio or HTTP/SSE until asked to stop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use mcp_proxy::config::{load_config, positive_seconds, ProxyOptions};
use mcp_proxy::logging::{init_tracing, LogSettings};
use mcp_proxy::frontend::{self, sse};
use mcp_proxy::ProxySession;

/// How the aggregated session is exposed.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Transport {
    Stdio,
    Sse,
}

/// Aggregate several MCP servers behind a single MCP server.
#[derive(Parser, Debug)]
#[command(name = "mcp-proxy", version, about)]
struct Args {
    /// Server list (JSON, or YAML for .yaml/.yml).
    #[arg(short, long, default_value = "mcp-servers.json")]
    config: PathBuf,

    /// Frontend transport.
    #[arg(short = 't', long = "type", value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// Listen address for the sse transport.
    #[arg(long, default_value = sse::DEFAULT_HOST)]
    host: String,

    /// Listen port for the sse transport.
    #[arg(short, long, default_value_t = sse::DEFAULT_PORT)]
    port: u16,

    /// Per-backend handshake timeout in seconds [env: MCP_PROXY_CONNECT_TIMEOUT].
    #[arg(long)]
    connect_timeout: Option<f64>,

    /// Deadline for connecting all backends, in seconds.
    #[arg(long)]
    connect_all_timeout: Option<f64>,

    /// Deadline for shutting all backends down, in seconds.
    #[arg(long)]
    disconnect_timeout: Option<f64>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write logs to this file (rotated on startup) instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn options(&self) -> anyhow::Result<ProxyOptions> {
        let mut options = ProxyOptions::from_env();
        if let Some(secs) = self.connect_timeout {
            options.connect_timeout = seconds("--connect-timeout", secs)?;
        }
        if let Some(secs) = self.connect_all_timeout {
            options.connect_all_timeout = seconds("--connect-all-timeout", secs)?;
        }
        if let Some(secs) = self.disconnect_timeout {
            options.disconnect_timeout = seconds("--disconnect-timeout", secs)?;
        }
        Ok(options)
    }

    fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn seconds(flag: &str, secs: f64) -> anyhow::Result<Duration> {
    positive_seconds(secs)
        .with_context(|| format!("{flag} must be a positive number of seconds, got {secs}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(&LogSettings {
        level: args.log_level.clone(),
        file: args.log_file.clone(),
        json: args.log_json,
    })
    .context("failed to initialize logging")?;

    let options = args.options()?;
    let listen = match args.transport {
        Transport::Sse => Some(args.listen_addr()?),
        Transport::Stdio => None,
    };
    let config = load_config(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let proxy = Arc::new(ProxySession::from_config(config, options)?);

    proxy.connect_all().await;
    for report in proxy.status() {
        tracing::info!(backend = %report.id, status = %report.status, "backend status");
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let served = match listen {
        Some(addr) => sse::serve(Arc::clone(&proxy), addr, shutdown).await,
        None => {
            frontend::serve(
                Arc::clone(&proxy),
                tokio::io::stdin(),
                tokio::io::stdout(),
                shutdown,
            )
            .await
        }
    };

    proxy.disconnect_all().await;
    tracing::info!("mcp-proxy stopped");
    served.context("frontend i/o failed")
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    wait_for_signal().await;
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
