//! Arguments and run loop shared by the `host` and `peer` subcommands.

use anyhow::{bail, Context, Result};
use axum::http::StatusCode;
use clap::{Args, ValueEnum};
use std::fmt::Write as _;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};
use vtunnel_common::{load_config, Role, VtunnelConfig};
use vtunnel_core::{InstanceState, StateHandle, Supervisor, TransportConfig};
use vtunnel_observability::{
    gather_metrics, init_logging, init_metrics, init_minimal_logging, LogFormat, LoggingConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// VM sockets (Linux)
    Vsock,
    /// TCP emulation, both halves reachable over IP
    Tcp,
}

#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Tunnel configuration file (JSON)
    #[arg(long, short = 'c', env = "VTUNNEL_CONFIG")]
    pub config: PathBuf,

    /// Transport between host and guest
    #[arg(long, value_enum, default_value = "vsock", env = "VTUNNEL_TRANSPORT")]
    pub transport: TransportKind,

    /// Listen address for the TCP transport
    #[arg(long, default_value = "127.0.0.1", env = "VTUNNEL_TCP_BIND_IP")]
    pub tcp_bind_ip: IpAddr,

    /// Address of the opposite side for the TCP transport
    #[arg(long, default_value = "127.0.0.1", env = "VTUNNEL_TCP_REMOTE_IP")]
    pub tcp_remote_ip: IpAddr,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, default_value = "info", env = "VTUNNEL_LOG_LEVEL")]
    pub log_level: String,

    /// Emit JSON log lines
    #[arg(long, env = "VTUNNEL_LOG_JSON")]
    pub log_json: bool,

    /// Serve /metrics and /health on this address
    #[arg(long, env = "VTUNNEL_METRICS_BIND")]
    pub metrics_bind: Option<SocketAddr>,
}

impl CommonArgs {
    pub fn init_logging(&self) {
        let config = LoggingConfig {
            default_filter: self.log_level.clone(),
            format: if self.log_json {
                LogFormat::Json
            } else {
                LogFormat::Text
            },
            thread_ids: false,
        };
        if let Err(e) = init_logging(&config) {
            init_minimal_logging();
            warn!("Falling back to minimal logging: {e}");
        }
    }

    /// Transport config; `vsock_remote_cid` is the CID dialled over vsock.
    pub fn transport_config(&self, vsock_remote_cid: u32) -> TransportConfig {
        match self.transport {
            TransportKind::Vsock => TransportConfig::Vsock {
                remote_cid: vsock_remote_cid,
            },
            TransportKind::Tcp => TransportConfig::Tcp {
                bind_ip: self.tcp_bind_ip,
                remote_ip: self.tcp_remote_ip,
            },
        }
    }

    pub fn load(&self) -> Result<VtunnelConfig> {
        load_config(&self.config)
            .with_context(|| format!("failed to load configuration from {}", self.config.display()))
    }
}

/// Start every tunnel for `role` and run until Ctrl-C or SIGTERM.
///
/// Fails only when no tunnel could be started at all.
pub async fn run_tunnels(
    role: Role,
    transport: TransportConfig,
    config: VtunnelConfig,
    metrics_bind: Option<SocketAddr>,
) -> Result<()> {
    if metrics_bind.is_some() {
        init_metrics();
    }

    info!(
        "Starting vtunnel {} v{} ({} tunnels, transport {})",
        role,
        env!("CARGO_PKG_VERSION"),
        config.tunnels.len(),
        transport
    );

    let mut supervisor = Supervisor::new(role, transport, config.settings.clone());
    let started = supervisor.start(&config.tunnels).await;
    if started == 0 {
        bail!(
            "no tunnel could be started ({} configured, {} failed)",
            config.tunnels.len(),
            supervisor.failures().len()
        );
    }
    if !supervisor.failures().is_empty() {
        warn!(
            started,
            failed = supervisor.failures().len(),
            "Some tunnels failed to start"
        );
    }

    if let Some(addr) = metrics_bind {
        let states: Vec<StateHandle> = supervisor
            .instances()
            .iter()
            .map(|i| i.state().clone())
            .collect();
        tokio::spawn(serve_metrics(addr, states));
    }

    supervisor.run_until(shutdown_signal()).await;
    Ok(())
}

async fn serve_metrics(addr: SocketAddr, states: Vec<StateHandle>) {
    use axum::{routing::get, Router};

    let app = Router::new()
        .route("/metrics", get(|| async { gather_metrics() }))
        .route(
            "/health",
            get(move || {
                let states = states.clone();
                async move { health(&states) }
            }),
        );

    info!("Metrics server listening on http://{}", addr);
    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server error: {}", e);
            }
        }
        Err(e) => error!("Failed to bind metrics server to {}: {}", addr, e),
    }
}

/// One line per tunnel; 200 when at least one tunnel is serving.
fn health(states: &[StateHandle]) -> (StatusCode, String) {
    let mut body = String::new();
    let mut serving = false;
    for state in states {
        let current = state.current();
        serving |= current == InstanceState::Serving;
        let _ = writeln!(body, "{} {}", state.name(), current);
    }
    let status = if serving {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, body)
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
