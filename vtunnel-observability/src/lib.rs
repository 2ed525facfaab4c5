pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_minimal_logging, LogFormat, LoggingConfig};
pub use metrics::{
    gather_metrics, init_metrics, metrics_enabled, tunnel_metrics, ConnectionOutcome,
    TunnelMetrics,
};
