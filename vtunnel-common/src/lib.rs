//! Common utilities and types for vtunnel

pub mod config;
pub mod constants;
pub mod error;

pub use config::{load_config, load_config_str, Role, TunnelConfig, TunnelSettings, VtunnelConfig};
pub use constants::{HANDSHAKE_ACK, VMADDR_CID_ANY, VMADDR_CID_HOST};
pub use error::{Result, TunnelError};
