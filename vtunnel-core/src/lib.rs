//! Core of the vtunnel relay: transports, the connection pump, the
//! handshake/liveness protocol, and the host/peer tunnel instances run by a
//! [`Supervisor`].

pub mod backoff;
pub mod handshake;
pub mod host;
pub mod instance;
pub mod peer;
pub mod pump;
pub mod relay;
pub mod state;
pub mod supervisor;
pub mod transport;

// Re-export specific items for convenience
pub use instance::{InstanceHandle, TunnelInstance};
pub use relay::{DialTarget, RelayServer};
pub use state::{InstanceState, StateHandle};
pub use supervisor::{InstanceFailure, Supervisor};
pub use transport::TransportConfig;
