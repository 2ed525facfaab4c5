//! Protocol constants and default timings.
//!
//! Keep these in one place so the host, the peer and the CLI agree.

/// Byte written by the handshake responder to acknowledge a probe (ASCII ACK).
pub const HANDSHAKE_ACK: u8 = 0x06;

/// VM-socket context ID meaning "any local context" (used for listening).
pub const VMADDR_CID_ANY: u32 = u32::MAX;

/// VM-socket context ID of the hypervisor host, as seen from a guest.
pub const VMADDR_CID_HOST: u32 = 2;

/// Buffer size for each direction of a connection pump.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

pub const DEFAULT_PROBE_INITIAL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_PROBE_MAX_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_PROBE_JITTER: f64 = 0.2;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_LIVENESS_WINDOW_MS: u64 = 20_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_HALF_CLOSE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;
