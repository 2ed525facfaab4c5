//! Tunnel instance state machine.
//!
//! The handshake task is the only writer of `HandshakeWait`, `Serving` and
//! `Degraded`; the accept loop reads the current value on every accepted
//! connection to decide between relaying and rejecting.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use vtunnel_common::{Result, Role, TunnelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    /// Listeners are being bound
    Starting,
    /// Waiting for the first successful handshake with the opposite side
    HandshakeWait,
    /// Opposite side reachable; new connections are relayed
    Serving,
    /// Opposite side lost; new connections are rejected while probing resumes
    Degraded,
    /// Listeners and connections released
    Closed,
}

impl InstanceState {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceState::Starting => "starting",
            InstanceState::HandshakeWait => "handshake_wait",
            InstanceState::Serving => "serving",
            InstanceState::Degraded => "degraded",
            InstanceState::Closed => "closed",
        }
    }

    /// Stable number for the state gauge.
    pub fn ordinal(self) -> i64 {
        match self {
            InstanceState::Starting => 0,
            InstanceState::HandshakeWait => 1,
            InstanceState::Serving => 2,
            InstanceState::Degraded => 3,
            InstanceState::Closed => 4,
        }
    }

    /// Whether a transition `self -> next` is allowed.
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::{Closed, Degraded, HandshakeWait, Serving, Starting};
        matches!(
            (self, next),
            (Starting, HandshakeWait)
                | (HandshakeWait, Serving)
                | (Serving, Degraded)
                | (Degraded, Serving)
                | (Starting | HandshakeWait | Serving | Degraded, Closed)
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable state of one tunnel instance.
#[derive(Debug, Clone)]
pub struct StateHandle {
    name: Arc<str>,
    role: Role,
    tx: Arc<watch::Sender<InstanceState>>,
}

impl StateHandle {
    pub fn new(name: &str, role: Role) -> Self {
        let (tx, _rx) = watch::channel(InstanceState::Starting);
        let handle = Self {
            name: Arc::from(name),
            role,
            tx: Arc::new(tx),
        };
        handle.publish_gauge(InstanceState::Starting);
        handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn current(&self) -> InstanceState {
        *self.tx.borrow()
    }

    /// Only `Serving` admits relayed traffic.
    pub fn admits_traffic(&self) -> bool {
        self.current() == InstanceState::Serving
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// Returns the previous state on success. A transition to the current
    /// state is a no-op and returns `None`, as does an invalid one.
    pub fn transition(&self, next: InstanceState) -> Option<InstanceState> {
        let mut previous = None;
        self.tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            if !state.can_transition_to(next) {
                if *state != InstanceState::Closed {
                    warn!(
                        tunnel = %self.name,
                        role = %self.role,
                        "Ignoring invalid state transition {} -> {}",
                        state,
                        next
                    );
                }
                return false;
            }
            previous = Some(*state);
            *state = next;
            true
        });

        if let Some(from) = previous {
            info!(
                tunnel = %self.name,
                role = %self.role,
                from = %from,
                to = %next,
                "Tunnel state changed"
            );
            self.publish_gauge(next);
        }
        previous
    }

    pub fn subscribe(&self) -> watch::Receiver<InstanceState> {
        self.tx.subscribe()
    }

    /// Wait until the state equals `target`, or fail after `timeout`.
    pub async fn wait_for(&self, target: InstanceState, timeout: Duration) -> Result<()> {
        let mut rx = self.subscribe();
        // Release the borrowed `Ref` before `rx` goes out of scope.
        let waited = tokio::time::timeout(timeout, rx.wait_for(|state| *state == target))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TunnelError::InvalidState("state channel closed".into())),
            Err(_) => Err(TunnelError::Timeout(format!(
                "tunnel '{}' did not reach {} within {:?} (currently {})",
                self.name,
                target,
                timeout,
                self.current()
            ))),
        }
    }

    #[cfg_attr(not(feature = "metrics"), allow(unused_variables, clippy::unused_self))]
    fn publish_gauge(&self, state: InstanceState) {
        #[cfg(feature = "metrics")]
        if let Some(m) = vtunnel_observability::tunnel_metrics() {
            m.set_state(&self.name, self.role, state.ordinal());
        }
    }
}
