//! A bound tunnel instance and its running handle.

use crate::handshake::{Prober, Responder};
use crate::relay::RelayServer;
use crate::state::{InstanceState, StateHandle};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vtunnel_common::Role;

/// The liveness half of an instance.
#[derive(Debug)]
pub enum Liveness {
    /// Host: probes the peer.
    Prober(Prober),
    /// Peer: answers the host's probes.
    Responder(Responder),
}

impl Liveness {
    async fn run(self, cancel: CancellationToken) {
        match self {
            Liveness::Prober(prober) => prober.run(cancel).await,
            Liveness::Responder(responder) => responder.run(cancel).await,
        }
    }
}

/// All listeners of one tunnel are bound; nothing runs yet.
#[derive(Debug)]
pub struct TunnelInstance {
    state: StateHandle,
    relay: RelayServer,
    liveness: Liveness,
}

impl TunnelInstance {
    pub fn new(state: StateHandle, relay: RelayServer, liveness: Liveness) -> Self {
        Self {
            state,
            relay,
            liveness,
        }
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    /// Spawn the accept loop and the liveness task.
    ///
    /// The instance stops when `parent` or the returned handle is cancelled,
    /// and ends in `Closed` either way.
    pub fn start(self, parent: &CancellationToken) -> InstanceHandle {
        let cancel = parent.child_token();
        let state = self.state.clone();
        let TunnelInstance {
            state: task_state,
            relay,
            liveness,
        } = self;

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let liveness = tokio::spawn(liveness.run(task_cancel.clone()));
            relay.run(task_cancel.clone()).await;
            // The relay only returns on cancellation; make sure the prober follows.
            task_cancel.cancel();
            if let Err(e) = liveness.await {
                warn!(tunnel = %task_state.name(), error = %e, "Liveness task failed");
            }
            task_state.transition(InstanceState::Closed);
        });

        InstanceHandle {
            state,
            cancel,
            task: Some(task),
        }
    }
}

/// A running tunnel instance.
#[derive(Debug)]
pub struct InstanceHandle {
    state: StateHandle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl InstanceHandle {
    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn role(&self) -> Role {
        self.state.role()
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn current(&self) -> InstanceState {
        self.state.current()
    }

    /// Stop the instance and wait for it to finish, at most `limit`.
    pub async fn close(&mut self, limit: Duration) {
        self.cancel.cancel();
        let Some(mut task) = self.task.take() else {
            return;
        };
        match tokio::time::timeout(limit, &mut task).await {
            Ok(Ok(())) => debug!(tunnel = %self.state.name(), "Instance stopped"),
            Ok(Err(e)) => warn!(tunnel = %self.state.name(), error = %e, "Instance task failed"),
            Err(_) => {
                warn!(tunnel = %self.state.name(), "Instance did not stop in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }
        self.state.transition(InstanceState::Closed);
    }
}
