//! Owns every tunnel instance of one process.
//!
//! Instances are independent: a tunnel that fails validation, repeats a port
//! or cannot bind is recorded as an [`InstanceFailure`] and its siblings start
//! anyway.

use crate::host;
use crate::instance::{InstanceHandle, TunnelInstance};
use crate::peer;
use crate::state::InstanceState;
use crate::transport::TransportConfig;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use vtunnel_common::config::port_conflicts;
use vtunnel_common::{Role, TunnelConfig, TunnelError, TunnelSettings};

/// Extra time on top of the drain grace for tasks to unwind.
const STOP_MARGIN: Duration = Duration::from_millis(500);

/// A tunnel that could not be started.
#[derive(Debug)]
pub struct InstanceFailure {
    pub name: String,
    pub error: TunnelError,
}

#[derive(Debug)]
pub struct Supervisor {
    role: Role,
    transport: TransportConfig,
    settings: TunnelSettings,
    cancel: CancellationToken,
    instances: Vec<InstanceHandle>,
    failures: Vec<InstanceFailure>,
}

impl Supervisor {
    pub fn new(role: Role, transport: TransportConfig, settings: TunnelSettings) -> Self {
        Self {
            role,
            transport,
            settings,
            cancel: CancellationToken::new(),
            instances: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Bind and start one instance per entry. Returns how many started.
    pub async fn start(&mut self, tunnels: &[TunnelConfig]) -> usize {
        let mut conflicts: HashMap<usize, String> =
            port_conflicts(tunnels, self.role).into_iter().collect();
        let mut started = 0;

        for (idx, tunnel) in tunnels.iter().enumerate() {
            let bound = match conflicts.remove(&idx) {
                Some(reason) => Err(TunnelError::Config(reason)),
                None => self.bind(tunnel).await,
            };

            match bound {
                Ok(instance) => {
                    info!(
                        tunnel = %tunnel.name,
                        role = %self.role,
                        transport = %self.transport,
                        "Tunnel started"
                    );
                    self.instances.push(instance.start(&self.cancel));
                    started += 1;
                }
                Err(e) => {
                    error!(
                        tunnel = %tunnel.name,
                        role = %self.role,
                        error = %e,
                        "Failed to start tunnel"
                    );
                    self.failures.push(InstanceFailure {
                        name: tunnel.name.clone(),
                        error: e,
                    });
                }
            }
        }

        started
    }

    async fn bind(&self, tunnel: &TunnelConfig) -> vtunnel_common::Result<TunnelInstance> {
        match self.role {
            Role::Host => host::bind(tunnel, &self.transport, &self.settings).await,
            Role::Peer => peer::bind(tunnel, &self.transport, &self.settings).await,
        }
    }

    pub fn instances(&self) -> &[InstanceHandle] {
        &self.instances
    }

    pub fn failures(&self) -> &[InstanceFailure] {
        &self.failures
    }

    pub fn instance(&self, name: &str) -> Option<&InstanceHandle> {
        self.instances.iter().find(|i| i.name() == name)
    }

    pub fn state_of(&self, name: &str) -> Option<InstanceState> {
        self.instance(name).map(InstanceHandle::current)
    }

    /// Token that stops every instance when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop all instances and wait for their listeners and connections to be
    /// released.
    pub async fn shutdown(&mut self) {
        info!(role = %self.role, instances = self.instances.len(), "Shutting down tunnels");
        self.cancel.cancel();

        let limit = self.settings.shutdown_grace() + STOP_MARGIN;
        // Every instance was cancelled above, so these waits overlap.
        for instance in &mut self.instances {
            instance.close(limit).await;
        }
        info!(role = %self.role, "All tunnels closed");
    }

    /// Run until `signal` resolves or the shutdown token is cancelled, then
    /// shut down.
    pub async fn run_until<F>(&mut self, signal: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            () = signal => {}
            () = self.cancel.cancelled() => {}
        }
        self.shutdown().await;
    }
}
