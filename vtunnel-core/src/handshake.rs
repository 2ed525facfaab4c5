//! Handshake/liveness protocol between the two halves of a tunnel.
//!
//! The host dials the peer's handshake port over the transport and expects a
//! single [`HANDSHAKE_ACK`] byte back. The peer only listens: it answers every
//! probe and treats the stream of probes as its own liveness signal.
//!
//! Both sides keep going forever. A lost opposite side moves a serving
//! instance to `Degraded`; the next successful exchange moves it back.

use crate::backoff::{ProbeBackoff, ProbeTiming};
use crate::state::{InstanceState, StateHandle};
use crate::transport::{self, BoxedStream, TransportConfig, TransportListener};
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use vtunnel_common::{Result, TunnelError, TunnelSettings, HANDSHAKE_ACK};

/// Delay before accepting again after a failed accept.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One probe: connect, read the acknowledgement, all within `timeout`.
pub async fn probe(transport: &TransportConfig, port: u32, timeout: Duration) -> Result<()> {
    let attempt = async {
        let mut stream = transport::connect(transport, port).await.map_err(|e| {
            TunnelError::Handshake(format!(
                "connect to {}: {e}",
                transport.describe_remote(port)
            ))
        })?;

        let mut ack = [0u8; 1];
        stream.read_exact(&mut ack).await.map_err(|e| {
            TunnelError::Handshake(format!("no acknowledgement: {e}"))
        })?;
        if ack[0] != HANDSHAKE_ACK {
            return Err(TunnelError::Handshake(format!(
                "unexpected acknowledgement byte {:#04x}",
                ack[0]
            )));
        }
        Ok(())
    };

    tokio::time::timeout(timeout, attempt).await.map_err(|_| {
        TunnelError::Timeout(format!(
            "handshake with {} took longer than {:?}",
            transport.describe_remote(port),
            timeout
        ))
    })?
}

/// Answer one probe and close the stream.
pub async fn acknowledge(stream: &mut BoxedStream) -> io::Result<()> {
    stream.write_all(&[HANDSHAKE_ACK]).await?;
    stream.shutdown().await
}

/// Active side: probes the opposite side and drives the instance state.
#[derive(Debug)]
pub struct Prober {
    state: StateHandle,
    transport: TransportConfig,
    port: u32,
    timeout: Duration,
    failure_threshold: u32,
    backoff: ProbeBackoff,
}

impl Prober {
    pub fn new(
        state: StateHandle,
        transport: TransportConfig,
        port: u32,
        settings: &TunnelSettings,
    ) -> Self {
        Self {
            state,
            transport,
            port,
            timeout: settings.probe_timeout(),
            failure_threshold: settings.failure_threshold,
            backoff: ProbeBackoff::new(ProbeTiming::from(settings)),
        }
    }

    /// Probe until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.state.transition(InstanceState::HandshakeWait);
        debug!(
            tunnel = %self.state.name(),
            target = %self.transport.describe_remote(self.port),
            "Starting handshake probes"
        );

        loop {
            let delay = tokio::select! {
                () = cancel.cancelled() => return,
                result = probe(&self.transport, self.port, self.timeout) => self.on_result(result),
            };
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Apply one probe result and return the delay before the next probe.
    fn on_result(&mut self, result: Result<()>) -> Duration {
        record_probe(&self.state, result.is_ok());

        match result {
            Ok(()) => {
                if self.backoff.failures() > 0 {
                    debug!(
                        tunnel = %self.state.name(),
                        failures = self.backoff.failures(),
                        "Handshake succeeded after failures"
                    );
                }
                self.state.transition(InstanceState::Serving);
                self.backoff.acknowledged()
            }
            Err(e) => {
                let delay = self.backoff.failed();
                let failures = self.backoff.failures();

                match self.state.current() {
                    InstanceState::Serving if failures >= self.failure_threshold => {
                        warn!(
                            tunnel = %self.state.name(),
                            failures,
                            error = %e,
                            "Opposite side unreachable, degrading tunnel"
                        );
                        self.state.transition(InstanceState::Degraded);
                    }
                    InstanceState::Degraded if failures % 10 == 0 => {
                        warn!(
                            tunnel = %self.state.name(),
                            failures,
                            error = %e,
                            "Tunnel still degraded"
                        );
                    }
                    _ => debug!(
                        tunnel = %self.state.name(),
                        attempt = failures,
                        retry_in_ms = delay.as_millis(),
                        error = %e,
                        "Handshake probe failed"
                    ),
                }
                delay
            }
        }
    }
}

/// Reactive side: answers probes and watches for them to stop.
#[derive(Debug)]
pub struct Responder {
    state: StateHandle,
    listener: TransportListener,
    ack_timeout: Duration,
    liveness_window: Duration,
}

impl Responder {
    pub fn new(state: StateHandle, listener: TransportListener, settings: &TunnelSettings) -> Self {
        Self {
            state,
            listener,
            ack_timeout: settings.probe_timeout(),
            liveness_window: settings.liveness_window(),
        }
    }

    /// Answer probes until cancelled. The listener is dropped on return.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.state.transition(InstanceState::HandshakeWait);
        debug!(
            tunnel = %self.state.name(),
            listen = %self.listener.local_description(),
            "Waiting for handshake probes"
        );

        let mut last_probe: Option<Instant> = None;
        let check_every = (self.liveness_window / 4).max(Duration::from_millis(10));
        let mut watchdog = tokio::time::interval(check_every);
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                accepted = self.listener.accept() => match accepted {
                    Ok((mut stream, from)) => {
                        match tokio::time::timeout(self.ack_timeout, acknowledge(&mut stream)).await {
                            Ok(Ok(())) => {
                                trace!(tunnel = %self.state.name(), from = %from, "Answered probe");
                                last_probe = Some(Instant::now());
                                record_probe(&self.state, true);
                                self.state.transition(InstanceState::Serving);
                            }
                            Ok(Err(e)) => {
                                debug!(tunnel = %self.state.name(), from = %from, error = %e, "Failed to answer probe");
                            }
                            Err(_) => {
                                debug!(tunnel = %self.state.name(), from = %from, "Timed out answering probe");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(tunnel = %self.state.name(), error = %e, "Handshake accept error");
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            () = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                        }
                    }
                },
                _ = watchdog.tick() => {
                    let silent = last_probe.is_some_and(|t| t.elapsed() > self.liveness_window);
                    if silent && self.state.current() == InstanceState::Serving {
                        warn!(
                            tunnel = %self.state.name(),
                            window_ms = self.liveness_window.as_millis(),
                            "No handshake probe received, degrading tunnel"
                        );
                        record_probe(&self.state, false);
                        self.state.transition(InstanceState::Degraded);
                    }
                }
            }
        }
    }
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
fn record_probe(state: &StateHandle, ok: bool) {
    #[cfg(feature = "metrics")]
    if let Some(m) = vtunnel_observability::tunnel_metrics() {
        m.record_probe(state.name(), state.role(), ok);
    }
}
