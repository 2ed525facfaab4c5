//! Probe scheduling for the handshake prober.
//!
//! Failed probes back off exponentially from `initial` toward `steady`,
//! with symmetric jitter. An acknowledged probe clears the failure streak and
//! the next probe follows after the steady interval.

use rand::Rng;
use std::time::Duration;
use vtunnel_common::TunnelSettings;

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTiming {
    /// Delay after the first failed probe
    pub initial: Duration,
    /// Cap for failure delays, and the interval between healthy probes
    pub steady: Duration,
    /// Fraction of each failure delay randomised in either direction, in [0, 1)
    pub jitter: f64,
}

impl From<&TunnelSettings> for ProbeTiming {
    fn from(settings: &TunnelSettings) -> Self {
        Self {
            initial: settings.probe_initial_interval(),
            steady: settings.probe_max_interval(),
            jitter: settings.probe_jitter,
        }
    }
}

/// Failure streak plus the delay it implies.
#[derive(Debug, Clone)]
pub struct ProbeBackoff {
    timing: ProbeTiming,
    failures: u32,
}

impl ProbeBackoff {
    pub fn new(timing: ProbeTiming) -> Self {
        Self {
            timing,
            failures: 0,
        }
    }

    /// Consecutive failed probes since the last acknowledgement.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record an acknowledged probe. Returns the delay before the next one.
    pub fn acknowledged(&mut self) -> Duration {
        self.failures = 0;
        self.timing.steady
    }

    /// Record a failed probe. Returns the delay before the next one.
    pub fn failed(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self.unjittered(self.failures);
        self.jittered(delay).min(self.timing.steady)
    }

    /// `initial * 2^(failures - 1)`, capped at the steady interval.
    fn unjittered(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(31);
        self.timing
            .initial
            .checked_mul(1u32 << doublings)
            .map_or(self.timing.steady, |d| d.min(self.timing.steady))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let spread = delay.as_secs_f64() * self.timing.jitter;
        if spread <= 0.0 {
            return delay;
        }
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }
}
