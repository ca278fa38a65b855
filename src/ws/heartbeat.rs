use axum::extract::ws::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::registry::ConnectionRegistry;
use super::session::CloseReason;

const PROBE_PAYLOAD: &[u8] = b"ping";

async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Outcome of one pass over the registry
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub timed_out: usize,
    pub probe_failures: usize,
}

/// Periodically probes every registered session and evicts the ones that
/// stopped answering. Catches half-open connections a clean close never
/// reports.
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    timeout: Duration,
}

impl HeartbeatMonitor {
    /// `timeout` must be longer than `interval`, otherwise a healthy peer
    /// could be evicted before it had a chance to answer the last probe.
    /// A too short timeout is stretched to one and a half intervals.
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration, timeout: Duration) -> Self {
        let timeout = if timeout <= interval {
            let stretched = interval + interval / 2;
            warn!(
                "Heartbeat timeout {:?} is not above the interval {:?}, using {:?}",
                timeout, interval, stretched
            );
            stretched
        } else {
            timeout
        };
        Self { registry, interval, timeout }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One pass: evict silent sessions, probe the rest
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for session in self.registry.sessions() {
            let idle = session.idle_for();
            if idle > self.timeout {
                warn!(
                    user_id = %session.user_id(),
                    connection_id = %session.connection_id(),
                    "No sign of life for {:?}, closing session",
                    idle
                );
                session.close(CloseReason::HeartbeatTimeout);
                report.timed_out += 1;
                continue;
            }

            match session.enqueue(Message::Ping(PROBE_PAYLOAD.to_vec())) {
                Ok(()) => report.probed += 1,
                Err(e) => {
                    warn!(user_id = %session.user_id(), "Liveness probe failed: {}", e);
                    session.close(CloseReason::ProbeFailed);
                    report.probe_failures += 1;
                }
            }
        }
        report
    }

    /// Run until `shutdown` flips to `true`
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        info!(
            "Heartbeat monitor started (interval {:?}, timeout {:?})",
            self.interval, self.timeout
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep();
                    if report.timed_out + report.probe_failures > 0 {
                        info!(
                            "Heartbeat sweep evicted {} timed out and {} unreachable sessions",
                            report.timed_out, report.probe_failures
                        );
                    } else {
                        debug!("Heartbeat sweep probed {} sessions", report.probed);
                    }
                }
                _ = stop_requested(&mut shutdown) => break,
            }
        }

        info!("Heartbeat monitor stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
