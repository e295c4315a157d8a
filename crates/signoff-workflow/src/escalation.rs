//! Periodic escalation driver
//!
//! Runs the engine's escalation sweep on a fixed interval, independent of
//! request handling. Deployments that prefer an external cron can skip
//! this and call [`WorkflowEngine::run_escalation_sweep`] directly.

use crate::engine::WorkflowEngine;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

/// Timer loop around the escalation sweep
pub struct EscalationSweeper {
    engine: Arc<WorkflowEngine>,
    interval_seconds: u64,
    running: Arc<RwLock<bool>>,
}

impl EscalationSweeper {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        let interval_seconds = engine.config().escalation.sweep_interval_seconds;
        Self {
            engine,
            interval_seconds,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn with_interval(mut self, seconds: u64) -> Self {
        self.interval_seconds = seconds;
        self
    }

    /// Run the sweep loop until [`stop`](Self::stop) is called.
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Escalation sweeper already running");
                return;
            }
            *running = true;
        }

        info!(
            interval_seconds = self.interval_seconds,
            "Starting escalation sweeper"
        );

        let start = Instant::now() + std::time::Duration::from_secs(1);
        let mut interval = interval_at(
            start,
            std::time::Duration::from_secs(self.interval_seconds),
        );

        loop {
            interval.tick().await;

            if !*self.running.read().await {
                break;
            }

            let report = self.engine.run_escalation_sweep().await;
            debug!(
                escalated = report.escalated,
                unresolved = report.unresolved,
                skipped = report.skipped,
                reminders = report.reminders_sent,
                "Escalation sweep finished"
            );
        }

        info!("Escalation sweeper stopped");
    }

    /// Request the loop to exit after the current tick.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("Stopping escalation sweeper");
    }
}
