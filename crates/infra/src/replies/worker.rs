//! Background thread that fires due auto-replies.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::command_dispatcher::DispatchError;

/// Outcome of one delivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Entries claimed this pass.
    pub claimed: usize,
    /// Auto-reply messages appended.
    pub delivered: usize,
    /// Entries that turned out to be no-ops (order completed meanwhile).
    pub cancelled: usize,
    /// Entries put back for a later attempt after a transient error.
    pub released: usize,
    /// Entries that failed permanently.
    pub failed: usize,
}

impl DeliveryReport {
    pub fn is_empty(&self) -> bool {
        self.claimed == 0
    }
}

/// Something that can deliver every reply due at `now`.
pub trait DeliverDue: Send + Sync {
    fn deliver_due(&self, now: DateTime<Utc>) -> Result<DeliveryReport, DispatchError>;
}

impl<T> DeliverDue for Arc<T>
where
    T: DeliverDue + ?Sized,
{
    fn deliver_due(&self, now: DateTime<Utc>) -> Result<DeliveryReport, DispatchError> {
        (**self).deliver_due(now)
    }
}

#[derive(Debug, Clone)]
pub struct ReplyWorkerConfig {
    /// How often to look for due replies.
    pub poll_interval: Duration,
    /// Thread name, also used in logs.
    pub name: String,
}

impl Default for ReplyWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "reply-worker".to_string(),
        }
    }
}

impl ReplyWorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplyWorkerStats {
    pub passes: u64,
    pub delivered: u64,
    pub cancelled: u64,
    pub released: u64,
    pub failed: u64,
    pub pass_errors: u64,
    pub uptime_secs: u64,
}

impl ReplyWorkerStats {
    fn record(&mut self, report: &DeliveryReport) {
        self.delivered += report.delivered as u64;
        self.cancelled += report.cancelled as u64;
        self.released += report.released as u64;
        self.failed += report.failed as u64;
    }
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct ReplyWorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ReplyWorkerStats>>,
}

impl ReplyWorkerHandle {
    /// Request shutdown and wait for the current pass to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> ReplyWorkerStats {
        match self.stats.lock() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Polls for due auto-replies and delivers them.
pub struct ReplyWorker<D> {
    deliverer: D,
}

impl<D: DeliverDue + 'static> ReplyWorker<D> {
    pub fn new(deliverer: D) -> Self {
        Self { deliverer }
    }

    /// Spawn the worker in a background thread.
    pub fn spawn(self, config: ReplyWorkerConfig) -> std::io::Result<ReplyWorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(ReplyWorkerStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || worker_loop(self.deliverer, config, shutdown_rx, stats_clone))?;

        Ok(ReplyWorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn worker_loop<D: DeliverDue>(
    deliverer: D,
    config: ReplyWorkerConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<ReplyWorkerStats>>,
) {
    info!(worker = %config.name, "reply worker started");
    let start_time = Instant::now();

    loop {
        let outcome = deliverer.deliver_due(Utc::now());

        {
            let mut s = match stats.lock() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            s.passes += 1;
            s.uptime_secs = start_time.elapsed().as_secs();
            match &outcome {
                Ok(report) => s.record(report),
                Err(_) => s.pass_errors += 1,
            }
        }

        match outcome {
            Ok(report) if !report.is_empty() => {
                debug!(worker = %config.name, ?report, "delivery pass finished");
            }
            Ok(_) => {}
            Err(e) => error!(worker = %config.name, error = %e, "delivery pass failed"),
        }

        // Sleep until the next poll, waking early on shutdown.
        match shutdown_rx.recv_timeout(config.poll_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }

    info!(worker = %config.name, "reply worker stopped");
}
