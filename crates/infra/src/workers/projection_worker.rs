use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use brokerdesk_events::{EventBus, Subscription};

/// Handle to control and join a background projection worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    processed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl WorkerHandle {
    /// Messages handed to the handler so far, failures included.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Feeds every message published on a bus to a handler on its own thread.
///
/// The subscription is taken before `spawn` returns, so nothing published
/// afterwards is missed. Handlers must be idempotent (at-least-once
/// delivery); a failing message is logged and skipped.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        mut handler: H,
    ) -> std::io::Result<WorkerHandle>
    where
        M: Send + 'static,
        B: EventBus<M>,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();
        let processed = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let counters = (processed.clone(), failed.clone());
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, &mut handler, counters))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            processed,
            failed,
        })
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: &mut H,
    (processed, failed): (Arc<AtomicU64>, Arc<AtomicU64>),
) where
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(50);
    info!(worker = name, "projection worker started");

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if let Err(err) = handler(msg) {
                    failed.fetch_add(1, Ordering::SeqCst);
                    warn!(worker = name, error = ?err, "projection worker handler failed");
                }
                processed.fetch_add(1, Ordering::SeqCst);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(worker = name, "projection worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    use brokerdesk_events::InMemoryEventBus;

    #[test]
    fn worker_applies_published_messages_and_counts_failures() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let handle = ProjectionWorker::spawn("test-worker", &bus, move |n: u32| {
            if n == 2 {
                return Err("two is rejected");
            }
            sink.lock().unwrap().push(n);
            Ok(())
        })
        .unwrap();

        for n in 1..=3 {
            bus.publish(n).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.processed() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(handle.processed(), 3);
        assert_eq!(handle.failed(), 1);
        handle.shutdown();
        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
    }
}
