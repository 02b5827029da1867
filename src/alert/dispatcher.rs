use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::audit::AuditLog;
use super::backend::{AlertBackend, AlertConfirmation};
use super::AlertEvent;

/// How one dispatch attempt ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Both submissions succeeded and the confirmation was appended.
    Recorded(AlertConfirmation),
    /// Picture submission failed; no alert submission was attempted.
    PictureFailed(String),
    /// Alert submission failed after the picture was registered.
    AlertFailed(String),
    /// Backend confirmed but the audit append failed.
    AuditFailed(String),
}

impl DispatchOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, DispatchOutcome::Recorded(_))
    }
}

/// Run the two-step submission for one event and record the confirmation.
///
/// Never returns an error: every failure is logged and reported as an outcome.
pub fn dispatch_once(
    backend: &mut dyn AlertBackend,
    audit: &AuditLog,
    event: &AlertEvent,
) -> DispatchOutcome {
    let picture_id = match backend.submit_picture(&event.picture_reference) {
        Ok(id) => id,
        Err(e) => {
            log::error!("failed to send picture for alert: {:#}", e);
            return DispatchOutcome::PictureFailed(e.to_string());
        }
    };
    log::info!(
        "picture registered: id={} ref={}",
        picture_id,
        event.picture_reference
    );

    let confirmation = match backend.submit_alert(picture_id, event.status) {
        Ok(confirmation) => confirmation,
        Err(e) => {
            log::error!("failed to send alert for picture {}: {:#}", picture_id, e);
            return DispatchOutcome::AlertFailed(e.to_string());
        }
    };

    if let Err(e) = audit.append(&confirmation.picture) {
        log::error!("alert confirmed but audit append failed: {:#}", e);
        return DispatchOutcome::AuditFailed(e.to_string());
    }
    log::info!(
        "alert recorded: picture_id={} status={} fired_at={} audit={}",
        picture_id,
        event.status,
        event.fired_at.format("%Y-%m-%d %H:%M:%S"),
        audit.path().display()
    );
    DispatchOutcome::Recorded(confirmation)
}

/// Snapshot of dispatcher counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub recorded: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    recorded: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.enqueued.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            recorded: self.recorded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Background alert reporter.
///
/// The frame loop enqueues events on a bounded queue and continues
/// immediately. A single worker thread performs the submissions and audit
/// appends, one event at a time.
pub struct AlertDispatcher {
    sender: Option<SyncSender<AlertEvent>>,
    done: Receiver<()>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl AlertDispatcher {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

    pub fn spawn(
        mut backend: Box<dyn AlertBackend>,
        audit: AuditLog,
        queue_capacity: usize,
    ) -> Result<Self> {
        if queue_capacity == 0 {
            return Err(anyhow!("dispatch queue capacity must be at least 1"));
        }
        let (sender, receiver) = mpsc::sync_channel::<AlertEvent>(queue_capacity);
        let (done_tx, done) = mpsc::channel();
        let counters = Arc::new(Counters::default());
        let worker_counters = counters.clone();

        let worker = std::thread::Builder::new()
            .name("alert-dispatch".to_string())
            .spawn(move || {
                for event in receiver {
                    let outcome = dispatch_once(backend.as_mut(), &audit, &event);
                    let counter = if outcome.is_recorded() {
                        &worker_counters.recorded
                    } else {
                        &worker_counters.failed
                    };
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                let _ = done_tx.send(());
            })
            .context("failed to start alert dispatch worker")?;

        Ok(Self {
            sender: Some(sender),
            done,
            worker: Some(worker),
            counters,
        })
    }

    /// Hand an event to the worker without blocking. Returns false when the
    /// event was dropped because the queue is full or closed.
    pub fn dispatch(&self, event: AlertEvent) -> bool {
        let Some(sender) = &self.sender else {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
            return false;
        };
        match sender.try_send(event) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(TrySendError::Full(event)) => {
                log::warn!(
                    "alert dispatch queue full; dropping alert for {}",
                    event.picture_reference
                );
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                false
            }
            Err(TrySendError::Disconnected(event)) => {
                log::error!(
                    "alert dispatch worker gone; dropping alert for {}",
                    event.picture_reference
                );
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Close the queue and wait up to `grace` for queued and in-flight
    /// dispatches. If the worker is still busy after that, it is abandoned.
    pub fn shutdown(mut self, grace: Duration) -> DispatchStats {
        self.sender.take();
        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(worker) = self.worker.take() {
                    if worker.join().is_err() {
                        log::error!("alert dispatch worker panicked");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "alert dispatch still running after {:?}; abandoning it",
                    grace
                );
                self.worker.take();
            }
        }
        self.counters.snapshot()
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        // Closing the queue lets the worker exit on its own; never block here.
        self.sender.take();
    }
}
