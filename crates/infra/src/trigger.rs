//! Trigger delivery: one executor run per created event document.
//!
//! [`TriggerWorker`] consumes triggers on a background thread; [`drain`]
//! consumes them on the caller's thread until none are pending, which is what
//! tests and batch tools want.

use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use fabline_core::EventId;
use fabline_events::{EventBus, Subscription};

use crate::document_store::{DocumentStore, EventTrigger};
use crate::workflow_executor::{ExecutorError, Outcome, WorkflowExecutor};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

#[derive(Debug)]
pub struct TriggerWorker;

impl TriggerWorker {
    /// Spawn a thread processing every trigger published on `bus`.
    ///
    /// Failed events are logged and left unprocessed for redelivery.
    pub fn spawn<S, B>(
        name: &'static str,
        bus: B,
        executor: Arc<WorkflowExecutor<S>>,
    ) -> std::io::Result<WorkerHandle>
    where
        S: DocumentStore + 'static,
        B: EventBus<EventTrigger> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, &executor))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<S: DocumentStore>(
    name: &'static str,
    sub: Subscription<EventTrigger>,
    shutdown_rx: mpsc::Receiver<()>,
    executor: &WorkflowExecutor<S>,
) {
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(trigger) => {
                if let Err(err) = executor.process(trigger.event_id()) {
                    warn!(worker = name, event_id = %trigger.event_id(), error = %err, "trigger handler failed");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = name, "trigger worker stopped");
}

/// Everything one [`drain`] call handled.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Event kinds in the order they were processed.
    pub kinds: Vec<String>,
    pub outcomes: Vec<(EventId, Outcome)>,
    pub failures: Vec<(EventId, ExecutorError)>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Process pending triggers until the subscription is empty, including the
/// ones published while draining.
pub fn drain<S: DocumentStore>(
    executor: &WorkflowExecutor<S>,
    sub: &Subscription<EventTrigger>,
) -> DrainReport {
    let mut report = DrainReport::default();
    loop {
        let trigger = match sub.try_recv() {
            Ok(trigger) => trigger,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
        };
        let event_id = trigger.event_id();
        report.kinds.push(trigger.event_type().to_string());
        match executor.process(event_id) {
            Ok(outcome) => report.outcomes.push((event_id, outcome)),
            Err(err) => report.failures.push((event_id, err)),
        }
    }
    report
}
