//! Ordered asynchronous delivery of kernel state changes.
//!
//! # Invariants
//! - Events reach listeners in publish order, each exactly once.
//! - An event goes to the listeners registered when it was published; a
//!   listener added later never sees it.
//! - A failing or panicking listener never stops delivery to the others.
//! - Publishing never blocks on listener work.

use crate::kernel::KernelState;
use log::{debug, error, warn};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

/// One state transition of a kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeEvent {
    pub sequence: u64,
    pub unit: String,
    pub old_state: KernelState,
    pub new_state: KernelState,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

/// Observer of kernel state changes.
pub trait KernelListener: Send + Sync {
    fn on_state_changed(&self, event: &StateChangeEvent) -> Result<(), ListenerError>;
}

pub(crate) type ListenerList = Arc<RwLock<Vec<Arc<dyn KernelListener>>>>;

enum Notification {
    StateChanged {
        event: StateChangeEvent,
        recipients: Vec<Arc<dyn KernelListener>>,
    },
    Shutdown,
}

/// Single worker thread draining an unbounded FIFO of events.
pub(crate) struct EventNotifier {
    unit: String,
    listeners: ListenerList,
    sender: Mutex<Option<Sender<Notification>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventNotifier {
    pub(crate) fn spawn(unit: &str, listeners: ListenerList) -> std::io::Result<Self> {
        let (sender, receiver) = channel();
        let worker_unit = unit.to_string();
        let worker = std::thread::Builder::new()
            .name(format!("appkernel-events-{unit}"))
            .spawn(move || drain(&worker_unit, &receiver))?;
        Ok(Self {
            unit: unit.to_string(),
            listeners,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueues `event` for the listeners registered right now; dropped with
    /// a warning once the notifier stopped.
    pub(crate) fn publish(&self, event: StateChangeEvent) {
        let recipients = self.listeners.read().clone();
        let sender = self.sender.lock();
        let delivered = sender.as_ref().is_some_and(|sender| {
            sender
                .send(Notification::StateChanged { event, recipients })
                .is_ok()
        });
        if !delivered {
            warn!(
                "event=kernel_notify module=kernel status=dropped unit={}",
                self.unit
            );
        }
    }

    /// Delivers everything already queued, then joins the worker.
    pub(crate) fn stop(&self) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Notification::Shutdown);
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!(
                    "event=kernel_notify module=kernel status=error unit={} error=worker_panicked",
                    self.unit
                );
            }
        }
    }
}

fn drain(unit: &str, receiver: &Receiver<Notification>) {
    debug!("event=kernel_notify module=kernel status=start unit={unit}");
    while let Ok(Notification::StateChanged { event, recipients }) = receiver.recv() {
        for listener in recipients {
            match catch_unwind(AssertUnwindSafe(|| listener.on_state_changed(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(
                    "event=kernel_notify module=kernel status=error unit={} sequence={} error={}",
                    unit, event.sequence, err
                ),
                Err(_) => error!(
                    "event=kernel_notify module=kernel status=error unit={} sequence={} error=listener_panicked",
                    unit, event.sequence
                ),
            }
        }
    }
    debug!("event=kernel_notify module=kernel status=ok unit={unit}");
}
