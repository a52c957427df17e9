//! Kernel lifecycle state machine for one deployment unit.
//!
//! # Responsibility
//! - Drive a `Deployable` through assembly, commission and decommission.
//! - Publish every state change to listeners without waiting for them.
//!
//! # Invariants
//! - `startup` only acts from `Initialized` or `Stopped`; `shutdown` only
//!   from `Started`. Other calls are no-ops.
//! - Transitions are serialized by one control lock.
//! - Once `shutdown` begins, `Stopped` is always reached.

pub mod events;

use crate::assembly::{Deployable, GraphError};
use events::{EventNotifier, ListenerList};
use log::{error, info};
use parking_lot::{Mutex, RwLock};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub use events::{KernelListener, ListenerError, StateChangeEvent};

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelState {
    Initializing,
    Initialized,
    Starting,
    Assembly,
    Deployment,
    Started,
    Stopping,
    Decommissioning,
    Stopped,
}

impl KernelState {
    pub fn is_startable(self) -> bool {
        matches!(self, Self::Initialized | Self::Stopped)
    }

    pub fn is_stoppable(self) -> bool {
        self == Self::Started
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::Assembly => "assembly",
            Self::Deployment => "deployment",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Decommissioning => "decommissioning",
            Self::Stopped => "stopped",
        }
    }
}

impl Display for KernelState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("assembly of unit `{unit}` failed: {source}")]
    Assembly {
        unit: String,
        #[source]
        source: GraphError,
    },
    #[error("deployment of unit `{unit}` failed: {source}")]
    Deployment {
        unit: String,
        #[source]
        source: GraphError,
    },
    #[error("failed to start event worker: {0}")]
    Worker(#[from] std::io::Error),
}

struct Control {
    state: KernelState,
    sequence: u64,
}

/// Lifecycle owner of one deployment unit.
pub struct Kernel {
    unit: String,
    deployable: Arc<dyn Deployable>,
    control: Mutex<Control>,
    listeners: ListenerList,
    notifier: EventNotifier,
    disposed: AtomicBool,
}

impl Kernel {
    /// Creates a kernel in `Initialized` and starts its event worker.
    pub fn new(unit: impl Into<String>, deployable: Arc<dyn Deployable>) -> KernelResult<Self> {
        let unit = unit.into();
        let listeners: ListenerList = Arc::new(RwLock::new(Vec::new()));
        let notifier = EventNotifier::spawn(&unit, Arc::clone(&listeners))?;
        let kernel = Self {
            unit,
            deployable,
            control: Mutex::new(Control {
                state: KernelState::Initializing,
                sequence: 0,
            }),
            listeners,
            notifier,
            disposed: AtomicBool::new(false),
        };
        kernel.set_state(&mut kernel.control.lock(), KernelState::Initialized);
        Ok(kernel)
    }

    pub fn unit(&self) -> &str {
        self.unit.as_str()
    }

    pub fn state(&self) -> KernelState {
        self.control.lock().state
    }

    pub fn add_listener(&self, listener: Arc<dyn KernelListener>) {
        self.listeners.write().push(listener);
    }

    /// Removes a listener by identity; returns whether it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn KernelListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|registered| !same_listener(registered, listener));
        listeners.len() != before
    }

    /// Assembles and commissions the unit.
    ///
    /// # Errors
    /// - `Assembly` / `Deployment` after reverting to `Initialized`.
    pub fn startup(&self) -> KernelResult<()> {
        let mut control = self.control.lock();
        if !control.state.is_startable() {
            return Ok(());
        }
        info!(
            "event=kernel_startup module=kernel status=start unit={}",
            self.unit
        );

        self.set_state(&mut control, KernelState::Starting);
        self.set_state(&mut control, KernelState::Assembly);
        if let Err(source) = self.deployable.assemble() {
            error!(
                "event=kernel_startup module=kernel status=error unit={} phase=assembly error={}",
                self.unit, source
            );
            self.set_state(&mut control, KernelState::Initialized);
            return Err(KernelError::Assembly {
                unit: self.unit.clone(),
                source,
            });
        }

        self.set_state(&mut control, KernelState::Deployment);
        if let Err(source) = self.deployable.commission() {
            error!(
                "event=kernel_startup module=kernel status=error unit={} phase=deployment error={}",
                self.unit, source
            );
            self.set_state(&mut control, KernelState::Initialized);
            return Err(KernelError::Deployment {
                unit: self.unit.clone(),
                source,
            });
        }

        self.set_state(&mut control, KernelState::Started);
        info!(
            "event=kernel_startup module=kernel status=ok unit={}",
            self.unit
        );
        Ok(())
    }

    /// Decommissions the unit; failures are logged and `Stopped` is reached.
    pub fn shutdown(&self) {
        let mut control = self.control.lock();
        if !control.state.is_stoppable() {
            return;
        }
        info!(
            "event=kernel_shutdown module=kernel status=start unit={}",
            self.unit
        );
        self.set_state(&mut control, KernelState::Stopping);
        self.set_state(&mut control, KernelState::Decommissioning);
        if let Err(err) = self.deployable.decommission() {
            error!(
                "event=kernel_shutdown module=kernel status=error unit={} error={}",
                self.unit, err
            );
        }
        self.set_state(&mut control, KernelState::Stopped);
        info!(
            "event=kernel_shutdown module=kernel status=ok unit={}",
            self.unit
        );
    }

    /// Shuts down, then stops the event worker after queued events are
    /// delivered. Later calls do nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown();
        self.notifier.stop();
        info!(
            "event=kernel_dispose module=kernel status=ok unit={}",
            self.unit
        );
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn set_state(&self, control: &mut Control, new_state: KernelState) {
        let old_state = control.state;
        control.state = new_state;
        control.sequence += 1;
        self.notifier.publish(StateChangeEvent {
            sequence: control.sequence,
            unit: self.unit.clone(),
            old_state,
            new_state,
        });
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn same_listener(left: &Arc<dyn KernelListener>, right: &Arc<dyn KernelListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(left) as *const (),
        Arc::as_ptr(right) as *const (),
    )
}
