//! Turn-taking between the master thread and the kernel thread.
//!
//! The two threads share one value of type `S` (the session). Ownership of
//! that value *is* the right to run: it travels between the threads over a
//! pair of capacity-1 channels, so exactly one side can touch it at any
//! moment and no lock guards it. The master drives with [`Synchronizer`];
//! the kernel thread receives a [`KernelPort`] and hands the session back
//! at each yield point.
//!
//! ```text
//!  master                                   kernel thread
//!  ──────                                   ─────────────
//!  start() ── spawn ───────────────────────▶ waits for first turn
//!  iterate() ─ Resume(S) ─────────────────▶ runs until yield point
//!            ◀──────────────── Parked(S) ── yield_to_master()
//!  service() ─ Service(S) ────────────────▶ on_service(&mut S)
//!            ◀─────────────── Serviced(S) ── (still parked)
//!  stop() ──── Stop(S) ───────────────────▶ yield returns Turn::Stop
//!            ◀────────────── Finished(S) ── body returns, thread exits
//! ```
//!
//! A body that returns an error or panics hands the session back as a
//! fault, which the master's next [`Synchronizer::wait`] returns exactly
//! once before the thread is joined.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use baton_core::KernelError;
use crossbeam_channel::{bounded, Receiver, SendError, Sender};
use thiserror::Error;

// ── messages ───────────────────────────────────────────────────────

enum ToKernel<S> {
    Resume(S),
    Service(S),
    Stop(S),
}

enum ToMaster<S, R> {
    Parked(S),
    Serviced(S, R),
    Finished(S),
    Faulted(S, KernelError),
}

// ── SyncError ──────────────────────────────────────────────────────

/// Errors from the master side of the synchronizer.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum SyncError {
    /// [`Synchronizer::start`] was called twice.
    #[error("the kernel is already running")]
    AlreadyRunning,
    /// The kernel was never started, or has already stopped.
    #[error("the kernel is not running")]
    NotRunning,
    /// The kernel thread could not be spawned.
    #[error("failed to spawn kernel thread: {reason}")]
    SpawnFailed {
        /// The OS error.
        reason: String,
    },
    /// The kernel failed or panicked.
    #[error("kernel fault: {0}")]
    KernelFault(#[source] KernelError),
    /// The kernel thread went away while holding the session.
    #[error("kernel thread disconnected while holding the session")]
    Disconnected,
}

// ── Synchronizer ───────────────────────────────────────────────────

/// Lifecycle of a [`Synchronizer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// [`start`](Synchronizer::start) has not been called.
    NotStarted,
    /// The kernel thread is alive.
    Running,
    /// The kernel thread has finished, faulted, or been stopped.
    Stopped,
}

/// Master side of the turn-taking protocol.
///
/// `S` is the shared session; `R` is what a service round returns.
pub struct Synchronizer<S, R = ()> {
    state: SyncState,
    session: Option<S>,
    to_kernel: Option<Sender<ToKernel<S>>>,
    from_kernel: Option<Receiver<ToMaster<S, R>>>,
    thread: Option<JoinHandle<()>>,
    thread_name: String,
}

impl<S, R> fmt::Debug for Synchronizer<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("state", &self.state)
            .field("quiescent", &self.session.is_some())
            .field("thread_name", &self.thread_name)
            .finish()
    }
}

impl<S, R> Synchronizer<S, R>
where
    S: Send + 'static,
    R: Send + 'static,
{
    /// Create a synchronizer holding `session` on the master side.
    pub fn new(session: S, thread_name: impl Into<String>) -> Self {
        Self {
            state: SyncState::NotStarted,
            session: Some(session),
            to_kernel: None,
            from_kernel: None,
            thread: None,
            thread_name: thread_name.into(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Whether the kernel thread is alive.
    pub fn is_running(&self) -> bool {
        self.state == SyncState::Running
    }

    /// The session, if the master currently holds it.
    pub fn shared(&self) -> Option<&S> {
        self.session.as_ref()
    }

    /// Mutable access to the session, if the master currently holds it.
    pub fn shared_mut(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }

    /// Spawn the kernel thread running `body`, then give it the first turn.
    ///
    /// Returns once the kernel reaches its first yield point, finishes, or
    /// faults.
    pub fn start<F>(&mut self, body: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut KernelPort<S, R>) -> Result<(), KernelError> + Send + 'static,
    {
        if self.state != SyncState::NotStarted {
            return Err(SyncError::AlreadyRunning);
        }

        let (to_kernel, from_master) = bounded(1);
        let (to_master, from_kernel) = bounded(1);

        let thread = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                let mut port = KernelPort {
                    to_master,
                    from_master,
                    session: None,
                    stop_requested: false,
                };
                if !port.first_turn() {
                    port.finish(None);
                    return;
                }
                let fault = match panic::catch_unwind(AssertUnwindSafe(|| body(&mut port))) {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e),
                    Err(payload) => Some(KernelError::Panicked(panic_message(payload.as_ref()))),
                };
                port.finish(fault);
            })
            .map_err(|e| SyncError::SpawnFailed {
                reason: e.to_string(),
            })?;

        self.to_kernel = Some(to_kernel);
        self.from_kernel = Some(from_kernel);
        self.thread = Some(thread);
        self.state = SyncState::Running;
        tracing::debug!(thread = %self.thread_name, "kernel thread started");

        self.iterate()
    }

    /// Let the kernel run until its next yield point.
    ///
    /// If the kernel finishes its run during this turn the synchronizer
    /// moves to [`SyncState::Stopped`] and the call still succeeds.
    pub fn iterate(&mut self) -> Result<(), SyncError> {
        self.ensure_running()?;
        self.wait()?;
        if !self.is_running() {
            return Ok(());
        }
        self.hand_off(ToKernel::Resume)?;
        self.wait()
    }

    /// Block until the master holds the session.
    ///
    /// Returns immediately if it already does. A kernel fault is returned
    /// here exactly once; afterwards the synchronizer is stopped.
    pub fn wait(&mut self) -> Result<(), SyncError> {
        if self.session.is_some() {
            return Ok(());
        }
        let Some(rx) = self.from_kernel.as_ref() else {
            return Err(SyncError::NotRunning);
        };
        match rx.recv() {
            Ok(ToMaster::Parked(s)) | Ok(ToMaster::Serviced(s, _)) => {
                self.session = Some(s);
                Ok(())
            }
            Ok(ToMaster::Finished(s)) => {
                self.session = Some(s);
                self.shut_down();
                Ok(())
            }
            Ok(ToMaster::Faulted(s, fault)) => {
                self.session = Some(s);
                tracing::error!(thread = %self.thread_name, %fault, "kernel faulted");
                self.shut_down();
                Err(SyncError::KernelFault(fault))
            }
            Err(_) => {
                self.shut_down();
                Err(SyncError::Disconnected)
            }
        }
    }

    /// Run a service round: the parked kernel calls its service handler on
    /// the session without advancing.
    ///
    /// Returns `None` if the kernel was not parked at a yield point (it
    /// finished during the preceding wait).
    pub fn service(&mut self) -> Result<Option<R>, SyncError> {
        self.ensure_running()?;
        self.wait()?;
        if !self.is_running() {
            return Ok(None);
        }
        self.hand_off(ToKernel::Service)?;
        let Some(rx) = self.from_kernel.as_ref() else {
            return Err(SyncError::NotRunning);
        };
        match rx.recv() {
            Ok(ToMaster::Serviced(s, outcome)) => {
                self.session = Some(s);
                Ok(Some(outcome))
            }
            Ok(ToMaster::Parked(s)) => {
                self.session = Some(s);
                Ok(None)
            }
            Ok(ToMaster::Finished(s)) => {
                self.session = Some(s);
                self.shut_down();
                Ok(None)
            }
            Ok(ToMaster::Faulted(s, fault)) => {
                self.session = Some(s);
                tracing::error!(thread = %self.thread_name, %fault, "kernel faulted during service");
                self.shut_down();
                Err(SyncError::KernelFault(fault))
            }
            Err(_) => {
                self.shut_down();
                Err(SyncError::Disconnected)
            }
        }
    }

    /// Ask the kernel to unwind and join its thread.
    ///
    /// A no-op if the kernel never started or already stopped.
    pub fn stop(&mut self) -> Result<(), SyncError> {
        match self.state {
            SyncState::NotStarted => {
                self.state = SyncState::Stopped;
                return Ok(());
            }
            SyncState::Stopped => return Ok(()),
            SyncState::Running => {}
        }
        self.wait()?;
        if !self.is_running() {
            return Ok(());
        }
        self.hand_off(ToKernel::Stop)?;
        // After a stop request the kernel never parks again, so the next
        // message is its exit.
        self.wait()
    }

    fn ensure_running(&self) -> Result<(), SyncError> {
        match self.state {
            SyncState::Running => Ok(()),
            _ => Err(SyncError::NotRunning),
        }
    }

    fn hand_off(&mut self, message: fn(S) -> ToKernel<S>) -> Result<(), SyncError> {
        let Some(tx) = self.to_kernel.as_ref() else {
            return Err(SyncError::NotRunning);
        };
        let Some(session) = self.session.take() else {
            return Err(SyncError::NotRunning);
        };
        if let Err(SendError(returned)) = tx.send(message(session)) {
            let (ToKernel::Resume(s) | ToKernel::Service(s) | ToKernel::Stop(s)) = returned;
            self.session = Some(s);
            self.shut_down();
            return Err(SyncError::Disconnected);
        }
        Ok(())
    }

    fn shut_down(&mut self) {
        self.state = SyncState::Stopped;
        self.to_kernel = None;
        self.from_kernel = None;
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!(thread = %self.thread_name, "kernel thread panicked outside its body");
            }
        }
        tracing::debug!(thread = %self.thread_name, "kernel thread joined");
    }
}

impl<S, R> Drop for Synchronizer<S, R> {
    fn drop(&mut self) {
        // Dropping the sender wakes a parked kernel with a disconnect, which
        // it treats as a stop request; it then hands nothing back.
        self.to_kernel = None;
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::debug!(thread = %self.thread_name, "kernel thread panicked during drop");
            }
        }
    }
}

// ── KernelPort ─────────────────────────────────────────────────────

/// What the kernel should do after [`KernelPort::yield_to_master`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Turn {
    /// The master resumed the kernel.
    Continue,
    /// The master asked the kernel to unwind.
    Stop,
}

/// Kernel side of the turn-taking protocol.
pub struct KernelPort<S, R = ()> {
    to_master: Sender<ToMaster<S, R>>,
    from_master: Receiver<ToKernel<S>>,
    session: Option<S>,
    stop_requested: bool,
}

impl<S, R> KernelPort<S, R> {
    /// The session. `None` only after the master went away.
    pub fn shared(&self) -> Option<&S> {
        self.session.as_ref()
    }

    /// Mutable access to the session. `None` only after the master went away.
    pub fn shared_mut(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }

    /// Whether the master has asked the kernel to unwind.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Hand the session to the master and block until it comes back.
    ///
    /// While parked, every service request from the master runs
    /// `on_service` on the session and replies without advancing. After a
    /// stop request every later call returns [`Turn::Stop`] at once.
    pub fn yield_to_master<F>(&mut self, mut on_service: F) -> Turn
    where
        F: FnMut(&mut S) -> R,
    {
        if self.stop_requested {
            return Turn::Stop;
        }
        let Some(session) = self.session.take() else {
            self.stop_requested = true;
            return Turn::Stop;
        };
        if let Err(SendError(returned)) = self.to_master.send(ToMaster::Parked(session)) {
            self.recover(returned);
            self.stop_requested = true;
            return Turn::Stop;
        }
        loop {
            match self.from_master.recv() {
                Ok(ToKernel::Resume(s)) => {
                    self.session = Some(s);
                    return Turn::Continue;
                }
                Ok(ToKernel::Stop(s)) => {
                    self.session = Some(s);
                    self.stop_requested = true;
                    return Turn::Stop;
                }
                Ok(ToKernel::Service(s)) => {
                    let session = self.session.insert(s);
                    let outcome = on_service(session);
                    let Some(s) = self.session.take() else {
                        return Turn::Stop;
                    };
                    if let Err(SendError(returned)) =
                        self.to_master.send(ToMaster::Serviced(s, outcome))
                    {
                        self.recover(returned);
                        self.stop_requested = true;
                        return Turn::Stop;
                    }
                }
                Err(_) => {
                    self.stop_requested = true;
                    return Turn::Stop;
                }
            }
        }
    }

    fn first_turn(&mut self) -> bool {
        loop {
            match self.from_master.recv() {
                Ok(ToKernel::Resume(s)) => {
                    self.session = Some(s);
                    return true;
                }
                Ok(ToKernel::Stop(s)) => {
                    self.session = Some(s);
                    self.stop_requested = true;
                    return false;
                }
                // Nothing to service before the body runs.
                Ok(ToKernel::Service(s)) => {
                    if let Err(SendError(returned)) = self.to_master.send(ToMaster::Parked(s)) {
                        self.recover(returned);
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
    }

    fn finish(mut self, fault: Option<KernelError>) {
        let Some(session) = self.session.take() else {
            return;
        };
        let message = match fault {
            None => ToMaster::Finished(session),
            Some(fault) => ToMaster::Faulted(session, fault),
        };
        if self.to_master.send(message).is_err() {
            tracing::debug!("master went away before the kernel exit was reported");
        }
    }

    fn recover(&mut self, returned: ToMaster<S, R>) {
        let (ToMaster::Parked(s)
        | ToMaster::Serviced(s, _)
        | ToMaster::Finished(s)
        | ToMaster::Faulted(s, _)) = returned;
        self.session = Some(s);
    }
}

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
