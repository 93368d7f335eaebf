//! Instance registry behind the FMI entry points.
//!
//! The [`Dispatcher`] owns every live [`Instance`] in a generation-checked
//! handle table. The table lock is held only to insert, look up or remove;
//! each instance has its own lock, so distinct instances step concurrently.
//! Panics raised while an instance is locked are caught here and mark that
//! instance `Fatal` instead of poisoning the lock.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use baton_core::{Kernel, KernelError};
use baton_engine::BridgeError;
use baton_registry::{RegistryError, VariableSpec};
use thiserror::Error;

use crate::handle::{HandleTable, InstanceHandle};
use crate::instance::{Instance, InstanceState};
use crate::logger::FmiLogger;
use crate::status::Fmi2Status;
use crate::types::Fmi2Type;

/// Errors surfaced at the call boundary.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum DispatchError {
    /// No factory has been installed with [`install`].
    #[error("no kernel factory installed")]
    NotInstalled,
    /// [`install`] was called twice.
    #[error("a kernel factory is already installed")]
    AlreadyInstalled,
    /// The component pointer is null, stale or foreign.
    #[error("invalid or stale instance handle")]
    InvalidHandle,
    /// Every handle slot is in use.
    #[error("too many live instances")]
    TooManyInstances,
    /// An instance lock was poisoned outside the dispatcher's guard.
    #[error("instance lock poisoned")]
    Poisoned,
    /// A panic was caught while the instance was being driven.
    #[error("panic while driving the instance: {0}")]
    Panicked(String),
    /// The instance is `Fatal` and only accepts `fmi2FreeInstance`.
    #[error("instance is in the Fatal state")]
    InstanceFatal,
    /// The call is not allowed in the instance's current state.
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        /// The FMI function name.
        operation: &'static str,
        /// State at the time of the call.
        state: InstanceState,
    },
    /// A pointer, string or number argument is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Integer, boolean and string variables are not declared by a bridge.
    #[error("{operation}: no such variables ({count} requested)")]
    Unsupported {
        /// The FMI function name.
        operation: &'static str,
        /// Number of value references passed.
        count: usize,
    },
    /// `fmi2CancelStep` with no asynchronous step in flight.
    #[error("no asynchronous step is pending")]
    NothingPending,
    /// The kernel factory refused the instantiation.
    #[error("kernel factory failed: {0}")]
    Factory(#[source] KernelError),
    /// A bridge operation failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl From<RegistryError> for DispatchError {
    fn from(e: RegistryError) -> Self {
        Self::Bridge(BridgeError::Registry(e))
    }
}

/// Arguments of `fmi2Instantiate`, decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct InstantiateRequest {
    /// Instance name; never empty.
    pub instance_name: String,
    /// The model GUID the master expects.
    pub guid: String,
    /// Filesystem path of the unpacked resources directory, if given.
    pub resource_path: Option<PathBuf>,
    /// Requested interface.
    pub kind: Fmi2Type,
    /// Initial state of debug logging.
    pub logging_on: bool,
}

/// A kernel and the variables it exposes.
pub struct KernelBundle {
    /// The kernel, not yet started.
    pub kernel: Box<dyn Kernel>,
    /// Variable declarations, in value-reference order.
    pub variables: Vec<VariableSpec>,
}

/// Builds a kernel for each instantiation.
pub trait KernelFactory: Send + Sync {
    /// Create a kernel for `request`.
    fn create(&self, request: &InstantiateRequest) -> Result<KernelBundle, KernelError>;
}

impl<F> KernelFactory for F
where
    F: Fn(&InstantiateRequest) -> Result<KernelBundle, KernelError> + Send + Sync,
{
    fn create(&self, request: &InstantiateRequest) -> Result<KernelBundle, KernelError> {
        self(request)
    }
}

/// Convert `fmuResourceLocation` to a filesystem path.
pub fn resource_path(location: &str) -> PathBuf {
    #[cfg(windows)]
    const SCHEME: &str = "file:///";
    #[cfg(not(windows))]
    const SCHEME: &str = "file://";
    PathBuf::from(location.strip_prefix(SCHEME).unwrap_or(location))
}

/// Owner of all live instances.
pub struct Dispatcher {
    factory: Box<dyn KernelFactory>,
    instances: Mutex<HandleTable<Arc<Mutex<Instance>>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("instances", &self.len())
            .finish()
    }
}

impl Dispatcher {
    /// A dispatcher creating kernels with `factory`.
    pub fn new(factory: impl KernelFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            instances: Mutex::new(HandleTable::new()),
        }
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.table().map_or(0, |t| t.len())
    }

    /// Whether no instance is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn table(&self) -> Result<MutexGuard<'_, HandleTable<Arc<Mutex<Instance>>>>, DispatchError> {
        self.instances.lock().map_err(|_| DispatchError::Poisoned)
    }

    /// Create an instance and return its handle.
    pub fn instantiate(
        &self,
        request: InstantiateRequest,
        logger: FmiLogger,
    ) -> Result<InstanceHandle, DispatchError> {
        if request.instance_name.is_empty() {
            return Err(DispatchError::InvalidArgument(
                "instance name must not be empty".into(),
            ));
        }
        let bundle = self
            .factory
            .create(&request)
            .map_err(DispatchError::Factory)?;
        let name = request.instance_name.clone();
        let instance = Instance::new(request, bundle, logger)?;
        let handle = self
            .table()?
            .insert(Arc::new(Mutex::new(instance)))
            .ok_or(DispatchError::TooManyInstances)?;
        tracing::info!(instance = %name, %handle, "instantiated");
        Ok(handle)
    }

    fn lookup(&self, handle: InstanceHandle) -> Result<Arc<Mutex<Instance>>, DispatchError> {
        self.table()?
            .get(handle)
            .cloned()
            .ok_or(DispatchError::InvalidHandle)
    }

    /// Run `op` on the instance behind `handle`.
    ///
    /// Failures are logged through `tracing` and the master's logger. A
    /// panic inside `op` marks the instance `Fatal`.
    pub fn with_instance<T>(
        &self,
        handle: InstanceHandle,
        operation: &'static str,
        op: impl FnOnce(&mut Instance) -> Result<T, DispatchError>,
    ) -> Result<T, DispatchError> {
        let cell = self.lookup(handle)?;
        let mut instance = cell.lock().map_err(|_| DispatchError::Poisoned)?;

        let result = match catch_unwind(AssertUnwindSafe(|| op(&mut *instance))) {
            Ok(result) => result,
            Err(payload) => {
                crate::record_panic(payload.as_ref());
                instance.mark_fatal();
                Err(DispatchError::Panicked(baton_engine::sync::panic_message(
                    payload.as_ref(),
                )))
            }
        };

        if let Err(e) = &result {
            let status = Fmi2Status::from(e);
            tracing::warn!(instance = %instance.name(), operation, error = %e, "call failed");
            let category = if status == Fmi2Status::Fatal {
                "logStatusFatal"
            } else {
                "logStatusError"
            };
            instance
                .logger()
                .emit(status, category, &format!("{operation}: {e}"));
        }
        result
    }

    /// `fmi2Reset` for the instance behind `handle`.
    pub fn reset(&self, handle: InstanceHandle) -> Result<(), DispatchError> {
        let factory = &*self.factory;
        self.with_instance(handle, "fmi2Reset", |inst| inst.reset(factory))
    }

    /// Remove the instance, stopping its kernel. Freeing twice is an
    /// [`InvalidHandle`](DispatchError::InvalidHandle) error.
    pub fn free(&self, handle: InstanceHandle) -> Result<(), DispatchError> {
        let cell = self
            .table()?
            .remove(handle)
            .ok_or(DispatchError::InvalidHandle)?;
        // A poisoned instance is dropped without a clean stop.
        if let Ok(mut instance) = cell.lock() {
            instance.shutdown();
            tracing::info!(instance = %instance.name(), %handle, "freed");
        }
        Ok(())
    }
}

static DISPATCHER: OnceLock<Dispatcher> = OnceLock::new();

/// Install the process-wide dispatcher used by the `fmi2*` entry points.
pub fn install(factory: impl KernelFactory + 'static) -> Result<&'static Dispatcher, DispatchError> {
    let mut fresh = false;
    let dispatcher = DISPATCHER.get_or_init(|| {
        fresh = true;
        Dispatcher::new(factory)
    });
    if fresh {
        Ok(dispatcher)
    } else {
        Err(DispatchError::AlreadyInstalled)
    }
}

/// The installed dispatcher.
pub fn installed() -> Result<&'static Dispatcher, DispatchError> {
    DISPATCHER.get().ok_or(DispatchError::NotInstalled)
}
