//! Forwarding of kernel and call-boundary messages to the master's logger.

use std::ffi::{c_void, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use baton_core::LogLevel;
use baton_engine::LogSink;

use crate::status::Fmi2Status;
use crate::types::{Fmi2CallbackFunctions, Fmi2CallbackLogger};

#[derive(Clone, Copy, Debug)]
struct Environment(*mut c_void);

// SAFETY: the environment pointer is an opaque token owned by the master.
// It is never dereferenced here, only handed back to the master's logger.
#[allow(unsafe_code)]
unsafe impl Send for Environment {}
// SAFETY: see above; sharing the token does not touch what it points to.
#[allow(unsafe_code)]
unsafe impl Sync for Environment {}

/// The master's `fmi2CallbackLogger`, bound to one instance.
///
/// Clones share the enabled flag, so `fmi2SetDebugLogging` on the instance
/// also reaches the copy installed as the bridge's [`LogSink`].
#[derive(Clone, Debug)]
pub struct FmiLogger {
    callback: Fmi2CallbackLogger,
    environment: Environment,
    instance_name: CString,
    enabled: Arc<AtomicBool>,
}

impl FmiLogger {
    /// Bind `callbacks.logger` (if any) to `instance_name`.
    pub fn new(
        callbacks: Option<&Fmi2CallbackFunctions>,
        instance_name: &str,
        logging_on: bool,
    ) -> Self {
        Self {
            callback: callbacks.and_then(|c| c.logger),
            environment: Environment(
                callbacks.map_or(std::ptr::null_mut(), |c| c.component_environment),
            ),
            instance_name: c_string(instance_name),
            enabled: Arc::new(AtomicBool::new(logging_on)),
        }
    }

    /// A logger with no callback, for instances created from Rust.
    pub fn detached(instance_name: &str) -> Self {
        Self::new(None, instance_name, false)
    }

    /// Whether messages are forwarded.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn forwarding on or off.
    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    /// Send one message with an FMI log category.
    #[allow(unsafe_code)]
    pub fn emit(&self, status: Fmi2Status, category: &str, message: &str) {
        if !self.is_enabled() {
            return;
        }
        let Some(callback) = self.callback else {
            return;
        };
        let category = c_string(category);
        let message = c_string(message);
        // SAFETY: the callback came from the master's fmi2CallbackFunctions.
        // All strings are NUL-terminated and outlive the call; the message is
        // passed through a "%s" format so it is never interpreted.
        unsafe {
            callback(
                self.environment.0,
                self.instance_name.as_ptr(),
                status,
                category.as_ptr(),
                c"%s".as_ptr(),
                message.as_ptr(),
            );
        }
    }
}

impl LogSink for FmiLogger {
    fn log(&mut self, level: LogLevel, message: &str) {
        let (status, category) = match level {
            LogLevel::Info => (Fmi2Status::Ok, "logAll"),
            LogLevel::Warning => (Fmi2Status::Warning, "logStatusWarning"),
            LogLevel::Error => (Fmi2Status::Error, "logStatusError"),
            LogLevel::Fatal => (Fmi2Status::Fatal, "logStatusFatal"),
        };
        self.emit(status, category, message);
    }
}

fn c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}
