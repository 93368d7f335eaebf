//! FMI 2.0 C interface for Baton co-simulation instances.
//!
//! Exposes the `fmi2*` entry points a co-simulation master loads from the
//! shared library, plus a Rust-facing [`Dispatcher`] that owns the
//! instances behind them. The host installs a [`KernelFactory`] once with
//! [`install`]; every `fmi2Instantiate` then asks the factory for a kernel
//! and its variables.
//!
//! Every entry point catches panics (returning `fmi2Fatal`) and records
//! the panic message for [`baton_last_panic_message`]. Instance handles
//! are generation-checked, so a freed or foreign pointer is rejected
//! instead of dereferenced. This is the only crate in the workspace that
//! contains `unsafe` code.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

#[cfg(not(target_pointer_width = "64"))]
compile_error!("baton-ffi encodes instance handles in pointers and needs a 64-bit target");

use std::cell::RefCell;
use std::ffi::c_char;

thread_local! {
    /// Message of the last panic caught by an FFI guard on this thread.
    pub(crate) static LAST_PANIC: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Record a caught panic payload in [`LAST_PANIC`].
pub(crate) fn record_panic(payload: &(dyn std::any::Any + Send)) {
    let msg = baton_engine::sync::panic_message(payload);
    tracing::error!(panic = %msg, "panic caught at FFI boundary");
    LAST_PANIC.with(|cell| *cell.borrow_mut() = msg);
}

/// Run an FFI body, converting a panic into `fmi2Fatal`.
macro_rules! ffi_guard {
    ($body:block) => {
        match ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| $body)) {
            Ok(status) => status,
            Err(payload) => {
                $crate::record_panic(payload.as_ref());
                $crate::status::Fmi2Status::Fatal
            }
        }
    };
}

/// Like [`ffi_guard!`] for entry points that do not return a status.
macro_rules! ffi_guard_or {
    ($default:expr, $body:block) => {
        match ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| $body)) {
            Ok(value) => value,
            Err(payload) => {
                $crate::record_panic(payload.as_ref());
                $default
            }
        }
    };
}

pub mod dispatcher;
pub mod fmi2;
pub mod handle;
pub mod instance;
pub mod logger;
pub mod status;
pub mod types;

pub use dispatcher::{
    install, installed, DispatchError, Dispatcher, InstantiateRequest, KernelBundle, KernelFactory,
};
pub use handle::InstanceHandle;
pub use instance::{EventInfo, Instance, InstanceState};
pub use logger::FmiLogger;
pub use status::Fmi2Status;
pub use types::{Fmi2CallbackFunctions, Fmi2EventInfo, Fmi2Type};

/// Copy the last panic message caught on this thread into `buf`.
///
/// Returns the full message length in bytes (excluding the terminator),
/// or 0 if no panic was recorded. Writes at most `len - 1` bytes plus a
/// NUL terminator. Pass a null `buf` to query the length.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn baton_last_panic_message(buf: *mut c_char, len: usize) -> i32 {
    LAST_PANIC.with(|cell| {
        let msg = cell.borrow();
        let bytes = msg.as_bytes();
        if !buf.is_null() && len > 0 {
            let n = bytes.len().min(len - 1);
            // SAFETY: buf is valid for `len` bytes per caller contract and
            // n < len leaves room for the terminator.
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf.cast::<u8>(), n);
                *buf.add(n) = 0;
            }
        }
        i32::try_from(bytes.len()).unwrap_or(i32::MAX)
    })
}
