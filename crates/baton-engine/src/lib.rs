//! Step synchronizer and kernel bridge for Baton co-simulation instances.
//!
//! A simulation kernel owns its main loop; a co-simulation master wants to
//! call in, move time forward, and read results. This crate reconciles the
//! two: the kernel runs on a dedicated thread and parks at each step
//! boundary, the master resumes it one call at a time.
//!
//! - [`sync`]: the turn-taking protocol, generic over the shared session.
//! - [`Bridge`]: a kernel, its variable registry and the synchronizer.
//! - [`BridgeConfig`]: validated construction parameters.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod log_queue;
pub mod sync;

pub use bridge::{Bridge, BridgeError, LogSink, Session};
pub use config::{BridgeConfig, ConfigError};
pub use log_queue::{LogMessage, LogQueue};
pub use sync::{KernelPort, SyncError, SyncState, Synchronizer, Turn};
