//! Test utilities and a scripted kernel for Baton development.
//!
//! [`ScriptedKernel`] is a deterministic single-zone thermal model that
//! walks through the same lifecycle as a real building-simulation kernel
//! (startup, warmup, sizing, run period) and can be told to fail or panic
//! at a given step. [`fixtures`] provides matching variable declarations.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;
mod scripted;

pub use scripted::{KernelProbe, Misbehavior, Script, ScriptedKernel};
