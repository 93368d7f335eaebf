//! Strongly-typed identifiers.

use std::fmt;

/// Identifies a variable exchanged with the master.
///
/// Value references are dense, 0-based indices into the variable registry.
/// `ValueRef(n)` is the n-th variable declared when the bridge was built,
/// and stays valid for the lifetime of the instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRef(pub u32);

impl ValueRef {
    /// The reference as a registry index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ValueRef {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Opaque kernel-side handle for a resolved variable referent.
///
/// Issued by [`KernelIo::resolve`](crate::KernelIo::resolve). The bridge
/// never interprets the value; it only hands it back to the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KernelHandle(pub u64);

impl fmt::Display for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
