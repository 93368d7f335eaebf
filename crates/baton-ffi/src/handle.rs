//! Instance handles that survive the trip through an `fmi2Component`.
//!
//! The master only ever sees an opaque pointer. Behind it is a slot index
//! and a generation counter, so a pointer to a freed instance (or one that
//! never came from us) is rejected instead of dereferenced. Generations
//! start at 1, which keeps every live handle non-null.

use std::ffi::c_void;
use std::fmt;

/// Opaque handle for one FMI instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    fn new(slot: u32, generation: u32) -> Self {
        Self((u64::from(slot) << 32) | u64::from(generation))
    }

    fn slot(self) -> u32 {
        (self.0 >> 32) as u32
    }

    fn generation(self) -> u32 {
        self.0 as u32
    }

    /// The handle as the `fmi2Component` handed to the master.
    pub fn to_ptr(self) -> *mut c_void {
        std::ptr::without_provenance_mut(self.0 as usize)
    }

    /// Recover a handle from an `fmi2Component`. `None` for null.
    pub fn from_ptr(ptr: *const c_void) -> Option<Self> {
        if ptr.is_null() {
            None
        } else {
            Some(Self(ptr.addr() as u64))
        }
    }

    /// The raw 64-bit encoding.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.slot(), self.generation())
    }
}

struct Slot<T> {
    generation: u32,
    data: Option<T>,
}

/// Slot table mapping [`InstanceHandle`]s to owned values.
///
/// Removing a value bumps its slot's generation, so old handles stop
/// resolving. A slot whose generation would wrap is retired for good.
pub(crate) struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    live: usize,
}

impl<T> HandleTable<T> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    /// `None` when every slot index is in use.
    pub fn insert(&mut self, value: T) -> Option<InstanceHandle> {
        let handle = if let Some(idx) = self.free_list.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.data = Some(value);
            InstanceHandle::new(idx, slot.generation)
        } else {
            let idx = u32::try_from(self.slots.len()).ok()?;
            self.slots.push(Slot {
                generation: 1,
                data: Some(value),
            });
            InstanceHandle::new(idx, 1)
        };
        self.live += 1;
        Some(handle)
    }

    pub fn get(&self, handle: InstanceHandle) -> Option<&T> {
        let slot = self.slots.get(handle.slot() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.data.as_ref()
    }

    /// Remove the value behind `handle`. A second remove returns `None`.
    pub fn remove(&mut self, handle: InstanceHandle) -> Option<T> {
        let idx = handle.slot();
        let slot = self.slots.get_mut(idx as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.data.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        if slot.generation != 0 {
            self.free_list.push(idx);
        }
        self.live -= 1;
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    #[test]
    fn live_handles_are_never_null() {
        let mut table = HandleTable::new();
        let h = table.insert("zone").unwrap();
        assert!(!h.to_ptr().is_null());
        assert_eq!(InstanceHandle::from_ptr(h.to_ptr()), Some(h));
        assert_eq!(InstanceHandle::from_ptr(std::ptr::null()), None);
    }

    #[test]
    fn removed_handle_goes_stale() {
        let mut table = HandleTable::new();
        let h = table.insert(7u8).unwrap();
        assert_eq!(table.remove(h), Some(7));
        assert_eq!(table.get(h), None);
        assert_eq!(table.remove(h), None);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn reused_slot_gets_a_new_generation() {
        let mut table = HandleTable::new();
        let first = table.insert(1u8).unwrap();
        table.remove(first);
        let second = table.insert(2u8).unwrap();
        assert_eq!(first.slot(), second.slot());
        assert_eq!(second.generation(), first.generation() + 1);
        assert_eq!(table.get(first), None);
        assert_eq!(table.get(second), Some(&2));
    }

    #[test]
    fn foreign_handle_is_rejected() {
        let mut table = HandleTable::new();
        table.insert(1u8).unwrap();
        assert_eq!(table.get(InstanceHandle(0xdead_beef)), None);
        assert_eq!(table.get(InstanceHandle::new(42, 1)), None);
    }

    #[test]
    fn wrapped_generation_retires_the_slot() {
        let mut table = HandleTable::new();
        let h = table.insert(1u8).unwrap();
        table.remove(h);
        table.slots[0].generation = u32::MAX;
        let last = table.insert(2u8).unwrap();
        assert_eq!(last.generation(), u32::MAX);

        table.remove(last);
        assert_eq!(table.slots[0].generation, 0);
        assert!(!table.free_list.contains(&0));

        let fresh = table.insert(3u8).unwrap();
        assert_eq!(fresh.slot(), 1);
        assert_eq!(table.len(), 1);
    }

    proptest! {
        #[test]
        fn removed_handles_never_resolve_again(ops in prop::collection::vec(any::<bool>(), 1..64)) {
            let mut table = HandleTable::new();
            let mut live = VecDeque::new();
            let mut dead = Vec::new();
            for (i, insert) in ops.into_iter().enumerate() {
                if insert || live.is_empty() {
                    live.push_back((table.insert(i).unwrap(), i));
                } else {
                    let (h, v) = live.pop_front().unwrap();
                    prop_assert_eq!(table.remove(h), Some(v));
                    dead.push(h);
                }
            }
            for (h, v) in &live {
                prop_assert_eq!(table.get(*h), Some(v));
            }
            for h in &dead {
                prop_assert_eq!(table.get(*h), None);
            }
            prop_assert_eq!(table.len(), live.len());
        }
    }
}
