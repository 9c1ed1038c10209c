//! Memory slots, the handle-indexed memory map, and the private map used
//! for syscall scratch allocations.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Storage behind a memory slot.
///
/// Read-only section data is shared with the program (and with every other
/// process of it); everything writable is owned by one process.
enum SlotBytes {
    Shared(Arc<[u8]>),
    Owned(RefCell<Box<[u8]>>),
}

/// A byte region addressable from bytecode through a 64-bit handle.
///
/// Slots carry a reference count driven by the reference vectors: while any
/// reference into a slot is alive the slot cannot be freed. The count
/// saturates instead of wrapping; a failed [`MemorySlot::try_ref`] surfaces
/// as an out-of-memory fault at the instruction that tried to take the
/// reference.
pub(crate) struct MemorySlot {
    bytes: SlotBytes,
    writable: bool,
    nrefs: Cell<u64>,
}

impl MemorySlot {
    /// A read-only slot over section data shared with the program.
    pub fn shared(data: Arc<[u8]>) -> MemorySlot {
        MemorySlot {
            bytes: SlotBytes::Shared(data),
            writable: false,
            nrefs: Cell::new(0),
        }
    }

    /// A writable, process-owned slot over `data`.
    pub fn owned(data: Box<[u8]>) -> MemorySlot {
        MemorySlot {
            bytes: SlotBytes::Owned(RefCell::new(data)),
            writable: true,
            nrefs: Cell::new(0),
        }
    }

    /// A writable, zero-initialized slot of `size` bytes.
    pub fn zeroed(size: usize) -> MemorySlot {
        MemorySlot::owned(vec![0u8; size].into_boxed_slice())
    }

    pub fn size(&self) -> usize {
        match &self.bytes {
            SlotBytes::Shared(data) => data.len(),
            SlotBytes::Owned(data) => data.borrow().len(),
        }
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn ref_count(&self) -> u64 {
        self.nrefs.get()
    }

    /// Take a reference to this slot. Fails instead of letting the count
    /// wrap around.
    #[must_use]
    pub fn try_ref(&self) -> bool {
        let n = self.nrefs.get();
        if n == u64::MAX {
            return false;
        }
        self.nrefs.set(n + 1);
        true
    }

    pub fn deref(&self) {
        let n = self.nrefs.get();
        debug_assert!(n > 0, "unbalanced memory slot deref");
        self.nrefs.set(n.saturating_sub(1));
    }

    /// Copy `dst.len()` bytes out of the slot. `false` if the range does
    /// not fit.
    #[must_use]
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) -> bool {
        let end = match offset.checked_add(dst.len()) {
            Some(end) if end <= self.size() => end,
            _ => return false,
        };
        match &self.bytes {
            SlotBytes::Shared(data) => dst.copy_from_slice(&data[offset..end]),
            SlotBytes::Owned(data) => dst.copy_from_slice(&data.borrow()[offset..end]),
        }
        true
    }

    /// Copy `src` into the slot. `false` if the range does not fit; the
    /// caller is responsible for the writability check so it can report
    /// the right fault.
    #[must_use]
    pub fn write_at(&self, offset: usize, src: &[u8]) -> bool {
        let end = match offset.checked_add(src.len()) {
            Some(end) if end <= self.size() => end,
            _ => return false,
        };
        match &self.bytes {
            SlotBytes::Shared(_) => false,
            SlotBytes::Owned(data) => {
                data.borrow_mut()[offset..end].copy_from_slice(src);
                true
            }
        }
    }
}

/// Result of [`MemoryMap::free`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FreeOutcome {
    /// A dynamic slot of this many bytes was released.
    Freed(usize),
    /// The handle names a data section; freeing those is a silent no-op.
    Static,
    InvalidHandle,
    /// The slot still has live references.
    InUse,
}

/// Handles 1..=3 name the active linking unit's rodata, rw data and bss
/// sections; 0 is never valid; dynamic allocations start at 4.
pub(crate) const FIRST_DYNAMIC_HANDLE: u64 = 4;

/// The handle-indexed heap of one process.
pub(crate) struct MemoryMap {
    slots: HashMap<u64, Rc<MemorySlot>>,
    /// Rolling probe start for the next allocation; purely an
    /// optimization, correctness only needs returned handles to be free.
    next_try: u64,
}

impl MemoryMap {
    pub fn new() -> MemoryMap {
        MemoryMap {
            slots: HashMap::new(),
            next_try: FIRST_DYNAMIC_HANDLE,
        }
    }

    /// Install a data-section slot under one of the reserved handles.
    pub fn insert_data_section(&mut self, handle: u64, slot: Rc<MemorySlot>) {
        debug_assert!(handle != 0 && handle < FIRST_DYNAMIC_HANDLE);
        debug_assert!(!self.slots.contains_key(&handle));
        self.slots.insert(handle, slot);
    }

    pub fn get(&self, handle: u64) -> Option<&Rc<MemorySlot>> {
        self.slots.get(&handle)
    }

    pub fn slot_size(&self, handle: u64) -> usize {
        self.slots.get(&handle).map_or(0, |s| s.size())
    }

    /// Create a zero-initialized dynamic slot and return its handle.
    /// Limit checking and usage accounting stay with the caller.
    pub fn allocate(&mut self, size: usize) -> u64 {
        let handle = self.find_unused_handle();
        self.slots.insert(handle, Rc::new(MemorySlot::zeroed(size)));
        handle
    }

    pub fn free(&mut self, handle: u64) -> FreeOutcome {
        if handle == 0 {
            return FreeOutcome::InvalidHandle;
        }
        if handle < FIRST_DYNAMIC_HANDLE {
            return FreeOutcome::Static;
        }
        let Some(slot) = self.slots.get(&handle) else {
            return FreeOutcome::InvalidHandle;
        };
        if slot.ref_count() != 0 {
            return FreeOutcome::InUse;
        }
        let slot = self.slots.remove(&handle).unwrap();
        FreeOutcome::Freed(slot.size())
    }

    fn find_unused_handle(&mut self) -> u64 {
        let mut handle = self.next_try;
        while self.slots.contains_key(&handle) {
            handle = handle.wrapping_add(1);
            if handle < FIRST_DYNAMIC_HANDLE {
                handle = FIRST_DYNAMIC_HANDLE;
            }
        }
        self.next_try = handle.wrapping_add(1);
        if self.next_try < FIRST_DYNAMIC_HANDLE {
            self.next_try = FIRST_DYNAMIC_HANDLE;
        }
        handle
    }
}

/// Usage accounting for one memory pool of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Bytes currently in use.
    pub usage: usize,
    /// High-water mark of `usage`.
    pub max: usize,
    /// Allocations that would push `usage` past this fail.
    pub upper_limit: usize,
}

impl Default for MemoryInfo {
    fn default() -> MemoryInfo {
        MemoryInfo {
            usage: 0,
            max: 0,
            upper_limit: usize::MAX,
        }
    }
}

impl MemoryInfo {
    /// Whether `extra` more bytes fit under the limit.
    pub(crate) fn can_grow(&self, extra: usize) -> bool {
        self.upper_limit - self.usage >= extra
    }

    pub(crate) fn grow(&mut self, extra: usize) {
        self.usage += extra;
        if self.usage > self.max {
            self.max = self.usage;
        }
    }

    pub(crate) fn shrink(&mut self, less: usize) {
        debug_assert!(self.usage >= less);
        self.usage = self.usage.saturating_sub(less);
    }
}

/// Scratch allocations made by syscalls on behalf of a process, keyed by
/// an opaque id and not addressable from bytecode. Everything still held
/// here when the process goes away is released with it.
pub(crate) struct PrivateMemoryMap {
    blocks: HashMap<u64, Box<[u8]>>,
    next_id: u64,
}

impl PrivateMemoryMap {
    pub fn new() -> PrivateMemoryMap {
        PrivateMemoryMap {
            blocks: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn allocate(&mut self, size: usize) -> u64 {
        debug_assert!(size > 0);
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.blocks.insert(id, vec![0u8; size].into_boxed_slice());
        id
    }

    /// Release the block behind `id`, returning its size, or 0 for an
    /// unknown id.
    pub fn free(&mut self, id: u64) -> usize {
        self.blocks.remove(&id).map_or(0, |b| b.len())
    }

    pub fn bytes(&self, id: u64) -> Option<&[u8]> {
        self.blocks.get(&id).map(|b| &**b)
    }

    pub fn bytes_mut(&mut self, id: u64) -> Option<&mut [u8]> {
        self.blocks.get_mut(&id).map(|b| &mut **b)
    }
}
