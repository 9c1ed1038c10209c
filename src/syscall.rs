//! Host-provided system calls and protection domains.
//!
//! Hosts implement [`Syscall`] for each signature their finder resolves.
//! During execution a call receives a [`SyscallContext`]: the argument
//! blocks and reference rows the bytecode pushed, the optional return
//! slot, and the process services (public and private memory, pdpi
//! handles, facilities) the machine exports to modules.

use std::any::Any;
use std::sync::Arc;

use crate::block::CodeBlock;
use crate::error::PdpiError;
use crate::frame::Reference;
use crate::process::Machine;

/// An opaque host value passed through facility and handle plumbing.
pub type FacilityValue = Arc<dyn Any + Send + Sync>;

/// The failure codes a system call may return. Any of these crashes the
/// calling process with a system call fault; the code stays readable on
/// the process afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    OutOfMemory,
    /// The surrounding framework (not the module itself) failed.
    FrameworkError,
    ModuleError,
    InvalidCall,
    GeneralError,
}

/// A host-implemented system call.
pub trait Syscall: Send + Sync {
    fn call(&self, ctx: &mut SyscallContext<'_>) -> Result<(), SyscallError>;
}

impl<F> Syscall for F
where
    F: Fn(&mut SyscallContext<'_>) -> Result<(), SyscallError> + Send + Sync,
{
    fn call(&self, ctx: &mut SyscallContext<'_>) -> Result<(), SyscallError> {
        self(ctx)
    }
}

/// A host-provided protection domain. The machine only ever asks it for
/// per-process instances; everything else about it is the host's
/// business.
pub trait Pd: Send + Sync {
    fn name(&self) -> &str;

    /// The domain-level handle exposed to syscalls via
    /// [`SyscallContext::pdpi_info`].
    fn handle(&self) -> Option<FacilityValue> {
        None
    }

    fn new_instance(&self) -> Result<Box<dyn Pdpi>, PdpiError>;
}

/// A protection domain instance bound to one process. Started when the
/// process first runs and stopped when it reaches a terminal state; a
/// trapped process keeps its instances started so that resuming is
/// cheap.
pub trait Pdpi: Send {
    fn start(&mut self) -> Result<(), PdpiError>;

    fn stop(&mut self);

    /// The instance handle; meaningful only while started.
    fn handle(&self) -> Option<FacilityValue> {
        None
    }

    fn set_facility(&mut self, name: &str, value: FacilityValue) {
        let _ = (name, value);
    }
}

/// What a syscall learns about one bound protection domain instance.
#[derive(Clone)]
pub struct PdpiInfo {
    pub pd_index: usize,
    pub pd_handle: Option<FacilityValue>,
    /// `None` unless the instance is currently started.
    pub pdpi_handle: Option<FacilityValue>,
}

/// The view a running system call gets of its process.
///
/// Reference rows are read and written through [`Reference`] accessors;
/// when the bytecode pushed any references, the corresponding slice ends
/// with a terminator row ([`Reference::is_sentinel`]), matching the wire
/// convention syscall modules iterate by.
pub struct SyscallContext<'a> {
    machine: &'a mut Machine,
    frame: usize,
    return_dest: Option<usize>,
}

impl<'a> SyscallContext<'a> {
    pub(crate) fn new(
        machine: &'a mut Machine,
        frame: usize,
        return_dest: Option<usize>,
    ) -> SyscallContext<'a> {
        SyscallContext {
            machine,
            frame,
            return_dest,
        }
    }

    /// Number of argument blocks pushed for this call.
    pub fn arg_count(&self) -> usize {
        self.machine.frames[self.frame].regs.borrow().len()
    }

    pub fn arg(&self, index: usize) -> Option<CodeBlock> {
        self.machine.frames[self.frame].regs.borrow().get(index).copied()
    }

    /// Overwrite an argument block; arguments are shared with the callee
    /// frame, so this is visible to nothing but the syscall itself.
    pub fn set_arg(&mut self, index: usize, value: CodeBlock) -> bool {
        match self.machine.frames[self.frame].regs.borrow_mut().get_mut(index) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    /// The writable reference rows, terminator included when non-empty.
    pub fn refs(&self) -> &[Reference] {
        &self.machine.frames[self.frame].refs
    }

    /// The const reference rows, terminator included when non-empty.
    pub fn crefs(&self) -> &[Reference] {
        &self.machine.frames[self.frame].crefs
    }

    /// Whether the call site expects a return value.
    pub fn wants_return_value(&self) -> bool {
        self.return_dest.is_some()
    }

    /// Store the call's return value, if the call site asked for one.
    pub fn set_return_value(&mut self, value: CodeBlock) -> bool {
        let Some(dest) = self.return_dest else {
            return false;
        };
        let caller = self.frame - 1;
        match self.machine.frames[caller].regs.borrow_mut().get_mut(dest) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    /// Allocate public heap memory; 0 when limits or the allocator say
    /// no.
    pub fn public_alloc(&mut self, size: u64) -> u64 {
        self.machine.public_alloc(size)
    }

    /// Free a public heap handle; `false` for invalid or still
    /// referenced handles.
    pub fn public_free(&mut self, handle: u64) -> bool {
        self.machine.public_free(handle).is_ok()
    }

    pub fn public_size(&self, handle: u64) -> usize {
        self.machine.memory.slot_size(handle)
    }

    /// Copy bytes out of a public slot. `false` when the handle is
    /// unknown or the range does not fit.
    pub fn public_read(&self, handle: u64, offset: usize, dst: &mut [u8]) -> bool {
        match self.machine.memory.get(handle) {
            Some(slot) => slot.read_at(offset, dst),
            None => false,
        }
    }

    /// Copy bytes into a public slot. `false` when the handle is
    /// unknown, read-only, or the range does not fit.
    pub fn public_write(&mut self, handle: u64, offset: usize, src: &[u8]) -> bool {
        match self.machine.memory.get(handle) {
            Some(slot) => slot.is_writable() && slot.write_at(offset, src),
            None => false,
        }
    }

    /// Allocate private scratch memory, invisible to bytecode. Returns
    /// an id usable with the other `private_` calls, or `None` when
    /// limits forbid it.
    pub fn private_alloc(&mut self, size: usize) -> Option<u64> {
        self.machine.private_alloc(size)
    }

    pub fn private_free(&mut self, id: u64) {
        self.machine.private_free(id);
    }

    pub fn private_read(&self, id: u64, offset: usize, dst: &mut [u8]) -> bool {
        match self.machine.private_memory.bytes(id) {
            Some(bytes) => copy_in_bounds(bytes, offset, dst.len())
                .map(|range| dst.copy_from_slice(&bytes[range]))
                .is_some(),
            None => false,
        }
    }

    pub fn private_write(&mut self, id: u64, offset: usize, src: &[u8]) -> bool {
        match self.machine.private_memory.bytes_mut(id) {
            Some(bytes) => {
                let len = src.len();
                match copy_in_bounds(bytes, offset, len) {
                    Some(range) => {
                        bytes[range].copy_from_slice(src);
                        true
                    }
                    None => false,
                }
            }
            None => false,
        }
    }

    /// Account `size` bytes against the reserved pool without backing
    /// storage.
    pub fn private_reserve(&mut self, size: usize) -> bool {
        self.machine.private_reserve(size)
    }

    pub fn private_release(&mut self, size: usize) -> bool {
        self.machine.private_release(size)
    }

    pub fn pdpi_count(&self) -> usize {
        self.machine.pdpis.len()
    }

    /// Handles of the protection domain instance bound at `pd_index`.
    pub fn pdpi_info(&self, pd_index: usize) -> Option<PdpiInfo> {
        self.machine.pdpis.info(pd_index)
    }

    /// Look a facility up through the process, program and vm layers.
    pub fn process_facility(&self, name: &str) -> Option<FacilityValue> {
        self.machine.facilities.find(name)
    }

    /// The opaque value the host attached to this process, if any.
    pub fn process_internal(&self) -> Option<FacilityValue> {
        self.machine.internal.clone()
    }
}

fn copy_in_bounds(bytes: &[u8], offset: usize, len: usize) -> Option<std::ops::Range<usize>> {
    let end = offset.checked_add(len)?;
    (end <= bytes.len()).then_some(offset..end)
}
