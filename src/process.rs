//! Processes: the mutable half of an execution.
//!
//! A [`Process`] owns everything a run touches: its call stack, its
//! memory map (with private copies of the writable data sections), the
//! floating point state, the protection domain instance cache and the
//! usage counters. The heavy state lives behind one mutex, held for the
//! whole of [`Process::run`]; the only cross-thread operation is
//! [`Process::pause`], which just sets an atomic flag the engine consumes
//! at its next trap point.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::block::CodeBlock;
use crate::engine;
use crate::error::{Fault, PdpiError, RunError};
use crate::frame::{Reference, StackFrame};
use crate::memory::{FreeOutcome, MemoryInfo, MemoryMap, MemorySlot, PrivateMemoryMap};
use crate::program::{Program, ProgramData};
use crate::section::CodeSection;
use crate::softfloat::{Flags, FpuState};
use crate::syscall::{FacilityValue, Pd, Pdpi, PdpiInfo, SyscallError};
use crate::vm::{FacilityFinder, FacilityMap};

/// Observable life cycle of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Initialized,
    Running,
    /// Paused at a trap point; resumable.
    Trapped,
    Finished,
    Crashed,
}

/// One bound protection domain and its per-process instance.
struct PdpiItem {
    pd: Arc<dyn Pd>,
    instance: Box<dyn Pdpi>,
    started: bool,
}

/// Per-process protection domain instances, in binding order. Instances
/// are created with the process, started when it first runs and stopped
/// on any terminal transition; a trap leaves them started so resuming
/// does not re-enter the domains.
pub(crate) struct PdpiCache {
    items: Vec<PdpiItem>,
}

impl PdpiCache {
    fn new(pds: &[Arc<dyn Pd>]) -> Result<PdpiCache, PdpiError> {
        let mut items = Vec::with_capacity(pds.len());
        for pd in pds {
            items.push(PdpiItem {
                pd: Arc::clone(pd),
                instance: pd.new_instance()?,
                started: false,
            });
        }
        Ok(PdpiCache { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Start every instance; on failure, stop the ones already started.
    pub fn start_all(&mut self) -> Result<(), PdpiError> {
        for i in 0..self.items.len() {
            let item = &mut self.items[i];
            debug_assert!(!item.started);
            if let Err(e) = item.instance.start() {
                for item in self.items[..i].iter_mut().rev() {
                    item.instance.stop();
                    item.started = false;
                }
                return Err(e);
            }
            item.started = true;
        }
        Ok(())
    }

    pub fn stop_all(&mut self) {
        for item in self.items.iter_mut().rev() {
            if item.started {
                item.instance.stop();
                item.started = false;
            }
        }
    }

    pub fn info(&self, index: usize) -> Option<PdpiInfo> {
        let item = self.items.get(index)?;
        Some(PdpiInfo {
            pd_index: index,
            pd_handle: item.pd.handle(),
            pdpi_handle: if item.started {
                item.instance.handle()
            } else {
                None
            },
        })
    }

    pub fn set_facility(&mut self, name: &str, value: FacilityValue) {
        for item in &mut self.items {
            item.instance.set_facility(name, Arc::clone(&value));
        }
    }
}

/// The full mutable state the engine executes against.
pub(crate) struct Machine {
    pub program: Arc<ProgramData>,
    /// The active linking unit's code section.
    pub code: Arc<CodeSection>,
    pub unit: usize,
    /// Block offset of the current instruction in `code`.
    pub ip: usize,
    /// Call stack; index 0 is the global frame, which halts on return.
    pub frames: Vec<StackFrame>,
    /// Whether the last frame is the one being prepared for a call.
    pub has_next_frame: bool,
    pub memory: MemoryMap,
    pub private_memory: PrivateMemoryMap,
    pub fpu: FpuState,
    pub mem_total: MemoryInfo,
    pub mem_public_heap: MemoryInfo,
    pub mem_private: MemoryInfo,
    pub mem_reserved: MemoryInfo,
    pub return_value: CodeBlock,
    pub syscall_exception: Option<SyscallError>,
    pub last_fault: Option<Fault>,
    pub pdpis: PdpiCache,
    pub internal: Option<FacilityValue>,
    pub facilities: Arc<FacilityMap>,
    trap: Arc<AtomicBool>,
}

impl Machine {
    fn new(program: Arc<ProgramData>, trap: Arc<AtomicBool>) -> Result<Machine, PdpiError> {
        let unit = program.active_unit;
        let lu = &program.units[unit];

        let mut memory = MemoryMap::new();
        memory.insert_data_section(1, Rc::new(MemorySlot::shared(Arc::clone(&lu.rodata))));
        memory.insert_data_section(2, Rc::new(MemorySlot::owned(Vec::from(&*lu.data).into())));
        memory.insert_data_section(3, Rc::new(MemorySlot::zeroed(lu.bss_size)));

        let pdpis = PdpiCache::new(&program.pds)?;
        let facilities = FacilityMap::child(&program.facilities);
        let code = Arc::clone(&lu.code);

        Ok(Machine {
            program,
            code,
            unit,
            ip: 0,
            frames: vec![StackFrame::new()],
            has_next_frame: false,
            memory,
            private_memory: PrivateMemoryMap::new(),
            fpu: FpuState::new(),
            mem_total: MemoryInfo::default(),
            mem_public_heap: MemoryInfo::default(),
            mem_private: MemoryInfo::default(),
            mem_reserved: MemoryInfo::default(),
            return_value: CodeBlock::ZERO,
            syscall_exception: None,
            last_fault: None,
            pdpis,
            internal: None,
            facilities,
            trap,
        })
    }

    /// Consume a pending pause request.
    pub fn take_trap(&self) -> bool {
        self.trap.swap(false, Ordering::Acquire)
    }

    /// Index of the executing frame.
    pub fn this_frame_index(&self) -> usize {
        self.frames.len() - 1 - usize::from(self.has_next_frame)
    }

    pub fn this_frame(&self) -> &StackFrame {
        &self.frames[self.this_frame_index()]
    }

    /// The frame collecting arguments for the next call, created on
    /// first use.
    pub fn next_frame_mut(&mut self) -> &mut StackFrame {
        if !self.has_next_frame {
            self.frames.push(StackFrame::new());
            self.has_next_frame = true;
        }
        self.frames.last_mut().unwrap()
    }

    pub fn drop_next_frame(&mut self) {
        if self.has_next_frame {
            self.frames.pop();
            self.has_next_frame = false;
        }
    }

    /// Operand block `n` of the current instruction.
    #[inline]
    pub fn arg(&self, n: usize) -> CodeBlock {
        self.code.block(self.ip + n)
    }

    /// Operand block `n`, taken as an index.
    #[inline]
    pub fn arg_index(&self, n: usize) -> usize {
        self.arg(n).u64() as usize
    }

    /// Advance past the current instruction and its `num_args` operands.
    #[inline]
    pub fn advance(&mut self, num_args: usize) {
        self.ip += 1 + num_args;
    }

    pub fn stack_get(&self, index: usize) -> Result<CodeBlock, Fault> {
        self.this_frame()
            .regs
            .borrow()
            .get(index)
            .copied()
            .ok_or(Fault::InvalidStackIndex)
    }

    pub fn stack_set(
        &self,
        index: usize,
        write: impl FnOnce(&mut CodeBlock),
    ) -> Result<(), Fault> {
        match self.this_frame().regs.borrow_mut().get_mut(index) {
            Some(cell) => {
                write(cell);
                Ok(())
            }
            None => Err(Fault::InvalidStackIndex),
        }
    }

    pub fn reg_get(&self, index: usize) -> Result<CodeBlock, Fault> {
        self.frames[0]
            .regs
            .borrow()
            .get(index)
            .copied()
            .ok_or(Fault::InvalidRegisterIndex)
    }

    pub fn reg_set(&self, index: usize, value: CodeBlock) -> Result<(), Fault> {
        match self.frames[0].regs.borrow_mut().get_mut(index) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Fault::InvalidRegisterIndex),
        }
    }

    pub fn this_ref(&self, index: usize) -> Result<&Reference, Fault> {
        self.this_frame()
            .refs
            .get(index)
            .ok_or(Fault::InvalidReferenceIndex)
    }

    pub fn this_cref(&self, index: usize) -> Result<&Reference, Fault> {
        self.this_frame()
            .crefs
            .get(index)
            .ok_or(Fault::InvalidConstReferenceIndex)
    }

    /// The memory slot behind `handle`; the null handle is never valid.
    pub fn slot(&self, handle: u64) -> Result<Rc<MemorySlot>, Fault> {
        if handle == 0 {
            return Err(Fault::InvalidMemoryHandle);
        }
        self.memory
            .get(handle)
            .cloned()
            .ok_or(Fault::InvalidMemoryHandle)
    }

    /// Allocate public heap memory, 0 on limit or allocator failure.
    pub fn public_alloc(&mut self, size: u64) -> u64 {
        let Ok(size) = usize::try_from(size) else {
            return 0;
        };
        if !self.mem_total.can_grow(size) || !self.mem_public_heap.can_grow(size) {
            return 0;
        }
        let handle = self.memory.allocate(size);
        self.mem_public_heap.grow(size);
        self.mem_total.grow(size);
        handle
    }

    pub fn public_free(&mut self, handle: u64) -> Result<(), Fault> {
        match self.memory.free(handle) {
            FreeOutcome::Freed(size) => {
                self.mem_public_heap.shrink(size);
                self.mem_total.shrink(size);
                Ok(())
            }
            FreeOutcome::Static => Ok(()),
            FreeOutcome::InvalidHandle => Err(Fault::InvalidMemoryHandle),
            FreeOutcome::InUse => Err(Fault::MemoryInUse),
        }
    }

    pub fn private_alloc(&mut self, size: usize) -> Option<u64> {
        if size == 0 {
            return None;
        }
        if !self.mem_total.can_grow(size) || !self.mem_private.can_grow(size) {
            return None;
        }
        let id = self.private_memory.allocate(size);
        self.mem_private.grow(size);
        self.mem_total.grow(size);
        Some(id)
    }

    pub fn private_free(&mut self, id: u64) {
        let freed = self.private_memory.free(id);
        if freed != 0 {
            self.mem_private.shrink(freed);
            self.mem_total.shrink(freed);
        }
    }

    pub fn private_reserve(&mut self, size: usize) -> bool {
        if size == 0 {
            return false;
        }
        if !self.mem_total.can_grow(size) || !self.mem_reserved.can_grow(size) {
            return false;
        }
        self.mem_reserved.grow(size);
        self.mem_total.grow(size);
        true
    }

    pub fn private_release(&mut self, size: usize) -> bool {
        if size == 0 || self.mem_reserved.usage < size {
            return false;
        }
        self.mem_reserved.shrink(size);
        self.mem_total.shrink(size);
        true
    }

    /// Run a softfloat operation against the process FPU state and
    /// promote any crash-masked raised flag into a fault.
    pub fn float_op<T>(&mut self, op: impl FnOnce(&mut FpuState) -> T) -> Result<T, Fault> {
        self.fpu.clear_flags();
        let result = op(&mut self.fpu);
        let crash = self.fpu.flags() & self.fpu.crash_mask();
        if crash.is_empty() {
            return Ok(result);
        }
        Err(if crash.contains(Flags::DIV_BY_ZERO) {
            Fault::FloatingPointDivideByZero
        } else if crash.contains(Flags::OVERFLOW) {
            Fault::FloatingPointOverflow
        } else if crash.contains(Flags::UNDERFLOW) {
            Fault::FloatingPointUnderflow
        } else if crash.contains(Flags::INEXACT) {
            Fault::FloatingPointInexactResult
        } else if crash.contains(Flags::INVALID) {
            Fault::FloatingPointInvalidOperation
        } else {
            Fault::FloatingPointUnknown
        })
    }
}

struct ProcessShared {
    machine: Mutex<Machine>,
    state: Mutex<ProcessState>,
    trap: Arc<AtomicBool>,
}

// The machine uses single-thread primitives (`Rc`, `Cell`, `RefCell`)
// internally, but none of them escape: every access goes through the
// mutex, and what hosts are handed across it (facility values, handles)
// is `Send + Sync` on its own. The trap flag is the one genuinely
// concurrent piece and is atomic.
unsafe impl Send for ProcessShared {}
unsafe impl Sync for ProcessShared {}

/// A single execution of a [`Program`].
#[derive(Clone)]
pub struct Process {
    shared: Arc<ProcessShared>,
}

impl Process {
    /// Create a process in the `Initialized` state, with its own copies
    /// of the writable data sections and instances of every bound
    /// protection domain (not yet started).
    pub fn new(program: &Program) -> Result<Process, PdpiError> {
        let trap = Arc::new(AtomicBool::new(false));
        let machine = Machine::new(Arc::clone(&program.data), Arc::clone(&trap))?;
        Ok(Process {
            shared: Arc::new(ProcessShared {
                machine: Mutex::new(machine),
                state: Mutex::new(ProcessState::Initialized),
                trap,
            }),
        })
    }

    /// Run the process from its entry point until it halts, faults or
    /// traps. `Err(RunError::Fault(Fault::Trap))` leaves the process
    /// resumable.
    pub fn run(&self) -> Result<(), RunError> {
        self.transition(ProcessState::Initialized, RunError::NotInInitializedState)?;
        let mut machine = self.shared.machine.lock().unwrap();
        if let Err(e) = machine.pdpis.start_all() {
            self.set_state(ProcessState::Initialized);
            return Err(e.into());
        }
        log::debug!("process starting at ip {}", machine.ip);
        let result = engine::execute(&mut machine);
        self.settle(&mut machine, result)
    }

    /// Continue a trapped process at its saved instruction pointer.
    pub fn resume(&self) -> Result<(), RunError> {
        self.transition(ProcessState::Trapped, RunError::NotInTrappedState)?;
        let mut machine = self.shared.machine.lock().unwrap();
        log::debug!("process resuming at ip {}", machine.ip);
        let result = engine::execute(&mut machine);
        self.settle(&mut machine, result)
    }

    /// Ask the process to stop at its next trap point. Safe to call from
    /// any thread, any number of times.
    pub fn pause(&self) {
        self.shared.trap.store(true, Ordering::Release);
    }

    pub fn state(&self) -> ProcessState {
        *self.shared.state.lock().unwrap()
    }

    pub fn return_value(&self) -> CodeBlock {
        self.shared.machine.lock().unwrap().return_value
    }

    /// The host error code of the last failing system call, if any.
    pub fn syscall_exception(&self) -> Option<SyscallError> {
        self.shared.machine.lock().unwrap().syscall_exception
    }

    /// The fault that crashed the process, if it crashed.
    pub fn last_fault(&self) -> Option<Fault> {
        self.shared.machine.lock().unwrap().last_fault.clone()
    }

    /// Index of the code section the process executes.
    pub fn current_code_section(&self) -> usize {
        self.shared.machine.lock().unwrap().unit
    }

    /// Block offset of the current instruction; after a fault, the
    /// faulting instruction, and after a trap, where `resume` continues.
    pub fn current_ip(&self) -> usize {
        self.shared.machine.lock().unwrap().ip
    }

    /// Attach an opaque host value syscalls can read back through their
    /// context.
    pub fn set_internal(&self, value: Option<FacilityValue>) {
        self.shared.machine.lock().unwrap().internal = value;
    }

    pub fn internal(&self) -> Option<FacilityValue> {
        self.shared.machine.lock().unwrap().internal.clone()
    }

    pub fn set_facility(&self, name: &str, value: FacilityValue) {
        self.shared.machine.lock().unwrap().facilities.set(name, value);
    }

    pub fn unset_facility(&self, name: &str) -> bool {
        self.shared.machine.lock().unwrap().facilities.unset(name)
    }

    pub fn set_facility_finder<F>(&self, finder: F)
    where
        F: Fn(&str) -> Option<FacilityValue> + Send + Sync + 'static,
    {
        self.shared
            .machine
            .lock()
            .unwrap()
            .facilities
            .set_finder(Some(Arc::new(finder) as Arc<FacilityFinder>));
    }

    pub fn find_facility(&self, name: &str) -> Option<FacilityValue> {
        self.shared.machine.lock().unwrap().facilities.find(name)
    }

    /// Hand a facility to every cached protection domain instance.
    pub fn set_pdpi_facility(&self, name: &str, value: FacilityValue) {
        self.shared
            .machine
            .lock()
            .unwrap()
            .pdpis
            .set_facility(name, value);
    }

    pub fn total_memory(&self) -> MemoryInfo {
        self.shared.machine.lock().unwrap().mem_total
    }

    pub fn public_heap_memory(&self) -> MemoryInfo {
        self.shared.machine.lock().unwrap().mem_public_heap
    }

    pub fn private_memory(&self) -> MemoryInfo {
        self.shared.machine.lock().unwrap().mem_private
    }

    pub fn reserved_memory(&self) -> MemoryInfo {
        self.shared.machine.lock().unwrap().mem_reserved
    }

    pub fn set_total_memory_limit(&self, limit: usize) {
        self.shared.machine.lock().unwrap().mem_total.upper_limit = limit;
    }

    pub fn set_public_heap_memory_limit(&self, limit: usize) {
        self.shared.machine.lock().unwrap().mem_public_heap.upper_limit = limit;
    }

    pub fn set_private_memory_limit(&self, limit: usize) {
        self.shared.machine.lock().unwrap().mem_private.upper_limit = limit;
    }

    pub fn set_reserved_memory_limit(&self, limit: usize) {
        self.shared.machine.lock().unwrap().mem_reserved.upper_limit = limit;
    }

    fn transition(&self, expect: ProcessState, err: RunError) -> Result<(), RunError> {
        let mut state = self.shared.state.lock().unwrap();
        if *state != expect {
            return Err(err);
        }
        *state = ProcessState::Running;
        Ok(())
    }

    fn set_state(&self, new: ProcessState) {
        *self.shared.state.lock().unwrap() = new;
    }

    /// Map the engine's exit into the life cycle: stop the pdpis on any
    /// terminal state, leave them started across a trap.
    fn settle(&self, machine: &mut Machine, result: Result<(), Fault>) -> Result<(), RunError> {
        match result {
            Ok(()) => {
                machine.pdpis.stop_all();
                self.set_state(ProcessState::Finished);
                log::debug!("process finished at ip {}", machine.ip);
                Ok(())
            }
            Err(Fault::Trap) => {
                self.set_state(ProcessState::Trapped);
                log::debug!("process trapped at ip {}", machine.ip);
                Err(Fault::Trap.into())
            }
            Err(fault) => {
                machine.last_fault = Some(fault.clone());
                machine.pdpis.stop_all();
                self.set_state(ProcessState::Crashed);
                log::debug!("process crashed at ip {}: {fault}", machine.ip);
                Err(fault.into())
            }
        }
    }
}
