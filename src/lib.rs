//! A stack-based bytecode virtual machine for SecreC assembly
//! executables.
//!
//! The library loads version-0x0 executable images (one or more linking
//! units of text, rodata, data, bss and binding sections), links them
//! against host-provided system calls and protection domains, verifies
//! and tokenizes the bytecode, and runs any number of processes against
//! the result.
//!
//! The three core types mirror that split:
//!
//! - [`Vm`] carries host configuration: the system call and protection
//!   domain finders used at link time and the root facility map.
//! - [`Program`] is an immutable, verified executable, shared by all of
//!   its processes.
//! - [`Process`] owns the mutable half: call stack, memory map, FPU
//!   state, usage counters and per-process protection domain instances.
//!
//! ```no_run
//! use secrec_vm::{Program, Process, Vm};
//!
//! fn main() -> anyhow::Result<()> {
//!     let vm = Vm::new();
//!     let program = Program::load_from_file(&vm, "program.sx")?;
//!     let process = Process::new(&program)?;
//!     process.run()?;
//!     println!("returned {}", process.return_value().i64());
//!     Ok(())
//! }
//! ```
//!
//! Execution is deterministic by construction: all floating point goes
//! through the [`softfloat`] module rather than the host FPU, integer
//! semantics are fixed two's-complement with explicit faults, and every
//! jump is validated against instruction boundaries discovered at load
//! time. A process can be paused from another thread with
//! [`Process::pause`] and continued with [`Process::resume`]; everything
//! else about a process is single-threaded and owned.

mod block;
mod engine;
mod error;
pub mod exe;
mod frame;
pub mod isa;
mod memory;
mod prepare;
mod process;
mod program;
mod section;
pub mod softfloat;
mod syscall;
mod vm;

pub use block::CodeBlock;
pub use error::{Fault, LoadError, PdpiError, RunError};
pub use frame::Reference;
pub use memory::MemoryInfo;
pub use process::{Process, ProcessState};
pub use program::Program;
pub use syscall::{
    FacilityValue, Pd, Pdpi, PdpiInfo, Syscall, SyscallContext, SyscallError,
};
pub use vm::{FacilityFinder, PdFinder, SyscallFinder, Vm};
