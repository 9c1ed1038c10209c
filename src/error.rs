//! Error and fault types.
//!
//! Loading problems surface as [`LoadError`] and leave no usable
//! [`Program`](crate::Program) behind. Everything that can go wrong while a
//! process executes is a [`Fault`]; the engine never recovers from one
//! internally, it records the faulting instruction pointer and hands the
//! fault to the host.

use crate::syscall::SyscallError;

/// An error produced while loading and preparing an executable.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("invalid executable file header")]
    InvalidHeader,
    #[error("executable file format version not supported")]
    VersionMismatch,
    #[error("invalid or absent data in executable file")]
    InvalidInputFile,
    #[error("no code sections found")]
    NoCodeSections,
    #[error("invalid instruction found")]
    InvalidInstruction,
    #[error("invalid arguments for instruction found")]
    InvalidInstructionArguments,
    #[error("binding for missing system call {0:?} found")]
    UndefinedSyscallBind(String),
    #[error("binding for missing protection domain {0:?} found")]
    UndefinedPdBind(String),
    #[error("duplicate protection domain binding {0:?} found")]
    DuplicatePdBind(String),
    #[error("implementation limits reached")]
    ImplementationLimits,
    #[error("failed to read executable")]
    Io(#[from] std::io::Error),
}

/// A runtime fault raised by the execution engine.
///
/// Every fault is terminal for the process except [`Fault::Trap`], the
/// cooperative suspension requested by `Process::pause` and cleared again
/// by `Process::resume`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("jump to invalid address")]
    JumpToInvalidAddress,
    #[error("invalid stack index")]
    InvalidStackIndex,
    #[error("invalid register index")]
    InvalidRegisterIndex,
    #[error("invalid reference index")]
    InvalidReferenceIndex,
    #[error("invalid constant reference index")]
    InvalidConstReferenceIndex,
    #[error("invalid system call index")]
    InvalidSyscallIndex,
    #[error("invalid memory handle")]
    InvalidMemoryHandle,
    #[error("read out of bounds")]
    OutOfBoundsRead,
    #[error("write out of bounds")]
    OutOfBoundsWrite,
    #[error("write denied")]
    WriteDenied,
    #[error("out of bounds reference offset")]
    OutOfBoundsReferenceOffset,
    #[error("out of bounds reference size")]
    OutOfBoundsReferenceSize,
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("attempted to free memory which is in use")]
    MemoryInUse,
    #[error("out of memory")]
    OutOfMemory,
    #[error("floating point division by zero")]
    FloatingPointDivideByZero,
    #[error("floating point overflow")]
    FloatingPointOverflow,
    #[error("floating point underflow")]
    FloatingPointUnderflow,
    #[error("inexact floating point result")]
    FloatingPointInexactResult,
    #[error("invalid floating point operation")]
    FloatingPointInvalidOperation,
    #[error("unknown floating point exception")]
    FloatingPointUnknown,
    #[error("system call error")]
    SystemCall(SyscallError),
    /// The user-exception instruction executed; the 64-bit code the
    /// bytecode supplied rides along.
    #[error("user-defined exception with (unsigned) value of {0}")]
    UserException(u64),
    #[error("process trapped")]
    Trap,
}

/// An error returned by [`Process::run`](crate::Process::run) and
/// [`Process::resume`](crate::Process::resume).
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("process not in initialized (pre-run) state")]
    NotInInitializedState,
    #[error("process not in trapped state")]
    NotInTrappedState,
    #[error(transparent)]
    Pdpi(#[from] PdpiError),
    #[error(transparent)]
    Fault(#[from] Fault),
}

/// A protection-domain instance failed to be created or started.
#[derive(Debug, thiserror::Error)]
#[error("failed to start protection domain instance for {pd:?}")]
pub struct PdpiError {
    pub pd: String,
}

impl PdpiError {
    pub fn new(pd: impl Into<String>) -> PdpiError {
        PdpiError { pd: pd.into() }
    }
}
