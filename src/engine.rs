//! The threaded-dispatch execution engine.
//!
//! Preparation rewrites every instruction's opcode word into a dispatch
//! token; the inner loop here reads the token at the current instruction
//! and indexes [`HANDLERS`] with it, so instructions go straight to their
//! handler with no opcode decoding at run time. One extra handler slot
//! past the catalogue serves the end-of-code sentinel, turning any
//! fall-through or off-end dispatch into a jump fault.
//!
//! Handlers own the instruction-pointer update: a handler either leaves
//! the ip at its own instruction (halting and faulting paths) or moves it
//! to the next instruction to execute before returning. On any fault but
//! a trap the loop rewinds the ip to the faulting instruction so the host
//! observes it; a trap leaves the ip where execution should resume.
//!
//! The handler bodies are expanded from the per-opcode recipes carried by
//! the catalogue rows, one micro-instruction arm per recipe kind.

use std::sync::Arc;

use crate::block::CodeBlock;
use crate::error::Fault;
use crate::frame::Reference;
use crate::isa::{self, for_each_instruction, NO_DESTINATION, OPCODE_COUNT};
use crate::process::Machine;
use crate::softfloat::FpuState;
use crate::syscall::SyscallContext;

/// What a handler tells the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Continue,
    Halt,
}

pub(crate) type Handler = fn(&mut Machine) -> Result<Control, Fault>;

/// Catalogue handlers plus the end-of-code handler.
pub(crate) const HANDLER_COUNT: usize = OPCODE_COUNT + 1;

/// The dispatch token installed into the sentinel slot past the last
/// code block of every section.
pub(crate) const EOF_TOKEN: u64 = OPCODE_COUNT as u64;

/// Run `m` until it halts, faults or traps.
pub(crate) fn execute(m: &mut Machine) -> Result<(), Fault> {
    if m.take_trap() {
        return Err(Fault::Trap);
    }
    loop {
        let entry = m.ip;
        let token = m.code.block(entry).u64();
        if log::log_enabled!(log::Level::Trace) {
            match isa::info_for_token(token) {
                Some(info) => log::trace!("{entry:#06x}: {}", info.mnemonic),
                None => log::trace!("{entry:#06x}: <end of code>"),
            }
        }
        let handler = usize::try_from(token)
            .ok()
            .and_then(|t| HANDLERS.get(t))
            .copied()
            .unwrap_or(eof as Handler);
        match handler(m) {
            Ok(Control::Continue) => {}
            Ok(Control::Halt) => return Ok(()),
            Err(Fault::Trap) => return Err(Fault::Trap),
            Err(fault) => {
                m.ip = entry;
                return Err(fault);
            }
        }
    }
}

/// The handler behind the end-of-code token.
fn eof(_m: &mut Machine) -> Result<Control, Fault> {
    Err(Fault::JumpToInvalidAddress)
}

/// Consume a pending pause request after a completed control transfer.
fn trap_dispatch(m: &mut Machine) -> Result<Control, Fault> {
    if m.take_trap() {
        Err(Fault::Trap)
    } else {
        Ok(Control::Continue)
    }
}

/// Transfer control `rel` blocks away from the current instruction.
fn branch(m: &mut Machine, rel: i64) -> Result<Control, Fault> {
    let target = m.ip as i128 + i128::from(rel);
    if target < 0 || target >= m.code.len() as i128 || !m.code.is_instruction_at(target as usize) {
        return Err(Fault::JumpToInvalidAddress);
    }
    m.ip = target as usize;
    trap_dispatch(m)
}

/// Decode a return-value destination operand against the current frame.
fn resolve_dest(m: &Machine, raw: u64) -> Result<Option<usize>, Fault> {
    if raw == NO_DESTINATION {
        return Ok(None);
    }
    let index = usize::try_from(raw).map_err(|_| Fault::InvalidStackIndex)?;
    if index >= m.this_frame().regs.borrow().len() {
        return Err(Fault::InvalidStackIndex);
    }
    Ok(Some(index))
}

fn index_or(raw: u64, fault: Fault) -> Result<usize, Fault> {
    usize::try_from(raw).map_err(|_| fault)
}

macro_rules! handler_body {
    // ---- core ----
    (nop (), $m:ident, $n:literal) => {{
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (halt (), $m:ident, $n:literal) => {{
        $m.return_value = $m.stack_get($m.arg_index(1))?;
        Ok(Control::Halt)
    }};
    (user_except (), $m:ident, $n:literal) => {{
        let code = $m.stack_get($m.arg_index(1))?.u64();
        Err(Fault::UserException(code))
    }};
    (jump (), $m:ident, $n:literal) => {{
        let rel = $m.arg(1).i64();
        branch($m, rel)
    }};
    (jump_z (), $m:ident, $n:literal) => {{
        let rel = $m.arg(1).i64();
        if $m.stack_get($m.arg_index(2))?.u64() == 0 {
            branch($m, rel)
        } else {
            $m.advance($n);
            Ok(Control::Continue)
        }
    }};
    (jump_nz (), $m:ident, $n:literal) => {{
        let rel = $m.arg(1).i64();
        if $m.stack_get($m.arg_index(2))?.u64() != 0 {
            branch($m, rel)
        } else {
            $m.advance($n);
            Ok(Control::Continue)
        }
    }};
    (call (), $m:ident, $n:literal) => {{
        let target = $m.arg(1).u64();
        let dest = resolve_dest($m, $m.arg(2).u64())?;
        let target = index_or(target, Fault::JumpToInvalidAddress)?;
        if !$m.code.is_instruction_at(target) {
            return Err(Fault::JumpToInvalidAddress);
        }
        let return_addr = $m.ip + 1 + $n;
        {
            let frame = $m.next_frame_mut();
            frame.return_addr = Some(return_addr);
            frame.return_dest = dest;
        }
        // Promote the argument frame to the executing frame.
        $m.has_next_frame = false;
        $m.ip = target;
        trap_dispatch($m)
    }};
    (syscall (), $m:ident, $n:literal) => {{
        let index = $m.arg_index(1);
        if index >= $m.program.syscalls.len() {
            return Err(Fault::InvalidSyscallIndex);
        }
        let dest = resolve_dest($m, $m.arg(2).u64())?;
        $m.next_frame_mut();
        let frame = $m.frames.len() - 1;
        // The terminator rows syscall modules iterate up to.
        let pushed_refs = {
            let f = $m.frames.last_mut().unwrap();
            let pushed = !f.refs.is_empty();
            if pushed {
                f.refs.push(Reference::sentinel());
            }
            pushed
        };
        let pushed_crefs = {
            let f = $m.frames.last_mut().unwrap();
            let pushed = !f.crefs.is_empty();
            if pushed {
                f.crefs.push(Reference::sentinel());
            }
            pushed
        };
        let callable = Arc::clone(&$m.program.syscalls[index].callable);
        log::trace!("syscall {index}: {}", $m.program.syscalls[index].name);
        let result = {
            let mut ctx = SyscallContext::new(&mut *$m, frame, dest);
            callable.call(&mut ctx)
        };
        {
            let f = $m.frames.last_mut().unwrap();
            if pushed_refs {
                f.refs.pop();
            }
            if pushed_crefs {
                f.crefs.pop();
            }
        }
        $m.drop_next_frame();
        match result {
            Ok(()) => {
                $m.advance($n);
                trap_dispatch($m)
            }
            Err(code) => {
                $m.syscall_exception = Some(code);
                Err(Fault::SystemCall(code))
            }
        }
    }};
    (ret (), $m:ident, $n:literal) => {{
        let value = $m.stack_get($m.arg_index(1))?;
        $m.drop_next_frame();
        let this = $m.this_frame_index();
        match $m.frames[this].return_addr {
            Some(return_addr) => {
                let dest = $m.frames[this].return_dest;
                $m.frames.pop();
                if let Some(dest) = dest {
                    $m.stack_set(dest, |c| *c = value)?;
                }
                $m.ip = return_addr;
                trap_dispatch($m)
            }
            // Returning from the global frame halts the process.
            None => {
                $m.return_value = value;
                Ok(Control::Halt)
            }
        }
    }};
    (resize_stack (), $m:ident, $n:literal) => {{
        let size = index_or($m.arg(1).u64(), Fault::OutOfMemory)?;
        $m.this_frame().regs.borrow_mut().resize(size, CodeBlock::ZERO);
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (clear_args (), $m:ident, $n:literal) => {{
        $m.next_frame_mut().clear();
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (push (), $m:ident, $n:literal) => {{
        let value = $m.stack_get($m.arg_index(1))?;
        $m.next_frame_mut().regs.borrow_mut().push(value);
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (push_imm (), $m:ident, $n:literal) => {{
        let value = $m.arg(1);
        $m.next_frame_mut().regs.borrow_mut().push(value);
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (push_reg (), $m:ident, $n:literal) => {{
        let value = $m.reg_get($m.arg_index(1))?;
        $m.next_frame_mut().regs.borrow_mut().push(value);
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (mov_imm (), $m:ident, $n:literal) => {{
        let value = $m.arg(1);
        $m.stack_set($m.arg_index(2), |c| *c = value)?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (mov (), $m:ident, $n:literal) => {{
        let value = $m.stack_get($m.arg_index(1))?;
        $m.stack_set($m.arg_index(2), |c| *c = value)?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (mov_from_reg (), $m:ident, $n:literal) => {{
        let value = $m.reg_get($m.arg_index(1))?;
        $m.stack_set($m.arg_index(2), |c| *c = value)?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (mov_to_reg (), $m:ident, $n:literal) => {{
        let value = $m.stack_get($m.arg_index(1))?;
        $m.reg_set($m.arg_index(2), value)?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (fpu_get (), $m:ident, $n:literal) => {{
        let bits = $m.fpu.bits();
        $m.stack_set($m.arg_index(1), |c| c.set_u64(bits))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (fpu_set (), $m:ident, $n:literal) => {{
        let bits = $m.stack_get($m.arg_index(1))?.u64();
        $m.fpu = FpuState::from_bits(bits);
        $m.advance($n);
        Ok(Control::Continue)
    }};

    // ---- references ----
    (push_ref_block ($vec:ident), $m:ident, $n:literal) => {{
        let index = $m.arg_index(1);
        let regs = std::rc::Rc::clone(&$m.this_frame().regs);
        if index >= regs.borrow().len() {
            return Err(Fault::InvalidStackIndex);
        }
        let reference = Reference::from_blocks(regs, index, 0, 8);
        $m.next_frame_mut().$vec.push(reference);
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (push_ref_block_part ($vec:ident), $m:ident, $n:literal) => {{
        let index = $m.arg_index(1);
        let offset = $m.arg(2).u64();
        let size = $m.arg(3).u64();
        if offset > 8 {
            return Err(Fault::OutOfBoundsReferenceOffset);
        }
        if size > 8 - offset {
            return Err(Fault::OutOfBoundsReferenceSize);
        }
        let regs = std::rc::Rc::clone(&$m.this_frame().regs);
        if index >= regs.borrow().len() {
            return Err(Fault::InvalidStackIndex);
        }
        let reference = Reference::from_blocks(regs, index, offset as usize, size as usize);
        $m.next_frame_mut().$vec.push(reference);
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (push_ref_ref ($vec:ident, $err:ident), $m:ident, $n:literal) => {{
        let index = $m.arg_index(1);
        let reference = {
            let source = $m.this_frame().$vec.get(index).ok_or(Fault::$err)?;
            source.subrange(0, source.len())?
        };
        $m.next_frame_mut().$vec.push(reference);
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (push_ref_ref_part ($vec:ident, $err:ident), $m:ident, $n:literal) => {{
        let index = $m.arg_index(1);
        let offset = $m.arg(2).u64();
        let size = $m.arg(3).u64();
        let reference = {
            let source = $m.this_frame().$vec.get(index).ok_or(Fault::$err)?;
            let len = source.len() as u64;
            if offset > len {
                return Err(Fault::OutOfBoundsReferenceOffset);
            }
            if size > len - offset {
                return Err(Fault::OutOfBoundsReferenceSize);
            }
            source.subrange(offset as usize, size as usize)?
        };
        $m.next_frame_mut().$vec.push(reference);
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (push_ref_mem ($vec:ident), $m:ident, $n:literal) => {{
        let handle = $m.stack_get($m.arg_index(1))?.u64();
        let slot = $m.slot(handle)?;
        let len = slot.size();
        let reference = Reference::from_slot(slot, 0, len)?;
        $m.next_frame_mut().$vec.push(reference);
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (push_ref_mem_part ($vec:ident), $m:ident, $n:literal) => {{
        let handle = $m.stack_get($m.arg_index(1))?.u64();
        let offset = $m.arg(2).u64();
        let size = $m.arg(3).u64();
        let slot = $m.slot(handle)?;
        let slot_size = slot.size() as u64;
        if offset > slot_size {
            return Err(Fault::OutOfBoundsReferenceOffset);
        }
        if size > slot_size - offset {
            return Err(Fault::OutOfBoundsReferenceSize);
        }
        let reference = Reference::from_slot(slot, offset as usize, size as usize)?;
        $m.next_frame_mut().$vec.push(reference);
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (ref_size ($vec:ident, $err:ident), $m:ident, $n:literal) => {{
        let len = $m
            .this_frame()
            .$vec
            .get($m.arg_index(1))
            .ok_or(Fault::$err)?
            .len() as u64;
        $m.stack_set($m.arg_index(2), |c| c.set_u64(len))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (ref_load ($vec:ident, $err:ident), $m:ident, $n:literal) => {{
        let offset = index_or($m.stack_get($m.arg_index(2))?.u64(), Fault::OutOfBoundsRead)?;
        let mut buf = [0u8; 8];
        $m.this_frame()
            .$vec
            .get($m.arg_index(1))
            .ok_or(Fault::$err)?
            .read_into(offset, &mut buf)?;
        $m.stack_set($m.arg_index(3), |c| c.set_u64(u64::from_le_bytes(buf)))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (ref_store (), $m:ident, $n:literal) => {{
        let offset = index_or($m.stack_get($m.arg_index(2))?.u64(), Fault::OutOfBoundsWrite)?;
        let value = $m.stack_get($m.arg_index(3))?.u64();
        $m.this_ref($m.arg_index(1))?
            .write_from(offset, &value.to_le_bytes())?;
        $m.advance($n);
        Ok(Control::Continue)
    }};

    // ---- memory ----
    (mem_alloc (), $m:ident, $n:literal) => {{
        let size = $m.stack_get($m.arg_index(1))?.u64();
        let handle = $m.public_alloc(size);
        $m.stack_set($m.arg_index(2), |c| c.set_u64(handle))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (mem_free (), $m:ident, $n:literal) => {{
        let handle = $m.stack_get($m.arg_index(1))?.u64();
        $m.public_free(handle)?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (mem_size (), $m:ident, $n:literal) => {{
        let handle = $m.stack_get($m.arg_index(1))?.u64();
        let size = $m.slot(handle)?.size() as u64;
        $m.stack_set($m.arg_index(2), |c| c.set_u64(size))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (mem_load (), $m:ident, $n:literal) => {{
        let handle = $m.stack_get($m.arg_index(1))?.u64();
        let offset = index_or($m.stack_get($m.arg_index(2))?.u64(), Fault::OutOfBoundsRead)?;
        let slot = $m.slot(handle)?;
        let mut buf = [0u8; 8];
        if !slot.read_at(offset, &mut buf) {
            return Err(Fault::OutOfBoundsRead);
        }
        $m.stack_set($m.arg_index(3), |c| c.set_u64(u64::from_le_bytes(buf)))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (mem_store (), $m:ident, $n:literal) => {{
        let handle = $m.stack_get($m.arg_index(1))?.u64();
        let slot = $m.slot(handle)?;
        if !slot.is_writable() {
            return Err(Fault::WriteDenied);
        }
        let offset = index_or($m.stack_get($m.arg_index(2))?.u64(), Fault::OutOfBoundsWrite)?;
        let value = $m.stack_get($m.arg_index(3))?.u64();
        if !slot.write_at(offset, &value.to_le_bytes()) {
            return Err(Fault::OutOfBoundsWrite);
        }
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (mem_copy (), $m:ident, $n:literal) => {{
        let dst_handle = $m.stack_get($m.arg_index(1))?.u64();
        let dst_offset = index_or($m.stack_get($m.arg_index(2))?.u64(), Fault::OutOfBoundsWrite)?;
        let src_handle = $m.stack_get($m.arg_index(3))?.u64();
        let src_offset = index_or($m.stack_get($m.arg_index(4))?.u64(), Fault::OutOfBoundsRead)?;
        let count = index_or($m.stack_get($m.arg_index(5))?.u64(), Fault::OutOfBoundsRead)?;
        let dst = $m.slot(dst_handle)?;
        if !dst.is_writable() {
            return Err(Fault::WriteDenied);
        }
        let src = $m.slot(src_handle)?;
        let mut buf = vec![0u8; count];
        if !src.read_at(src_offset, &mut buf) {
            return Err(Fault::OutOfBoundsRead);
        }
        if !dst.write_at(dst_offset, &buf) {
            return Err(Fault::OutOfBoundsWrite);
        }
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (mem_read (), $m:ident, $n:literal) => {{
        let handle = $m.stack_get($m.arg_index(1))?.u64();
        let offset = index_or($m.stack_get($m.arg_index(2))?.u64(), Fault::OutOfBoundsRead)?;
        let count = index_or($m.stack_get($m.arg_index(4))?.u64(), Fault::OutOfBoundsRead)?;
        let slot = $m.slot(handle)?;
        let mut buf = vec![0u8; count];
        if !slot.read_at(offset, &mut buf) {
            return Err(Fault::OutOfBoundsRead);
        }
        $m.this_ref($m.arg_index(3))?.write_from(0, &buf)?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (mem_write (), $m:ident, $n:literal) => {{
        let handle = $m.stack_get($m.arg_index(1))?.u64();
        let offset = index_or($m.stack_get($m.arg_index(2))?.u64(), Fault::OutOfBoundsWrite)?;
        let count = index_or($m.stack_get($m.arg_index(4))?.u64(), Fault::OutOfBoundsRead)?;
        let mut buf = vec![0u8; count];
        $m.this_cref($m.arg_index(3))?.read_into(0, &mut buf)?;
        let slot = $m.slot(handle)?;
        if !slot.is_writable() {
            return Err(Fault::WriteDenied);
        }
        if !slot.write_at(offset, &buf) {
            return Err(Fault::OutOfBoundsWrite);
        }
        $m.advance($n);
        Ok(Control::Continue)
    }};

    // ---- integer arithmetic ----
    (int_unop ($g:ident, $s:ident, $f:ident), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let value = $m.stack_get(d)?.$g().$f();
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (int_step ($g:ident, $s:ident, $f:ident), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let value = $m.stack_get(d)?.$g().$f(1);
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (int_binop ($g:ident, $s:ident, $f:ident), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let b = $m.stack_get($m.arg_index(2))?.$g();
        let value = a.$f(b);
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (int_binop2 ($g:ident, $s:ident, $f:ident), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let b = $m.stack_get($m.arg_index(2))?.$g();
        let value = b.$f(a);
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (int_div ($g:ident, $s:ident), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let b = $m.stack_get($m.arg_index(2))?.$g();
        if b == 0 {
            return Err(Fault::IntegerDivideByZero);
        }
        let value = a.checked_div(b).ok_or(Fault::IntegerOverflow)?;
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (int_mod ($g:ident, $s:ident), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let b = $m.stack_get($m.arg_index(2))?.$g();
        if b == 0 {
            return Err(Fault::IntegerDivideByZero);
        }
        let value = a.checked_rem(b).ok_or(Fault::IntegerOverflow)?;
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (int_div2 ($g:ident, $s:ident), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let b = $m.stack_get($m.arg_index(2))?.$g();
        if a == 0 {
            return Err(Fault::IntegerDivideByZero);
        }
        let value = b.checked_div(a).ok_or(Fault::IntegerOverflow)?;
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (int_mod2 ($g:ident, $s:ident), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let b = $m.stack_get($m.arg_index(2))?.$g();
        if a == 0 {
            return Err(Fault::IntegerDivideByZero);
        }
        let value = b.checked_rem(a).ok_or(Fault::IntegerOverflow)?;
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (int_ternop ($g:ident, $s:ident, $f:ident), $m:ident, $n:literal) => {{
        let a = $m.stack_get($m.arg_index(2))?.$g();
        let b = $m.stack_get($m.arg_index(3))?.$g();
        let value = a.$f(b);
        $m.stack_set($m.arg_index(1), |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (int_tdiv ($g:ident, $s:ident), $m:ident, $n:literal) => {{
        let a = $m.stack_get($m.arg_index(2))?.$g();
        let b = $m.stack_get($m.arg_index(3))?.$g();
        if b == 0 {
            return Err(Fault::IntegerDivideByZero);
        }
        let value = a.checked_div(b).ok_or(Fault::IntegerOverflow)?;
        $m.stack_set($m.arg_index(1), |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (int_tmod ($g:ident, $s:ident), $m:ident, $n:literal) => {{
        let a = $m.stack_get($m.arg_index(2))?.$g();
        let b = $m.stack_get($m.arg_index(3))?.$g();
        if b == 0 {
            return Err(Fault::IntegerDivideByZero);
        }
        let value = a.checked_rem(b).ok_or(Fault::IntegerOverflow)?;
        $m.stack_set($m.arg_index(1), |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (int_cmp ($g:ident, $op:tt), $m:ident, $n:literal) => {{
        let a = $m.stack_get($m.arg_index(2))?.$g();
        let b = $m.stack_get($m.arg_index(3))?.$g();
        let value = u64::from(a $op b);
        $m.stack_set($m.arg_index(1), |c| c.set_u64(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (shift_left_zeros ($g:ident, $s:ident, $bits:literal), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let amount = $m.stack_get($m.arg_index(2))?.u64();
        let value = if amount >= $bits { a ^ a } else { a << amount };
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (shift_left_ones ($g:ident, $s:ident, $bits:literal), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let amount = $m.stack_get($m.arg_index(2))?.u64();
        let all = !(a ^ a);
        let value = if amount >= $bits {
            all
        } else {
            (a << amount) | !(all << amount)
        };
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (shift_right_zeros ($g:ident, $s:ident, $bits:literal), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let amount = $m.stack_get($m.arg_index(2))?.u64();
        let value = if amount >= $bits { a ^ a } else { a >> amount };
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (shift_right_ones ($g:ident, $s:ident, $bits:literal), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let amount = $m.stack_get($m.arg_index(2))?.u64();
        let all = !(a ^ a);
        let value = if amount >= $bits {
            all
        } else if amount == 0 {
            a
        } else {
            (a >> amount) | (all << ($bits - amount))
        };
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (shift_right_arith ($g:ident, $s:ident, $bits:literal), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let amount = $m.stack_get($m.arg_index(2))?.u64();
        let zero = a ^ a;
        let value = if amount >= $bits {
            if a < zero {
                !zero
            } else {
                zero
            }
        } else {
            a >> amount
        };
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (rotate ($g:ident, $s:ident, $f:ident), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let amount = $m.stack_get($m.arg_index(2))?.u64();
        // The rotate amount is modular; `rotate_left`/`rotate_right`
        // already reduce modulo the lane width, which divides 2^32.
        let value = a.$f(amount as u32);
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};

    // ---- floating point ----
    (float_neg ($g:ident, $s:ident, $f:ident), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let value = crate::softfloat::$f($m.stack_get(d)?.$g());
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (float_step ($g:ident, $s:ident, $f:ident, $one:literal), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let value = $m.float_op(|st| crate::softfloat::$f(a, $one, st))?;
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (float_binop ($g:ident, $s:ident, $f:ident), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let b = $m.stack_get($m.arg_index(2))?.$g();
        let value = $m.float_op(|st| crate::softfloat::$f(a, b, st))?;
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (float_binop2 ($g:ident, $s:ident, $f:ident), $m:ident, $n:literal) => {{
        let d = $m.arg_index(1);
        let a = $m.stack_get(d)?.$g();
        let b = $m.stack_get($m.arg_index(2))?.$g();
        let value = $m.float_op(|st| crate::softfloat::$f(b, a, st))?;
        $m.stack_set(d, |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (float_ternop ($g:ident, $s:ident, $f:ident), $m:ident, $n:literal) => {{
        let a = $m.stack_get($m.arg_index(2))?.$g();
        let b = $m.stack_get($m.arg_index(3))?.$g();
        let value = $m.float_op(|st| crate::softfloat::$f(a, b, st))?;
        $m.stack_set($m.arg_index(1), |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (float_unop2 ($g:ident, $s:ident, $f:ident), $m:ident, $n:literal) => {{
        let a = $m.stack_get($m.arg_index(2))?.$g();
        let value = $m.float_op(|st| crate::softfloat::$f(a, st))?;
        $m.stack_set($m.arg_index(1), |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (float_cmp ($g:ident, $f:ident), $m:ident, $n:literal) => {{
        let a = $m.stack_get($m.arg_index(2))?.$g();
        let b = $m.stack_get($m.arg_index(3))?.$g();
        let value = $m.float_op(|st| crate::softfloat::$f(a, b, st))?;
        $m.stack_set($m.arg_index(1), |c| c.set_u64(u64::from(value)))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (float_cmp_not ($g:ident, $f:ident), $m:ident, $n:literal) => {{
        let a = $m.stack_get($m.arg_index(2))?.$g();
        let b = $m.stack_get($m.arg_index(3))?.$g();
        let value = $m.float_op(|st| crate::softfloat::$f(a, b, st))?;
        $m.stack_set($m.arg_index(1), |c| c.set_u64(u64::from(!value)))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (float_cmp_swap ($g:ident, $f:ident), $m:ident, $n:literal) => {{
        let a = $m.stack_get($m.arg_index(2))?.$g();
        let b = $m.stack_get($m.arg_index(3))?.$g();
        let value = $m.float_op(|st| crate::softfloat::$f(b, a, st))?;
        $m.stack_set($m.arg_index(1), |c| c.set_u64(u64::from(value)))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};

    // ---- conversions ----
    (conv_int_to_float ($g:ident, $s:ident, $f:ident), $m:ident, $n:literal) => {{
        let v = $m.stack_get($m.arg_index(2))?.$g();
        let value = $m.float_op(|st| crate::softfloat::$f(v as _, st))?;
        $m.stack_set($m.arg_index(1), |c| c.$s(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (conv_float_to_int ($g:ident, $s:ident, $f:ident), $m:ident, $n:literal) => {{
        let v = $m.stack_get($m.arg_index(2))?.$g();
        let value = $m.float_op(|st| crate::softfloat::$f(v, st))?;
        $m.stack_set($m.arg_index(1), |c| c.$s(value as _))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (conv_f32_f64 (), $m:ident, $n:literal) => {{
        let v = $m.stack_get($m.arg_index(2))?.f32_bits();
        let value = $m.float_op(|st| crate::softfloat::f32_to_f64(v, st))?;
        $m.stack_set($m.arg_index(1), |c| c.set_f64_bits(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
    (conv_f64_f32 (), $m:ident, $n:literal) => {{
        let v = $m.stack_get($m.arg_index(2))?.f64_bits();
        let value = $m.float_op(|st| crate::softfloat::f64_to_f32(v, st))?;
        $m.stack_set($m.arg_index(1), |c| c.set_f32_bits(value))?;
        $m.advance($n);
        Ok(Control::Continue)
    }};
}

macro_rules! define_handlers {
    ($(($name:ident, $handler:ident, $mn:literal, $code:literal, $nargs:literal,
        $kind:ident $kargs:tt)),* $(,)?) => {
        $(
            fn $handler(m: &mut Machine) -> Result<Control, Fault> {
                handler_body!($kind $kargs, m, $nargs)
            }
        )*
        /// One handler per catalogue row, indexed by dispatch token,
        /// with the end-of-code handler in the extra trailing slot.
        pub(crate) static HANDLERS: [Handler; HANDLER_COUNT] = [
            $($handler,)*
            eof,
        ];
    };
}
for_each_instruction!(define_handlers);
