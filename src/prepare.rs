//! The two-pass bytecode verifier and dispatch-token installer.
//!
//! Pass one walks the block stream from offset zero, decoding opcodes
//! against the catalogue and skipping their operands, marking every
//! instruction start on the way. Pass two runs per-opcode checks over
//! the discovered instructions (today: system call indices against the
//! binding table). Finally every instruction's opcode word is replaced
//! with the engine's dispatch token for it and the trailing sentinel slot
//! gets the end-of-code token, making any fall-through or off-end
//! dispatch land on a deterministic fault handler.
//!
//! After this pass a section never changes again; the dispatch tokens
//! are what the engine's inner loop indexes its handler table with.

use crate::engine;
use crate::error::LoadError;
use crate::isa::Opcode;
use crate::section::CodeSection;

pub(crate) fn prepare(section: &mut CodeSection, syscall_count: usize) -> Result<(), LoadError> {
    let mut instructions = Vec::new();

    // Pass 1: discover instruction boundaries.
    let mut i = 0;
    while i < section.len() {
        let word = section.block(i).u64();
        let op = Opcode::from_wire_code(word).ok_or(LoadError::InvalidInstruction)?;
        let info = op.info();
        if i + info.num_args >= section.len() {
            return Err(LoadError::InvalidInstructionArguments);
        }
        section.register_instruction(i, info);
        instructions.push((i, op));
        i += 1 + info.num_args;
    }

    // Pass 2: per-opcode verification.
    for &(offset, op) in &instructions {
        if op == Opcode::Syscall {
            let index = section.block(offset + 1).u64();
            if index >= syscall_count as u64 {
                return Err(LoadError::InvalidInstructionArguments);
            }
        }
    }

    // Install dispatch tokens, end-of-code sentinel last.
    for &(offset, op) in &instructions {
        section.block_mut(offset).set_u64(op.dispatch_token());
    }
    let end = section.len();
    section.block_mut(end).set_u64(engine::EOF_TOKEN);

    Ok(())
}
