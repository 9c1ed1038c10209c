//! Executable parsing, binding resolution and verifier failures.

use secrec_vm::exe::{Builder, MAGIC};
use secrec_vm::isa::Opcode::{self, *};
use secrec_vm::{CodeBlock, LoadError, Process, Program, Vm};

use crate::common::Asm;

fn minimal_image() -> Vec<u8> {
    let mut a = Asm::new();
    a.op(ResizeStack, &[1]).op(MovImm, &[7, 0]).op(Halt, &[0]);
    let mut b = Builder::new();
    b.unit().text(a.blocks());
    b.build()
}

#[test]
fn rejects_bad_magic() {
    let mut image = minimal_image();
    image[0] ^= 0xff;
    assert!(matches!(
        Program::load_from_memory(&Vm::new(), &image),
        Err(LoadError::InvalidHeader)
    ));
}

#[test]
fn rejects_future_versions() {
    let mut image = minimal_image();
    image[MAGIC.len()] = 1;
    assert!(matches!(
        Program::load_from_memory(&Vm::new(), &image),
        Err(LoadError::VersionMismatch)
    ));
}

#[test]
fn rejects_truncation_anywhere() {
    let image = minimal_image();
    for len in 0..image.len() {
        let err = Program::load_from_memory(&Vm::new(), &image[..len]);
        assert!(err.is_err(), "truncated to {len} bytes still loaded");
    }
}

#[test]
fn requires_a_text_section_per_unit() {
    let mut b = Builder::new();
    b.unit().rodata(b"just data");
    assert!(matches!(
        Program::load_from_memory(&Vm::new(), &b.build()),
        Err(LoadError::NoCodeSections)
    ));
}

#[test]
fn unknown_opcodes_fail_verification() {
    let mut b = Builder::new();
    b.unit().text(&[CodeBlock::from_bits(0xdead_beef)]);
    assert!(matches!(
        Program::load_from_memory(&Vm::new(), &b.build()),
        Err(LoadError::InvalidInstruction)
    ));
}

#[test]
fn truncated_operands_fail_verification() {
    // mov_imm wants two operands; only one fits in the section.
    let mut b = Builder::new();
    b.unit().text(&[
        CodeBlock::from_bits(MovImm.info().code),
        CodeBlock::from_bits(42),
    ]);
    assert!(matches!(
        Program::load_from_memory(&Vm::new(), &b.build()),
        Err(LoadError::InvalidInstructionArguments)
    ));
}

#[test]
fn syscall_indices_are_verified_at_load_time() {
    let vm = Vm::new();
    vm.set_syscall_finder(|_| {
        Some(std::sync::Arc::new(
            |_: &mut secrec_vm::SyscallContext<'_>| Ok(()),
        ) as std::sync::Arc<dyn secrec_vm::Syscall>)
    });
    let mut a = Asm::new();
    a.op(ResizeStack, &[1])
        .op(Opcode::Syscall, &[5, u64::MAX]) // only one binding exists
        .op(Halt, &[0]);
    let mut b = Builder::new();
    b.unit().text(a.blocks()).bind(&["only_one"]);
    assert!(matches!(
        Program::load_from_memory(&vm, &b.build()),
        Err(LoadError::InvalidInstructionArguments)
    ));
}

#[test]
fn unresolved_bindings_name_the_culprit() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[1]).op(Halt, &[0]);
    let mut b = Builder::new();
    b.unit().text(a.blocks()).bind(&["no_such_call"]);
    match Program::load_from_memory(&Vm::new(), &b.build()) {
        Err(LoadError::UndefinedSyscallBind(name)) => assert_eq!(name, "no_such_call"),
        other => panic!("unexpected {other:?}"),
    }

    let mut b = Builder::new();
    b.unit().text(a.blocks()).pd_bind(&["no_such_domain"]);
    match Program::load_from_memory(&Vm::new(), &b.build()) {
        Err(LoadError::UndefinedPdBind(name)) => assert_eq!(name, "no_such_domain"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn duplicate_pd_bindings_are_rejected() {
    let vm = Vm::new();
    vm.set_pd_finder(|_| {
        struct NullPd(String);
        struct NullPdpi;
        impl secrec_vm::Pdpi for NullPdpi {
            fn start(&mut self) -> Result<(), secrec_vm::PdpiError> {
                Ok(())
            }
            fn stop(&mut self) {}
        }
        impl secrec_vm::Pd for NullPd {
            fn name(&self) -> &str {
                &self.0
            }
            fn new_instance(&self) -> Result<Box<dyn secrec_vm::Pdpi>, secrec_vm::PdpiError> {
                Ok(Box::new(NullPdpi))
            }
        }
        Some(std::sync::Arc::new(NullPd("dup".into())) as std::sync::Arc<dyn secrec_vm::Pd>)
    });
    let mut a = Asm::new();
    a.op(ResizeStack, &[1]).op(Halt, &[0]);
    let mut b = Builder::new();
    b.unit().text(a.blocks()).pd_bind(&["dup", "dup"]);
    match Program::load_from_memory(&vm, &b.build()) {
        Err(LoadError::DuplicatePdBind(name)) => assert_eq!(name, "dup"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn bind_sections_must_be_nul_terminated() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[1]).op(Halt, &[0]);
    // Build a valid image with a bind section, then strip the NUL.
    let mut b = Builder::new();
    b.unit().text(a.blocks()).bind(&["abc"]);
    let mut image = b.build();
    let pos = image
        .windows(4)
        .position(|w| w == b"abc\0")
        .expect("name in image");
    image[pos + 3] = b'!';
    let vm = Vm::new();
    vm.set_syscall_finder(|_| {
        Some(std::sync::Arc::new(
            |_: &mut secrec_vm::SyscallContext<'_>| Ok(()),
        ) as std::sync::Arc<dyn secrec_vm::Syscall>)
    });
    assert!(matches!(
        Program::load_from_memory(&vm, &image),
        Err(LoadError::InvalidInputFile)
    ));
}

#[test]
fn unknown_sections_are_skipped() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[1]).op(MovImm, &[9, 0]).op(Halt, &[0]);
    let mut b = Builder::new();
    b.unit()
        .other(42, b"opaque to the loader")
        .text(a.blocks())
        .other(200, &[1, 2, 3]);
    let program = Program::load_from_memory(&Vm::new(), &b.build()).unwrap();
    let p = Process::new(&program).unwrap();
    p.run().unwrap();
    assert_eq!(p.return_value().u64(), 9);
}

#[test]
fn the_active_linking_unit_is_the_one_that_runs() {
    let unit_code = |value: u64| {
        let mut a = Asm::new();
        a.op(ResizeStack, &[1]).op(MovImm, &[value, 0]).op(Halt, &[0]);
        a
    };
    let first = unit_code(10);
    let second = unit_code(20);
    let mut b = Builder::new();
    b.active_unit(1);
    b.unit().text(first.blocks());
    b.unit().text(second.blocks());
    let program = Program::load_from_memory(&Vm::new(), &b.build()).unwrap();
    assert_eq!(program.code_section_count(), 2);
    assert_eq!(program.active_linking_unit(), 1);
    let p = Process::new(&program).unwrap();
    p.run().unwrap();
    assert_eq!(p.return_value().u64(), 20);
    assert_eq!(p.current_code_section(), 1);
}

#[test]
fn out_of_range_active_unit_is_rejected() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[1]).op(Halt, &[0]);
    let mut b = Builder::new();
    b.active_unit(3);
    b.unit().text(a.blocks());
    assert!(matches!(
        Program::load_from_memory(&Vm::new(), &b.build()),
        Err(LoadError::InvalidHeader)
    ));
}

#[test]
fn load_from_file_round_trips() {
    let image = minimal_image();
    let dir = std::env::temp_dir();
    let path = dir.join(format!("secrec-vm-loader-test-{}.sx", std::process::id()));
    std::fs::write(&path, &image).unwrap();
    let program = Program::load_from_file(&Vm::new(), &path).unwrap();
    std::fs::remove_file(&path).ok();
    let p = Process::new(&program).unwrap();
    p.run().unwrap();
    assert_eq!(p.return_value().u64(), 7);
}

#[test]
fn missing_files_surface_io_errors() {
    assert!(matches!(
        Program::load_from_file(&Vm::new(), "/nonexistent/secrec-vm.sx"),
        Err(LoadError::Io(_))
    ));
}
