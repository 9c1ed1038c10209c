//! The reference model: slot reference counting, block references,
//! sub-ranges and their bounds.

use secrec_vm::isa::Opcode::*;
use secrec_vm::{Fault, ProcessState};

use crate::common::{run, run_to_fault, Asm, NONE};

#[test]
fn freeing_a_referenced_slot_faults_with_memory_in_use() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[16, 0])
        .op(MemAlloc, &[0, 1])
        .op(PushRefMem, &[1]) // reference keeps the slot alive
        .op(MemFree, &[1])
        .op(Halt, &[1]);
    let (p, fault) = run_to_fault(&a);
    assert_eq!(fault, Fault::MemoryInUse);
    assert_eq!(p.state(), ProcessState::Crashed);
    assert_eq!(p.public_heap_memory().usage, 16, "slot left untouched");
}

#[test]
fn dropping_the_reference_allows_the_free() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[16, 0])
        .op(MemAlloc, &[0, 1])
        .op(PushRefMem, &[1])
        .op(ClearArgs, &[]) // drops the pending reference
        .op(MemFree, &[1])
        .op(Halt, &[1]);
    let p = run(&a);
    assert_eq!(p.state(), ProcessState::Finished);
    assert_eq!(p.public_heap_memory().usage, 0);
}

#[test]
fn frame_teardown_releases_references() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[16, 0])
        .op(MemAlloc, &[0, 1])
        .op(PushRefMem, &[1]);
    let callee = a.here() + 3 + 2 + 2;
    a.op(Call, &[callee, NONE]) // the reference rides into the callee
        .op(MemFree, &[1]) // callee frame is gone, reference dropped
        .op(Halt, &[1]);
    assert_eq!(a.here(), callee);
    a.op(ResizeStack, &[1]).op(Return, &[0]);
    let p = run(&a);
    assert_eq!(p.state(), ProcessState::Finished);
    assert_eq!(p.public_heap_memory().usage, 0);
}

#[test]
fn callee_writes_through_a_block_reference() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[1]) // @0: s0 = 0
        .op(PushRefBlock, &[0]) // @2: ref to caller's s0
        .op(Call, &[9, NONE]) // @4
        .op(Halt, &[0]); // @7
    assert_eq!(a.here(), 9);
    // callee: write 0xdeadbeef through ref 0 at offset 0.
    a.op(ResizeStack, &[2])
        .op(MovImm, &[0xdead_beef, 0]) // value
        .op(MovImm, &[0, 1]) // offset
        .op(RefStore, &[0, 1, 0])
        .op(Return, &[0]);
    let p = run(&a);
    assert_eq!(p.return_value().u64(), 0xdead_beef);
}

#[test]
fn ref_load_and_size() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[3])
        .op(MovImm, &[16, 0])
        .op(MemAlloc, &[0, 1])
        .op(MovImm, &[0, 2])
        .op(MovImm, &[0x1234, 0])
        .op(MemStore, &[1, 2, 0])
        .op(PushRefMem, &[1]);
    let callee = a.here() + 3 + 2;
    a.op(Call, &[callee, 0]).op(Halt, &[0]);
    assert_eq!(a.here(), callee);
    // callee: s0 = ref.len + ref[0..8]
    a.op(ResizeStack, &[3])
        .op(MovImm, &[0, 1]) // offset 0
        .op(RefLoad, &[0, 1, 0]) // s0 = first word through the ref
        .op(RefSize, &[0, 2]) // s2 = 16
        .op(AddU64, &[0, 2])
        .op(Return, &[0]);
    let p = run(&a);
    assert_eq!(p.return_value().u64(), 0x1234 + 16);
}

#[test]
fn reference_sub_ranges_are_windowed() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[3])
        .op(MovImm, &[16, 0])
        .op(MemAlloc, &[0, 1])
        .op(MovImm, &[8, 2])
        .op(MovImm, &[0xaabb, 0])
        .op(MemStore, &[1, 2, 0]) // bytes 8.. hold 0xaabb
        .op(PushRefMemPart, &[1, 8, 8]); // window onto bytes 8..16
    let callee = a.here() + 3 + 2;
    a.op(Call, &[callee, 0]).op(Halt, &[0]);
    assert_eq!(a.here(), callee);
    a.op(ResizeStack, &[2])
        .op(MovImm, &[0, 1])
        .op(RefLoad, &[0, 1, 0]) // offset 0 of the window = byte 8
        .op(Return, &[0]);
    let p = run(&a);
    assert_eq!(p.return_value().u64(), 0xaabb);
}

#[test]
fn reference_part_bounds() {
    // offset > size
    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[16, 0])
        .op(MemAlloc, &[0, 1])
        .op(PushRefMemPart, &[1, 17, 0])
        .op(Halt, &[1]);
    let (_, fault) = run_to_fault(&a);
    assert_eq!(fault, Fault::OutOfBoundsReferenceOffset);

    // offset + size > size
    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[16, 0])
        .op(MemAlloc, &[0, 1])
        .op(PushRefMemPart, &[1, 8, 9])
        .op(Halt, &[1]);
    let (_, fault) = run_to_fault(&a);
    assert_eq!(fault, Fault::OutOfBoundsReferenceSize);

    // offset == size with zero length is fine.
    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[16, 0])
        .op(MemAlloc, &[0, 1])
        .op(PushRefMemPart, &[1, 16, 0])
        .op(ClearArgs, &[])
        .op(Halt, &[1]);
    assert_eq!(run(&a).state(), ProcessState::Finished);
}

#[test]
fn block_reference_parts_are_bounded_by_the_cell() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[1])
        .op(PushRefBlockPart, &[0, 9, 0])
        .op(Halt, &[0]);
    let (_, fault) = run_to_fault(&a);
    assert_eq!(fault, Fault::OutOfBoundsReferenceOffset);

    let mut a = Asm::new();
    a.op(ResizeStack, &[1])
        .op(PushRefBlockPart, &[0, 4, 5])
        .op(Halt, &[0]);
    let (_, fault) = run_to_fault(&a);
    assert_eq!(fault, Fault::OutOfBoundsReferenceSize);
}

#[test]
fn const_references_load() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[16, 0])
        .op(MemAlloc, &[0, 1])
        .op(PushCrefMem, &[1]);
    let callee = a.here() + 3 + 2;
    a.op(Call, &[callee, NONE]).op(Halt, &[1]);
    assert_eq!(a.here(), callee);
    // The catalogue has no write through crefs; loading works though.
    a.op(ResizeStack, &[2])
        .op(MovImm, &[0, 1])
        .op(CrefLoad, &[0, 1, 0])
        .op(Return, &[0]);
    let p = run(&a);
    assert_eq!(p.state(), ProcessState::Finished);
}

#[test]
fn reference_index_out_of_range() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[2]).op(MovImm, &[0, 1]);
    let callee = a.here() + 3 + 2;
    a.op(Call, &[callee, NONE]).op(Halt, &[0]);
    assert_eq!(a.here(), callee);
    a.op(ResizeStack, &[2])
        .op(MovImm, &[0, 1])
        .op(RefLoad, &[0, 1, 0]) // no refs were pushed
        .op(Return, &[0]);
    let (_, fault) = run_to_fault(&a);
    assert_eq!(fault, Fault::InvalidReferenceIndex);

    let mut a = Asm::new();
    a.op(ResizeStack, &[2]).op(MovImm, &[0, 1]);
    let callee = a.here() + 3 + 2;
    a.op(Call, &[callee, NONE]).op(Halt, &[0]);
    a.op(ResizeStack, &[2])
        .op(MovImm, &[0, 1])
        .op(CrefLoad, &[0, 1, 0])
        .op(Return, &[0]);
    let (_, fault) = run_to_fault(&a);
    assert_eq!(fault, Fault::InvalidConstReferenceIndex);
}

#[test]
fn zero_length_memory_reference_is_valid() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[0, 0])
        .op(MemAlloc, &[0, 1])
        .op(PushRefMem, &[1]);
    let callee = a.here() + 3 + 2;
    a.op(Call, &[callee, 0]).op(Halt, &[0]);
    assert_eq!(a.here(), callee);
    a.op(ResizeStack, &[1]).op(RefSize, &[0, 0]).op(Return, &[0]);
    let p = run(&a);
    assert_eq!(p.return_value().u64(), 0);
}

#[test]
fn ref_from_ref_keeps_the_slot_alive_transitively() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[16, 0])
        .op(MemAlloc, &[0, 1])
        .op(PushRefMem, &[1]);
    let callee = a.here() + 3 + 2;
    a.op(Call, &[callee, NONE]) // refs move into the callee
        .op(Halt, &[1]);
    assert_eq!(a.here(), callee);
    // The callee re-pushes a sub-reference and tries the free while both
    // frames hold one.
    a.op(ResizeStack, &[1])
        .op(PushRefRefPart, &[0, 4, 8])
        .op(MovToReg, &[0, 0]) // placeholder to keep shape simple
        .op(Return, &[0]);
    // The sub-reference dies with the callee's pending frame, the outer
    // one with the callee frame itself, so the program finishes cleanly.
    let p = run(&a);
    assert_eq!(p.state(), ProcessState::Finished);
    assert_eq!(p.public_heap_memory().usage, 16);
}
