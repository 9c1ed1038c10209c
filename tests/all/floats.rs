//! Floating point through the interpreter, the crash mask, and
//! randomized agreement with host IEEE hardware in the default mode.

use quickcheck::quickcheck;

use secrec_vm::isa::Opcode::*;
use secrec_vm::softfloat::{self, Flags, FpuState, RoundingMode};
use secrec_vm::Fault;

use crate::common::{run, run_to_fault, Asm};

fn f64b(v: f64) -> u64 {
    v.to_bits()
}

#[test]
fn float_arithmetic_on_the_stack() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[3])
        .op(MovImm, &[f64b(1.5), 1])
        .op(MovImm, &[f64b(2.25), 2])
        .op(TaddF64, &[0, 1, 2])
        .op(Halt, &[0]);
    assert_eq!(run(&a).return_value().f64_bits(), f64b(3.75));
}

#[test]
fn float32_lane_arithmetic() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[u64::from(2.5f32.to_bits()), 0])
        .op(MovImm, &[u64::from(0.5f32.to_bits()), 1])
        .op(MulF32, &[0, 1])
        .op(Halt, &[0]);
    assert_eq!(run(&a).return_value().f32_bits(), 1.25f32.to_bits());
}

#[test]
fn division_by_zero_sets_the_sticky_flag() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[3])
        .op(MovImm, &[f64b(1.0), 0])
        .op(MovImm, &[f64b(0.0), 1])
        .op(DivF64, &[0, 1])
        .op(FpuGet, &[2])
        .op(Halt, &[2]);
    let p = run(&a);
    let state = FpuState::from_bits(p.return_value().u64());
    assert!(state.flags().contains(Flags::DIV_BY_ZERO));
    assert!(state.crash_mask().is_empty());
}

#[test]
fn crash_mask_turns_the_flag_into_a_fault() {
    let mut mask_state = FpuState::new();
    mask_state.set_crash_mask(Flags::DIV_BY_ZERO);

    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[mask_state.bits(), 0])
        .op(FpuSet, &[0])
        .op(MovImm, &[f64b(1.0), 0])
        .op(MovImm, &[f64b(0.0), 1]);
    let div_at = a.here();
    a.op(DivF64, &[0, 1]).op(Halt, &[0]);
    let (p, fault) = run_to_fault(&a);
    assert_eq!(fault, Fault::FloatingPointDivideByZero);
    assert_eq!(p.current_ip(), div_at as usize);
    assert_eq!(p.last_fault(), Some(Fault::FloatingPointDivideByZero));
}

#[test]
fn inexact_crash_mask() {
    let mut mask_state = FpuState::new();
    mask_state.set_crash_mask(Flags::INEXACT);

    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[mask_state.bits(), 0])
        .op(FpuSet, &[0])
        .op(MovImm, &[f64b(1.0), 0])
        .op(MovImm, &[f64b(3.0), 1])
        .op(DivF64, &[0, 1])
        .op(Halt, &[0]);
    let (_, fault) = run_to_fault(&a);
    assert_eq!(fault, Fault::FloatingPointInexactResult);
}

#[test]
fn rounding_mode_is_process_state() {
    let mut down = FpuState::new();
    down.set_rounding_mode(RoundingMode::Down);
    let mut up = FpuState::new();
    up.set_rounding_mode(RoundingMode::Up);

    let run_with = |mode_bits: u64| {
        let mut a = Asm::new();
        a.op(ResizeStack, &[2])
            .op(MovImm, &[mode_bits, 0])
            .op(FpuSet, &[0])
            .op(MovImm, &[f64b(1.0), 0])
            .op(MovImm, &[f64b(3.0), 1])
            .op(DivF64, &[0, 1])
            .op(Halt, &[0]);
        run(&a).return_value().u64()
    };
    let down_bits = run_with(down.bits());
    let up_bits = run_with(up.bits());
    assert_eq!(up_bits, down_bits + 1, "one ulp apart across modes");
}

#[test]
fn comparisons_with_nan_are_false() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[3])
        .op(MovImm, &[f64b(f64::NAN), 0])
        .op(MovImm, &[f64b(1.0), 1])
        .op(LtF64, &[2, 0, 1])
        .op(Halt, &[2]);
    assert_eq!(run(&a).return_value().u64(), 0);

    let mut a = Asm::new();
    a.op(ResizeStack, &[3])
        .op(MovImm, &[f64b(f64::NAN), 0])
        .op(MovImm, &[f64b(f64::NAN), 1])
        .op(NeF64, &[2, 0, 1])
        .op(Halt, &[2]);
    assert_eq!(run(&a).return_value().u64(), 1, "NaN != NaN");
}

#[test]
fn conversions_round_trip_through_the_interpreter() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[3])
        .op(MovImm, &[(-7i64) as u64, 0])
        .op(ConvI64F64, &[1, 0]) // s1 = -7.0
        .op(ConvF64I64, &[2, 1]) // s2 = -7
        .op(Halt, &[2]);
    assert_eq!(run(&a).return_value().i64(), -7);

    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[u64::from(1.5f32.to_bits()), 0])
        .op(ConvF32F64, &[1, 0])
        .op(Halt, &[1]);
    assert_eq!(run(&a).return_value().f64_bits(), f64b(1.5));
}

#[test]
fn sqrt_and_round_ops() {
    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[f64b(6.25), 0])
        .op(TsqrtF64, &[1, 0])
        .op(Halt, &[1]);
    assert_eq!(run(&a).return_value().f64_bits(), f64b(2.5));

    let mut a = Asm::new();
    a.op(ResizeStack, &[2])
        .op(MovImm, &[f64b(2.5), 0])
        .op(TroundF64, &[1, 0])
        .op(Halt, &[1]);
    assert_eq!(run(&a).return_value().f64_bits(), f64b(2.0), "ties to even");
}

// Randomized agreement with the host FPU: in round-nearest-even, for
// non-NaN inputs, every result must be bit-identical to hardware IEEE.

fn no_nan32(v: f32) -> bool {
    !v.is_nan()
}

fn no_nan64(v: f64) -> bool {
    !v.is_nan()
}

quickcheck! {
    fn qc_f64_add_matches_host(a: f64, b: f64) -> quickcheck::TestResult {
        if !no_nan64(a) || !no_nan64(b) {
            return quickcheck::TestResult::discard();
        }
        let mut st = FpuState::new();
        let got = softfloat::f64_add(a.to_bits(), b.to_bits(), &mut st);
        quickcheck::TestResult::from_bool(got == (a + b).to_bits())
    }

    fn qc_f64_mul_matches_host(a: f64, b: f64) -> quickcheck::TestResult {
        if !no_nan64(a) || !no_nan64(b) {
            return quickcheck::TestResult::discard();
        }
        let mut st = FpuState::new();
        let got = softfloat::f64_mul(a.to_bits(), b.to_bits(), &mut st);
        quickcheck::TestResult::from_bool(got == (a * b).to_bits())
    }

    fn qc_f64_div_matches_host(a: f64, b: f64) -> quickcheck::TestResult {
        if !no_nan64(a) || !no_nan64(b) {
            return quickcheck::TestResult::discard();
        }
        let mut st = FpuState::new();
        let got = softfloat::f64_div(a.to_bits(), b.to_bits(), &mut st);
        quickcheck::TestResult::from_bool(got == (a / b).to_bits())
    }

    fn qc_f64_sqrt_matches_host(a: f64) -> quickcheck::TestResult {
        if !no_nan64(a) {
            return quickcheck::TestResult::discard();
        }
        let mut st = FpuState::new();
        let got = softfloat::f64_sqrt(a.to_bits(), &mut st);
        quickcheck::TestResult::from_bool(got == a.sqrt().to_bits() || (a < 0.0 && f64::from_bits(got).is_nan()))
    }

    fn qc_f32_ops_match_host(a: f32, b: f32) -> quickcheck::TestResult {
        if !no_nan32(a) || !no_nan32(b) {
            return quickcheck::TestResult::discard();
        }
        let mut st = FpuState::new();
        let add = softfloat::f32_add(a.to_bits(), b.to_bits(), &mut st);
        let sub = softfloat::f32_sub(a.to_bits(), b.to_bits(), &mut st);
        let mul = softfloat::f32_mul(a.to_bits(), b.to_bits(), &mut st);
        quickcheck::TestResult::from_bool(
            add == (a + b).to_bits() && sub == (a - b).to_bits() && mul == (a * b).to_bits(),
        )
    }

    fn qc_f64_compare_matches_host(a: f64, b: f64) -> quickcheck::TestResult {
        if !no_nan64(a) || !no_nan64(b) {
            return quickcheck::TestResult::discard();
        }
        let mut st = FpuState::new();
        let lt = softfloat::f64_lt(a.to_bits(), b.to_bits(), &mut st);
        let le = softfloat::f64_le(a.to_bits(), b.to_bits(), &mut st);
        let eq = softfloat::f64_eq(a.to_bits(), b.to_bits(), &mut st);
        quickcheck::TestResult::from_bool(lt == (a < b) && le == (a <= b) && eq == (a == b))
    }

    fn qc_widening_is_exact(a: f32) -> quickcheck::TestResult {
        if !no_nan32(a) {
            return quickcheck::TestResult::discard();
        }
        let mut st = FpuState::new();
        let got = softfloat::f32_to_f64(a.to_bits(), &mut st);
        quickcheck::TestResult::from_bool(got == (a as f64).to_bits())
    }

    fn qc_to_int_round_to_zero_matches_as_cast(a: f64) -> quickcheck::TestResult {
        if !no_nan64(a) || a.abs() >= 9.0e18 {
            return quickcheck::TestResult::discard();
        }
        let mut st = FpuState::new();
        st.set_rounding_mode(RoundingMode::ToZero);
        let got = softfloat::f64_to_i64(a.to_bits(), &mut st);
        quickcheck::TestResult::from_bool(got == a as i64)
    }
}
