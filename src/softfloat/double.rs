//! Double-precision operations.

use super::{
    isqrt128, round_and_pack_int32, round_and_pack_int64, round_and_pack_uint64,
    shift64_extra_right_jamming, shift64_right_jamming, Flags, FpuState, RoundingMode,
};

/// The canonical quiet NaN produced for invalid operations.
pub const F64_DEFAULT_NAN: u64 = 0xfff8_0000_0000_0000;

const QUIET_BIT: u64 = 0x0008_0000_0000_0000;
const IMPLICIT_BIT: u64 = 0x0010_0000_0000_0000;

#[inline]
fn frac(a: u64) -> u64 {
    a & 0x000f_ffff_ffff_ffff
}

#[inline]
fn exp(a: u64) -> i32 {
    ((a >> 52) & 0x7ff) as i32
}

#[inline]
fn sign(a: u64) -> bool {
    a >> 63 != 0
}

#[inline]
fn pack(sign: bool, exp: i32, sig: u64) -> u64 {
    (u64::from(sign) << 63)
        .wrapping_add((exp as u64) << 52)
        .wrapping_add(sig)
}

#[inline]
pub fn f64_is_nan(a: u64) -> bool {
    0xffe0_0000_0000_0000 < a << 1
}

#[inline]
pub fn f64_is_signaling_nan(a: u64) -> bool {
    (a >> 51) & 0xfff == 0xffe && a & 0x0007_ffff_ffff_ffff != 0
}

fn propagate_nan(a: u64, b: u64, st: &mut FpuState) -> u64 {
    let a_nan = f64_is_nan(a);
    let a_snan = f64_is_signaling_nan(a);
    let b_nan = f64_is_nan(b);
    let b_snan = f64_is_signaling_nan(b);
    let a = a | QUIET_BIT;
    let b = b | QUIET_BIT;
    if a_snan || b_snan {
        st.raise(Flags::INVALID);
    }
    if a_snan {
        if b_snan {
            return larger_significand(a, b);
        }
        return if b_nan { b } else { a };
    } else if a_nan {
        if b_snan || !b_nan {
            return a;
        }
        return larger_significand(a, b);
    }
    b
}

fn larger_significand(a: u64, b: u64) -> u64 {
    if a << 1 < b << 1 {
        return b;
    }
    if b << 1 < a << 1 {
        return a;
    }
    if a < b {
        a
    } else {
        b
    }
}

fn normalize_subnormal(sig: u64) -> (i32, u64) {
    let shift = sig.leading_zeros() as i32 - 11;
    (1 - shift, sig << shift)
}

/// Round `sig` (normalized to bit 62, with 10 round bits) and pack it.
fn round_and_pack(sign: bool, mut exp: i32, mut sig: u64, st: &mut FpuState) -> u64 {
    let mode = st.rounding_mode();
    let nearest_even = mode == RoundingMode::NearestEven;
    let round_increment: u64 = match mode {
        RoundingMode::NearestEven => 0x200,
        RoundingMode::ToZero => 0,
        RoundingMode::Down => {
            if sign {
                0x3ff
            } else {
                0
            }
        }
        RoundingMode::Up => {
            if sign {
                0
            } else {
                0x3ff
            }
        }
    };
    let mut round_bits = sig & 0x3ff;
    if !(0..0x7fd).contains(&exp) {
        if exp > 0x7fd
            || (exp == 0x7fd && sig.wrapping_add(round_increment) >= 0x8000_0000_0000_0000)
        {
            st.raise(Flags::OVERFLOW | Flags::INEXACT);
            return pack(sign, 0x7ff, 0) - u64::from(round_increment == 0);
        }
        if exp < 0 {
            let is_tiny = st.tininess() == super::Tininess::BeforeRounding
                || exp < -1
                || sig.wrapping_add(round_increment) < 0x8000_0000_0000_0000;
            sig = shift64_right_jamming(sig, -exp);
            exp = 0;
            round_bits = sig & 0x3ff;
            if is_tiny && round_bits != 0 {
                st.raise(Flags::UNDERFLOW);
            }
        }
    }
    if round_bits != 0 {
        st.raise(Flags::INEXACT);
    }
    sig = sig.wrapping_add(round_increment) >> 10;
    sig &= !u64::from(round_bits ^ 0x200 == 0 && nearest_even);
    if sig == 0 {
        exp = 0;
    }
    pack(sign, exp, sig)
}

fn normalize_round_and_pack(sign: bool, exp: i32, sig: u64, st: &mut FpuState) -> u64 {
    let shift = sig.leading_zeros() as i32 - 1;
    round_and_pack(sign, exp - shift, sig << shift, st)
}

fn add_sigs(a: u64, b: u64, z_sign: bool, st: &mut FpuState) -> u64 {
    let mut a_sig = frac(a) << 9;
    let mut b_sig = frac(b) << 9;
    let a_exp = exp(a);
    let b_exp = exp(b);
    let mut exp_diff = a_exp - b_exp;

    let z_exp;
    if exp_diff > 0 {
        if a_exp == 0x7ff {
            if a_sig != 0 {
                return propagate_nan(a, b, st);
            }
            return a;
        }
        if b_exp == 0 {
            exp_diff -= 1;
        } else {
            b_sig |= 0x2000_0000_0000_0000;
        }
        b_sig = shift64_right_jamming(b_sig, exp_diff);
        z_exp = a_exp;
    } else if exp_diff < 0 {
        if b_exp == 0x7ff {
            if b_sig != 0 {
                return propagate_nan(a, b, st);
            }
            return pack(z_sign, 0x7ff, 0);
        }
        if a_exp == 0 {
            exp_diff += 1;
        } else {
            a_sig |= 0x2000_0000_0000_0000;
        }
        a_sig = shift64_right_jamming(a_sig, -exp_diff);
        z_exp = b_exp;
    } else {
        if a_exp == 0x7ff {
            if a_sig | b_sig != 0 {
                return propagate_nan(a, b, st);
            }
            return a;
        }
        if a_exp == 0 {
            return pack(z_sign, 0, (a_sig + b_sig) >> 9);
        }
        return round_and_pack(z_sign, a_exp, 0x4000_0000_0000_0000 + a_sig + b_sig, st);
    }
    a_sig |= 0x2000_0000_0000_0000;
    let z_sig = (a_sig + b_sig) << 1;
    if z_sig >> 63 != 0 {
        return round_and_pack(z_sign, z_exp, a_sig + b_sig, st);
    }
    round_and_pack(z_sign, z_exp - 1, z_sig, st)
}

fn sub_sigs(a: u64, b: u64, z_sign: bool, st: &mut FpuState) -> u64 {
    let mut a_sig = frac(a) << 10;
    let mut b_sig = frac(b) << 10;
    let mut a_exp = exp(a);
    let b_exp = exp(b);
    let mut exp_diff = a_exp - b_exp;

    if exp_diff > 0 {
        if a_exp == 0x7ff {
            if a_sig != 0 {
                return propagate_nan(a, b, st);
            }
            return a;
        }
        if b_exp == 0 {
            exp_diff -= 1;
        } else {
            b_sig |= 0x4000_0000_0000_0000;
        }
        b_sig = shift64_right_jamming(b_sig, exp_diff);
        a_sig |= 0x4000_0000_0000_0000;
        return normalize_round_and_pack(z_sign, a_exp - 1, a_sig - b_sig, st);
    }
    if exp_diff < 0 {
        if b_exp == 0x7ff {
            if b_sig != 0 {
                return propagate_nan(a, b, st);
            }
            return pack(!z_sign, 0x7ff, 0);
        }
        if a_exp == 0 {
            exp_diff += 1;
        } else {
            a_sig |= 0x4000_0000_0000_0000;
        }
        a_sig = shift64_right_jamming(a_sig, -exp_diff);
        b_sig |= 0x4000_0000_0000_0000;
        return normalize_round_and_pack(!z_sign, b_exp - 1, b_sig - a_sig, st);
    }
    if a_exp == 0x7ff {
        if a_sig | b_sig != 0 {
            return propagate_nan(a, b, st);
        }
        st.raise(Flags::INVALID);
        return F64_DEFAULT_NAN;
    }
    if a_exp == 0 {
        a_exp = 1;
    }
    if b_sig < a_sig {
        return normalize_round_and_pack(z_sign, a_exp - 1, a_sig - b_sig, st);
    }
    if a_sig < b_sig {
        return normalize_round_and_pack(!z_sign, a_exp - 1, b_sig - a_sig, st);
    }
    pack(st.rounding_mode() == RoundingMode::Down, 0, 0)
}

/// Flip the sign bit. Pure: never raises flags, never quiets a NaN.
#[inline]
pub fn f64_neg(a: u64) -> u64 {
    a ^ 0x8000_0000_0000_0000
}

pub fn f64_add(a: u64, b: u64, st: &mut FpuState) -> u64 {
    if sign(a) == sign(b) {
        add_sigs(a, b, sign(a), st)
    } else {
        sub_sigs(a, b, sign(a), st)
    }
}

pub fn f64_sub(a: u64, b: u64, st: &mut FpuState) -> u64 {
    if sign(a) == sign(b) {
        sub_sigs(a, b, sign(a), st)
    } else {
        add_sigs(a, b, sign(a), st)
    }
}

pub fn f64_mul(a: u64, b: u64, st: &mut FpuState) -> u64 {
    let mut a_sig = frac(a);
    let mut b_sig = frac(b);
    let mut a_exp = exp(a);
    let mut b_exp = exp(b);
    let z_sign = sign(a) != sign(b);

    if a_exp == 0x7ff {
        if a_sig != 0 || (b_exp == 0x7ff && b_sig != 0) {
            return propagate_nan(a, b, st);
        }
        if b_exp == 0 && b_sig == 0 {
            st.raise(Flags::INVALID);
            return F64_DEFAULT_NAN;
        }
        return pack(z_sign, 0x7ff, 0);
    }
    if b_exp == 0x7ff {
        if b_sig != 0 {
            return propagate_nan(a, b, st);
        }
        if a_exp == 0 && a_sig == 0 {
            st.raise(Flags::INVALID);
            return F64_DEFAULT_NAN;
        }
        return pack(z_sign, 0x7ff, 0);
    }
    if a_exp == 0 {
        if a_sig == 0 {
            return pack(z_sign, 0, 0);
        }
        (a_exp, a_sig) = normalize_subnormal(a_sig);
    }
    if b_exp == 0 {
        if b_sig == 0 {
            return pack(z_sign, 0, 0);
        }
        (b_exp, b_sig) = normalize_subnormal(b_sig);
    }
    let z_exp = a_exp + b_exp - 0x3ff;
    let a_sig = (a_sig | IMPLICIT_BIT) << 10;
    let b_sig = (b_sig | IMPLICIT_BIT) << 11;
    let product = u128::from(a_sig) * u128::from(b_sig);
    let mut z_sig = (product >> 64) as u64;
    z_sig |= u64::from(product as u64 != 0);
    if z_sig << 1 >> 63 == 0 {
        return round_and_pack(z_sign, z_exp - 1, z_sig << 1, st);
    }
    round_and_pack(z_sign, z_exp, z_sig, st)
}

pub fn f64_div(a: u64, b: u64, st: &mut FpuState) -> u64 {
    let mut a_sig = frac(a);
    let mut b_sig = frac(b);
    let mut a_exp = exp(a);
    let mut b_exp = exp(b);
    let z_sign = sign(a) != sign(b);

    if a_exp == 0x7ff {
        if a_sig != 0 {
            return propagate_nan(a, b, st);
        }
        if b_exp == 0x7ff {
            if b_sig != 0 {
                return propagate_nan(a, b, st);
            }
            st.raise(Flags::INVALID);
            return F64_DEFAULT_NAN;
        }
        return pack(z_sign, 0x7ff, 0);
    }
    if b_exp == 0x7ff {
        if b_sig != 0 {
            return propagate_nan(a, b, st);
        }
        return pack(z_sign, 0, 0);
    }
    if b_exp == 0 {
        if b_sig == 0 {
            if a_exp == 0 && a_sig == 0 {
                st.raise(Flags::INVALID);
                return F64_DEFAULT_NAN;
            }
            st.raise(Flags::DIV_BY_ZERO);
            return pack(z_sign, 0x7ff, 0);
        }
        (b_exp, b_sig) = normalize_subnormal(b_sig);
    }
    if a_exp == 0 {
        if a_sig == 0 {
            return pack(z_sign, 0, 0);
        }
        (a_exp, a_sig) = normalize_subnormal(a_sig);
    }
    let mut z_exp = a_exp - b_exp + 0x3fd;
    let mut a_sig = (a_sig | IMPLICIT_BIT) << 10;
    let b_sig = (b_sig | IMPLICIT_BIT) << 11;
    if b_sig <= a_sig + a_sig {
        a_sig >>= 1;
        z_exp += 1;
    }
    let numerator = u128::from(a_sig) << 64;
    let mut z_sig = (numerator / u128::from(b_sig)) as u64;
    if numerator % u128::from(b_sig) != 0 {
        z_sig |= 1;
    }
    round_and_pack(z_sign, z_exp, z_sig, st)
}

/// IEEE-754 remainder: `a - n*b` with `n` the integer nearest `a/b`.
pub fn f64_rem(a: u64, b: u64, st: &mut FpuState) -> u64 {
    let mut a_sig = frac(a);
    let mut b_sig = frac(b);
    let mut a_exp = exp(a);
    let mut b_exp = exp(b);
    let a_sign = sign(a);

    if a_exp == 0x7ff {
        if a_sig != 0 || (b_exp == 0x7ff && b_sig != 0) {
            return propagate_nan(a, b, st);
        }
        st.raise(Flags::INVALID);
        return F64_DEFAULT_NAN;
    }
    if b_exp == 0x7ff {
        if b_sig != 0 {
            return propagate_nan(a, b, st);
        }
        return a;
    }
    if b_exp == 0 {
        if b_sig == 0 {
            st.raise(Flags::INVALID);
            return F64_DEFAULT_NAN;
        }
        (b_exp, b_sig) = normalize_subnormal(b_sig);
    }
    if a_exp == 0 {
        if a_sig == 0 {
            return a;
        }
        (a_exp, a_sig) = normalize_subnormal(a_sig);
    }
    let mut exp_diff = a_exp - b_exp;
    a_sig = (a_sig | IMPLICIT_BIT) << 11;
    b_sig = (b_sig | IMPLICIT_BIT) << 11;
    if exp_diff < 0 {
        if exp_diff < -1 {
            return a;
        }
        a_sig >>= 1;
    }
    let mut q = u64::from(b_sig <= a_sig);
    if q != 0 {
        a_sig -= b_sig;
    }
    exp_diff -= 64;
    while exp_diff > 0 {
        let q64 = super::single::estimate_div128_to_64(a_sig, 0, b_sig);
        let q64 = if q64 > 2 { q64 - 2 } else { 0 };
        a_sig = ((b_sig >> 2).wrapping_mul(q64)).wrapping_neg();
        exp_diff -= 62;
    }
    exp_diff += 64;
    if exp_diff > 0 {
        let q64 = super::single::estimate_div128_to_64(a_sig, 0, b_sig);
        let q64 = if q64 > 2 { q64 - 2 } else { 0 };
        q = q64 >> (64 - exp_diff);
        b_sig >>= 2;
        a_sig = (a_sig >> 1)
            .wrapping_shl((exp_diff - 1) as u32)
            .wrapping_sub(b_sig.wrapping_mul(q));
    } else {
        a_sig >>= 2;
        b_sig >>= 2;
    }
    let mut alternate_a_sig;
    loop {
        alternate_a_sig = a_sig;
        q = q.wrapping_add(1);
        a_sig = a_sig.wrapping_sub(b_sig);
        if (a_sig as i64) < 0 {
            break;
        }
    }
    let sig_mean = a_sig.wrapping_add(alternate_a_sig) as i64;
    if sig_mean < 0 || (sig_mean == 0 && q & 1 != 0) {
        a_sig = alternate_a_sig;
    }
    let z_sign = (a_sig as i64) < 0;
    if z_sign {
        a_sig = a_sig.wrapping_neg();
    }
    normalize_round_and_pack(a_sign != z_sign, b_exp, a_sig, st)
}

pub fn f64_sqrt(a: u64, st: &mut FpuState) -> u64 {
    let mut a_sig = frac(a);
    let mut a_exp = exp(a);
    let a_sign = sign(a);

    if a_exp == 0x7ff {
        if a_sig != 0 {
            return propagate_nan(a, 0, st);
        }
        if !a_sign {
            return a;
        }
        st.raise(Flags::INVALID);
        return F64_DEFAULT_NAN;
    }
    if a_sign {
        if a_exp == 0 && a_sig == 0 {
            return a;
        }
        st.raise(Flags::INVALID);
        return F64_DEFAULT_NAN;
    }
    if a_exp == 0 {
        if a_sig == 0 {
            return 0;
        }
        (a_exp, a_sig) = normalize_subnormal(a_sig);
    }
    let z_exp = ((a_exp - 0x3ff) >> 1) + 0x3fe;
    let mut a_sig = (a_sig | IMPLICIT_BIT) << 11;
    a_sig >>= a_exp & 1;
    let radicand = u128::from(a_sig) << 64;
    let mut z_sig = isqrt128(radicand);
    let rem = radicand - u128::from(z_sig) * u128::from(z_sig);
    z_sig |= u64::from(rem != 0);
    round_and_pack(false, z_exp, shift64_right_jamming(z_sig, 1), st)
}

pub fn f64_round_to_int(a: u64, st: &mut FpuState) -> u64 {
    let a_exp = exp(a);
    if a_exp >= 0x433 {
        if a_exp == 0x7ff && frac(a) != 0 {
            return propagate_nan(a, a, st);
        }
        return a;
    }
    if a_exp < 0x3ff {
        if a << 1 == 0 {
            return a;
        }
        st.raise(Flags::INEXACT);
        let a_sign = sign(a);
        match st.rounding_mode() {
            RoundingMode::NearestEven => {
                if a_exp == 0x3fe && frac(a) != 0 {
                    return pack(a_sign, 0x3ff, 0);
                }
            }
            RoundingMode::Down => {
                return if a_sign { 0xbff0_0000_0000_0000 } else { 0 };
            }
            RoundingMode::Up => {
                return if a_sign {
                    0x8000_0000_0000_0000
                } else {
                    0x3ff0_0000_0000_0000
                };
            }
            RoundingMode::ToZero => {}
        }
        return pack(a_sign, 0, 0);
    }
    let last_bit_mask = 1u64 << (0x433 - a_exp);
    let round_bits_mask = last_bit_mask - 1;
    let mut z = a;
    match st.rounding_mode() {
        RoundingMode::NearestEven => {
            z = z.wrapping_add(last_bit_mask >> 1);
            if z & round_bits_mask == 0 {
                z &= !last_bit_mask;
            }
        }
        RoundingMode::ToZero => {}
        mode => {
            if sign(z) != (mode == RoundingMode::Up) {
                z = z.wrapping_add(round_bits_mask);
            }
        }
    }
    z &= !round_bits_mask;
    if z != a {
        st.raise(Flags::INEXACT);
    }
    z
}

pub fn f64_eq(a: u64, b: u64, st: &mut FpuState) -> bool {
    if f64_is_nan(a) || f64_is_nan(b) {
        if f64_is_signaling_nan(a) || f64_is_signaling_nan(b) {
            st.raise(Flags::INVALID);
        }
        return false;
    }
    a == b || (a | b) << 1 == 0
}

pub fn f64_le(a: u64, b: u64, st: &mut FpuState) -> bool {
    if f64_is_nan(a) || f64_is_nan(b) {
        st.raise(Flags::INVALID);
        return false;
    }
    if sign(a) != sign(b) {
        return sign(a) || (a | b) << 1 == 0;
    }
    a == b || (sign(a) != (a < b))
}

pub fn f64_lt(a: u64, b: u64, st: &mut FpuState) -> bool {
    if f64_is_nan(a) || f64_is_nan(b) {
        st.raise(Flags::INVALID);
        return false;
    }
    if sign(a) != sign(b) {
        return sign(a) && (a | b) << 1 != 0;
    }
    a != b && (sign(a) != (a < b))
}

/// Like [`f64_eq`] but any NaN operand raises `invalid`.
pub fn f64_eq_signaling(a: u64, b: u64, st: &mut FpuState) -> bool {
    if f64_is_nan(a) || f64_is_nan(b) {
        st.raise(Flags::INVALID);
        return false;
    }
    a == b || (a | b) << 1 == 0
}

/// Like [`f64_le`] but quiet NaN operands do not raise `invalid`.
pub fn f64_le_quiet(a: u64, b: u64, st: &mut FpuState) -> bool {
    if f64_is_nan(a) || f64_is_nan(b) {
        if f64_is_signaling_nan(a) || f64_is_signaling_nan(b) {
            st.raise(Flags::INVALID);
        }
        return false;
    }
    if sign(a) != sign(b) {
        return sign(a) || (a | b) << 1 == 0;
    }
    a == b || (sign(a) != (a < b))
}

/// Like [`f64_lt`] but quiet NaN operands do not raise `invalid`.
pub fn f64_lt_quiet(a: u64, b: u64, st: &mut FpuState) -> bool {
    if f64_is_nan(a) || f64_is_nan(b) {
        if f64_is_signaling_nan(a) || f64_is_signaling_nan(b) {
            st.raise(Flags::INVALID);
        }
        return false;
    }
    if sign(a) != sign(b) {
        return sign(a) && (a | b) << 1 != 0;
    }
    a != b && (sign(a) != (a < b))
}

pub fn f64_to_f32(a: u64, st: &mut FpuState) -> u32 {
    let a_sig = frac(a);
    let a_exp = exp(a);
    let a_sign = sign(a);
    if a_exp == 0x7ff {
        if a_sig != 0 {
            if f64_is_signaling_nan(a) {
                st.raise(Flags::INVALID);
            }
            return (u32::from(a_sign) << 31) | 0x7fc0_0000 | ((a_sig >> 29) as u32 & 0x003f_ffff);
        }
        return (u32::from(a_sign) << 31) | 0x7f80_0000;
    }
    let mut z_sig = shift64_right_jamming(a_sig, 22) as u32;
    let mut z_exp = a_exp;
    if z_exp != 0 || z_sig != 0 {
        z_sig |= 0x4000_0000;
        z_exp -= 0x381;
    }
    super::single::round_and_pack(a_sign, z_exp, z_sig, st)
}

pub fn f64_to_i32(a: u64, st: &mut FpuState) -> i32 {
    let mut a_sig = frac(a);
    let a_exp = exp(a);
    let mut a_sign = sign(a);
    if a_exp == 0x7ff && a_sig != 0 {
        a_sign = false;
    }
    if a_exp != 0 {
        a_sig |= IMPLICIT_BIT;
    }
    let shift_count = 0x42c - a_exp;
    if shift_count > 0 {
        a_sig = shift64_right_jamming(a_sig, shift_count);
    }
    round_and_pack_int32(a_sign, a_sig, st)
}

pub fn f64_to_i64(a: u64, st: &mut FpuState) -> i64 {
    let mut a_sig = frac(a);
    let a_exp = exp(a);
    let a_sign = sign(a);
    if a_exp != 0 {
        a_sig |= IMPLICIT_BIT;
    }
    let shift_count = 0x433 - a_exp;
    if shift_count <= 0 {
        if a_exp > 0x43e {
            st.raise(Flags::INVALID);
            if !a_sign || (a_exp == 0x7ff && a_sig != IMPLICIT_BIT) {
                return i64::MAX;
            }
            return i64::MIN;
        }
        return round_and_pack_int64(a_sign, a_sig << -shift_count, 0, st);
    }
    let (z0, z1) = shift64_extra_right_jamming(a_sig, 0, shift_count);
    round_and_pack_int64(a_sign, z0, z1, st)
}

pub fn f64_to_u64(a: u64, st: &mut FpuState) -> u64 {
    let mut a_sig = frac(a);
    let a_exp = exp(a);
    let a_sign = sign(a);
    if a_exp != 0 {
        a_sig |= IMPLICIT_BIT;
    }
    let shift_count = 0x433 - a_exp;
    if shift_count <= 0 {
        if a_exp > 0x43e {
            st.raise(Flags::INVALID);
            if a_sign && !(a_exp == 0x7ff && a_sig != IMPLICIT_BIT) {
                return 0;
            }
            return u64::MAX;
        }
        return round_and_pack_uint64(a_sign, a_sig << -shift_count, 0, st);
    }
    let (z0, z1) = shift64_extra_right_jamming(a_sig, 0, shift_count);
    round_and_pack_uint64(a_sign, z0, z1, st)
}

/// Exact: a 32-bit integer always fits a double, so no flags are raised.
pub fn i32_to_f64(a: i32, _st: &mut FpuState) -> u64 {
    if a == 0 {
        return 0;
    }
    let z_sign = a < 0;
    let abs_a = a.unsigned_abs();
    let shift_count = abs_a.leading_zeros() as i32 + 21;
    pack(z_sign, 0x432 - shift_count, u64::from(abs_a) << shift_count)
}

pub fn i64_to_f64(a: i64, st: &mut FpuState) -> u64 {
    if a == 0 {
        return 0;
    }
    if a == i64::MIN {
        return pack(true, 0x43e, 0);
    }
    let z_sign = a < 0;
    normalize_round_and_pack(z_sign, 0x43c, a.unsigned_abs(), st)
}

pub fn u64_to_f64(a: u64, st: &mut FpuState) -> u64 {
    if a == 0 {
        return 0;
    }
    if a >> 63 != 0 {
        return round_and_pack(false, 0x43d, shift64_right_jamming(a, 1), st);
    }
    normalize_round_and_pack(false, 0x43c, a, st)
}
