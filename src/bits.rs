//! Splits a packed integer into consecutive bit fields.
//!
//! Widths are listed from the least significant field upwards, which is the
//! order the fields appear in the C bit-field declarations of the platform
//! headers.

use bitfield::BitRange;

/// Returns one value per width. Field `i` starts at the sum of the widths
/// before it. Bits past the last field are ignored and a zero width yields 0.
pub fn split_bits(value: u64, widths: &[u32]) -> Vec<u64> {
    let mut lsb = 0usize;
    widths
        .iter()
        .map(|width| {
            let field = extract(value, lsb, *width as usize);
            lsb += *width as usize;
            field
        })
        .collect()
}

/// Fixed-arity form of [`split_bits`] used by the record decoders.
pub fn split<const N: usize>(value: u64, widths: [u32; N]) -> [u64; N] {
    let mut fields = [0u64; N];
    let mut lsb = 0usize;
    for (field, width) in fields.iter_mut().zip(widths) {
        *field = extract(value, lsb, width as usize);
        lsb += width as usize;
    }
    fields
}

fn extract(value: u64, lsb: usize, width: usize) -> u64 {
    if width == 0 || lsb >= 64 {
        return 0;
    }
    let msb = (lsb + width - 1).min(63);
    value.bit_range(msb, lsb)
}

/// Interprets the low `bits` bits of `value` as a two's complement integer.
pub fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 {
        return 0;
    }
    if bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}
