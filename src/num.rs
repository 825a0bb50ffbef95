//! Canonical small-integer byte encoding.
//!
//! A byte string is an integer iff it is minimally encoded and fits in
//! eight bytes including the sign. Limbs are little-endian; the sign
//! lives in the top bit of the last byte (sign-magnitude). The empty
//! string is zero, so a trailing `0x00`/`0x80` byte is only admitted
//! when the byte below it needs the room for its own top bit.

/// Longest byte string that can still decode as a small integer.
pub const MAX_INT_BYTES: usize = 8;

/// Decodes a canonical small integer, or `None` if the bytes are too
/// long or not minimally encoded.
pub fn decode(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return Some(0);
    }
    if bytes.len() > MAX_INT_BYTES {
        return None;
    }
    let last = bytes[bytes.len() - 1];
    if last & 0x7f == 0 {
        // the last byte carries no magnitude: it is redundant unless
        // it absorbs the previous byte's top bit
        if bytes.len() < 2 || bytes[bytes.len() - 2] & 0x80 == 0 {
            return None;
        }
    }
    let mut magnitude: u64 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        let limb = if i == bytes.len() - 1 { b & 0x7f } else { b };
        magnitude |= (limb as u64) << (8 * i);
    }
    if last & 0x80 != 0 {
        Some(-(magnitude as i64))
    } else {
        Some(magnitude as i64)
    }
}

/// Encodes `n` minimally. Every value in `[-(2^63 - 1), 2^63 - 1]`
/// round-trips through [`decode`]; `i64::MIN` alone needs nine bytes
/// and therefore does not decode back as a small integer.
pub fn encode(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let mut magnitude = n.unsigned_abs();
    let mut out = Vec::with_capacity(MAX_INT_BYTES);
    while magnitude > 0 {
        out.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }
    if out.last().is_some_and(|b| b & 0x80 != 0) {
        out.push(0);
    }
    if n < 0 {
        let last = out.len() - 1;
        out[last] |= 0x80;
    }
    out
}
