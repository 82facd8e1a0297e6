//! Utility functions and helpers

/// Low 32 bits of a 64-bit value
#[inline]
pub const fn u64_lo32(value: u64) -> u32 {
    value as u32
}

/// High 32 bits of a 64-bit value
#[inline]
pub const fn u64_hi32(value: u64) -> u32 {
    (value >> 32) as u32
}

/// Join two 32-bit halves back into a 64-bit value
#[inline]
pub const fn hi32_lo32_to_u64(hi: u32, lo: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}
