//! Stream position arithmetic.
//!
//! A position is a linear byte offset into a stream. It packs the number of
//! terms written since the initial term and the offset inside the current term:
//!
//! ```text
//! position = (term_id - initial_term_id) << position_bits_to_shift | term_offset
//! ```
//!
//! where `position_bits_to_shift = log2(term_length)`. Terms rotate through a
//! fixed set of [`PARTITION_COUNT`] partitions, so the partition that holds a
//! position is `(position >> position_bits_to_shift) % 3`.

/// Number of partitions a log buffer rotates through.
pub const PARTITION_COUNT: usize = 3;

/// `x % 3` without a division.
///
/// Folds the value on power-of-two boundaries (every `2^(2k) ≡ 1 (mod 3)`)
/// until it is small enough for a table lookup.
#[inline(always)]
pub fn fast_mod3(x: u64) -> usize {
    const TABLE: [u8; 16] = [0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2, 0];

    let mut x = (x >> 32) + (x & 0xFFFF_FFFF);
    x = (x >> 16) + (x & 0xFFFF);
    x = (x >> 8) + (x & 0xFF);
    x = (x >> 4) + (x & 0xF);
    x = (x >> 2) + (x & 0x3);
    x = (x >> 2) + (x & 0x3);
    x = (x >> 2) + (x & 0x3);
    TABLE[x as usize] as usize
}

/// Partition index holding `position`.
#[inline(always)]
pub fn index_by_position(position: i64, position_bits_to_shift: u32) -> usize {
    fast_mod3((position as u64) >> position_bits_to_shift)
}

/// Partition index used by `active_term_id`.
#[inline(always)]
pub fn index_by_term(initial_term_id: i32, active_term_id: i32) -> usize {
    fast_mod3(active_term_id.wrapping_sub(initial_term_id) as u32 as u64)
}

/// Offset of `position` inside its term.
#[inline(always)]
pub fn term_offset(position: i64, term_length_mask: i64) -> usize {
    (position & term_length_mask) as usize
}

/// Number of bits to shift a position right to obtain the term count.
///
/// `term_length` must be a power of two.
#[inline]
pub fn position_bits_to_shift(term_length: usize) -> u32 {
    debug_assert!(term_length.is_power_of_two());
    term_length.trailing_zeros()
}

#[inline]
pub fn compute_position(
    active_term_id: i32,
    term_offset: usize,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    let term_count = active_term_id.wrapping_sub(initial_term_id) as i64;
    (term_count << position_bits_to_shift) + term_offset as i64
}

#[inline]
pub fn compute_term_begin_position(
    active_term_id: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    compute_position(active_term_id, 0, position_bits_to_shift, initial_term_id)
}

#[inline]
pub fn compute_term_id_from_position(
    position: i64,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i32 {
    ((position as u64 >> position_bits_to_shift) as i32).wrapping_add(initial_term_id)
}
