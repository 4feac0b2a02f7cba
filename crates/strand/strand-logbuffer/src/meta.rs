//! Accessors for the metadata section that trails the three partitions.
//!
//! Each partition has a raw tail counter packing the term id it currently
//! holds with the next free offset in that term:
//!
//! ```text
//! raw_tail = (term_id as i64) << 32 | term_offset
//! ```

use crate::descriptor::*;
use crate::position::{PARTITION_COUNT, compute_position, position_bits_to_shift};
use strand_atomic::AtomicBuffer;

/// Parameters written into a fresh log's metadata.
#[derive(Debug, Clone, Copy)]
pub struct LogBufferParams {
    pub term_length: usize,
    pub initial_term_id: i32,
    pub mtu_length: usize,
    pub correlation_id: i64,
}

impl Default for LogBufferParams {
    fn default() -> Self {
        Self {
            term_length: TERM_MIN_LENGTH,
            initial_term_id: 0,
            mtu_length: 1408,
            correlation_id: 0,
        }
    }
}

#[inline(always)]
pub fn pack_tail(term_id: i32, term_offset: usize) -> i64 {
    ((term_id as i64) << 32) + term_offset as i64
}

#[inline(always)]
pub fn term_id(raw_tail: i64) -> i32 {
    (raw_tail >> 32) as i32
}

/// Offset component of a raw tail, capped at `term_length` since producers
/// may push it past the end before noticing the term is full.
#[inline(always)]
pub fn term_offset(raw_tail: i64, term_length: usize) -> usize {
    ((raw_tail & 0xFFFF_FFFF) as usize).min(term_length)
}

pub struct LogMetadata {
    buffer: AtomicBuffer,
}

impl LogMetadata {
    pub fn new(buffer: AtomicBuffer) -> Self {
        assert!(
            buffer.capacity() >= LOG_META_DATA_LENGTH,
            "metadata buffer too small: {}",
            buffer.capacity()
        );
        Self { buffer }
    }

    /// Write the static fields and seed the tails so that partition 0 holds
    /// the initial term and the others hold terms of the previous rotation.
    pub fn initialise(&self, params: &LogBufferParams) {
        let b = &self.buffer;
        b.put_i64(LOG_CORRELATION_ID_OFFSET, params.correlation_id);
        b.put_i32(LOG_INITIAL_TERM_ID_OFFSET, params.initial_term_id);
        b.put_i32(LOG_MTU_LENGTH_OFFSET, params.mtu_length as i32);
        b.put_i32(LOG_TERM_LENGTH_OFFSET, params.term_length as i32);
        b.put_i32(LOG_PAGE_SIZE_OFFSET, 4096);
        b.put_i64_ordered(LOG_END_OF_STREAM_POSITION_OFFSET, i64::MAX);

        self.set_raw_tail(0, pack_tail(params.initial_term_id, 0));
        for partition in 1..PARTITION_COUNT {
            let term_id = params
                .initial_term_id
                .wrapping_add(partition as i32)
                .wrapping_sub(PARTITION_COUNT as i32);
            self.set_raw_tail(partition, pack_tail(term_id, 0));
        }
        b.put_i32_ordered(LOG_ACTIVE_TERM_COUNT_OFFSET, 0);
    }

    pub fn initial_term_id(&self) -> i32 {
        self.buffer.get_i32(LOG_INITIAL_TERM_ID_OFFSET)
    }

    pub fn term_length(&self) -> usize {
        self.buffer.get_i32(LOG_TERM_LENGTH_OFFSET) as usize
    }

    pub fn mtu_length(&self) -> usize {
        self.buffer.get_i32(LOG_MTU_LENGTH_OFFSET) as usize
    }

    pub fn page_size(&self) -> usize {
        self.buffer.get_i32(LOG_PAGE_SIZE_OFFSET) as usize
    }

    pub fn correlation_id(&self) -> i64 {
        self.buffer.get_i64(LOG_CORRELATION_ID_OFFSET)
    }

    pub fn end_of_stream_position(&self) -> i64 {
        self.buffer
            .get_i64_volatile(LOG_END_OF_STREAM_POSITION_OFFSET)
    }

    pub fn set_end_of_stream_position(&self, position: i64) {
        self.buffer
            .put_i64_ordered(LOG_END_OF_STREAM_POSITION_OFFSET, position)
    }

    pub fn active_term_count(&self) -> i32 {
        self.buffer.get_i32_volatile(LOG_ACTIVE_TERM_COUNT_OFFSET)
    }

    #[inline]
    fn tail_offset(partition: usize) -> usize {
        debug_assert!(partition < PARTITION_COUNT);
        TERM_TAIL_COUNTERS_OFFSET + partition * 8
    }

    pub fn raw_tail_volatile(&self, partition: usize) -> i64 {
        self.buffer.get_i64_volatile(Self::tail_offset(partition))
    }

    pub fn set_raw_tail(&self, partition: usize, raw_tail: i64) {
        self.buffer
            .put_i64_ordered(Self::tail_offset(partition), raw_tail)
    }

    pub fn get_and_add_raw_tail(&self, partition: usize, delta: usize) -> i64 {
        self.buffer
            .get_and_add_i64(Self::tail_offset(partition), delta as i64)
    }

    /// Position of the next byte a producer would append, from the active
    /// partition's tail.
    pub fn producer_position(&self) -> i64 {
        let term_length = self.term_length();
        let partition = crate::position::fast_mod3(self.active_term_count() as u32 as u64);
        let raw_tail = self.raw_tail_volatile(partition);
        compute_position(
            term_id(raw_tail),
            term_offset(raw_tail, term_length),
            position_bits_to_shift(term_length),
            self.initial_term_id(),
        )
    }

    /// Move producers on from `term_id` (the term with count `term_count`)
    /// to the next partition. Returns `false` if another producer already
    /// rotated.
    pub fn rotate_log(&self, term_count: i32, term_id: i32) -> bool {
        let next_term_id = term_id.wrapping_add(1);
        let next_term_count = term_count.wrapping_add(1);
        let next_index = crate::position::fast_mod3(next_term_count as u32 as u64);
        let expected_term_id = next_term_id.wrapping_sub(PARTITION_COUNT as i32);

        loop {
            let raw_tail = self.raw_tail_volatile(next_index);
            if self::term_id(raw_tail) != expected_term_id {
                break;
            }
            if self.buffer.compare_and_set_i64(
                Self::tail_offset(next_index),
                raw_tail,
                pack_tail(next_term_id, 0),
            ) {
                break;
            }
        }

        self.buffer
            .compare_and_set_i32(LOG_ACTIVE_TERM_COUNT_OFFSET, term_count, next_term_count)
    }
}
