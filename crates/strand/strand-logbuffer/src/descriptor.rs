//! Binary layout of data frames and of the log buffer file.
//!
//! # Data frame header
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +---------------------------------------------------------------+
//! |                         Frame Length                          |
//! +---------------+---------------+-------------------------------+
//! |    Version    |     Flags     |             Type              |
//! +---------------+---------------+-------------------------------+
//! |                          Term Offset                          |
//! +---------------------------------------------------------------+
//! |                          Session ID                           |
//! +---------------------------------------------------------------+
//! |                           Stream ID                           |
//! +---------------------------------------------------------------+
//! |                            Term ID                            |
//! +---------------------------------------------------------------+
//! |                        Reserved Value                         |
//! |                                                               |
//! +---------------------------------------------------------------+
//! ```
//!
//! The frame length includes the header. Frames start on
//! [`FRAME_ALIGNMENT`] boundaries; a writer publishes a frame by storing its
//! length last with release ordering, so a length `<= 0` means nothing more
//! is available yet.
//!
//! # Log buffer file
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬────────────────────┐
//! │ partition 0  │ partition 1  │ partition 2  │ metadata (4 KiB)   │
//! │ term_length  │ term_length  │ term_length  │                    │
//! └──────────────┴──────────────┴──────────────┴────────────────────┘
//! ```

use crate::error::LogBufferError;
use strand_atomic::AtomicBuffer;

pub const CACHE_LINE_LENGTH: usize = 64;

pub const FRAME_ALIGNMENT: usize = 32;
pub const HEADER_LENGTH: usize = 32;

pub const FRAME_LENGTH_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const FLAGS_OFFSET: usize = 5;
pub const TYPE_OFFSET: usize = 6;
pub const TERM_OFFSET_OFFSET: usize = 8;
pub const SESSION_ID_OFFSET: usize = 12;
pub const STREAM_ID_OFFSET: usize = 16;
pub const TERM_ID_OFFSET: usize = 20;
pub const RESERVED_VALUE_OFFSET: usize = 24;

pub const CURRENT_VERSION: u8 = 0;

pub const HDR_TYPE_PAD: u16 = 0x00;
pub const HDR_TYPE_DATA: u16 = 0x01;

pub const BEGIN_FRAG_FLAG: u8 = 0x80;
pub const END_FRAG_FLAG: u8 = 0x40;
pub const UNFRAGMENTED: u8 = BEGIN_FRAG_FLAG | END_FRAG_FLAG;

pub const TERM_MIN_LENGTH: usize = 64 * 1024;
pub const TERM_MAX_LENGTH: usize = 1024 * 1024 * 1024;

// Metadata section, offsets relative to its start.
pub const TERM_TAIL_COUNTERS_OFFSET: usize = 0;
pub const LOG_ACTIVE_TERM_COUNT_OFFSET: usize = TERM_TAIL_COUNTERS_OFFSET + 3 * 8;
pub const LOG_END_OF_STREAM_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 2;
pub const LOG_CORRELATION_ID_OFFSET: usize = CACHE_LINE_LENGTH * 4;
pub const LOG_INITIAL_TERM_ID_OFFSET: usize = LOG_CORRELATION_ID_OFFSET + 8;
pub const LOG_MTU_LENGTH_OFFSET: usize = LOG_INITIAL_TERM_ID_OFFSET + 4;
pub const LOG_TERM_LENGTH_OFFSET: usize = LOG_MTU_LENGTH_OFFSET + 4;
pub const LOG_PAGE_SIZE_OFFSET: usize = LOG_TERM_LENGTH_OFFSET + 4;
pub const LOG_META_DATA_LENGTH: usize = 4096;

/// Round `value` up to the next multiple of `alignment` (a power of two).
#[inline(always)]
pub fn align(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

pub fn check_term_length(term_length: usize) -> Result<(), LogBufferError> {
    if !term_length.is_power_of_two()
        || !(TERM_MIN_LENGTH..=TERM_MAX_LENGTH).contains(&term_length)
    {
        return Err(LogBufferError::InvalidTermLength(term_length));
    }
    Ok(())
}

/// Total mapped length of a log with the given term length.
#[inline]
pub fn compute_log_length(term_length: usize) -> usize {
    term_length * crate::position::PARTITION_COUNT + LOG_META_DATA_LENGTH
}

#[inline(always)]
pub fn frame_length_volatile(buffer: &AtomicBuffer, frame_offset: usize) -> i32 {
    buffer.get_i32_volatile(frame_offset + FRAME_LENGTH_OFFSET)
}

#[inline(always)]
pub fn frame_length_ordered(buffer: &AtomicBuffer, frame_offset: usize, frame_length: i32) {
    buffer.put_i32_ordered(frame_offset + FRAME_LENGTH_OFFSET, frame_length)
}

#[inline(always)]
pub fn frame_type(buffer: &AtomicBuffer, frame_offset: usize) -> u16 {
    buffer.get_u16(frame_offset + TYPE_OFFSET)
}

#[inline(always)]
pub fn is_padding_frame(buffer: &AtomicBuffer, frame_offset: usize) -> bool {
    frame_type(buffer, frame_offset) == HDR_TYPE_PAD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_up_to_boundary() {
        assert_eq!(align(0, FRAME_ALIGNMENT), 0);
        assert_eq!(align(1, FRAME_ALIGNMENT), 32);
        assert_eq!(align(32, FRAME_ALIGNMENT), 32);
        assert_eq!(align(37, FRAME_ALIGNMENT), 64);
    }

    #[test]
    fn term_length_bounds() {
        assert!(check_term_length(TERM_MIN_LENGTH).is_ok());
        assert!(check_term_length(TERM_MAX_LENGTH).is_ok());
        assert!(check_term_length(TERM_MIN_LENGTH / 2).is_err());
        assert!(check_term_length(TERM_MIN_LENGTH + 32).is_err());
        assert!(check_term_length(TERM_MAX_LENGTH * 2).is_err());
    }

    #[test]
    fn metadata_fields_fit_and_do_not_overlap() {
        assert!(
            LOG_ACTIVE_TERM_COUNT_OFFSET + 4 <= LOG_END_OF_STREAM_POSITION_OFFSET
        );
        assert!(
            LOG_END_OF_STREAM_POSITION_OFFSET + 8 <= LOG_CORRELATION_ID_OFFSET
        );
        assert_eq!(LOG_INITIAL_TERM_ID_OFFSET % 4, 0);
        assert!(LOG_PAGE_SIZE_OFFSET + 4 <= LOG_META_DATA_LENGTH);
    }
}
