//! Layout of the ring buffer: records in the first `capacity` bytes, then a
//! trailer of counters.
//!
//! ```text
//! ┌──────────────────────────────────────────┬─────────────────────────────┐
//! │ records (capacity, power of two)         │ trailer (TRAILER_LENGTH)    │
//! └──────────────────────────────────────────┴─────────────────────────────┘
//!
//! record:
//! ┌──────────────┬──────────────┬──────────────────────────────┐
//! │ length (i32) │ type id (i32)│ payload, padded to ALIGNMENT │
//! └──────────────┴──────────────┴──────────────────────────────┘
//! ```
//!
//! Trailer fields sit two cache lines apart so producers hammering the tail
//! never share a line with the consumer's head.

pub const CACHE_LINE_LENGTH: usize = 64;

pub const TAIL_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 2;
pub const HEAD_CACHE_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 4;
pub const HEAD_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 6;
pub const CORRELATION_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH * 8;
pub const CONSUMER_HEARTBEAT_OFFSET: usize = CACHE_LINE_LENGTH * 10;
pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 12;

/// Bytes in a record header. The stored length includes them, so a
/// published record never has a length `<= 0`.
pub const HEADER_LENGTH: usize = 8;
pub const ALIGNMENT: usize = HEADER_LENGTH;

/// Type id of a record that only fills the space up to the buffer end.
pub const PADDING_MSG_TYPE_ID: i32 = -1;

#[inline(always)]
pub fn length_offset(record_index: usize) -> usize {
    record_index
}

#[inline(always)]
pub fn type_offset(record_index: usize) -> usize {
    record_index + 4
}

#[inline(always)]
pub fn encoded_msg_offset(record_index: usize) -> usize {
    record_index + HEADER_LENGTH
}

#[inline(always)]
pub fn align(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Pack length and type id into the 64-bit word stored at the start of a
/// record, with the length in the lower-addressed half.
#[inline(always)]
pub fn make_header(length: i32, msg_type_id: i32) -> i64 {
    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&length.to_ne_bytes());
    bytes[4..].copy_from_slice(&msg_type_id.to_ne_bytes());
    i64::from_ne_bytes(bytes)
}

#[inline(always)]
pub fn record_length(header: i64) -> i32 {
    let bytes = header.to_ne_bytes();
    i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline(always)]
pub fn message_type_id(header: i64) -> i32 {
    let bytes = header.to_ne_bytes();
    i32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_sign_and_fields() {
        let h = make_header(16, PADDING_MSG_TYPE_ID);
        assert_eq!(record_length(h), 16);
        assert_eq!(message_type_id(h), -1);

        let h = make_header(-24, 7);
        assert_eq!(record_length(h), -24);
        assert_eq!(message_type_id(h), 7);
    }

    #[test]
    fn header_length_occupies_lower_address() {
        let bytes = make_header(0x0102_0304, 9).to_ne_bytes();
        assert_eq!(&bytes[..4], &0x0102_0304i32.to_ne_bytes());
        assert_eq!(&bytes[4..], &9i32.to_ne_bytes());
    }

    #[test]
    fn trailer_fields_are_ordered_and_cache_line_aligned() {
        let offsets = [
            TAIL_POSITION_OFFSET,
            HEAD_CACHE_POSITION_OFFSET,
            HEAD_POSITION_OFFSET,
            CORRELATION_COUNTER_OFFSET,
            CONSUMER_HEARTBEAT_OFFSET,
        ];
        for pair in offsets.windows(2) {
            assert!(pair[0] + 2 * CACHE_LINE_LENGTH <= pair[1]);
        }
        assert!(offsets.iter().all(|o| o % CACHE_LINE_LENGTH == 0));
        assert!(CONSUMER_HEARTBEAT_OFFSET + 8 <= TRAILER_LENGTH);
    }

    #[test]
    fn records_align_to_eight_bytes() {
        assert_eq!(align(5 + HEADER_LENGTH, ALIGNMENT), 16);
        assert_eq!(align(HEADER_LENGTH, ALIGNMENT), 8);
        assert_eq!(type_offset(16), 20);
        assert_eq!(encoded_msg_offset(16), 24);
        assert_eq!(length_offset(16), 16);
    }
}
