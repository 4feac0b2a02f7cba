use crate::descriptor::*;
use crate::position::compute_position;
use strand_atomic::AtomicBuffer;

/// Stream constants a [`Header`] needs to turn frame fields into positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderContext {
    pub initial_term_id: i32,
    pub position_bits_to_shift: u32,
}

/// Read-only view of the data frame header of the fragment being delivered.
pub struct Header<'a> {
    buffer: &'a AtomicBuffer,
    offset: usize,
    context: HeaderContext,
}

impl<'a> Header<'a> {
    pub fn new(buffer: &'a AtomicBuffer, offset: usize, context: HeaderContext) -> Self {
        Self {
            buffer,
            offset,
            context,
        }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn initial_term_id(&self) -> i32 {
        self.context.initial_term_id
    }

    #[inline]
    pub fn position_bits_to_shift(&self) -> u32 {
        self.context.position_bits_to_shift
    }

    pub fn frame_length(&self) -> i32 {
        self.buffer.get_i32(self.offset + FRAME_LENGTH_OFFSET)
    }

    pub fn version(&self) -> u8 {
        self.buffer.get_u8(self.offset + VERSION_OFFSET)
    }

    pub fn flags(&self) -> u8 {
        self.buffer.get_u8(self.offset + FLAGS_OFFSET)
    }

    pub fn frame_type(&self) -> u16 {
        self.buffer.get_u16(self.offset + TYPE_OFFSET)
    }

    pub fn term_offset(&self) -> i32 {
        self.buffer.get_i32(self.offset + TERM_OFFSET_OFFSET)
    }

    pub fn session_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + SESSION_ID_OFFSET)
    }

    pub fn stream_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + STREAM_ID_OFFSET)
    }

    pub fn term_id(&self) -> i32 {
        self.buffer.get_i32(self.offset + TERM_ID_OFFSET)
    }

    pub fn reserved_value(&self) -> i64 {
        self.buffer.get_i64(self.offset + RESERVED_VALUE_OFFSET)
    }

    /// Stream position just past this fragment.
    pub fn position(&self) -> i64 {
        let next_offset = align(self.offset + self.frame_length() as usize, FRAME_ALIGNMENT);
        compute_position(
            self.term_id(),
            next_offset,
            self.context.position_bits_to_shift,
            self.context.initial_term_id,
        )
    }
}
