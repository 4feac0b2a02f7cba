//! Sequential scan of published frames within one term partition.

use crate::descriptor::*;
use crate::error::HandlerError;
use crate::header::{Header, HeaderContext};
use strand_atomic::AtomicBuffer;

/// Result of a term scan.
#[derive(Debug)]
pub struct ReadOutcome {
    /// Offset just past the last frame consumed.
    pub offset: usize,
    pub fragments_read: usize,
    /// Set when the handler failed; the failing fragment is consumed.
    pub error: Option<HandlerError>,
}

/// A published frame located by [`next_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub offset: usize,
    /// Header plus payload, as stored in the frame length field.
    pub length: usize,
    pub aligned_length: usize,
    pub is_padding: bool,
}

impl Frame {
    /// Offset of the frame that follows this one.
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.aligned_length
    }

    #[inline]
    pub fn payload<'a>(&self, term: &'a AtomicBuffer) -> &'a [u8] {
        term.as_slice(self.offset + HEADER_LENGTH, self.length - HEADER_LENGTH)
    }
}

/// The frame published at `offset`.
///
/// `None` when nothing is published there yet, or when the frame would end
/// past `limit_offset`.
#[inline]
pub fn next_frame(term: &AtomicBuffer, offset: usize, limit_offset: usize) -> Option<Frame> {
    if offset >= limit_offset {
        return None;
    }
    let frame_length = frame_length_volatile(term, offset);
    if frame_length <= 0 {
        return None;
    }

    let length = frame_length as usize;
    let aligned_length = align(length, FRAME_ALIGNMENT);
    if offset + aligned_length > limit_offset {
        return None;
    }
    Some(Frame {
        offset,
        length,
        aligned_length,
        is_padding: is_padding_frame(term, offset),
    })
}

/// Deliver up to `fragments_limit` data frames starting at `term_offset`.
///
/// The scan stops at the first unpublished frame, at a padding frame (which
/// is consumed, padding always runs to the end of the term), at the first
/// frame that would end past `limit_offset`, or when the handler fails.
pub fn read<F>(
    term: &AtomicBuffer,
    term_offset: usize,
    limit_offset: usize,
    fragments_limit: usize,
    context: HeaderContext,
    handler: &mut F,
) -> ReadOutcome
where
    F: FnMut(&[u8], &Header<'_>) -> Result<(), HandlerError>,
{
    let mut offset = term_offset;
    let mut fragments_read = 0;
    let mut error = None;

    while fragments_read < fragments_limit {
        let Some(frame) = next_frame(term, offset, limit_offset) else {
            break;
        };
        offset = frame.end();
        if frame.is_padding {
            break;
        }

        fragments_read += 1;
        let header = Header::new(term, frame.offset, context);
        if let Err(e) = handler(frame.payload(term), &header) {
            error = Some(e);
            break;
        }
    }

    ReadOutcome {
        offset,
        fragments_read,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term() -> (Vec<u64>, AtomicBuffer) {
        let mut backing = vec![0u64; 64];
        let term = unsafe { AtomicBuffer::wrap(backing.as_mut_ptr().cast(), 512) };
        (backing, term)
    }

    #[test]
    fn unpublished_offset_has_no_frame() {
        let (_backing, term) = term();
        assert_eq!(next_frame(&term, 0, 512), None);
        assert_eq!(next_frame(&term, 512, 512), None);
    }

    #[test]
    fn frame_is_aligned_and_classified() {
        let (_backing, term) = term();
        term.put_u16(TYPE_OFFSET, HDR_TYPE_DATA);
        frame_length_ordered(&term, 0, HEADER_LENGTH as i32 + 5);
        term.put_u16(64 + TYPE_OFFSET, HDR_TYPE_PAD);
        frame_length_ordered(&term, 64, 448);

        let frame = next_frame(&term, 0, 512).unwrap();
        assert_eq!(frame.length, 37);
        assert_eq!(frame.aligned_length, 64);
        assert_eq!(frame.end(), 64);
        assert!(!frame.is_padding);
        assert_eq!(frame.payload(&term).len(), 5);

        let padding = next_frame(&term, 64, 512).unwrap();
        assert!(padding.is_padding);
        assert_eq!(padding.end(), 512);
    }

    #[test]
    fn frame_ending_past_limit_is_not_returned() {
        let (_backing, term) = term();
        term.put_u16(TYPE_OFFSET, HDR_TYPE_DATA);
        frame_length_ordered(&term, 0, 100);

        assert_eq!(next_frame(&term, 0, 96), None);
        assert_eq!(next_frame(&term, 0, 128).map(|f| f.end()), Some(128));
    }
}
