use crate::descriptor::*;
use crate::error::LogBufferError;
use crate::meta::{self, LogMetadata};
use crate::position::{compute_position, position_bits_to_shift};
use strand_atomic::AtomicBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Frame published; `position` is the stream position just past it.
    Appended { position: i64 },
    /// The term is full. A padding frame now fills its remainder and the
    /// producer must rotate to the next partition before retrying.
    Tripped { term_id: i32 },
}

/// Appends unfragmented data frames to one partition.
///
/// Space is claimed by a fetch-add on the partition's raw tail, so several
/// appenders on the same partition never overlap. Each frame becomes visible
/// to readers when its length is stored with release ordering.
pub struct TermAppender<'a> {
    term: &'a AtomicBuffer,
    meta: &'a LogMetadata,
    partition: usize,
}

impl<'a> TermAppender<'a> {
    pub fn new(term: &'a AtomicBuffer, meta: &'a LogMetadata, partition: usize) -> Self {
        Self {
            term,
            meta,
            partition,
        }
    }

    /// Largest payload that fits in one frame.
    pub fn max_payload_length(&self) -> usize {
        self.meta.mtu_length() - HEADER_LENGTH
    }

    pub fn append_unfragmented(
        &self,
        session_id: i32,
        stream_id: i32,
        payload: &[u8],
    ) -> Result<AppendOutcome, LogBufferError> {
        let max = self.max_payload_length();
        if payload.len() > max {
            return Err(LogBufferError::MessageTooLarge {
                length: payload.len(),
                max,
            });
        }

        let frame_length = payload.len() + HEADER_LENGTH;
        let aligned_length = align(frame_length, FRAME_ALIGNMENT);
        let term_length = self.term.capacity();

        let raw_tail = self
            .meta
            .get_and_add_raw_tail(self.partition, aligned_length);
        let term_id = meta::term_id(raw_tail);
        let term_offset = (raw_tail & 0xFFFF_FFFF) as usize;

        let resulting_offset = term_offset + aligned_length;
        if resulting_offset > term_length {
            if term_offset < term_length {
                self.write_padding(
                    term_offset,
                    term_length - term_offset,
                    session_id,
                    stream_id,
                    term_id,
                );
            }
            return Ok(AppendOutcome::Tripped { term_id });
        }

        self.write_header(term_offset, HDR_TYPE_DATA, session_id, stream_id, term_id);
        self.term.put_slice(term_offset + HEADER_LENGTH, payload);
        frame_length_ordered(self.term, term_offset, frame_length as i32);

        let term_length_bits = position_bits_to_shift(term_length);
        Ok(AppendOutcome::Appended {
            position: compute_position(
                term_id,
                resulting_offset,
                term_length_bits,
                self.meta.initial_term_id(),
            ),
        })
    }

    fn write_header(
        &self,
        offset: usize,
        frame_type: u16,
        session_id: i32,
        stream_id: i32,
        term_id: i32,
    ) {
        let t = self.term;
        t.put_u8(offset + VERSION_OFFSET, CURRENT_VERSION);
        t.put_u8(offset + FLAGS_OFFSET, UNFRAGMENTED);
        t.put_u16(offset + TYPE_OFFSET, frame_type);
        t.put_i32(offset + TERM_OFFSET_OFFSET, offset as i32);
        t.put_i32(offset + SESSION_ID_OFFSET, session_id);
        t.put_i32(offset + STREAM_ID_OFFSET, stream_id);
        t.put_i32(offset + TERM_ID_OFFSET, term_id);
        t.put_i64(offset + RESERVED_VALUE_OFFSET, 0);
    }

    fn write_padding(
        &self,
        offset: usize,
        length: usize,
        session_id: i32,
        stream_id: i32,
        term_id: i32,
    ) {
        self.write_header(offset, HDR_TYPE_PAD, session_id, stream_id, term_id);
        frame_length_ordered(self.term, offset, length as i32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_buffers::LogBuffers;
    use crate::meta::LogBufferParams;

    #[test]
    fn appends_frames_back_to_back() {
        let log = LogBuffers::create_anonymous(&LogBufferParams::default()).unwrap();
        let appender = TermAppender::new(log.term_buffer(0), log.meta(), 0);

        let first = appender.append_unfragmented(1, 2, b"abc").unwrap();
        let second = appender.append_unfragmented(1, 2, &[7u8; 40]).unwrap();

        assert_eq!(first, AppendOutcome::Appended { position: 64 });
        assert_eq!(second, AppendOutcome::Appended { position: 64 + 96 });
        let term = log.term_buffer(0);
        assert_eq!(frame_length_volatile(term, 0), 35);
        assert_eq!(frame_length_volatile(term, 64), 72);
        assert_eq!(term.as_slice(HEADER_LENGTH, 3), b"abc");
    }

    #[test]
    fn full_term_is_padded_and_tripped() {
        let log = LogBuffers::create_anonymous(&LogBufferParams::default()).unwrap();
        let term_length = log.term_length();
        let appender = TermAppender::new(log.term_buffer(0), log.meta(), 0);

        // leave 64 bytes free at the end of the term
        log.meta()
            .set_raw_tail(0, meta::pack_tail(0, term_length - 64));
        let outcome = appender.append_unfragmented(1, 2, &[1u8; 100]).unwrap();

        assert_eq!(outcome, AppendOutcome::Tripped { term_id: 0 });
        let term = log.term_buffer(0);
        assert!(is_padding_frame(term, term_length - 64));
        assert_eq!(frame_length_volatile(term, term_length - 64), 64);
    }

    #[test]
    fn rejects_payload_above_mtu() {
        let log = LogBuffers::create_anonymous(&LogBufferParams::default()).unwrap();
        let appender = TermAppender::new(log.term_buffer(0), log.meta(), 0);
        let payload = vec![0u8; appender.max_payload_length() + 1];

        assert!(matches!(
            appender.append_unfragmented(1, 2, &payload),
            Err(LogBufferError::MessageTooLarge { .. })
        ));
        assert_eq!(log.meta().raw_tail_volatile(0), 0);
    }
}
