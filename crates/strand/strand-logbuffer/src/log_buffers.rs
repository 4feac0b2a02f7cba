use crate::descriptor::{LOG_META_DATA_LENGTH, check_term_length, compute_log_length};
use crate::error::LogBufferError;
use crate::meta::{LogBufferParams, LogMetadata};
use crate::position::PARTITION_COUNT;
use std::io;
use std::path::Path;
use strand_atomic::AtomicBuffer;
use strand_mmap::MmapRegion;
use tracing::debug;

/// A mapped log buffer: three term partitions followed by metadata.
///
/// Owns the mapping. The partition and metadata views handed out by
/// [`term_buffer`](Self::term_buffer) and [`meta`](Self::meta) borrow from
/// `self`, so they cannot outlive the unmap in [`close`](Self::close).
pub struct LogBuffers {
    partitions: [AtomicBuffer; PARTITION_COUNT],
    meta: LogMetadata,
    term_length: usize,
    region: MmapRegion,
}

impl LogBuffers {
    /// Create a log file at `path` and initialise its metadata.
    pub fn create<P: AsRef<Path>>(
        path: P,
        params: &LogBufferParams,
    ) -> Result<Self, LogBufferError> {
        check_term_length(params.term_length)?;
        let region = MmapRegion::create_rw(path, compute_log_length(params.term_length) as u64)?;
        let log = Self::from_region(region)?;
        log.meta.initialise(params);
        Ok(log)
    }

    /// Create a process-private log in anonymous memory.
    pub fn create_anonymous(params: &LogBufferParams) -> Result<Self, LogBufferError> {
        check_term_length(params.term_length)?;
        let region = MmapRegion::anonymous(compute_log_length(params.term_length))?;
        let log = Self::from_region(region)?;
        log.meta.initialise(params);
        Ok(log)
    }

    /// Map an existing log file written by another process.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LogBufferError> {
        let region = MmapRegion::open_rw(path)?;
        let log = Self::from_region(region)?;
        let recorded = log.meta.term_length();
        if recorded != log.term_length {
            return Err(LogBufferError::LengthMismatch {
                expected: compute_log_length(recorded),
                actual: compute_log_length(log.term_length),
            });
        }
        Ok(log)
    }

    fn from_region(mut region: MmapRegion) -> Result<Self, LogBufferError> {
        let len = region.len();
        if len < LOG_META_DATA_LENGTH {
            return Err(LogBufferError::LengthMismatch {
                expected: LOG_META_DATA_LENGTH,
                actual: len,
            });
        }
        let term_length = (len - LOG_META_DATA_LENGTH) / PARTITION_COUNT;
        check_term_length(term_length)?;
        let expected = compute_log_length(term_length);
        if expected != len {
            return Err(LogBufferError::LengthMismatch {
                expected,
                actual: len,
            });
        }

        let base = region.as_mut_ptr();
        // SAFETY: every view lies inside `region`, which `self` owns and only
        // releases when consumed by `close` or dropped.
        let partitions = std::array::from_fn(|i| unsafe {
            AtomicBuffer::wrap(base.add(i * term_length), term_length)
        });
        let meta = LogMetadata::new(unsafe {
            AtomicBuffer::wrap(
                base.add(PARTITION_COUNT * term_length),
                LOG_META_DATA_LENGTH,
            )
        });

        Ok(Self {
            partitions,
            meta,
            term_length,
            region,
        })
    }

    #[inline]
    pub fn term_buffer(&self, partition: usize) -> &AtomicBuffer {
        &self.partitions[partition]
    }

    #[inline]
    pub fn meta(&self) -> &LogMetadata {
        &self.meta
    }

    #[inline]
    pub fn term_length(&self) -> usize {
        self.term_length
    }

    /// Flush and unmap. Consuming `self` makes a second unmap impossible.
    pub fn close(self) -> io::Result<()> {
        debug!(len = self.region.len(), "unmapping log buffers");
        self.region.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TERM_MIN_LENGTH;

    #[test]
    fn anonymous_log_exposes_three_partitions() {
        let log = LogBuffers::create_anonymous(&LogBufferParams::default()).unwrap();
        assert_eq!(log.term_length(), TERM_MIN_LENGTH);
        for i in 0..PARTITION_COUNT {
            assert_eq!(log.term_buffer(i).capacity(), TERM_MIN_LENGTH);
        }
        let gap = log.term_buffer(1).as_ptr() as usize - log.term_buffer(0).as_ptr() as usize;
        assert_eq!(gap, TERM_MIN_LENGTH);
    }

    #[test]
    fn rejects_invalid_term_length() {
        let params = LogBufferParams {
            term_length: 1000,
            ..Default::default()
        };
        assert!(matches!(
            LogBuffers::create_anonymous(&params),
            Err(LogBufferError::InvalidTermLength(1000))
        ));
    }

    #[test]
    fn file_log_is_visible_to_second_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.log");
        let params = LogBufferParams {
            initial_term_id: 21,
            ..Default::default()
        };

        let writer = LogBuffers::create(&path, &params).unwrap();
        writer.term_buffer(2).put_i64_ordered(64, 1234);

        let reader = LogBuffers::open(&path).unwrap();
        assert_eq!(reader.meta().initial_term_id(), 21);
        assert_eq!(reader.term_buffer(2).get_i64_volatile(64), 1234);

        writer.close().unwrap();
        reader.close().unwrap();
    }

    #[test]
    fn open_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.log");
        std::fs::write(&path, vec![0u8; 1024]).unwrap();
        assert!(matches!(
            LogBuffers::open(&path),
            Err(LogBufferError::LengthMismatch { .. })
        ));
    }
}
