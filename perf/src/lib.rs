//! Fixtures shared by the criterion benches.

use std::io;
use strand_atomic::AtomicBuffer;
use strand_logbuffer::{
    AppendOutcome, COUNTER_LENGTH, Image, LogBufferParams, LogBuffers, Position, TermAppender,
};
use strand_mmap::MmapRegion;
use strand_ringbuffer::{ManyToOneRingBuffer, TRAILER_LENGTH};

pub const BENCH_SESSION_ID: i32 = 7;
pub const BENCH_STREAM_ID: i32 = 1001;

pub fn temp_shm_path(label: &str) -> String {
    let pid = std::process::id();
    format!("/tmp/strand_bench_{label}_{pid}")
}

/// A ring buffer together with the file mapping it lives in.
pub struct MappedRing {
    pub ring: ManyToOneRingBuffer,
    path: String,
    _region: MmapRegion,
}

impl MappedRing {
    pub fn create(label: &str, capacity: usize) -> io::Result<Self> {
        let path = temp_shm_path(label);
        let mut region = MmapRegion::create_rw(&path, (capacity + TRAILER_LENGTH) as u64)?;
        let buffer = unsafe { AtomicBuffer::wrap(region.as_mut_ptr(), region.len()) };
        let ring = ManyToOneRingBuffer::new(buffer)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok(Self {
            ring,
            path,
            _region: region,
        })
    }
}

impl Drop for MappedRing {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// An image over an anonymous log whose first term is already full of
/// frames carrying `payload`.
pub struct FilledImage {
    pub image: Image,
    pub frames: usize,
    _counters: MmapRegion,
}

pub fn filled_image(term_length: usize, payload: &[u8]) -> io::Result<FilledImage> {
    let params = LogBufferParams {
        term_length,
        ..Default::default()
    };
    let log = LogBuffers::create_anonymous(&params)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut frames = 0;
    {
        let appender = TermAppender::new(log.term_buffer(0), log.meta(), 0);
        while let Ok(AppendOutcome::Appended { .. }) =
            appender.append_unfragmented(BENCH_SESSION_ID, BENCH_STREAM_ID, payload)
        {
            frames += 1;
        }
    }

    let mut counters = MmapRegion::anonymous(COUNTER_LENGTH)?;
    let position = Position::new(
        unsafe { AtomicBuffer::wrap(counters.as_mut_ptr(), counters.len()) },
        0,
    );
    let image = Image::new(BENCH_SESSION_ID, 1, 2, "bench", position, log);
    Ok(FilledImage {
        image,
        frames,
        _counters: counters,
    })
}
