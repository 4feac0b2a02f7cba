//! A subscriber maps a log file created by a separate "driver" mapping and
//! consumes frames appended concurrently by several producer threads.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use strand_atomic::AtomicBuffer;
use strand_logbuffer::{
    AppendOutcome, Image, LogBufferParams, LogBuffers, Position, TermAppender,
};
use strand_mmap::MmapRegion;

const PRODUCERS: u32 = 4;
const MESSAGES_PER_PRODUCER: u32 = 200;

#[test]
fn image_sees_every_frame_from_concurrent_producers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stream.log");

    let params = LogBufferParams {
        term_length: 256 * 1024,
        initial_term_id: 100,
        ..Default::default()
    };
    let driver = Arc::new(LogBuffers::create(&path, &params).unwrap());

    let mut counters = MmapRegion::anonymous(4096).unwrap();
    let values = unsafe { AtomicBuffer::wrap(counters.as_mut_ptr(), counters.len()) };
    let mut image = Image::new(
        42,
        1,
        2,
        "file",
        Position::new(values, 3),
        LogBuffers::open(&path).unwrap(),
    );
    assert_eq!(image.initial_term_id(), 100);

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let driver = Arc::clone(&driver);
            thread::spawn(move || {
                let appender = TermAppender::new(driver.term_buffer(0), driver.meta(), 0);
                for seq in 0..MESSAGES_PER_PRODUCER {
                    let mut payload = [0u8; 8];
                    payload[..4].copy_from_slice(&producer.to_le_bytes());
                    payload[4..].copy_from_slice(&seq.to_le_bytes());
                    let outcome = appender.append_unfragmented(42, 7, &payload).unwrap();
                    assert!(matches!(outcome, AppendOutcome::Appended { .. }));
                }
            })
        })
        .collect();

    let mut next_seq = [0u32; PRODUCERS as usize];
    let mut received = 0;
    let deadline = Instant::now() + Duration::from_secs(10);
    while received < PRODUCERS * MESSAGES_PER_PRODUCER {
        assert!(Instant::now() < deadline, "timed out after {received} fragments");
        received += image
            .poll(
                |payload, header| {
                    assert_eq!(header.session_id(), 42);
                    assert_eq!(header.stream_id(), 7);
                    let producer = u32::from_le_bytes(payload[..4].try_into().unwrap()) as usize;
                    let seq = u32::from_le_bytes(payload[4..].try_into().unwrap());
                    assert_eq!(seq, next_seq[producer], "producer {producer} out of order");
                    next_seq[producer] += 1;
                    Ok(())
                },
                16,
            )
            .unwrap() as u32;
    }

    for p in producers {
        p.join().unwrap();
    }

    let frames = (PRODUCERS * MESSAGES_PER_PRODUCER) as i64;
    assert_eq!(image.position(), frames * 64);
    assert_eq!(driver.meta().producer_position(), image.position());

    image.close().unwrap();
    image.close().unwrap();
}
