//! Multi-process test for the many-to-one ring buffer.
//!
//! The test binary re-spawns itself as several writer processes that map the
//! same file as the orchestrating process, which acts as the single reader:
//!
//! ```text
//! [writer 0] --write--+
//! [writer 1] --write--+--> [cnc.ring (mmap file)] --read--> [reader]
//! [writer 2] --write--+
//! ```
//!
//! ```bash
//! cargo test -p strand-ringbuffer --test e2e_many_to_one -- --nocapture
//! ```

use std::collections::HashSet;
use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use strand_atomic::AtomicBuffer;
use strand_mmap::MmapRegion;
use strand_ringbuffer::{ManyToOneRingBuffer, TRAILER_LENGTH};

macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "STRAND_E2E_ROLE";
const ENV_PATH: &str = "STRAND_E2E_PATH";
const ENV_WRITER_ID: &str = "STRAND_E2E_WRITER_ID";

const ROLE_WRITER: &str = "writer";

const WRITERS: u32 = 3;
const MESSAGES_PER_WRITER: u32 = 50_000;

/// Small enough that writers regularly find the ring full and wrap.
const RING_CAPACITY: usize = 1 << 14;

const MSG_TYPE_ID: i32 = 101;

/// Payload: writer id, sequence, correlation id.
const PAYLOAD_LENGTH: usize = 16;

fn map_ring(region: &mut MmapRegion) -> ManyToOneRingBuffer {
    let buffer = unsafe { AtomicBuffer::wrap(region.as_mut_ptr(), region.len()) };
    ManyToOneRingBuffer::new(buffer).expect("ring buffer over mapped file")
}

fn run_writer(path: &str, writer_id: u32) {
    let mut region = MmapRegion::open_rw(path).expect("writer: open ring file");
    let ring = map_ring(&mut region);
    log!("[WRITER {writer_id}] attached, capacity {}", ring.capacity());

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut full_retries = 0u64;
    for seq in 0..MESSAGES_PER_WRITER {
        let correlation_id = ring.next_correlation_id();
        let mut payload = [0u8; PAYLOAD_LENGTH];
        payload[..4].copy_from_slice(&writer_id.to_le_bytes());
        payload[4..8].copy_from_slice(&seq.to_le_bytes());
        payload[8..].copy_from_slice(&correlation_id.to_le_bytes());

        while !ring.write(MSG_TYPE_ID, &payload).expect("valid message") {
            full_retries += 1;
            assert!(Instant::now() < deadline, "[WRITER {writer_id}] reader stalled");
            std::hint::spin_loop();
        }
    }
    log!("[WRITER {writer_id}] done, {full_retries} retries on full ring");
}

#[test]
fn e2e_many_writer_processes_one_reader() {
    if let Ok(role) = env::var(ENV_ROLE) {
        assert_eq!(role, ROLE_WRITER, "unknown role");
        let path = env::var(ENV_PATH).expect("STRAND_E2E_PATH not set");
        let writer_id = env::var(ENV_WRITER_ID)
            .expect("STRAND_E2E_WRITER_ID not set")
            .parse()
            .expect("numeric writer id");
        run_writer(&path, writer_id);
        return;
    }

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("cnc.ring");
    let mut region = MmapRegion::create_rw(&path, (RING_CAPACITY + TRAILER_LENGTH) as u64)
        .expect("create ring file");
    let mut ring = map_ring(&mut region);
    ring.set_consumer_heartbeat_time(1);

    let exe = env::current_exe().expect("current test executable");
    let mut writers = Vec::new();
    for writer_id in 0..WRITERS {
        let child = Command::new(&exe)
            .arg("--exact")
            .arg("e2e_many_writer_processes_one_reader")
            .env(ENV_ROLE, ROLE_WRITER)
            .env(ENV_PATH, &path)
            .env(ENV_WRITER_ID, writer_id.to_string())
            .stderr(Stdio::inherit())
            .spawn()
            .expect("spawn writer process");
        writers.push(child);
    }
    log!("[READER] spawned {WRITERS} writers on {}", path.display());

    let expected = (WRITERS * MESSAGES_PER_WRITER) as usize;
    let mut next_seq = vec![0u32; WRITERS as usize];
    let mut correlation_ids = HashSet::with_capacity(expected);
    let mut received = 0usize;
    let deadline = Instant::now() + Duration::from_secs(60);

    while received < expected {
        assert!(
            Instant::now() < deadline,
            "timed out after {received} of {expected} messages"
        );
        received += ring.read(
            |type_id, payload| {
                assert_eq!(type_id, MSG_TYPE_ID);
                assert_eq!(payload.len(), PAYLOAD_LENGTH);
                let writer = u32::from_le_bytes(payload[..4].try_into().unwrap()) as usize;
                let seq = u32::from_le_bytes(payload[4..8].try_into().unwrap());
                let correlation_id = i64::from_le_bytes(payload[8..].try_into().unwrap());
                assert_eq!(seq, next_seq[writer], "writer {writer} out of order");
                next_seq[writer] += 1;
                assert!(correlation_ids.insert(correlation_id), "duplicate correlation id");
                Ok(())
            },
            256,
        );
        assert!(ring.size() <= ring.capacity());
    }

    for mut child in writers {
        let status = child.wait().expect("wait for writer");
        assert!(status.success(), "writer failed with {status}");
    }

    assert_eq!(next_seq, vec![MESSAGES_PER_WRITER; WRITERS as usize]);
    assert_eq!(ring.producer_position(), ring.consumer_position());
    assert_eq!(ring.next_correlation_id(), expected as i64);
    assert_eq!(ring.consumer_heartbeat_time(), 1);
    log!("[READER] received {received} messages in order");
}
