//! Drives the ring buffer and log buffer end to end under one directory.
//!
//! Writer threads send commands through `<dir>/cnc.ring`. The main thread
//! drains them, appends each payload to `<dir>/stream.log` and reads it back
//! through an [`Image`] mapped separately, checking per-writer order.

use anyhow::{Context, Result, ensure};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use strand_atomic::AtomicBuffer;
use strand_config::ProbeConfig;
use strand_logbuffer::{
    AppendOutcome, COUNTER_LENGTH, Image, LogBufferParams, LogBuffers, Position, TermAppender,
    position::fast_mod3,
};
use strand_mmap::MmapRegion;
use strand_ringbuffer::{ManyToOneRingBuffer, TRAILER_LENGTH};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const COMMAND_MSG_TYPE_ID: i32 = 1;
const SESSION_ID: i32 = 0x5354;
const STREAM_ID: i32 = 1001;
const PAYLOAD_LENGTH: usize = 12;

fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => ProbeConfig::load(path)?,
        None => ProbeConfig::default(),
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(?config, "starting strand-probe");
    run(&config)
}

fn run(config: &ProbeConfig) -> Result<()> {
    let dir = Path::new(&config.dir);
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let ring_path = dir.join("cnc.ring");
    let mut ring_region =
        MmapRegion::create_rw(&ring_path, (config.ring_capacity + TRAILER_LENGTH) as u64)
            .with_context(|| format!("mapping {}", ring_path.display()))?;
    let mut ring = ManyToOneRingBuffer::new(unsafe {
        AtomicBuffer::wrap(ring_region.as_mut_ptr(), ring_region.len())
    })?
    .with_error_handler(|err| warn!(error = %err, "command rejected"));
    let producers = (0..config.writers)
        .map(|_| {
            let buffer = ring.buffer();
            ManyToOneRingBuffer::new(unsafe { buffer.view(0, buffer.capacity()) })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let log_path = dir.join("stream.log");
    let params = LogBufferParams {
        term_length: config.term_length,
        correlation_id: ring.next_correlation_id(),
        ..Default::default()
    };
    let driver = LogBuffers::create(&log_path, &params)?;

    let mut counters = MmapRegion::anonymous(COUNTER_LENGTH)?;
    let subscriber_position = Position::new(
        unsafe { AtomicBuffer::wrap(counters.as_mut_ptr(), counters.len()) },
        0,
    );
    let mut image = Image::new(
        SESSION_ID,
        params.correlation_id,
        ring.next_correlation_id(),
        log_path.display().to_string(),
        subscriber_position,
        LogBuffers::open(&log_path)?,
    );

    let expected = config.writers as u64 * config.messages_per_writer;
    info!(
        writers = config.writers,
        messages = expected,
        ring_capacity = ring.capacity(),
        term_length = config.term_length,
        "mapped {} and {}",
        ring_path.display(),
        log_path.display()
    );

    let running = AtomicBool::new(true);
    let start = Instant::now();
    let (commands, fragments, out_of_order) = thread::scope(|scope| {
        for (writer_id, ring) in (0..config.writers as u32).zip(producers) {
            let running = &running;
            let count = config.messages_per_writer;
            scope.spawn(move || write_commands(&ring, running, writer_id, count));
        }
        let drained = drain(config, &mut ring, &driver, &mut image, expected);
        running.store(false, Ordering::Release);
        drained
    })?;
    let elapsed = start.elapsed();

    let rate = |n: u64| n as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    info!(
        commands,
        fragments,
        elapsed_ms = elapsed.as_millis() as u64,
        commands_per_sec = rate(commands) as u64,
        fragments_per_sec = rate(fragments) as u64,
        producer_position = ring.producer_position(),
        log_position = image.position(),
        "probe complete"
    );
    ensure!(
        out_of_order == 0,
        "{out_of_order} fragments arrived out of order"
    );
    ensure!(
        fragments == expected,
        "expected {expected} fragments, image delivered {fragments}"
    );

    image.close()?;
    driver.close()?;
    ring_region.flush()?;
    Ok(())
}

fn write_commands(
    ring: &ManyToOneRingBuffer,
    running: &AtomicBool,
    writer_id: u32,
    count: u64,
) {
    let mut full = 0u64;
    for seq in 0..count {
        let mut payload = [0u8; PAYLOAD_LENGTH];
        payload[..4].copy_from_slice(&writer_id.to_le_bytes());
        payload[4..].copy_from_slice(&seq.to_le_bytes());
        loop {
            match ring.write(COMMAND_MSG_TYPE_ID, &payload) {
                Ok(true) => break,
                Ok(false) if running.load(Ordering::Acquire) => {
                    full += 1;
                    thread::yield_now();
                }
                Ok(false) => return,
                Err(err) => {
                    warn!(writer_id, error = %err, "write failed");
                    return;
                }
            }
        }
    }
    debug!(writer_id, count, full, "writer finished");
}

/// Move commands from the ring into the log and read them back through the
/// image. Returns (commands drained, fragments delivered, ordering faults).
fn drain(
    config: &ProbeConfig,
    ring: &mut ManyToOneRingBuffer,
    driver: &LogBuffers,
    image: &mut Image,
    expected: u64,
) -> Result<(u64, u64, u64)> {
    let mut next_seq = vec![0u64; config.writers];
    let mut commands = 0u64;
    let mut fragments = 0u64;
    let mut out_of_order = 0u64;
    let mut last_progress = Instant::now();

    while fragments < expected {
        ring.set_consumer_heartbeat_time(epoch_millis());

        let mut append_error = None;
        let read = ring.read(
            |_, payload| match append(driver, payload) {
                Ok(_) => Ok(()),
                Err(err) => {
                    append_error = Some(err.to_string());
                    Err(err.into())
                }
            },
            config.message_count_limit,
        );
        if let Some(err) = append_error {
            anyhow::bail!("appending to log: {err}");
        }
        commands += read as u64;

        let producer_position = driver.meta().producer_position();
        while image.position() < producer_position {
            fragments += image.poll(
                |payload, _| {
                    let writer = u32::from_le_bytes(payload[..4].try_into()?) as usize;
                    let seq = u64::from_le_bytes(payload[4..].try_into()?);
                    if next_seq.get(writer) != Some(&seq) {
                        out_of_order += 1;
                    }
                    if let Some(next) = next_seq.get_mut(writer) {
                        *next = seq + 1;
                    }
                    Ok(())
                },
                config.fragment_limit,
            )? as u64;
        }

        if read > 0 {
            last_progress = Instant::now();
        } else {
            ensure!(
                last_progress.elapsed() < Duration::from_secs(10),
                "no commands for 10s after {commands} of {expected}"
            );
            thread::yield_now();
        }
    }
    Ok((commands, fragments, out_of_order))
}

/// Append one unfragmented frame, rotating to the next term when the active
/// one trips.
fn append(log: &LogBuffers, payload: &[u8]) -> Result<i64, strand_logbuffer::LogBufferError> {
    let meta = log.meta();
    loop {
        let term_count = meta.active_term_count();
        let partition = fast_mod3(term_count as u32 as u64);
        let appender = TermAppender::new(log.term_buffer(partition), meta, partition);
        match appender.append_unfragmented(SESSION_ID, STREAM_ID, payload)? {
            AppendOutcome::Appended { position } => return Ok(position),
            AppendOutcome::Tripped { term_id } => {
                // the reader is at most one term behind, so the next
                // partition is fully consumed and can be cleaned for reuse
                let next = fast_mod3(term_count.wrapping_add(1) as u32 as u64);
                log.term_buffer(next).set_memory(0, log.term_length(), 0);
                meta.rotate_log(term_count, term_id);
                debug!(
                    term_id = term_id.wrapping_add(1),
                    partition = next,
                    "rotated term"
                );
            }
        }
    }
}

fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
