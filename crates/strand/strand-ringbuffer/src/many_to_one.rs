use crate::descriptor::*;
use crate::error::{HandlerError, RingBufferError};
use strand_atomic::AtomicBuffer;
use tracing::{debug, error};

/// Receives failures raised by message handlers during [`read`](ManyToOneRingBuffer::read).
pub type ErrorHandler = Box<dyn Fn(HandlerError) + Send + Sync>;

fn default_error_handler() -> ErrorHandler {
    Box::new(|err| {
        error!(error = %err, "ring buffer message handler failed")
    })
}

/// A ring buffer for many concurrent producers and a single consumer,
/// laid over a shared [`AtomicBuffer`].
///
/// Producers claim space by advancing the tail with a CAS, copy the payload,
/// then publish the record with one release store of its 64-bit header. The
/// consumer reads published records from the head, zeroes the space it has
/// consumed and then releases it by advancing the head.
///
/// Producers may live in other processes mapping the same memory; the ring
/// keeps no state outside the buffer. Producers in the same process attach
/// their own instance over the same memory, which leaves the consuming
/// instance free to be borrowed mutably by [`read`](Self::read).
pub struct ManyToOneRingBuffer {
    /// Records followed by the trailer. The mapping that backs it must
    /// outlive this value.
    buffer: AtomicBuffer,
    /// Bytes available for records. Power of two, so `position & (capacity - 1)`
    /// is the index.
    capacity: usize,
    /// An eighth of the capacity.
    max_msg_length: usize,
    /// Trailer slots, as absolute byte indices into `buffer`.
    tail_position_index: usize,
    head_cache_position_index: usize,
    head_position_index: usize,
    correlation_counter_index: usize,
    consumer_heartbeat_index: usize,
    /// Called with handler failures from [`read`](Self::read).
    error_handler: ErrorHandler,
}

struct BlockOutcome {
    messages_read: usize,
    reached_end: bool,
    error: Option<HandlerError>,
}

impl ManyToOneRingBuffer {
    /// Attach to `buffer`. The bytes before the trailer must be a power of two.
    pub fn new(buffer: AtomicBuffer) -> Result<Self, RingBufferError> {
        let capacity = buffer
            .capacity()
            .checked_sub(TRAILER_LENGTH)
            .ok_or(RingBufferError::BufferTooSmall(buffer.capacity()))?;
        if !capacity.is_power_of_two() {
            return Err(RingBufferError::CapacityNotPowerOfTwo(capacity));
        }

        let ring = Self {
            buffer,
            capacity,
            max_msg_length: capacity / 8,
            tail_position_index: capacity + TAIL_POSITION_OFFSET,
            head_cache_position_index: capacity + HEAD_CACHE_POSITION_OFFSET,
            head_position_index: capacity + HEAD_POSITION_OFFSET,
            correlation_counter_index: capacity + CORRELATION_COUNTER_OFFSET,
            consumer_heartbeat_index: capacity + CONSUMER_HEARTBEAT_OFFSET,
            error_handler: default_error_handler(),
        };
        debug!(
            capacity,
            max_msg_length = ring.max_msg_length,
            "ring buffer attached"
        );
        Ok(ring)
    }

    pub fn with_error_handler(
        mut self,
        handler: impl Fn(HandlerError) + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Box::new(handler);
        self
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest payload [`write`](Self::write) accepts.
    #[inline]
    pub fn max_msg_length(&self) -> usize {
        self.max_msg_length
    }

    #[inline]
    pub fn buffer(&self) -> &AtomicBuffer {
        &self.buffer
    }

    /// Append a record of type `msg_type_id` holding `src`.
    ///
    /// Returns `Ok(false)` if the ring has no room for it right now; the
    /// caller may retry once the consumer has caught up. Nothing is written
    /// on any failure.
    pub fn write(&self, msg_type_id: i32, src: &[u8]) -> Result<bool, RingBufferError> {
        check_msg_type_id(msg_type_id)?;
        self.check_msg_length(src.len())?;

        let record_length = src.len() + HEADER_LENGTH;
        let required_capacity = align(record_length, ALIGNMENT);
        let Some(record_index) = self.claim_capacity(required_capacity) else {
            return Ok(false);
        };

        self.buffer.put_slice(encoded_msg_offset(record_index), src);
        self.buffer.put_i64_ordered(
            length_offset(record_index),
            make_header(record_length as i32, msg_type_id),
        );
        Ok(true)
    }

    /// Deliver up to `message_count_limit` records to `handler`, in the order
    /// they were claimed. Returns the number of messages delivered.
    ///
    /// A handler failure is passed to the error handler; the record counts as
    /// consumed and reading stops there.
    ///
    /// Only one instance may read from a given ring at a time. Reading takes
    /// `&mut self` so a single instance cannot be drained from two threads;
    /// instances attached elsewhere must never call it.
    pub fn read<F>(&mut self, mut handler: F, message_count_limit: usize) -> usize
    where
        F: FnMut(i32, &[u8]) -> Result<(), HandlerError>,
    {
        let mut messages_read = 0;
        while messages_read < message_count_limit {
            let block = self.read_block(&mut handler, message_count_limit - messages_read);
            messages_read += block.messages_read;
            if let Some(err) = block.error {
                (self.error_handler)(err);
                break;
            }
            if !block.reached_end {
                break;
            }
        }
        messages_read
    }

    /// Read the records between the head and the end of the buffer.
    fn read_block<F>(&self, handler: &mut F, message_count_limit: usize) -> BlockOutcome
    where
        F: FnMut(i32, &[u8]) -> Result<(), HandlerError>,
    {
        let head = self.buffer.get_i64(self.head_position_index);
        let head_index = (head & (self.capacity as i64 - 1)) as usize;
        let contiguous_block_length = self.capacity - head_index;

        let mut messages_read = 0;
        let mut bytes_read = 0;
        let mut error = None;

        while bytes_read < contiguous_block_length && messages_read < message_count_limit {
            let record_index = head_index + bytes_read;
            let header = self.buffer.get_i64_volatile(length_offset(record_index));
            let record_length = record_length(header);
            if record_length <= 0 {
                break;
            }
            bytes_read += align(record_length as usize, ALIGNMENT);

            let msg_type_id = message_type_id(header);
            if msg_type_id == PADDING_MSG_TYPE_ID {
                continue;
            }

            messages_read += 1;
            let payload = self.buffer.as_slice(
                encoded_msg_offset(record_index),
                record_length as usize - HEADER_LENGTH,
            );
            if let Err(err) = handler(msg_type_id, payload) {
                error = Some(err);
                break;
            }
        }

        if bytes_read > 0 {
            self.buffer.set_memory(head_index, bytes_read, 0);
            self.buffer
                .put_i64_ordered(self.head_position_index, head + bytes_read as i64);
        }

        BlockOutcome {
            messages_read,
            reached_end: head_index + bytes_read == self.capacity,
            error,
        }
    }

    /// Reserve `required_capacity` bytes at the tail, wrapping with a padding
    /// record when they do not fit before the end of the buffer. Returns the
    /// index of the reserved record, or `None` if the ring is too full.
    fn claim_capacity(&self, required_capacity: usize) -> Option<usize> {
        let capacity = self.capacity as i64;
        let mask = capacity - 1;
        let required = required_capacity as i64;

        let mut head = self.buffer.get_i64_volatile(self.head_cache_position_index);

        let (tail_index, padding) = loop {
            let tail = self.buffer.get_i64_volatile(self.tail_position_index);

            if required > capacity - (tail - head) {
                head = self.buffer.get_i64_volatile(self.head_position_index);
                if required > capacity - (tail - head) {
                    return None;
                }
                self.buffer
                    .put_i64_ordered(self.head_cache_position_index, head);
            }

            let tail_index = tail & mask;
            let to_buffer_end = capacity - tail_index;
            let mut padding = 0;

            if required > to_buffer_end {
                // the record restarts at index 0 and must not run into the head
                let mut head_index = head & mask;
                if required > head_index {
                    head = self.buffer.get_i64_volatile(self.head_position_index);
                    head_index = head & mask;
                    if required > head_index {
                        return None;
                    }
                    self.buffer
                        .put_i64_ordered(self.head_cache_position_index, head);
                }
                padding = to_buffer_end;
            }

            if self
                .buffer
                .compare_and_set_i64(self.tail_position_index, tail, tail + required + padding)
            {
                break (tail_index as usize, padding);
            }
        };

        if padding != 0 {
            self.buffer.put_i64_ordered(
                length_offset(tail_index),
                make_header(padding as i32, PADDING_MSG_TYPE_ID),
            );
            return Some(0);
        }
        Some(tail_index)
    }

    fn check_msg_length(&self, length: usize) -> Result<(), RingBufferError> {
        if length > self.max_msg_length {
            return Err(RingBufferError::MessageTooLarge {
                length,
                max: self.max_msg_length,
            });
        }
        Ok(())
    }

    /// Next value of the shared correlation counter, unique across producers.
    pub fn next_correlation_id(&self) -> i64 {
        self.buffer
            .get_and_add_i64(self.correlation_counter_index, 1)
    }

    pub fn set_consumer_heartbeat_time(&self, time: i64) {
        self.buffer
            .put_i64_ordered(self.consumer_heartbeat_index, time)
    }

    pub fn consumer_heartbeat_time(&self) -> i64 {
        self.buffer.get_i64_volatile(self.consumer_heartbeat_index)
    }

    /// Total bytes claimed by producers.
    pub fn producer_position(&self) -> i64 {
        self.buffer.get_i64_volatile(self.tail_position_index)
    }

    /// Total bytes released by the consumer.
    pub fn consumer_position(&self) -> i64 {
        self.buffer.get_i64_volatile(self.head_position_index)
    }

    /// Bytes claimed but not yet consumed, from a consistent head/tail pair.
    pub fn size(&self) -> usize {
        let mut head_after = self.buffer.get_i64_volatile(self.head_position_index);
        loop {
            let head_before = head_after;
            let tail = self.buffer.get_i64_volatile(self.tail_position_index);
            head_after = self.buffer.get_i64_volatile(self.head_position_index);
            if head_after == head_before {
                return (tail - head_after) as usize;
            }
        }
    }
}

fn check_msg_type_id(msg_type_id: i32) -> Result<(), RingBufferError> {
    if msg_type_id < 1 {
        return Err(RingBufferError::InvalidMessageTypeId(msg_type_id));
    }
    Ok(())
}
