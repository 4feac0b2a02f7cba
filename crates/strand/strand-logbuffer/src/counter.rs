use strand_atomic::AtomicBuffer;

/// Bytes reserved per counter slot, two cache lines so neighbouring counters
/// never share a line.
pub const COUNTER_LENGTH: usize = 128;

/// A position counter living in a counters values buffer shared with the
/// driver. The slot is allocated by whoever owns the counters; a `Position`
/// only reads and updates its value.
pub struct Position {
    values: AtomicBuffer,
    offset: usize,
    counter_id: usize,
}

impl Position {
    pub fn new(values: AtomicBuffer, counter_id: usize) -> Self {
        let offset = counter_id * COUNTER_LENGTH;
        assert!(
            offset + COUNTER_LENGTH <= values.capacity(),
            "counter {counter_id} outside values buffer of {} bytes",
            values.capacity()
        );
        Self {
            values,
            offset,
            counter_id,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.counter_id
    }

    /// Plain read, for the single owner of the counter.
    #[inline]
    pub fn get(&self) -> i64 {
        self.values.get_i64(self.offset)
    }

    #[inline]
    pub fn get_volatile(&self) -> i64 {
        self.values.get_i64_volatile(self.offset)
    }

    #[inline]
    pub fn set(&self, value: i64) {
        self.values.put_i64(self.offset, value)
    }

    /// Release store, making `value` visible to other processes.
    #[inline]
    pub fn set_ordered(&self, value: i64) {
        self.values.put_i64_ordered(self.offset, value)
    }
}

impl std::fmt::Debug for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Position")
            .field("counter_id", &self.counter_id)
            .field("value", &self.get_volatile())
            .finish()
    }
}
