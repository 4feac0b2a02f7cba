/// Type-erased failure raised by a message handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RingBufferError {
    #[error("capacity {0} must be a positive power of two")]
    CapacityNotPowerOfTwo(usize),

    #[error("buffer of {0} bytes cannot hold the ring buffer trailer")]
    BufferTooSmall(usize),

    #[error("message type id {0} is reserved, ids must be >= 1")]
    InvalidMessageTypeId(i32),

    #[error("message of {length} bytes exceeds max length of {max}")]
    MessageTooLarge { length: usize, max: usize },
}
