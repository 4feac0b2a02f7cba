use std::io;

/// Type-erased failure raised by a fragment handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum LogBufferError {
    #[error("term length {0} must be a power of two between 64 KiB and 1 GiB")]
    InvalidTermLength(usize),

    #[error("log buffer length mismatch: expected {expected} bytes, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("message of {length} bytes exceeds max payload of {max}")]
    MessageTooLarge { length: usize, max: usize },

    #[error("failed to map log buffer")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image is closed")]
    Closed,

    #[error("invalid position {position}: {reason}")]
    InvalidPosition { position: i64, reason: &'static str },

    #[error("failed to release log buffers")]
    Io(#[from] io::Error),
}
