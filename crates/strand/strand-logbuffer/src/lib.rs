//! Client-side reading of mapped log buffers.
//!
//! A log buffer is three equally sized term partitions plus a metadata
//! section, written by a driver or by publishers in other processes. The
//! [`Image`] consumes one stream from it, delivering each published fragment
//! to a handler and moving a shared subscriber [`Position`] forward.

mod counter;
pub mod descriptor;
mod error;
mod header;
mod image;
mod log_buffers;
mod meta;
pub mod position;
mod term_appender;
pub mod term_reader;

pub use counter::{COUNTER_LENGTH, Position};
pub use error::{HandlerError, ImageError, LogBufferError};
pub use header::{Header, HeaderContext};
pub use image::{ControlledPollAction, ErrorHandler, Image};
pub use log_buffers::LogBuffers;
pub use meta::{LogBufferParams, LogMetadata, pack_tail};
pub use term_appender::{AppendOutcome, TermAppender};
