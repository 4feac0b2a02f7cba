//! Many-to-one ring buffer for passing typed messages from any number of
//! producers, possibly in other processes, to a single consumer.

pub mod descriptor;
mod error;
mod many_to_one;

pub use descriptor::{HEADER_LENGTH, PADDING_MSG_TYPE_ID, TRAILER_LENGTH};
pub use error::{HandlerError, RingBufferError};
pub use many_to_one::{ErrorHandler, ManyToOneRingBuffer};
