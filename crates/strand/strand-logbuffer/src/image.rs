//! Subscriber view of one publisher's stream inside a mapped log buffer.
//!
//! An [`Image`] reads frames from the partition selected by its subscriber
//! position and moves that position forward as fragments are consumed. The
//! position counter is shared with the driver, which uses it for flow control,
//! so every advance is published with a release store.
//!
//! # Lifecycle
//!
//! ```text
//!   Open ──close()──► Closed
//!                       │
//!                       └── close() again: no-op
//! ```
//!
//! Once closed the log buffers are unmapped and every poll returns
//! [`ImageError::Closed`] without touching partition memory.

use crate::counter::Position;
use crate::descriptor::*;
use crate::error::{HandlerError, ImageError};
use crate::header::{Header, HeaderContext};
use crate::log_buffers::LogBuffers;
use crate::position::{index_by_position, position_bits_to_shift, term_offset};
use crate::term_reader;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error};

/// What a controlled fragment handler wants the poll loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlledPollAction {
    /// Stop and leave the current fragment unconsumed so it is delivered again.
    Abort,
    /// Stop after consuming the current fragment.
    Break,
    /// Publish the position up to and including this fragment, then continue.
    Commit,
    /// Continue; the position is published when the poll returns.
    Continue,
}

/// Receives failures raised by fragment handlers.
pub type ErrorHandler = Box<dyn FnMut(HandlerError) + Send>;

fn default_error_handler() -> ErrorHandler {
    Box::new(|err| error!(error = %err, "fragment handler failed"))
}

pub struct Image {
    /// Owns the mapping every term and metadata view points into. Taken on
    /// close, which unmaps it.
    log_buffers: Option<LogBuffers>,
    /// Counter shared with the driver for flow control.
    subscriber_position: Position,
    /// Stamped onto every [`Header`] handed to fragment handlers.
    context: HeaderContext,
    /// `term_length - 1`; masks a position down to its term offset.
    term_length_mask: i64,
    term_length: usize,
    session_id: i32,
    correlation_id: i64,
    subscription_registration_id: i64,
    source_identity: String,
    /// Set once by the first [`close`](Self::close).
    closed: AtomicBool,
    /// End-of-stream answer captured at close, after the metadata is gone.
    end_of_stream_at_close: bool,
    error_handler: ErrorHandler,
}

impl Image {
    pub fn new(
        session_id: i32,
        correlation_id: i64,
        subscription_registration_id: i64,
        source_identity: impl Into<String>,
        subscriber_position: Position,
        log_buffers: LogBuffers,
    ) -> Self {
        let term_length = log_buffers.term_length();
        let context = HeaderContext {
            initial_term_id: log_buffers.meta().initial_term_id(),
            position_bits_to_shift: position_bits_to_shift(term_length),
        };

        Self {
            log_buffers: Some(log_buffers),
            subscriber_position,
            context,
            term_length_mask: term_length as i64 - 1,
            term_length,
            session_id,
            correlation_id,
            subscription_registration_id,
            source_identity: source_identity.into(),
            closed: AtomicBool::new(false),
            end_of_stream_at_close: false,
            error_handler: default_error_handler(),
        }
    }

    /// Replace the handler that receives fragment handler failures.
    pub fn with_error_handler(
        mut self,
        handler: impl FnMut(HandlerError) + Send + 'static,
    ) -> Self {
        self.error_handler = Box::new(handler);
        self
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    pub fn subscription_registration_id(&self) -> i64 {
        self.subscription_registration_id
    }

    pub fn source_identity(&self) -> &str {
        &self.source_identity
    }

    pub fn initial_term_id(&self) -> i32 {
        self.context.initial_term_id
    }

    pub fn term_buffer_length(&self) -> usize {
        self.term_length
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current subscriber position.
    pub fn position(&self) -> i64 {
        self.subscriber_position.get()
    }

    /// `None` once the image is closed and the mapping released.
    pub fn log_buffers(&self) -> Option<&LogBuffers> {
        self.log_buffers.as_ref()
    }

    /// Whether the subscriber has consumed everything up to the publisher's
    /// end-of-stream marker.
    pub fn is_end_of_stream(&self) -> bool {
        match &self.log_buffers {
            Some(log) => self.subscriber_position.get() >= log.meta().end_of_stream_position(),
            None => self.end_of_stream_at_close,
        }
    }

    /// Move the subscriber position forward within the current term window.
    ///
    /// The new position must not go backwards, must not pass the end of the
    /// current term, and must be frame aligned.
    pub fn set_position(&mut self, new_position: i64) -> Result<(), ImageError> {
        if self.is_closed() {
            return Err(ImageError::Closed);
        }

        let current = self.subscriber_position.get();
        let limit = (current - (current & self.term_length_mask)) + self.term_length_mask + 1;
        if new_position < current || new_position > limit {
            return Err(ImageError::InvalidPosition {
                position: new_position,
                reason: "outside the current term window",
            });
        }
        if new_position & (FRAME_ALIGNMENT as i64 - 1) != 0 {
            return Err(ImageError::InvalidPosition {
                position: new_position,
                reason: "not frame aligned",
            });
        }

        self.subscriber_position.set_ordered(new_position);
        Ok(())
    }

    /// Deliver up to `fragment_limit` fragments to `handler`.
    ///
    /// Returns the number of fragments delivered. A handler failure is sent to
    /// the error handler, ends this poll, and counts its fragment as consumed.
    pub fn poll<F>(&mut self, mut handler: F, fragment_limit: usize) -> Result<usize, ImageError>
    where
        F: FnMut(&[u8], &Header<'_>) -> Result<(), HandlerError>,
    {
        let position = self.subscriber_position.get();
        self.read_bounded(&mut handler, position, i64::MAX, fragment_limit)
    }

    /// Like [`poll`](Self::poll) but never consumes past `limit_position`.
    pub fn bounded_poll<F>(
        &mut self,
        mut handler: F,
        limit_position: i64,
        fragment_limit: usize,
    ) -> Result<usize, ImageError>
    where
        F: FnMut(&[u8], &Header<'_>) -> Result<(), HandlerError>,
    {
        let position = self.subscriber_position.get();
        self.read_bounded(&mut handler, position, limit_position, fragment_limit)
    }

    fn read_bounded<F>(
        &mut self,
        handler: &mut F,
        position: i64,
        limit_position: i64,
        fragment_limit: usize,
    ) -> Result<usize, ImageError>
    where
        F: FnMut(&[u8], &Header<'_>) -> Result<(), HandlerError>,
    {
        if self.is_closed() {
            return Err(ImageError::Closed);
        }
        let Some(log) = &self.log_buffers else {
            return Err(ImageError::Closed);
        };

        let initial_offset = term_offset(position, self.term_length_mask);
        let index = index_by_position(position, self.context.position_bits_to_shift);
        let term = log.term_buffer(index);

        let window = limit_position.saturating_sub(position).max(0);
        let limit_offset = (initial_offset as i64)
            .saturating_add(window)
            .min(term.capacity() as i64) as usize;

        let outcome = term_reader::read(
            term,
            initial_offset,
            limit_offset,
            fragment_limit,
            self.context,
            handler,
        );

        let new_position = position + (outcome.offset - initial_offset) as i64;
        if new_position > position {
            self.subscriber_position.set_ordered(new_position);
        }
        if let Some(err) = outcome.error {
            (self.error_handler)(err);
        }

        Ok(outcome.fragments_read)
    }

    /// Deliver fragments to a handler that steers the loop with a
    /// [`ControlledPollAction`].
    pub fn controlled_poll<F>(
        &mut self,
        mut handler: F,
        fragment_limit: usize,
    ) -> Result<usize, ImageError>
    where
        F: FnMut(&[u8], &Header<'_>) -> Result<ControlledPollAction, HandlerError>,
    {
        if self.is_closed() {
            return Err(ImageError::Closed);
        }
        let Some(log) = &self.log_buffers else {
            return Err(ImageError::Closed);
        };

        let mut position = self.subscriber_position.get();
        let mut initial_offset = term_offset(position, self.term_length_mask);
        let mut offset = initial_offset;
        let index = index_by_position(position, self.context.position_bits_to_shift);
        let term = log.term_buffer(index);
        let capacity = term.capacity();

        let mut fragments_read = 0;
        let mut failure = None;

        while fragments_read < fragment_limit {
            let Some(frame) = term_reader::next_frame(term, offset, capacity) else {
                break;
            };
            offset = frame.end();
            if frame.is_padding {
                break;
            }

            fragments_read += 1;
            let header = Header::new(term, frame.offset, self.context);
            match handler(frame.payload(term), &header) {
                Ok(ControlledPollAction::Abort) => {
                    fragments_read -= 1;
                    offset = frame.offset;
                    break;
                }
                Ok(ControlledPollAction::Break) => break,
                Ok(ControlledPollAction::Commit) => {
                    position += (offset - initial_offset) as i64;
                    initial_offset = offset;
                    self.subscriber_position.set_ordered(position);
                }
                Ok(ControlledPollAction::Continue) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let resulting_position = position + (offset - initial_offset) as i64;
        if resulting_position > position {
            self.subscriber_position.set_ordered(resulting_position);
        }
        if let Some(err) = failure {
            (self.error_handler)(err);
        }

        Ok(fragments_read)
    }

    /// Close the image and release its log buffers. Only the first call
    /// unmaps; later calls return `Ok(())` without side effects.
    pub fn close(&mut self) -> Result<(), ImageError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        debug!(
            session_id = self.session_id,
            correlation_id = self.correlation_id,
            source = %self.source_identity,
            position = self.subscriber_position.get(),
            "closing image"
        );

        if let Some(log) = self.log_buffers.take() {
            self.end_of_stream_at_close =
                self.subscriber_position.get() >= log.meta().end_of_stream_position();
            log.close()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("session_id", &self.session_id)
            .field("correlation_id", &self.correlation_id)
            .field("source_identity", &self.source_identity)
            .field("position", &self.subscriber_position.get())
            .field("closed", &self.is_closed())
            .finish()
    }
}
