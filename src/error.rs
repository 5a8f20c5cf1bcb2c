//! Error types for channels, producers and consumers.
//!
//! Every error is cheap to clone: a failure raised by a generation procedure is
//! stored on its channel and replayed to each receiver that asks for the next
//! element, so the cause has to be shareable.

use std::sync::Arc;
use thiserror::Error;

/// The main error type for the channel system.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Send attempted on a channel that was closed normally
    #[error("channel was closed")]
    ChannelClosed,

    /// The producer was torn down by a cancellation request
    #[error("producer was cancelled")]
    Cancelled,

    /// A generation procedure failed
    #[error("producer error: {0}")]
    Producer(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A consumption block failed
    #[error("consumer error: {0}")]
    Consumer(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A generation procedure panicked
    #[error("producer panicked: {0}")]
    Panicked(String),

    /// An operation timed out
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Non-suspending receive found nothing buffered on an open channel
    #[error("channel is empty")]
    Empty,

    /// A terminal operator found no element to return
    #[error("no such element: {0}")]
    NoSuchElement(&'static str),

    /// `element_at` ran past the end of the stream
    #[error("index {index} out of bounds for channel of {len} elements")]
    IndexOutOfBounds { index: usize, len: usize },

    /// `single` saw more than one element
    #[error("channel has more than one element")]
    MultipleElements,

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Create a producer error from any error type
    pub fn producer<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Producer(Arc::new(error))
    }

    /// Create a consumer error from any error type
    pub fn consumer<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Consumer(Arc::new(error))
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Error::Timeout { duration_ms }
    }

    /// Create a timeout error from a duration, saturating at `u64::MAX` ms
    pub fn timeout_after(duration: std::time::Duration) -> Self {
        Error::timeout(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// True for cooperative shutdown, as opposed to a genuine failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True when a send failed because the channel was closed normally.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ChannelClosed)
    }

    /// Short stable label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::ChannelClosed => "channel_closed",
            Error::Cancelled => "cancelled",
            Error::Producer(_) => "producer",
            Error::Consumer(_) => "consumer",
            Error::Panicked(_) => "panicked",
            Error::Timeout { .. } => "timeout",
            Error::Empty => "empty",
            Error::NoSuchElement(_) => "no_such_element",
            Error::IndexOutOfBounds { .. } => "index_out_of_bounds",
            Error::MultipleElements => "multiple_elements",
            Error::Custom(_) => "custom",
        }
    }
}

// Common conversions
impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Error::Producer(Arc::from(e))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for converting foreign errors into our Error type
pub trait IntoError<T> {
    fn into_producer_error(self) -> Result<T>;
    fn into_consumer_error(self) -> Result<T>;
}

impl<T, E> IntoError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_producer_error(self) -> Result<T> {
        self.map_err(Error::producer)
    }

    fn into_consumer_error(self) -> Result<T> {
        self.map_err(Error::consumer)
    }
}
