//! # Cancellable producer/consumer channels for Rust
//!
//! This crate provides lazily generated, backpressured sequences built from
//! three pieces: a closable channel, producer tasks that write into it, and
//! scoped consumption that tears the producer down as soon as the consumer
//! stops caring.
//!
//! ## Core Concepts
//!
//! - **Channel**: A FIFO conduit with rendezvous, bounded or unbounded buffering
//! - **Producer**: A task running a generation procedure that sends into a channel
//! - **Consume**: A scope that cancels the producer on every exit path
//! - **Stage**: An operator (map, filter, take, ...) that is itself a producer
//!   consuming its upstream
//!
//! ## Example
//!
//! ```rust
//! use chanweld::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let naturals = iterate(1u64, |n| n + 1);
//!
//!     let squares = naturals
//!         .filter(|n| n % 2 == 1)
//!         .map(|n| n * n)
//!         .take(3)
//!         .to_vec()
//!         .await?;
//!
//!     assert_eq!(squares, vec![1, 9, 25]);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod consume;
pub mod error;
pub mod processors;
pub mod producer;
pub mod sinks;
pub mod sources;
pub mod stage;
pub mod traits;

mod tracing_support;

// Re-export commonly used items
pub mod prelude {
    pub use crate::channel::{Capacity, Channel, TrySendError};
    pub use crate::consume::ConsumeGuard;
    pub use crate::error::{Error, IntoError, Result};
    pub use crate::processors::*;
    pub use crate::producer::{
        produce, produce_with, ProduceConfig, ProducerHandle, ProducerScope, ProducerState,
        ReceiveChannel,
    };
    pub use crate::sources::{from_fn, from_iter, from_stream, iterate, range, repeat, repeat_n};
    pub use crate::traits::{Processor, ProducerExt, Step};
}

// Re-export main error type
pub use error::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
