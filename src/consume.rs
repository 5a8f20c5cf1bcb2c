//! Scoped consumption.
//!
//! A [`ConsumeGuard`] owns the receiving end of a produced channel for the
//! duration of a consumption scope. Leaving the scope by any path (normal
//! return, `?`, panic, or the enclosing future being dropped) runs the cleanup
//! exactly once: unless the stream was read to its end, the buffered elements
//! are discarded and the producer is cancelled.

use std::future::Future;
use std::ops::Deref;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::producer::ReceiveChannel;
use crate::tracing_support::debug;

/// Scope-bound owner of a [`ReceiveChannel`].
pub struct ConsumeGuard<T> {
    receiver: ReceiveChannel<T>,
    drained: bool,
    done: bool,
}

impl<T> ConsumeGuard<T> {
    fn new(receiver: ReceiveChannel<T>) -> Self {
        Self {
            receiver,
            drained: false,
            done: false,
        }
    }

    /// Receive the next element; `Ok(None)` at end-of-stream.
    ///
    /// Observing end-of-stream or an error marks the guard drained.
    pub async fn receive(&mut self) -> Result<Option<T>> {
        let result = self.receiver.receive().await;
        if !matches!(result, Ok(Some(_))) {
            self.drained = true;
        }
        result
    }

    /// True once the stream was read to its end
    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// Run the cleanup now instead of at scope exit.
    pub fn finish(mut self) {
        self.cleanup();
    }

    fn cleanup(&mut self) {
        if std::mem::replace(&mut self.done, true) {
            return;
        }
        if self.drained {
            return;
        }
        debug!(
            producer = self.receiver.handle().name(),
            "consumption ended early, cancelling producer"
        );
        self.receiver.cancel();
    }
}

impl<T> Deref for ConsumeGuard<T> {
    type Target = ReceiveChannel<T>;

    fn deref(&self) -> &Self::Target {
        &self.receiver
    }
}

impl<T> Drop for ConsumeGuard<T> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl<T> ReceiveChannel<T> {
    /// Open a consumption scope over this channel.
    pub fn guard(self) -> ConsumeGuard<T> {
        ConsumeGuard::new(self)
    }

    /// Run `block` against the channel, then clean up.
    ///
    /// The block's result is returned after the cleanup ran, whether it is a
    /// value or an error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chanweld::prelude::*;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<()> {
    ///     let numbers = chanweld::sources::range(0..1_000_000);
    ///     let first_two = numbers
    ///         .consume(|rx| {
    ///             Box::pin(async move {
    ///                 let a = rx.receive().await?.unwrap_or_default();
    ///                 let b = rx.receive().await?.unwrap_or_default();
    ///                 Ok(a + b)
    ///             })
    ///         })
    ///         .await?;
    ///     assert_eq!(first_two, 1);
    ///     Ok(())
    /// }
    /// ```
    pub async fn consume<R, F>(self, block: F) -> Result<R>
    where
        F: for<'a> FnOnce(&'a mut ConsumeGuard<T>) -> BoxFuture<'a, Result<R>>,
    {
        let mut guard = self.guard();
        let result = block(&mut guard).await;
        guard.finish();
        result
    }

    /// Await `action` for every element until end-of-stream.
    ///
    /// An error from `action` or from upstream is returned after the cleanup.
    pub async fn consume_each<F, Fut>(self, mut action: F) -> Result<()>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut guard = self.guard();
        while let Some(item) = guard.receive().await? {
            action(item).await?;
        }
        Ok(())
    }
}
