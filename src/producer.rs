//! Producer tasks.
//!
//! [`produce`] spawns a generation procedure on the tokio runtime and hands
//! back the receiving end of the channel it writes to. The task and its
//! channel share one lifecycle:
//!
//! ```text
//! Created -> Running -> { Completed | Cancelled | Failed(cause) } -> channel closed
//! ```
//!
//! The terminal state is published before the channel is closed, so a
//! consumer that has observed end-of-stream always sees a terminal state.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures_core::Stream;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::channel::{Capacity, Channel, TrySendError};
use crate::error::{Error, Result};
use crate::tracing_support::{self, debug, warn_event};

/// Lifecycle state of a producer task.
#[derive(Debug, Clone)]
pub enum ProducerState {
    /// Spawned but not yet polled
    Created,
    /// The generation procedure is executing
    Running,
    /// The generation procedure returned normally
    Completed,
    /// The task was torn down by a cancellation request
    Cancelled,
    /// The generation procedure failed or panicked
    Failed(Error),
}

impl ProducerState {
    /// True for `Completed`, `Cancelled` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProducerState::Created | ProducerState::Running)
    }

    /// Short stable label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProducerState::Created => "created",
            ProducerState::Running => "running",
            ProducerState::Completed => "completed",
            ProducerState::Cancelled => "cancelled",
            ProducerState::Failed(_) => "failed",
        }
    }
}

impl PartialEq for ProducerState {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ProducerState::Failed(a), ProducerState::Failed(b)) => a.to_string() == b.to_string(),
            _ => self.as_label() == other.as_label(),
        }
    }
}

/// Configuration for spawning a producer
#[derive(Clone, Default)]
pub struct ProduceConfig {
    /// Buffering policy of the produced channel
    pub capacity: Capacity,
    /// Name used in logs and panic messages
    pub name: Option<String>,
    /// Runtime to spawn on; the current runtime when unset
    pub runtime: Option<Handle>,
}

impl fmt::Debug for ProduceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProduceConfig")
            .field("capacity", &self.capacity)
            .field("name", &self.name)
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

impl ProduceConfig {
    /// Set the channel capacity
    pub fn capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the producer name
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Spawn on a specific runtime
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }
}

/// The send side handed to a generation procedure.
pub struct ProducerScope<T> {
    channel: Channel<T>,
}

impl<T> ProducerScope<T> {
    /// Send an element downstream, suspending under backpressure.
    ///
    /// Fails with [`Error::Cancelled`] once the consumer went away; returning
    /// that error with `?` is the expected way to unwind.
    pub async fn send(&self, item: T) -> Result<()> {
        self.channel.send(item).await
    }

    /// Send without suspending
    pub fn try_send(&self, item: T) -> std::result::Result<(), TrySendError<T>> {
        self.channel.try_send(item)
    }

    /// False once the task was cancelled or its channel closed.
    pub fn is_active(&self) -> bool {
        !self.channel.token().is_cancelled() && !self.channel.is_closed_for_send()
    }

    /// Resolves when the task is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.channel.token().cancelled()
    }

    /// The channel this scope writes to
    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }
}

/// Observes and controls a running producer task.
#[derive(Clone)]
pub struct ProducerHandle {
    state: watch::Receiver<ProducerState>,
    token: CancellationToken,
    name: Arc<str>,
}

impl fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("name", &self.name)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl ProducerHandle {
    /// Snapshot of the current state
    pub fn state(&self) -> ProducerState {
        self.state.borrow().clone()
    }

    /// Wait for the task to reach a terminal state.
    pub async fn wait(&self) -> ProducerState {
        let mut state = self.state.clone();
        let terminal = state
            .wait_for(ProducerState::is_terminal)
            .await
            .map(|terminal| terminal.clone());
        // The task publishes its terminal state before dropping the sender.
        terminal.unwrap_or_else(|_| state.borrow().clone())
    }

    /// Request cooperative cancellation of the task.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once a terminal state was reached
    pub fn is_finished(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Name given in [`ProduceConfig`], or `"producer"`
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The receiving end of a produced channel.
///
/// There is exactly one per producer, so a second concurrent reader cannot be
/// created. Dropping it before the stream ended cancels the producer.
pub struct ReceiveChannel<T> {
    channel: Channel<T>,
    handle: ProducerHandle,
}

impl<T> fmt::Debug for ReceiveChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiveChannel")
            .field("channel", &self.channel)
            .field("producer", &self.handle)
            .finish()
    }
}

impl<T> ReceiveChannel<T> {
    /// Receive the next element; `Ok(None)` at end-of-stream
    pub async fn receive(&mut self) -> Result<Option<T>> {
        self.channel.receive().await
    }

    /// Receive without suspending
    pub fn try_receive(&mut self) -> Result<Option<T>> {
        self.channel.try_receive()
    }

    /// Receive, giving up with [`Error::Timeout`] after `duration`.
    ///
    /// No element is lost when the timeout fires.
    pub async fn receive_timeout(&mut self, duration: Duration) -> Result<Option<T>> {
        match tokio::time::timeout(duration, self.channel.receive()).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout_after(duration)),
        }
    }

    /// Discard buffered elements and cancel the producer.
    pub fn cancel(&self) -> bool {
        self.channel.cancel()
    }

    /// True once the stream ended and nothing is left to receive
    pub fn is_closed_for_receive(&self) -> bool {
        self.channel.is_closed_for_receive()
    }

    /// The producer feeding this channel
    pub fn handle(&self) -> &ProducerHandle {
        &self.handle
    }

    /// Snapshot of the producer state
    pub fn state(&self) -> ProducerState {
        self.handle.state()
    }

    /// The underlying channel
    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }

    /// Adapt into a stream of results.
    ///
    /// The stream ends after end-of-stream or after yielding the first error.
    /// Dropping it early cancels the producer.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> {
        futures::stream::unfold(Some(self), |receiver| async move {
            let mut receiver = receiver?;
            match receiver.receive().await {
                Ok(Some(item)) => Some((Ok(item), Some(receiver))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl<T> Drop for ReceiveChannel<T> {
    fn drop(&mut self) {
        if !self.channel.is_closed_for_receive() {
            debug!(producer = %self.handle.name, "receive channel dropped early, cancelling producer");
            self.channel.cancel();
        }
    }
}

/// Spawn a generation procedure with the default configuration.
///
/// The procedure gets a [`ProducerScope`] to send through and starts running
/// concurrently; the receiving end is returned immediately.
///
/// # Examples
///
/// ```rust
/// use chanweld::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let squares = produce(|scope| async move {
///         for i in 1..=3 {
///             scope.send(i * i).await?;
///         }
///         Ok(())
///     });
///
///     assert_eq!(squares.to_vec().await?, vec![1, 4, 9]);
///     Ok(())
/// }
/// ```
pub fn produce<T, F, Fut>(generate: F) -> ReceiveChannel<T>
where
    T: Send + 'static,
    F: FnOnce(ProducerScope<T>) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    produce_with(ProduceConfig::default(), generate)
}

/// Spawn a generation procedure with an explicit configuration.
pub fn produce_with<T, F, Fut>(config: ProduceConfig, generate: F) -> ReceiveChannel<T>
where
    T: Send + 'static,
    F: FnOnce(ProducerScope<T>) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let ProduceConfig {
        capacity,
        name,
        runtime,
    } = config;
    let name: Arc<str> = Arc::from(name.unwrap_or_else(|| "producer".to_string()));
    let channel = Channel::new(capacity);
    let (state_tx, state_rx) = watch::channel(ProducerState::Created);

    let generation = generate(ProducerScope {
        channel: channel.clone(),
    });
    let task = run_producer(channel.clone(), generation, state_tx, name.clone());
    match runtime {
        Some(handle) => drop(handle.spawn(task)),
        None => drop(tokio::spawn(task)),
    }

    let handle = ProducerHandle {
        state: state_rx,
        token: channel.token().clone(),
        name,
    };
    ReceiveChannel { channel, handle }
}

async fn run_producer<T, Fut>(
    channel: Channel<T>,
    generation: Fut,
    state: watch::Sender<ProducerState>,
    name: Arc<str>,
) where
    Fut: Future<Output = Result<()>>,
{
    state.send_replace(ProducerState::Running);
    debug!(producer = %name, capacity = ?channel.capacity(), "producer started");

    let token = channel.token().clone();
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = AssertUnwindSafe(generation).catch_unwind() => match result {
            Ok(result) => result,
            Err(panic) => Err(Error::Panicked(format!("{}: {}", name, panic_message(panic.as_ref())))),
        },
    };

    let terminal = match outcome {
        _ if token.is_cancelled() => ProducerState::Cancelled,
        Ok(()) => ProducerState::Completed,
        Err(Error::Cancelled) => ProducerState::Cancelled,
        Err(cause) => ProducerState::Failed(cause),
    };
    debug!(producer = %name, state = terminal.as_label(), "producer finished");

    state.send_replace(terminal.clone());
    match terminal {
        ProducerState::Completed => {
            channel.close();
        }
        ProducerState::Failed(cause) => {
            warn_event!(producer = %name, error = %cause, "producer failed");
            tracing_support::count(tracing_support::PRODUCERS_FAILED);
            channel.close_with(Some(cause));
        }
        _ => {
            tracing_support::count(tracing_support::PRODUCERS_CANCELLED);
            channel.cancel();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_produce_returns_before_generation_finishes() {
        let mut rx = produce(|scope| async move {
            for i in 0..3 {
                scope.send(i).await?;
            }
            Ok(())
        });
        assert!(!rx.handle().is_finished());

        assert_eq!(rx.receive().await.unwrap(), Some(0));
        assert_eq!(rx.receive().await.unwrap(), Some(1));
        assert_eq!(rx.receive().await.unwrap(), Some(2));
        assert_eq!(rx.receive().await.unwrap(), None);
        assert_eq!(rx.state(), ProducerState::Completed);
    }

    #[tokio::test]
    async fn test_failure_is_stored_and_replayed() {
        let mut rx = produce_with(
            ProduceConfig::default().capacity(Capacity::Bounded(4)),
            |scope| async move {
                scope.send(1).await?;
                Err(Error::custom("generator failed"))
            },
        );

        assert_eq!(rx.receive().await.unwrap(), Some(1));
        for _ in 0..2 {
            let err = rx.receive().await.unwrap_err();
            assert_eq!(err.to_string(), "generator failed");
        }
        assert!(matches!(rx.handle().wait().await, ProducerState::Failed(_)));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_send() {
        let rx = produce(|scope| async move {
            let mut i = 0u64;
            loop {
                scope.send(i).await?;
                i += 1;
            }
        });
        let handle = rx.handle().clone();
        tokio::task::yield_now().await;

        rx.cancel();
        assert_eq!(handle.wait().await, ProducerState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_non_send_suspension() {
        struct SetOnDrop(Arc<AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let rx: ReceiveChannel<()> = produce(|_scope| async move {
            let _resource = SetOnDrop(flag);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        let handle = rx.handle().clone();
        tokio::task::yield_now().await;

        handle.cancel();
        assert_eq!(handle.wait().await, ProducerState::Cancelled);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dropping_receiver_cancels_producer() {
        let rx = produce(|scope| async move {
            loop {
                scope.send("tick").await?;
            }
        });
        let handle = rx.handle().clone();
        drop(rx);

        assert_eq!(handle.wait().await, ProducerState::Cancelled);
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let mut rx: ReceiveChannel<i32> =
            produce_with(ProduceConfig::default().name("exploding"), |_scope| async move {
                panic!("kaboom");
            });

        let err = rx.receive().await.unwrap_err();
        assert!(matches!(err, Error::Panicked(ref msg) if msg.contains("exploding") && msg.contains("kaboom")));
        assert_eq!(rx.handle().name(), "exploding");
    }

    #[tokio::test]
    async fn test_receive_timeout_keeps_stream_intact() {
        let mut rx = produce(|scope| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            scope.send(5).await
        });

        let err = rx.receive_timeout(Duration::from_millis(1)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { duration_ms: 1 }));
        assert_eq!(rx.receive().await.unwrap(), Some(5));
        assert_eq!(rx.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_into_stream_yields_results() {
        use tokio_stream::StreamExt;

        let rx = produce_with(
            ProduceConfig::default().capacity(Capacity::Unbounded),
            |scope| async move {
                scope.send(1).await?;
                scope.send(2).await?;
                Err(Error::custom("done badly"))
            },
        );

        let items: Vec<Result<i32>> = rx.into_stream().collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(*items[0].as_ref().unwrap(), 1);
        assert_eq!(*items[1].as_ref().unwrap(), 2);
        assert!(items[2].is_err());
    }

    #[tokio::test]
    async fn test_scope_is_active_while_running() {
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let mut rx = produce(|scope| async move {
            let _ = seen_tx.send(scope.is_active());
            scope.send(1).await
        });

        assert!(seen_rx.await.unwrap());
        assert_eq!(rx.receive().await.unwrap(), Some(1));
        assert_eq!(rx.receive().await.unwrap(), None);
        assert!(rx.channel().is_closed_for_send());
    }
}
