//! Source producers.
//!
//! Helpers that spawn a producer task over some origin of items: an iterator,
//! a numeric range, a repeated value, a seed-and-step function, an async
//! function, or any `Stream`. All of them stop generating as soon as the
//! consumer goes away.

use std::future::Future;
use std::ops::Range;

use futures_core::Stream;
use tokio_stream::StreamExt;

use crate::error::Result;
use crate::producer::{produce, produce_with, ProduceConfig, ReceiveChannel};

/// A producer that yields the items of an iterator.
pub fn from_iter<I>(items: I) -> ReceiveChannel<I::Item>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    from_iter_with(ProduceConfig::default().name("from_iter"), items)
}

/// Like [`from_iter`], with an explicit configuration.
pub fn from_iter_with<I>(config: ProduceConfig, items: I) -> ReceiveChannel<I::Item>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    let items = items.into_iter();
    produce_with(config, move |scope| async move {
        for item in items {
            scope.send(item).await?;
        }
        Ok(())
    })
}

/// A producer that generates numbers from a range
pub fn range(range: Range<i64>) -> ReceiveChannel<i64> {
    from_iter_with(ProduceConfig::default().name("range"), range)
}

/// A producer that repeats a value indefinitely
pub fn repeat<T>(value: T) -> ReceiveChannel<T>
where
    T: Clone + Send + 'static,
{
    produce_with(ProduceConfig::default().name("repeat"), move |scope| async move {
        loop {
            scope.send(value.clone()).await?;
        }
    })
}

/// A producer that repeats a value `count` times
pub fn repeat_n<T>(value: T, count: usize) -> ReceiveChannel<T>
where
    T: Clone + Send + 'static,
{
    from_iter_with(
        ProduceConfig::default().name("repeat_n"),
        std::iter::repeat(value).take(count),
    )
}

/// An infinite producer of `seed`, `next(seed)`, `next(next(seed))`, ...
///
/// With the default rendezvous channel generation runs at most one value
/// ahead of the consumer.
pub fn iterate<T, F>(seed: T, mut next: F) -> ReceiveChannel<T>
where
    T: Send + 'static,
    F: FnMut(&T) -> T + Send + 'static,
{
    produce_with(ProduceConfig::default().name("iterate"), move |scope| async move {
        let mut current = seed;
        loop {
            let following = next(&current);
            scope.send(std::mem::replace(&mut current, following)).await?;
        }
    })
}

/// A producer driven by an async function.
///
/// The function is called repeatedly; `Ok(None)` ends the stream and an error
/// fails the producer.
pub fn from_fn<F, Fut, T>(mut f: F) -> ReceiveChannel<T>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    T: Send + 'static,
{
    produce(move |scope| async move {
        while let Some(item) = f().await? {
            scope.send(item).await?;
        }
        Ok(())
    })
}

/// A producer that forwards the items of a stream.
pub fn from_stream<S>(stream: S) -> ReceiveChannel<S::Item>
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
{
    produce_with(ProduceConfig::default().name("from_stream"), move |scope| async move {
        tokio::pin!(stream);
        while let Some(item) = stream.next().await {
            scope.send(item).await?;
        }
        Ok(())
    })
}
