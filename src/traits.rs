//! Core traits for pipeline stages.
//!
//! A [`Processor`] holds the per-stage state of an operator and decides, for
//! each upstream element, what to send downstream. The stage runner in
//! [`crate::stage`] wraps it in a producer task that consumes the upstream
//! channel under a guard, which is what gives every operator the same
//! backpressure and cancellation behaviour.

use async_trait::async_trait;
use std::hash::Hash;

use crate::error::Result;
use crate::processors::{
    BatchProcessor, DistinctByProcessor, FilterMapProcessor, FilterProcessor, MapProcessor,
    SkipProcessor, SkipWhileProcessor, TakeProcessor, TakeWhileProcessor, WithIndexProcessor,
};
use crate::producer::{ProduceConfig, ReceiveChannel};
use crate::stage;

/// What a stage does with one upstream element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// Send the value downstream and keep consuming
    Yield(T),
    /// Send nothing for this element
    Skip,
    /// Send the value downstream, then stop consuming
    Last(T),
    /// Stop consuming without sending anything
    Done,
}

/// A processor transforms items from an upstream channel into a downstream one.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use chanweld::error::Result;
/// use chanweld::traits::{Processor, Step};
///
/// struct DoubleOdd;
///
/// #[async_trait]
/// impl Processor for DoubleOdd {
///     type Input = i32;
///     type Output = i32;
///
///     async fn process(&mut self, item: Self::Input) -> Result<Step<Self::Output>> {
///         if item % 2 == 1 {
///             Ok(Step::Yield(item * 2))
///         } else {
///             Ok(Step::Skip)
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send + 'static {
    /// The type of items this processor accepts
    type Input: Send + 'static;
    /// The type of items this processor produces
    type Output: Send + 'static;

    /// Handle one upstream element.
    async fn process(&mut self, item: Self::Input) -> Result<Step<Self::Output>>;

    /// Called once upstream reached end-of-stream, for trailing output.
    async fn finish(&mut self) -> Result<Vec<Self::Output>> {
        Ok(vec![])
    }

    /// Checked before every receive; `true` ends the stage without reading.
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Stage name used for the producer task
    fn name(&self) -> &'static str {
        "stage"
    }
}

/// Extension trait for chaining pipeline stages onto a receive channel.
pub trait ProducerExt<T: Send + 'static>: Sized {
    /// Run a processor as the next stage
    fn pipe<P>(self, processor: P) -> ReceiveChannel<P::Output>
    where
        P: Processor<Input = T>;

    /// Run a processor as the next stage with an explicit configuration
    fn pipe_with<P>(self, config: ProduceConfig, processor: P) -> ReceiveChannel<P::Output>
    where
        P: Processor<Input = T>;

    /// Map items through a function
    fn map<U, F>(self, f: F) -> ReceiveChannel<U>
    where
        F: FnMut(T) -> U + Send + 'static,
        U: Send + 'static,
    {
        self.pipe(MapProcessor::new(f))
    }

    /// Filter items with a predicate
    fn filter<F>(self, predicate: F) -> ReceiveChannel<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.pipe(FilterProcessor::new(predicate))
    }

    /// Map and filter in one step
    fn filter_map<U, F>(self, f: F) -> ReceiveChannel<U>
    where
        F: FnMut(T) -> Option<U> + Send + 'static,
        U: Send + 'static,
    {
        self.pipe(FilterMapProcessor::new(f))
    }

    /// Pair every item with its position
    fn with_index(self) -> ReceiveChannel<(usize, T)> {
        self.pipe(WithIndexProcessor::new())
    }

    /// Map items together with their position
    fn map_indexed<U, F>(self, mut f: F) -> ReceiveChannel<U>
    where
        F: FnMut(usize, T) -> U + Send + 'static,
        U: Send + 'static,
    {
        self.with_index().map(move |(index, item)| f(index, item))
    }

    /// Take only the first n items, then cancel upstream
    fn take(self, n: usize) -> ReceiveChannel<T> {
        self.pipe(TakeProcessor::new(n))
    }

    /// Take items while the predicate holds
    fn take_while<F>(self, predicate: F) -> ReceiveChannel<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.pipe(TakeWhileProcessor::new(predicate))
    }

    /// Skip the first n items
    fn skip(self, n: usize) -> ReceiveChannel<T> {
        self.pipe(SkipProcessor::new(n))
    }

    /// Skip items while the predicate holds
    fn skip_while<F>(self, predicate: F) -> ReceiveChannel<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.pipe(SkipWhileProcessor::new(predicate))
    }

    /// Drop items whose key was already seen
    fn distinct_by<K, F>(self, key: F) -> ReceiveChannel<T>
    where
        F: FnMut(&T) -> K + Send + 'static,
        K: Eq + Hash + Send + 'static,
    {
        self.pipe(DistinctByProcessor::new(key))
    }

    /// Group items into vectors of at most `size` elements
    fn chunked(self, size: usize) -> ReceiveChannel<Vec<T>> {
        self.pipe(BatchProcessor::new(size))
    }

    /// Pair items with those of another channel, ending with the shorter one
    fn zip<U>(self, other: ReceiveChannel<U>) -> ReceiveChannel<(T, U)>
    where
        U: Send + 'static;

    /// Continue with another channel once this one ends
    fn chain(self, other: ReceiveChannel<T>) -> ReceiveChannel<T>;
}

impl<T: Send + 'static> ProducerExt<T> for ReceiveChannel<T> {
    fn pipe<P>(self, processor: P) -> ReceiveChannel<P::Output>
    where
        P: Processor<Input = T>,
    {
        stage::pipe(self, processor)
    }

    fn pipe_with<P>(self, config: ProduceConfig, processor: P) -> ReceiveChannel<P::Output>
    where
        P: Processor<Input = T>,
    {
        stage::pipe_with(config, self, processor)
    }

    fn zip<U>(self, other: ReceiveChannel<U>) -> ReceiveChannel<(T, U)>
    where
        U: Send + 'static,
    {
        stage::zip(self, other)
    }

    fn chain(self, other: ReceiveChannel<T>) -> ReceiveChannel<T> {
        stage::chain(self, other)
    }
}
