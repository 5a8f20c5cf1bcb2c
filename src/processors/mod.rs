//! Processor implementations for pipeline stages.
//!
//! Each processor keeps its per-stage state (counters, seen keys, the current
//! batch) in its own fields. Nothing is shared between stages except the
//! channels connecting them.

use async_trait::async_trait;
use std::collections::HashSet;
use std::hash::Hash;
use std::marker::PhantomData;

use crate::error::Result;
use crate::traits::{Processor, Step};

/// A processor that maps items using a function.
pub struct MapProcessor<F, T, U> {
    f: F,
    _phantom: PhantomData<fn(T) -> U>,
}

impl<F, T, U> MapProcessor<F, T, U> {
    /// Create a new map processor
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T, U> Processor for MapProcessor<F, T, U>
where
    F: FnMut(T) -> U + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
{
    type Input = T;
    type Output = U;

    async fn process(&mut self, item: Self::Input) -> Result<Step<Self::Output>> {
        Ok(Step::Yield((self.f)(item)))
    }

    fn name(&self) -> &'static str {
        "map"
    }
}

/// A processor that only passes items satisfying a predicate.
pub struct FilterProcessor<F, T> {
    predicate: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> FilterProcessor<F, T> {
    /// Create a new filter processor
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> Processor for FilterProcessor<F, T>
where
    F: FnMut(&T) -> bool + Send + 'static,
    T: Send + 'static,
{
    type Input = T;
    type Output = T;

    async fn process(&mut self, item: Self::Input) -> Result<Step<Self::Output>> {
        if (self.predicate)(&item) {
            Ok(Step::Yield(item))
        } else {
            Ok(Step::Skip)
        }
    }

    fn name(&self) -> &'static str {
        "filter"
    }
}

/// A processor that maps and filters in one pass.
pub struct FilterMapProcessor<F, T, U> {
    f: F,
    _phantom: PhantomData<fn(T) -> U>,
}

impl<F, T, U> FilterMapProcessor<F, T, U> {
    /// Create a new filter-map processor
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T, U> Processor for FilterMapProcessor<F, T, U>
where
    F: FnMut(T) -> Option<U> + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
{
    type Input = T;
    type Output = U;

    async fn process(&mut self, item: Self::Input) -> Result<Step<Self::Output>> {
        Ok(match (self.f)(item) {
            Some(output) => Step::Yield(output),
            None => Step::Skip,
        })
    }

    fn name(&self) -> &'static str {
        "filter_map"
    }
}

/// A processor that pairs items with their position.
pub struct WithIndexProcessor<T> {
    index: usize,
    _phantom: PhantomData<fn(T)>,
}

impl<T> WithIndexProcessor<T> {
    /// Create a new index processor starting at zero
    pub fn new() -> Self {
        Self {
            index: 0,
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for WithIndexProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Processor for WithIndexProcessor<T> {
    type Input = T;
    type Output = (usize, T);

    async fn process(&mut self, item: Self::Input) -> Result<Step<Self::Output>> {
        let index = self.index;
        self.index += 1;
        Ok(Step::Yield((index, item)))
    }

    fn name(&self) -> &'static str {
        "with_index"
    }
}

/// A processor that passes the first `n` items and then stops.
pub struct TakeProcessor<T> {
    remaining: usize,
    _phantom: PhantomData<fn(T)>,
}

impl<T> TakeProcessor<T> {
    /// Create a new take processor
    pub fn new(n: usize) -> Self {
        Self {
            remaining: n,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Processor for TakeProcessor<T> {
    type Input = T;
    type Output = T;

    async fn process(&mut self, item: Self::Input) -> Result<Step<Self::Output>> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            Ok(Step::Last(item))
        } else {
            Ok(Step::Yield(item))
        }
    }

    fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    fn name(&self) -> &'static str {
        "take"
    }
}

/// A processor that passes items until the predicate first fails.
pub struct TakeWhileProcessor<F, T> {
    predicate: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> TakeWhileProcessor<F, T> {
    /// Create a new take-while processor
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> Processor for TakeWhileProcessor<F, T>
where
    F: FnMut(&T) -> bool + Send + 'static,
    T: Send + 'static,
{
    type Input = T;
    type Output = T;

    async fn process(&mut self, item: Self::Input) -> Result<Step<Self::Output>> {
        if (self.predicate)(&item) {
            Ok(Step::Yield(item))
        } else {
            Ok(Step::Done)
        }
    }

    fn name(&self) -> &'static str {
        "take_while"
    }
}

/// A processor that drops the first `n` items.
pub struct SkipProcessor<T> {
    remaining: usize,
    _phantom: PhantomData<fn(T)>,
}

impl<T> SkipProcessor<T> {
    /// Create a new skip processor
    pub fn new(n: usize) -> Self {
        Self {
            remaining: n,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Processor for SkipProcessor<T> {
    type Input = T;
    type Output = T;

    async fn process(&mut self, item: Self::Input) -> Result<Step<Self::Output>> {
        if self.remaining > 0 {
            self.remaining -= 1;
            Ok(Step::Skip)
        } else {
            Ok(Step::Yield(item))
        }
    }

    fn name(&self) -> &'static str {
        "skip"
    }
}

/// A processor that drops items while the predicate holds.
pub struct SkipWhileProcessor<F, T> {
    predicate: F,
    skipping: bool,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> SkipWhileProcessor<F, T> {
    /// Create a new skip-while processor
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            skipping: true,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> Processor for SkipWhileProcessor<F, T>
where
    F: FnMut(&T) -> bool + Send + 'static,
    T: Send + 'static,
{
    type Input = T;
    type Output = T;

    async fn process(&mut self, item: Self::Input) -> Result<Step<Self::Output>> {
        if self.skipping && (self.predicate)(&item) {
            return Ok(Step::Skip);
        }
        self.skipping = false;
        Ok(Step::Yield(item))
    }

    fn name(&self) -> &'static str {
        "skip_while"
    }
}

/// A processor that drops items whose key was already seen.
pub struct DistinctByProcessor<F, T, K> {
    key: F,
    seen: HashSet<K>,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T, K> DistinctByProcessor<F, T, K> {
    /// Create a new distinct processor
    pub fn new(key: F) -> Self {
        Self {
            key,
            seen: HashSet::new(),
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T, K> Processor for DistinctByProcessor<F, T, K>
where
    F: FnMut(&T) -> K + Send + 'static,
    T: Send + 'static,
    K: Eq + Hash + Send + 'static,
{
    type Input = T;
    type Output = T;

    async fn process(&mut self, item: Self::Input) -> Result<Step<Self::Output>> {
        if self.seen.insert((self.key)(&item)) {
            Ok(Step::Yield(item))
        } else {
            Ok(Step::Skip)
        }
    }

    fn name(&self) -> &'static str {
        "distinct_by"
    }
}

/// A processor that batches items.
///
/// A trailing partial batch is flushed when upstream ends.
pub struct BatchProcessor<T> {
    batch_size: usize,
    batch: Vec<T>,
}

impl<T> BatchProcessor<T> {
    /// Create a new batch processor; a size of zero is treated as one
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            batch: Vec::with_capacity(batch_size),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Processor for BatchProcessor<T> {
    type Input = T;
    type Output = Vec<T>;

    async fn process(&mut self, item: Self::Input) -> Result<Step<Self::Output>> {
        self.batch.push(item);

        if self.batch.len() >= self.batch_size {
            let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
            Ok(Step::Yield(batch))
        } else {
            Ok(Step::Skip)
        }
    }

    async fn finish(&mut self) -> Result<Vec<Self::Output>> {
        if self.batch.is_empty() {
            Ok(vec![])
        } else {
            Ok(vec![std::mem::take(&mut self.batch)])
        }
    }

    fn name(&self) -> &'static str {
        "chunked"
    }
}
