//! Pipeline stages.
//!
//! Every stage is a producer task whose generation procedure consumes one or
//! more upstream channels under a [`ConsumeGuard`](crate::consume::ConsumeGuard).
//! When the stage finishes early (a `take` limit, a downstream cancellation,
//! a failure) the guards drop and cancel whatever upstream is still running,
//! so shutdown travels all the way back to the source.

use crate::error::Result;
use crate::producer::{produce_with, ProduceConfig, ProducerScope, ReceiveChannel};
use crate::traits::{Processor, Step};

/// Run `processor` as a stage over `upstream` with the default configuration.
pub fn pipe<P>(upstream: ReceiveChannel<P::Input>, processor: P) -> ReceiveChannel<P::Output>
where
    P: Processor,
{
    let config = ProduceConfig::default().name(processor.name());
    pipe_with(config, upstream, processor)
}

/// Run `processor` as a stage over `upstream`.
pub fn pipe_with<P>(
    config: ProduceConfig,
    upstream: ReceiveChannel<P::Input>,
    processor: P,
) -> ReceiveChannel<P::Output>
where
    P: Processor,
{
    produce_with(config, move |scope| run_stage(scope, upstream, processor))
}

async fn run_stage<P>(
    scope: ProducerScope<P::Output>,
    upstream: ReceiveChannel<P::Input>,
    mut processor: P,
) -> Result<()>
where
    P: Processor,
{
    let mut upstream = upstream.guard();
    while !processor.is_exhausted() {
        let Some(item) = upstream.receive().await? else {
            for output in processor.finish().await? {
                scope.send(output).await?;
            }
            break;
        };

        match processor.process(item).await? {
            Step::Yield(output) => scope.send(output).await?,
            Step::Skip => {}
            Step::Last(output) => {
                scope.send(output).await?;
                break;
            }
            Step::Done => break,
        }
    }
    Ok(())
}

/// Pair elements of two channels.
///
/// Ends as soon as either side ends; the other side is then cancelled rather
/// than left running.
pub fn zip<A, B>(left: ReceiveChannel<A>, right: ReceiveChannel<B>) -> ReceiveChannel<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    let config = ProduceConfig::default().name("zip");
    produce_with(config, move |scope| async move {
        let mut left = left.guard();
        let mut right = right.guard();
        loop {
            let Some(a) = left.receive().await? else {
                break;
            };
            let Some(b) = right.receive().await? else {
                break;
            };
            scope.send((a, b)).await?;
        }
        Ok(())
    })
}

/// All elements of `first`, then all elements of `second`.
pub fn chain<T>(first: ReceiveChannel<T>, second: ReceiveChannel<T>) -> ReceiveChannel<T>
where
    T: Send + 'static,
{
    let config = ProduceConfig::default().name("chain");
    produce_with(config, move |scope| async move {
        let mut first = first.guard();
        let mut second = second.guard();
        while let Some(item) = first.receive().await? {
            scope.send(item).await?;
        }
        while let Some(item) = second.receive().await? {
            scope.send(item).await?;
        }
        Ok(())
    })
}
