//! Cancellation examples for chanweld
//!
//! Run with: cargo run --example cancellation

use std::time::Duration;

use chanweld::prelude::*;

/// A producer that reports which values it generated
fn noisy_naturals(name: &'static str) -> ReceiveChannel<u64> {
    produce_with(ProduceConfig::default().name(name), move |scope| async move {
        let mut n = 0;
        loop {
            println!("  [{}] generating {}", name, n);
            scope.send(n).await?;
            n += 1;
        }
    })
}

/// Example 1: An early return from a consumption scope stops the producer
async fn early_return_example() -> Result<()> {
    println!("=== Early Return ===");

    let source = noisy_naturals("naturals");
    let handle = source.handle().clone();

    let sum = source
        .consume(|rx| {
            Box::pin(async move {
                let mut sum = 0;
                while let Some(n) = rx.receive().await? {
                    if n == 3 {
                        return Ok(sum);
                    }
                    sum += n;
                }
                Ok(sum)
            })
        })
        .await?;

    println!("Sum before 3: {}", sum);
    println!("Producer state: {:?}", handle.wait().await);
    println!();
    Ok(())
}

/// Example 2: take() cancels the whole upstream chain
async fn take_example() -> Result<()> {
    println!("=== Take Cancels Upstream ===");

    let source = noisy_naturals("source");
    let source_handle = source.handle().clone();

    let doubled = source.map(|n| n * 2).take(3).to_vec().await?;
    println!("Doubled: {:?}", doubled);
    println!("Source state: {:?}", source_handle.wait().await);
    println!();
    Ok(())
}

/// Example 3: A failure in the producer reaches the consumer
async fn failure_example() -> Result<()> {
    println!("=== Failure Propagation ===");

    let source = produce(|scope| async move {
        scope.send("first").await?;
        scope.send("second").await?;
        Err(Error::custom("sensor disconnected"))
    });

    let result = source
        .consume_each(|reading| async move {
            println!("Reading: {}", reading);
            Ok(())
        })
        .await;

    match result {
        Ok(()) => println!("Unexpected success"),
        Err(e) => println!("Consumer saw: {}", e),
    }
    println!();
    Ok(())
}

/// Example 4: Giving up on a slow producer with a timeout
async fn timeout_example() -> Result<()> {
    println!("=== Timeout ===");

    let mut slow = produce(|scope| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        scope.send(42).await
    });
    let handle = slow.handle().clone();

    match slow.receive_timeout(Duration::from_millis(50)).await {
        Ok(value) => println!("Received: {:?}", value),
        Err(e) => println!("Gave up: {}", e),
    }
    drop(slow);

    println!("Slow producer state: {:?}", handle.wait().await);
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    early_return_example().await?;
    take_example().await?;
    failure_example().await?;
    timeout_example().await?;

    println!("All cancellation examples completed successfully!");
    Ok(())
}
