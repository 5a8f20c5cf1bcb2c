//! Basic usage examples for chanweld
//!
//! Run with: cargo run --example basic

use std::time::Duration;

use chanweld::prelude::*;

/// Example 1: Producing and collecting
async fn simple_example() -> Result<()> {
    println!("=== Producing and Collecting ===");

    let squares = produce(|scope| async move {
        for i in 1..=5 {
            scope.send(i * i).await?;
        }
        Ok(())
    });

    println!("Squares: {:?}", squares.to_vec().await?);
    println!();
    Ok(())
}

/// Example 2: Transform and filter
async fn transform_filter_example() -> Result<()> {
    println!("=== Transform and Filter ===");

    range(1..21)
        .filter(|x| x % 3 == 0)
        .map(|x| x * x)
        .consume_each(|square| async move {
            println!("Square: {}", square);
            Ok(())
        })
        .await?;

    println!();
    Ok(())
}

/// Example 3: Lazy generation from an infinite source
async fn lazy_example() -> Result<()> {
    println!("=== Lazy Infinite Source ===");

    let fibonacci = iterate((0u64, 1u64), |(a, b)| (*b, a + b)).map(|(a, _)| a);
    let first_large = fibonacci.first_where(|n| *n > 1_000).await?;
    println!("First Fibonacci number above 1000: {}", first_large);

    let primes = iterate(2u64, |n| n + 1)
        .filter(|n| (2..*n).take_while(|d| d * d <= *n).all(|d| n % d != 0))
        .take(10)
        .to_vec()
        .await?;
    println!("First ten primes: {:?}", primes);

    println!();
    Ok(())
}

/// Example 4: Batching a slow source
async fn batch_example() -> Result<()> {
    println!("=== Batching ===");

    let mut remaining = 7;
    let readings = from_fn(move || {
        remaining -= 1;
        let next = (remaining >= 0).then_some(remaining * 10);
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(next)
        }
    });

    readings
        .chunked(3)
        .consume_each(|batch| async move {
            println!("Batch: {:?}", batch);
            Ok(())
        })
        .await?;

    println!();
    Ok(())
}

/// Example 5: Grouping with a terminal operator
async fn grouping_example() -> Result<()> {
    println!("=== Grouping ===");

    let words = vec!["apple", "avocado", "banana", "blueberry", "cherry"];
    let groups = from_iter(words).group_by(|w| w.len()).await?;

    let mut lengths: Vec<_> = groups.keys().copied().collect();
    lengths.sort_unstable();
    for len in lengths {
        println!("{} letters: {:?}", len, groups[&len]);
    }

    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    simple_example().await?;
    transform_filter_example().await?;
    lazy_example().await?;
    batch_example().await?;
    grouping_example().await?;

    println!("All examples completed successfully!");
    Ok(())
}
