//! Stream - lazy sequences, push streams and early cancellation.
//!
//! This example demonstrates:
//! - A sequence handler returning a `futures::Stream`
//! - A push handler emitting through an [`Emitter`]
//! - Dropping a client stream early, which cancels the producer
//!
//! ```text
//! cargo run --example stream
//! ```

use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use procwire_rpc::transport::MemoryAdapter;
use procwire_rpc::{BoxError, Emitter, Peer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "procwire_rpc=debug".into()),
        )
        .init();

    let (left, right) = MemoryAdapter::pair();

    let _server = Peer::builder()
        .sequence("squares", |n: u32, _ctx| {
            futures::stream::iter((1..=n).map(|i| Ok::<u32, BoxError>(i * i)))
        })
        .stream("progress", |steps: u32, out: Emitter| async move {
            for step in 1..=steps {
                if out.is_cancelled() {
                    break;
                }
                out.next(&(step * 100 / steps))?;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(())
        })
        .build(right)?;

    let client = Peer::builder().build(left)?;

    let squares: Vec<u32> = client.stream::<_, u32>("squares", &5).try_collect().await?;
    println!("squares -> {:?}", squares);

    let mut progress = client.stream::<_, u32>("progress", &10);
    while let Some(percent) = progress.next().await {
        let percent = percent?;
        println!("progress -> {}%", percent);
        if percent >= 30 {
            println!("enough, canceling");
            break;
        }
    }
    drop(progress);

    // Give the server a moment to observe the cancel.
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.stop()?;
    Ok(())
}
