//! Echo - simple request/response example.
//!
//! This example demonstrates:
//! - Two peers over an in-process channel
//! - Registering typed request handlers
//! - Per-call timeouts and domain errors
//!
//! ```text
//! cargo run --example echo
//! ```

use std::time::Duration;

use procwire_rpc::transport::MemoryAdapter;
use procwire_rpc::{BoxError, CallOptions, Peer, RequestContext, RpcError};
use serde::{Deserialize, Serialize};

/// Input structure for the echo method.
#[derive(Serialize, Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo method.
#[derive(Serialize, Deserialize, Debug)]
struct EchoOutput {
    echo: String,
    sender: Option<String>,
}

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
        .unary("echo", |data: EchoInput, ctx: RequestContext| async move {
            let sender = ctx
                .meta_value("sender")
                .and_then(|v| v.as_str())
                .map(String::from);
            Ok(EchoOutput {
                echo: data.message,
                sender,
            })
        })
        .unary("divide", |(a, b): (i64, i64), _ctx| async move {
            if b == 0 {
                return Err::<i64, BoxError>(
                    RpcError::new("INVALID_ARGUMENT", "division by zero").into(),
                );
            }
            Ok(a / b)
        })
        .unary("slow", |_: (), _ctx| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .build(right)?;

    let client = Peer::builder().sender("echo-demo").build(left)?;

    let reply: EchoOutput = client
        .request(
            "echo",
            &EchoInput {
                message: "hello".into(),
            },
        )
        .await?;
    println!("echo -> {:?}", reply);

    let quotient: i64 = client.request("divide", &(84, 2)).await?;
    println!("divide(84, 2) -> {}", quotient);

    if let Err(e) = client.request::<_, i64>("divide", &(1, 0)).await {
        println!("divide(1, 0) -> {} ({})", e, e.code());
    }

    let timed_out = client
        .request_with::<_, ()>("slow", &(), CallOptions::new().timeout_ms(100))
        .await;
    if let Err(e) = timed_out {
        println!("slow -> {}", e);
    }

    client.stop()?;
    Ok(())
}
