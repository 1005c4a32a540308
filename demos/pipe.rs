//! Pipe - peers on either end of a Unix domain socket.
//!
//! Frames travel as length-prefixed MessagePack.
//!
//! ```text
//! cargo run --example pipe
//! ```

#[cfg(unix)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use futures::TryStreamExt;
    use procwire_rpc::codec::FrameCodec;
    use procwire_rpc::transport::{
        connect_pipe, generate_pipe_path, PipeListener, StreamAdapterConfig,
    };
    use procwire_rpc::{Emitter, Peer};

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "procwire_rpc=debug".into()),
        )
        .init();

    let config = StreamAdapterConfig {
        codec: FrameCodec::MsgPack,
        ..Default::default()
    };

    let path = generate_pipe_path();
    let listener = PipeListener::bind(&path).await?;
    println!("listening on {}", listener.path());

    let (accepted, connected) = tokio::join!(
        listener.accept(config.clone()),
        connect_pipe(&path, config),
    );

    let _server = Peer::builder()
        .unary("upper", |s: String, _ctx| async move { Ok(s.to_uppercase()) })
        .stream("words", |s: String, out: Emitter| async move {
            for word in s.split_whitespace() {
                out.next(&word)?;
            }
            Ok(())
        })
        .build(accepted?)?;
    let client = Peer::builder().build(connected?)?;

    let upper: String = client.request("upper", &"over the socket").await?;
    println!("upper -> {}", upper);

    let words: Vec<String> = client
        .stream::<_, String>("words", &"one frame per word")
        .try_collect()
        .await?;
    println!("words -> {:?}", words);

    client.stop()?;
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("this example needs Unix domain sockets");
}
