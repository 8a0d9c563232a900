//! Append one JSON object to a stream
//!
//! Run with: cargo run -p completion_worker --bin enqueue -- '{"conversationId":"c-1","messageId":"m-1"}'

use clap::Parser;
use completion_worker::CompletionStream;
use eyre::{Result, WrapErr};
use stream_engine::{StreamDef, StreamProducer, codec, connection};

#[derive(Parser, Debug)]
#[command(author, version, about = "Append a JSON object to a Redis stream")]
struct Args {
    /// JSON object to append (each top-level key becomes one entry field)
    payload: String,

    /// Target stream, the completions stream when unset
    #[arg(short, long, env = "COMPLETION_STREAM")]
    stream: Option<String>,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Approximate stream length cap (`MAXLEN ~`)
    #[arg(long)]
    max_length: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let payload: serde_json::Value =
        serde_json::from_str(&args.payload).wrap_err("Payload is not valid JSON")?;

    // Fail before connecting when the payload could never be appended
    if !payload.is_object() {
        eyre::bail!(
            "Payload must be a JSON object, got {}",
            codec::value_kind(&payload)
        );
    }

    println!("Connecting to Redis at {}", args.redis_url);
    let redis = connection::connect(&args.redis_url)
        .await
        .wrap_err("Failed to connect to Redis")?;

    let mut producer = StreamProducer::new(redis);
    if let Some(max_length) = args.max_length {
        producer = producer.with_max_length(max_length);
    }

    let (stream, id) = match args.stream {
        Some(stream) => {
            let id = producer.publish(&stream, &payload).await?;
            (stream, id)
        }
        None => {
            let id = producer.publish_to::<CompletionStream, _>(&payload).await?;
            (CompletionStream::stream_name().to_string(), id)
        }
    };
    let length = producer.stream_length(&stream).await?;

    println!("Appended to {}", stream);
    println!("Stream ID: {}", id);
    println!("Stream length: {}", length);

    Ok(())
}
