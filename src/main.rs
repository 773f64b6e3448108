use std::convert::Infallible;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use clap::Parser;
use genstream::config::{load_config, StreamConfig};
use genstream::observability::init_tracing;
use genstream::stream::{pump, ChunkSink, PumpOutcome};
use genstream::StreamFactory;
use tokio_util::sync::CancellationToken;

/// Replay a captured SSE or NDJSON body through the incremental parsers.
#[derive(Parser, Debug)]
#[command(name = "genstream-inspect", version, about)]
struct Args {
    /// Captured response body
    capture: PathBuf,

    /// Decode the capture as NDJSON instead of SSE
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// Bytes per replayed chunk
    #[arg(
        long,
        default_value_t = 7,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    chunk_size: usize,

    /// Path to a genstream config YAML
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path).unwrap_or_else(|e| {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }),
        None => StreamConfig::default(),
    };
    init_tracing(&config.logging.level, &config.logging.format);

    let capture = std::fs::read(&args.capture).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {e}", args.capture.display());
        std::process::exit(1);
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    runtime.block_on(run(&config, &args, capture));
}

async fn run(config: &StreamConfig, args: &Args, capture: Vec<u8>) {
    let factory = StreamFactory::new(config);
    let parsed = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));

    let mut sink: Box<dyn ChunkSink> = if args.ndjson {
        let parsed = Arc::clone(&parsed);
        let failed = Arc::clone(&failed);
        Box::new(
            factory
                .ndjson_parser(move |value: serde_json::Value| {
                    parsed.fetch_add(1, Ordering::Relaxed);
                    print_line(&value)
                })
                .on_error(move |err| {
                    failed.fetch_add(1, Ordering::Relaxed);
                    eprintln!("parse error: {err}");
                }),
        )
    } else {
        let parsed = Arc::clone(&parsed);
        let failed = Arc::clone(&failed);
        Box::new(factory.sse_parser_with_errors(
            move |event| {
                parsed.fetch_add(1, Ordering::Relaxed);
                print_line(&event)
            },
            move |err| {
                failed.fetch_add(1, Ordering::Relaxed);
                eprintln!("parse error: {err}");
            },
        ))
    };

    let capture = Bytes::from(capture);
    let chunks: Vec<Result<Bytes, Infallible>> = (0..capture.len())
        .step_by(args.chunk_size)
        .map(|start| Ok(capture.slice(start..(start + args.chunk_size).min(capture.len()))))
        .collect();

    let started = Instant::now();
    match pump(
        futures_util::stream::iter(chunks),
        sink.as_mut(),
        &CancellationToken::new(),
    )
    .await
    {
        Ok(PumpOutcome::Finished { bytes, chunks }) => tracing::info!(
            bytes,
            chunks,
            parsed = parsed.load(Ordering::Relaxed),
            errors = failed.load(Ordering::Relaxed),
            duration_seconds = started.elapsed().as_secs_f64(),
            "capture replayed"
        ),
        Ok(PumpOutcome::Cancelled { bytes, .. }) => {
            tracing::warn!(bytes, "capture replay cancelled");
        }
        Err(e) => eprintln!("replay failed: {e}"),
    }
}

fn print_line<T: serde::Serialize>(value: &T) -> Result<(), genstream::error::HandlerError> {
    let line = serde_json::to_string(value)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    Ok(())
}
