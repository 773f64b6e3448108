use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::Value;

use genstream::error::ParseError;
use genstream::stream::{NdjsonDecoder, SseDecoder, SseEvent, Utf8ChunkDecoder};
use genstream::{StreamHandle, TokenEmitter};
use tokio_util::sync::CancellationToken;

fn sse_body(events: usize) -> String {
    let mut body = String::with_capacity(events * 96);
    for i in 0..events {
        body.push_str("event: delta\n");
        body.push_str(&format!(
            "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"token {i}\"}}}}]}}\n\n"
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn ndjson_body(lines: usize) -> String {
    let mut body = String::with_capacity(lines * 64);
    for i in 0..lines {
        body.push_str(&format!(
            "{{\"model\":\"m\",\"response\":\"token {i}\",\"done\":false}}\n"
        ));
    }
    body
}

/// Split on char boundaries close to `size` bytes.
fn chunked(body: &str, size: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < body.len() {
        let mut end = (start + size).min(body.len());
        while !body.is_char_boundary(end) {
            end += 1;
        }
        chunks.push(&body[start..end]);
        start = end;
    }
    chunks
}

fn bench_sse_decoder(c: &mut Criterion) {
    let body = sse_body(1_000);
    let mut group = c.benchmark_group("sse_decoder");
    group.throughput(Throughput::Bytes(body.len() as u64));

    for size in [16, 512, 8 * 1024] {
        let chunks = chunked(&body, size);
        group.bench_function(format!("1k_events_chunk_{size}"), |b| {
            let mut out: Vec<SseEvent> = Vec::with_capacity(1_024);
            b.iter(|| {
                let mut decoder = SseDecoder::new();
                out.clear();
                for chunk in &chunks {
                    let _ = decoder.feed_into(black_box(chunk), &mut out);
                }
                black_box(out.len())
            });
        });
    }
    group.finish();
}

fn bench_ndjson_decoder(c: &mut Criterion) {
    let body = ndjson_body(1_000);
    let chunks = chunked(&body, 512);
    let mut group = c.benchmark_group("ndjson_decoder");
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("1k_lines_chunk_512", |b| {
        let mut out: Vec<Result<Value, ParseError>> = Vec::with_capacity(1_024);
        b.iter(|| {
            let mut decoder = NdjsonDecoder::new();
            out.clear();
            for chunk in &chunks {
                decoder.feed_into(black_box(chunk), &mut out);
            }
            black_box(out.len())
        });
    });
    group.finish();
}

fn bench_utf8_chunks(c: &mut Criterion) {
    let body = "héllo wörld 🚀 ".repeat(512);
    let bytes = body.as_bytes();
    c.bench_function("utf8_decode_chunk_7", |b| {
        let mut out = String::with_capacity(bytes.len());
        b.iter(|| {
            let mut decoder = Utf8ChunkDecoder::new();
            out.clear();
            for chunk in bytes.chunks(7) {
                decoder.decode_into(black_box(chunk), &mut out);
            }
            black_box(out.len())
        });
    });
}

fn bench_stream_handle(c: &mut Criterion) {
    c.bench_function("handle_emit_1k_tokens_2_subscribers", |b| {
        b.iter(|| {
            let stream = StreamHandle::new("bench", CancellationToken::new(), TokenEmitter::new());
            let _first = stream.on_token(|token| {
                black_box(token.len());
            });
            let _second = stream.on_token(|token| {
                black_box(token.len());
            });
            for _ in 0..1_000 {
                stream.emit_token(black_box("tok "));
            }
            stream.complete();
            black_box(stream.text().len())
        });
    });
}

criterion_group!(
    benches,
    bench_sse_decoder,
    bench_ndjson_decoder,
    bench_utf8_chunks,
    bench_stream_handle
);
criterion_main!(benches);
