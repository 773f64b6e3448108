//! Wire-format parsing for streamed model responses.
//!
//! [`SseParser`] and [`NdjsonParser`] accept text in arbitrarily split chunks;
//! [`pump()`] feeds them from an async byte stream.

pub mod ndjson;
pub mod pump;
pub mod sse;
pub mod utf8;

pub use ndjson::{NdjsonDecoder, NdjsonOptions, NdjsonParser};
pub use pump::{pump, ChunkSink, PumpOutcome};
pub use sse::{SseDecoder, SseEvent, SseOptions, SseParser};
pub use utf8::Utf8ChunkDecoder;
