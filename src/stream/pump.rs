use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::utf8::Utf8ChunkDecoder;
use crate::error::StreamError;

/// Anything that consumes decoded text chunks: the SSE and NDJSON parsers.
pub trait ChunkSink {
    fn feed(&mut self, chunk: &str);
    fn end(&mut self);
    fn reset(&mut self);
}

/// How a [`pump`] run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// The byte stream reached EOF and the sink was ended.
    Finished { bytes: u64, chunks: u64 },
    /// The cancellation token fired first. The sink was not ended.
    Cancelled { bytes: u64, chunks: u64 },
}

/// Drive a byte stream through UTF-8 decoding into `sink`.
///
/// Returns when the stream ends, when `cancel` fires, or on the first read
/// error, whichever comes first. Cancellation is checked before every read.
///
/// # Errors
///
/// Returns [`StreamError::Transport`] if the byte stream yields an error.
/// Text decoded before the error has already been fed to the sink.
pub async fn pump<S, E, K>(
    byte_stream: S,
    sink: &mut K,
    cancel: &CancellationToken,
) -> Result<PumpOutcome, StreamError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
    K: ChunkSink + ?Sized,
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut decoder = Utf8ChunkDecoder::new();
    let mut text = String::new();
    let mut bytes = 0_u64;
    let mut chunks = 0_u64;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(bytes, chunks, "byte stream pump cancelled");
                return Ok(PumpOutcome::Cancelled { bytes, chunks });
            }
            next = byte_stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                bytes += chunk.len() as u64;
                chunks += 1;
                decoder.decode_into(&chunk, &mut text);
                if !text.is_empty() {
                    sink.feed(&text);
                    text.clear();
                }
            }
            Some(Err(err)) => {
                tracing::debug!(bytes, chunks, "byte stream read failed: {err}");
                return Err(StreamError::Transport(err.to_string()));
            }
            None => break,
        }
    }

    decoder.finish_into(&mut text);
    if !text.is_empty() {
        sink.feed(&text);
    }
    sink.end();
    Ok(PumpOutcome::Finished { bytes, chunks })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        text: String,
        ends: usize,
    }

    impl ChunkSink for Recorder {
        fn feed(&mut self, chunk: &str) {
            self.text.push_str(chunk);
        }
        fn end(&mut self) {
            self.ends += 1;
        }
        fn reset(&mut self) {
            self.text.clear();
        }
    }

    fn chunked(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        let items: Vec<Result<Bytes, std::io::Error>> = parts
            .iter()
            .map(|part| Ok(Bytes::from_static(part)))
            .collect();
        futures_util::stream::iter(items)
    }

    #[tokio::test]
    async fn finishes_and_counts_input() {
        let mut sink = Recorder::default();
        let outcome = pump(chunked(&[b"ab", b"\xc3", b"\xa9"]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, PumpOutcome::Finished { bytes: 4, chunks: 3 });
        assert_eq!(sink.text, "abé");
        assert_eq!(sink.ends, 1);
    }

    #[tokio::test]
    async fn read_error_is_transport() {
        let items: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut sink = Recorder::default();
        let err = pump(futures_util::stream::iter(items), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, StreamError::Transport("reset".into()));
        assert_eq!(sink.text, "data");
        assert_eq!(sink.ends, 0);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_reading() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sink = Recorder::default();
        let outcome = pump(chunked(&[b"never"]), &mut sink, &cancel).await.unwrap();
        assert_eq!(outcome, PumpOutcome::Cancelled { bytes: 0, chunks: 0 });
        assert!(sink.text.is_empty());
        assert_eq!(sink.ends, 0);
    }
}
