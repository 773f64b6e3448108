//! Newline-delimited JSON decoding.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::pump::ChunkSink;
use crate::error::{HandlerError, ParseError};
use crate::util::preview;

const PREVIEW_CHARS: usize = 120;

/// Limits for NDJSON decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NdjsonOptions {
    #[serde(default)]
    pub max_pending_bytes: Option<usize>,
}

/// Incremental NDJSON decoder.
///
/// Splits on `\n`, ignores blank lines and trailing whitespace, and yields
/// one deserialization result per non-empty line. A malformed line yields an
/// `Err` and never affects the lines around it.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: String,
    read_offset: usize,
    /// Bytes after `read_offset` already known to contain no newline.
    scanned: usize,
    max_pending_bytes: Option<usize>,
}

impl NdjsonDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_options(options: &NdjsonOptions) -> Self {
        Self {
            max_pending_bytes: options.max_pending_bytes,
            ..Self::default()
        }
    }

    /// Append `chunk` and decode every line it completes into `out`.
    pub fn feed_into<T: DeserializeOwned>(
        &mut self,
        chunk: &str,
        out: &mut Vec<Result<T, ParseError>>,
    ) {
        self.buffer.push_str(chunk);

        let mut search_from = self.read_offset + self.scanned;
        while let Some(rel) = memchr::memchr(b'\n', &self.buffer.as_bytes()[search_from..]) {
            let line_end = search_from + rel;
            decode_line(&self.buffer[self.read_offset..line_end], out);
            self.read_offset = line_end + 1;
            search_from = self.read_offset;
        }
        self.scanned = self.buffer.len() - self.read_offset;

        if self.read_offset > 0 && self.read_offset >= self.buffer.len() / 2 {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }

        if let Some(limit) = self.max_pending_bytes {
            if self.pending_len() > limit {
                self.reset();
                out.push(Err(ParseError::BufferOverflow { limit }));
            }
        }
    }

    /// Decode the unterminated remainder, if any, as a final line.
    pub fn finish_into<T: DeserializeOwned>(&mut self, out: &mut Vec<Result<T, ParseError>>) {
        let pending = &self.buffer[self.read_offset..];
        if !pending.trim().is_empty() {
            decode_line(pending, out);
        }
        self.reset();
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.read_offset = 0;
        self.scanned = 0;
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_offset
    }
}

fn decode_line<T: DeserializeOwned>(line: &str, out: &mut Vec<Result<T, ParseError>>) {
    let line = line.trim_end();
    if line.trim_start().is_empty() {
        return;
    }
    out.push(
        serde_json::from_str::<T>(line).map_err(|source| ParseError::Json {
            preview: preview(line, PREVIEW_CHARS),
            source,
        }),
    );
}

type ObjectHandler<T> = Box<dyn FnMut(T) -> Result<(), HandlerError> + Send>;
type ErrorHandler = Box<dyn FnMut(ParseError) + Send>;
type EndHandler = Box<dyn FnMut() + Send>;

/// Callback-driven NDJSON parser.
///
/// Objects are deserialized into `T` (a [`serde_json::Value`] by default).
/// Malformed lines and `on_object` failures go to `on_error`; when no error
/// callback is installed they are logged and dropped.
pub struct NdjsonParser<T = serde_json::Value> {
    decoder: NdjsonDecoder,
    on_object: ObjectHandler<T>,
    on_error: Option<ErrorHandler>,
    on_end: Option<EndHandler>,
    scratch: Vec<Result<T, ParseError>>,
    ended: bool,
}

impl<T: DeserializeOwned> NdjsonParser<T> {
    pub fn new<F>(on_object: F) -> Self
    where
        F: FnMut(T) -> Result<(), HandlerError> + Send + 'static,
    {
        Self {
            decoder: NdjsonDecoder::new(),
            on_object: Box::new(on_object),
            on_error: None,
            on_end: None,
            scratch: Vec::new(),
            ended: false,
        }
    }

    #[must_use]
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: FnMut(ParseError) + Send + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }

    #[must_use]
    pub fn on_end<F>(mut self, on_end: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_end = Some(Box::new(on_end));
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: &NdjsonOptions) -> Self {
        self.decoder = NdjsonDecoder::with_options(options);
        self
    }

    pub fn feed(&mut self, chunk: &str) {
        if self.ended {
            tracing::debug!(len = chunk.len(), "NDJSON chunk after end() ignored");
            return;
        }
        self.decoder.feed_into(chunk, &mut self.scratch);
        self.dispatch();
    }

    /// Decode any trailing line and signal end-of-stream once.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.decoder.finish_into(&mut self.scratch);
        self.dispatch();
        if let Some(on_end) = self.on_end.as_mut() {
            on_end();
        }
    }

    pub fn reset(&mut self) {
        self.decoder.reset();
        self.scratch.clear();
        self.ended = false;
    }

    fn dispatch(&mut self) {
        for item in std::mem::take(&mut self.scratch) {
            let err = match item {
                Ok(object) => match (self.on_object)(object) {
                    Ok(()) => continue,
                    Err(err) => ParseError::Handler(err),
                },
                Err(err) => err,
            };
            match self.on_error.as_mut() {
                Some(on_error) => on_error(err),
                None => tracing::warn!("NDJSON parser: {err}"),
            }
        }
    }
}

impl<T: DeserializeOwned> ChunkSink for NdjsonParser<T> {
    fn feed(&mut self, chunk: &str) {
        NdjsonParser::feed(self, chunk);
    }

    fn end(&mut self) {
        NdjsonParser::end(self);
    }

    fn reset(&mut self) {
        NdjsonParser::reset(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn decode_all(chunks: &[&str]) -> Vec<Result<Value, ParseError>> {
        let mut decoder = NdjsonDecoder::new();
        let mut out = Vec::new();
        for chunk in chunks {
            decoder.feed_into(chunk, &mut out);
        }
        decoder.finish_into(&mut out);
        out
    }

    #[test]
    fn objects_split_across_chunks() {
        let out = decode_all(&["{\"a\":", "1}\n{\"b\"", ":2}\n"]);
        let values: Vec<Value> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn blank_lines_and_trailing_whitespace_are_skipped() {
        let out = decode_all(&["\n  \n{\"a\":1}  \r\n\n"]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), &json!({"a": 1}));
    }

    #[test]
    fn malformed_line_is_isolated() {
        let out = decode_all(&["{\"a\":1}\nnot json\n{\"b\":2}\n"]);
        assert_eq!(out.len(), 3);
        assert!(out[0].is_ok());
        match &out[1] {
            Err(ParseError::Json { preview, .. }) => assert_eq!(preview, "not json"),
            other => panic!("expected Json error, got {other:?}"),
        }
        assert!(out[2].is_ok());
    }

    #[test]
    fn finish_decodes_unterminated_tail() {
        let mut decoder = NdjsonDecoder::new();
        let mut out: Vec<Result<Value, ParseError>> = Vec::new();
        decoder.feed_into("{\"done\":true}", &mut out);
        assert!(out.is_empty());
        decoder.finish_into(&mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn typed_lines() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Chunk {
            response: String,
            done: bool,
        }
        let mut decoder = NdjsonDecoder::new();
        let mut out: Vec<Result<Chunk, ParseError>> = Vec::new();
        decoder.feed_into("{\"response\":\"hi\",\"done\":false}\n", &mut out);
        assert_eq!(
            out.pop().unwrap().unwrap(),
            Chunk {
                response: "hi".into(),
                done: false
            }
        );
    }

    #[test]
    fn overflow_discards_pending_line() {
        let mut decoder = NdjsonDecoder::with_options(&NdjsonOptions {
            max_pending_bytes: Some(4),
        });
        let mut out: Vec<Result<Value, ParseError>> = Vec::new();
        decoder.feed_into("{\"x\":1}\n{\"long\":", &mut out);
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(ParseError::BufferOverflow { limit: 4 })));
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn parser_reports_bad_lines_and_keeps_going() {
        use std::sync::{Arc, Mutex};

        let objects = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&objects);
        let err_sink = Arc::clone(&errors);
        let mut parser = NdjsonParser::<Value>::new(move |value| {
            sink.lock().unwrap().push(value);
            Ok(())
        })
        .on_error(move |err| err_sink.lock().unwrap().push(err.to_string()));

        parser.feed("{\"n\":1}\n{broken\n{\"n\"");
        parser.feed(":2}");
        parser.end();

        assert_eq!(*objects.lock().unwrap(), vec![json!({"n": 1}), json!({"n": 2})]);
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("{broken"));
    }
}
