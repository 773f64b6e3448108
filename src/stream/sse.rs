/// SSE (Server-Sent Events) record decoder and callback parser.
///
/// Handles buffering of partial records across arbitrarily split chunks and
/// the field semantics of the
/// [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html),
/// with configurable line and record delimiters.
use memchr::memmem;
use serde::{Deserialize, Serialize};

use super::pump::ChunkSink;
use crate::error::{HandlerError, ParseError};

/// Once this many consumed bytes sit at the front of the buffer, they are
/// drained even if the buffer is not yet half consumed.
const COMPACT_THRESHOLD: usize = 8 * 1024;

/// A parsed SSE record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
}

/// Delimiters and limits for SSE decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseOptions {
    #[serde(default = "default_line_delimiter")]
    pub line_delimiter: String,
    #[serde(default = "default_event_delimiter")]
    pub event_delimiter: String,
    #[serde(default)]
    pub max_pending_bytes: Option<usize>,
}

fn default_line_delimiter() -> String {
    "\n".to_string()
}
fn default_event_delimiter() -> String {
    "\n\n".to_string()
}

impl SseOptions {
    /// Options for streams that use `\r\n` line endings throughout.
    #[must_use]
    pub fn crlf() -> Self {
        Self {
            line_delimiter: "\r\n".to_string(),
            event_delimiter: "\r\n\r\n".to_string(),
            max_pending_bytes: None,
        }
    }
}

impl Default for SseOptions {
    fn default() -> Self {
        Self {
            line_delimiter: default_line_delimiter(),
            event_delimiter: default_event_delimiter(),
            max_pending_bytes: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SseDecoder: incremental record decoder
// ---------------------------------------------------------------------------

/// Incremental SSE decoder.
///
/// Feed it text chunks split at arbitrary boundaries and it yields one
/// [`SseEvent`] per complete record that carries at least one `data` field.
/// The events produced never depend on how the input was split.
pub struct SseDecoder {
    buffer: String,
    /// Start of the unconsumed part of `buffer`.
    read_offset: usize,
    /// Where the next delimiter search starts; always `>= read_offset`.
    scan_from: usize,
    line_delimiter: String,
    event_delimiter_len: usize,
    event_finder: memmem::Finder<'static>,
    max_pending_bytes: Option<usize>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(&SseOptions::default())
    }

    /// Build a decoder from `options`. An empty delimiter falls back to its default.
    #[must_use]
    pub fn with_options(options: &SseOptions) -> Self {
        let line_delimiter = if options.line_delimiter.is_empty() {
            tracing::warn!("empty SSE line delimiter, using \\n");
            default_line_delimiter()
        } else {
            options.line_delimiter.clone()
        };
        let event_delimiter = if options.event_delimiter.is_empty() {
            tracing::warn!("empty SSE event delimiter, using \\n\\n");
            default_event_delimiter()
        } else {
            options.event_delimiter.clone()
        };
        Self {
            buffer: String::new(),
            read_offset: 0,
            scan_from: 0,
            line_delimiter,
            event_delimiter_len: event_delimiter.len(),
            event_finder: memmem::Finder::new(event_delimiter.as_bytes()).into_owned(),
            max_pending_bytes: options.max_pending_bytes,
        }
    }

    /// Feed raw text and return the complete events it finished.
    ///
    /// A pending-buffer overflow is logged and the events parsed before it
    /// are still returned; use [`SseDecoder::feed_into`] to observe it.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        if let Err(err) = self.feed_into(chunk, &mut out) {
            tracing::warn!("SSE decoder: {err}");
        }
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::BufferOverflow`] when the unterminated remainder
    /// grows past `max_pending_bytes`; the remainder is discarded and the
    /// decoder keeps working on subsequent input.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) -> Result<(), ParseError> {
        self.buffer.push_str(chunk);

        while let Some(rel_pos) = self
            .event_finder
            .find(&self.buffer.as_bytes()[self.scan_from..])
        {
            let record_end = self.scan_from + rel_pos;
            parse_record(
                &self.buffer[self.read_offset..record_end],
                &self.line_delimiter,
                out,
            );
            self.read_offset = record_end + self.event_delimiter_len;
            self.scan_from = self.read_offset;
        }

        // A delimiter may straddle this chunk and the next one; keep enough
        // of the tail in the search window to catch it.
        let overlap_start = self
            .buffer
            .len()
            .saturating_sub(self.event_delimiter_len - 1);
        self.scan_from = self.scan_from.max(overlap_start);

        self.compact();
        self.check_pending_limit()
    }

    /// Flush the unterminated remainder as one final record.
    pub fn finish_into(&mut self, out: &mut Vec<SseEvent>) {
        let pending = &self.buffer[self.read_offset..];
        if !pending.is_empty() {
            parse_record(pending, &self.line_delimiter, out);
        }
        self.reset();
    }

    /// Drop all buffered input.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.read_offset = 0;
        self.scan_from = 0;
    }

    /// Number of buffered bytes not yet resolved into a record.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_offset
    }

    fn compact(&mut self) {
        if self.read_offset == self.buffer.len() {
            self.reset();
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2
                || self.read_offset >= COMPACT_THRESHOLD);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.scan_from -= self.read_offset;
            self.read_offset = 0;
        }
    }

    fn check_pending_limit(&mut self) -> Result<(), ParseError> {
        match self.max_pending_bytes {
            Some(limit) if self.pending_len() > limit => {
                self.reset();
                Err(ParseError::BufferOverflow { limit })
            }
            _ => Ok(()),
        }
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fields of the record currently being assembled.
#[derive(Default)]
struct PendingEvent {
    event: Option<String>,
    data: String,
    has_data: bool,
    id: Option<String>,
    retry: Option<u64>,
}

impl PendingEvent {
    fn apply_line(&mut self, line: &str) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                } else {
                    self.has_data = true;
                }
                self.data.push_str(value);
            }
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(ms) = value.parse::<u64>() {
                        self.retry = Some(ms);
                    }
                }
            }
            // Unknown field names are ignored.
            _ => {}
        }
    }

    fn into_event(self) -> Option<SseEvent> {
        self.has_data.then_some(SseEvent {
            event: self.event,
            data: self.data,
            id: self.id,
            retry: self.retry,
        })
    }
}

fn parse_record(record: &str, line_delimiter: &str, out: &mut Vec<SseEvent>) {
    let mut pending = PendingEvent::default();
    for line in record.split(line_delimiter) {
        pending.apply_line(line);
    }
    if let Some(event) = pending.into_event() {
        out.push(event);
    }
}

// ---------------------------------------------------------------------------
// SseParser: callback front end
// ---------------------------------------------------------------------------

type EventHandler = Box<dyn FnMut(SseEvent) -> Result<(), HandlerError> + Send>;
type ErrorHandler = Box<dyn FnMut(ParseError) + Send>;
type EndHandler = Box<dyn FnMut() + Send>;

/// Callback-driven SSE parser.
///
/// ```
/// use genstream::stream::SseParser;
///
/// let mut seen = Vec::new();
/// let mut parser = SseParser::new(move |event| {
///     seen.push(event.data);
///     Ok(())
/// });
/// parser.feed("data: he");
/// parser.feed("llo\n\n");
/// parser.end();
/// ```
///
/// An `on_event` error never stops parsing: it is wrapped in
/// [`ParseError::Handler`] and passed to `on_error`.
pub struct SseParser {
    decoder: SseDecoder,
    on_event: EventHandler,
    on_error: Option<ErrorHandler>,
    on_end: Option<EndHandler>,
    scratch: Vec<SseEvent>,
    ended: bool,
}

impl SseParser {
    pub fn new<F>(on_event: F) -> Self
    where
        F: FnMut(SseEvent) -> Result<(), HandlerError> + Send + 'static,
    {
        Self {
            decoder: SseDecoder::new(),
            on_event: Box::new(on_event),
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

    /// Replace the delimiters and limits. Any buffered input is discarded.
    #[must_use]
    pub fn with_options(mut self, options: &SseOptions) -> Self {
        self.decoder = SseDecoder::with_options(options);
        self
    }

    /// Feed a chunk of text, dispatching every record it completes.
    pub fn feed(&mut self, chunk: &str) {
        if self.ended {
            tracing::debug!(len = chunk.len(), "SSE chunk after end() ignored");
            return;
        }
        let result = self.decoder.feed_into(chunk, &mut self.scratch);
        self.dispatch();
        if let Err(err) = result {
            self.report(err);
        }
    }

    /// Flush the remainder as a final record and signal end-of-stream once.
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

    /// Discard buffered input and re-arm a parser that has ended. No callbacks run.
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.scratch.clear();
        self.ended = false;
    }

    fn dispatch(&mut self) {
        for event in self.scratch.drain(..) {
            if let Err(err) = (self.on_event)(event) {
                let err = ParseError::Handler(err);
                match self.on_error.as_mut() {
                    Some(on_error) => on_error(err),
                    None => tracing::debug!("SSE event handler failed: {err}"),
                }
            }
        }
    }

    fn report(&mut self, err: ParseError) {
        match self.on_error.as_mut() {
            Some(on_error) => on_error(err),
            None => tracing::warn!("SSE parser: {err}"),
        }
    }
}

impl ChunkSink for SseParser {
    fn feed(&mut self, chunk: &str) {
        SseParser::feed(self, chunk);
    }

    fn end(&mut self) {
        SseParser::end(self);
    }

    fn reset(&mut self) {
        SseParser::reset(self);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
