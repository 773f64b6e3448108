mod request_id;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::{IdKind, StreamConfig};
use crate::emitter::TokenEmitter;
use crate::error::{HandlerError, ParseError};
use crate::result::StreamHandle;
use crate::stream::{NdjsonOptions, NdjsonParser, SseEvent, SseOptions, SseParser};

pub use request_id::{IdGenerator, RandomIds, SequentialIds};

/// Per-process factory for streams and parsers.
///
/// Owns the identifier generators and parser options resolved from
/// [`StreamConfig`]. Every call returns an independent instance.
#[derive(Clone)]
pub struct StreamFactory {
    request_ids: Arc<dyn IdGenerator>,
    call_ids: Arc<dyn IdGenerator>,
    sse: SseOptions,
    ndjson: NdjsonOptions,
}

impl StreamFactory {
    #[must_use]
    pub fn new(config: &StreamConfig) -> Self {
        let ids = &config.ids;
        let (request_ids, call_ids): (Arc<dyn IdGenerator>, Arc<dyn IdGenerator>) = match ids.kind
        {
            IdKind::Sequential => (
                Arc::new(SequentialIds::new(ids.request_prefix.as_str())),
                Arc::new(SequentialIds::new(ids.call_prefix.as_str())),
            ),
            IdKind::Random => (
                Arc::new(RandomIds::new(ids.request_prefix.as_str())),
                Arc::new(RandomIds::new(ids.call_prefix.as_str())),
            ),
        };
        tracing::debug!(id_kind = %ids.kind, "stream factory ready");
        Self {
            request_ids,
            call_ids,
            sse: config.sse.clone(),
            ndjson: config.ndjson.clone(),
        }
    }

    /// Replace the identifier generators.
    #[must_use]
    pub fn with_generators(
        mut self,
        request_ids: Arc<dyn IdGenerator>,
        call_ids: Arc<dyn IdGenerator>,
    ) -> Self {
        self.request_ids = request_ids;
        self.call_ids = call_ids;
        self
    }

    /// A fresh stream with its own emitter and cancellation token.
    #[must_use]
    pub fn create(&self) -> StreamHandle {
        self.build(CancellationToken::new())
    }

    /// A fresh stream cancelled whenever `parent` is.
    #[must_use]
    pub fn create_child_of(&self, parent: &CancellationToken) -> StreamHandle {
        self.build(parent.child_token())
    }

    pub fn sse_parser<F>(&self, on_event: F) -> SseParser
    where
        F: FnMut(SseEvent) -> Result<(), HandlerError> + Send + 'static,
    {
        SseParser::new(on_event).with_options(&self.sse)
    }

    pub fn ndjson_parser<T, F>(&self, on_object: F) -> NdjsonParser<T>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Result<(), HandlerError> + Send + 'static,
    {
        NdjsonParser::new(on_object).with_options(&self.ndjson)
    }

    /// Build an SSE parser wired to `on_error` as well.
    pub fn sse_parser_with_errors<F, E>(&self, on_event: F, on_error: E) -> SseParser
    where
        F: FnMut(SseEvent) -> Result<(), HandlerError> + Send + 'static,
        E: FnMut(ParseError) + Send + 'static,
    {
        self.sse_parser(on_event).on_error(on_error)
    }

    fn build(&self, cancel: CancellationToken) -> StreamHandle {
        StreamHandle::new(self.request_ids.next_id(), cancel, TokenEmitter::new())
            .with_call_ids(Arc::clone(&self.call_ids))
    }
}

impl Default for StreamFactory {
    fn default() -> Self {
        Self::new(&StreamConfig::default())
    }
}
