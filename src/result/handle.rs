use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{
    FinishReason, StreamDelta, StreamPhase, StreamResult, TokenStream, ToolCall,
    ToolCallAccumulator, ToolCallUpdate, Usage,
};
use crate::emitter::TokenEmitter;
use crate::error::StreamError;
use crate::observability::{log_stream_failure, log_stream_outcome};
use crate::registry::{Registry, Subscription};
use crate::state::IdGenerator;

/// Shared future resolving to a stream's single settlement.
pub type ResultFuture = Shared<BoxFuture<'static, Result<StreamResult, StreamError>>>;

type Settlement = Result<StreamResult, StreamError>;
type CompleteCallback = dyn Fn(&StreamResult) + Send + Sync;
type ErrorCallback = dyn Fn(&StreamError) + Send + Sync;

/// Single source of truth for one streamed response.
///
/// Provider drivers mutate it as deltas arrive; consumers observe it through
/// callbacks, [`StreamHandle::tokens`] or [`StreamHandle::result`]. Clones
/// refer to the same stream. Once a terminal phase is reached every mutation
/// is ignored.
///
/// If every clone is dropped while still streaming, the result settles with
/// [`StreamError::Abandoned`] and token streams end. Callbacks registered on
/// the handle count as clones if they capture one; capture a
/// [`WeakStreamHandle`] instead to keep abandonment working.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<Inner>,
}

/// Non-owning reference to a [`StreamHandle`].
#[derive(Clone)]
pub struct WeakStreamHandle {
    inner: Weak<Inner>,
}

impl WeakStreamHandle {
    /// The handle, if any strong clone is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<StreamHandle> {
        self.inner.upgrade().map(|inner| StreamHandle { inner })
    }
}

struct Inner {
    request_id: String,
    cancel: CancellationToken,
    emitter: TokenEmitter,
    state: Mutex<StreamState>,
    // Held from appending a token until it is published, and by terminal
    // transitions. Reentrant so callbacks on the emitting thread may settle.
    publish: ReentrantMutex<()>,
    completions: Registry<CompleteCallback>,
    errors: Registry<ErrorCallback>,
    result: ResultFuture,
    started: Instant,
}

struct StreamState {
    phase: StreamPhase,
    text: String,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finish_reason: FinishReason,
    usage: Option<Usage>,
    call_ids: Option<Arc<dyn IdGenerator>>,
    settle: Option<oneshot::Sender<Settlement>>,
}

impl StreamHandle {
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        cancel: CancellationToken,
        emitter: TokenEmitter,
    ) -> Self {
        let (settle, settled) = oneshot::channel::<Settlement>();
        let result = async move { settled.await.unwrap_or(Err(StreamError::Abandoned)) }
            .boxed()
            .shared();

        Self {
            inner: Arc::new(Inner {
                request_id: request_id.into(),
                cancel,
                emitter,
                state: Mutex::new(StreamState {
                    phase: StreamPhase::Streaming,
                    text: String::new(),
                    tool_calls: BTreeMap::new(),
                    finish_reason: FinishReason::Stop,
                    usage: None,
                    call_ids: None,
                    settle: Some(settle),
                }),
                publish: ReentrantMutex::new(()),
                completions: Registry::new(),
                errors: Registry::new(),
                result,
                started: Instant::now(),
            }),
        }
    }

    /// Fill tool calls that arrive without an id from `call_ids`.
    #[must_use]
    pub fn with_call_ids(self, call_ids: Arc<dyn IdGenerator>) -> Self {
        self.inner.state.lock().call_ids = Some(call_ids);
        self
    }

    // -- Mutation ------------------------------------------------------------

    /// Append `token` to the text and publish it to token subscribers.
    ///
    /// A token that reaches the text is always delivered to the subscribers
    /// registered at that time, even if another thread settles the stream
    /// concurrently.
    pub fn emit_token(&self, token: &str) {
        let _publish = self.inner.publish.lock();
        if !self.mutate(|state| state.text.push_str(token)) {
            return;
        }
        self.inner.emitter.emit(token);
    }

    /// Append `text` without publishing it.
    pub fn append_text(&self, text: &str) {
        self.mutate(|state| state.text.push_str(text));
    }

    /// Begin the tool call at `index`, replacing any previous one there.
    pub fn start_tool_call(&self, index: u32, id: &str, name: &str) {
        self.mutate(|state| {
            state
                .tool_calls
                .insert(index, ToolCallAccumulator::new(id, name));
        });
    }

    pub fn append_tool_call_arguments(&self, index: u32, fragment: &str) {
        self.mutate(|state| {
            state
                .tool_calls
                .entry(index)
                .or_default()
                .arguments
                .push_str(fragment);
        });
    }

    pub fn update_tool_call(&self, index: u32, update: ToolCallUpdate) {
        self.mutate(|state| update.apply_to(state.tool_calls.entry(index).or_default()));
    }

    pub fn set_finish_reason(&self, reason: FinishReason) {
        self.mutate(|state| state.finish_reason = reason);
    }

    pub fn set_usage(&self, usage: Usage) {
        self.mutate(|state| state.usage = Some(usage));
    }

    /// Finish the stream successfully.
    ///
    /// Assembles tool calls in index order, settles the result, runs
    /// completion callbacks and ends the token emitter. A tool call whose
    /// arguments are not valid JSON is dropped and logged.
    pub fn complete(&self) {
        let Some((result, settle)) = self.transition(StreamPhase::Completed) else {
            return;
        };
        if let Some(settle) = settle {
            let _ = settle.send(Ok(result.clone()));
        }
        let _ = self.inner.errors.close();
        if let Some(callbacks) = self.inner.completions.close() {
            for callback in callbacks {
                callback(&result);
            }
        }
        self.inner.emitter.end();
        log_stream_outcome(
            &self.inner.request_id,
            StreamPhase::Completed,
            &result,
            self.inner.started.elapsed(),
        );
    }

    /// Fail the stream with `err`.
    pub fn set_error(&self, err: StreamError) {
        let settle = {
            let _publish = self.inner.publish.lock();
            let mut state = self.inner.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = StreamPhase::Errored;
            state.settle.take()
        };
        if let Some(settle) = settle {
            let _ = settle.send(Err(err.clone()));
        }
        let _ = self.inner.completions.close();
        if let Some(callbacks) = self.inner.errors.close() {
            for callback in callbacks {
                callback(&err);
            }
        }
        self.inner.emitter.end();
        log_stream_failure(&self.inner.request_id, &err, self.inner.started.elapsed());
    }

    /// Stop the stream early.
    ///
    /// Cancels the owned token and settles with what has accumulated so far,
    /// marked `aborted`. Completion callbacks do not run. Safe to call from
    /// any task at any time; a no-op once terminal.
    pub fn abort(&self) {
        let Some((result, settle)) = self.transition(StreamPhase::Aborted) else {
            return;
        };
        self.inner.cancel.cancel();
        if let Some(settle) = settle {
            let _ = settle.send(Ok(result.clone()));
        }
        let _ = self.inner.completions.close();
        let _ = self.inner.errors.close();
        self.inner.emitter.end();
        log_stream_outcome(
            &self.inner.request_id,
            StreamPhase::Aborted,
            &result,
            self.inner.started.elapsed(),
        );
    }

    /// Same as [`StreamHandle::abort`].
    pub fn set_aborted(&self) {
        self.abort();
    }

    /// Dispatch one delta to the matching operation.
    pub fn apply(&self, delta: StreamDelta) {
        match delta {
            StreamDelta::Token(token) => self.emit_token(&token),
            StreamDelta::Text(text) => self.append_text(&text),
            StreamDelta::ToolCallStart { index, id, name } => {
                self.start_tool_call(index, &id, &name);
            }
            StreamDelta::ToolCallArguments { index, fragment } => {
                self.append_tool_call_arguments(index, &fragment);
            }
            StreamDelta::ToolCallUpdate { index, update } => self.update_tool_call(index, update),
            StreamDelta::FinishReason(reason) => self.set_finish_reason(reason),
            StreamDelta::Usage(usage) => self.set_usage(usage),
            StreamDelta::Complete => self.complete(),
            StreamDelta::Error(err) => self.set_error(err),
            StreamDelta::Abort => self.abort(),
        }
    }

    // -- Observation ---------------------------------------------------------

    /// The stream's settlement. Every call returns a clone of the same future.
    #[must_use]
    pub fn result(&self) -> ResultFuture {
        self.inner.result.clone()
    }

    /// Run `callback` for every token emitted from now on.
    ///
    /// A callback that captures a [`StreamHandle`] keeps the stream alive;
    /// use [`StreamHandle::downgrade`] when it only needs to reach back.
    pub fn on_token<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.emitter.on_token(callback)
    }

    /// Run `callback` once on successful completion. Inert once terminal.
    ///
    /// Like [`StreamHandle::on_token`], capture a [`WeakStreamHandle`] rather
    /// than a clone.
    pub fn on_complete<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StreamResult) + Send + Sync + 'static,
    {
        let callback: Arc<CompleteCallback> = Arc::new(callback);
        self.inner
            .completions
            .insert(callback)
            .unwrap_or_else(|_| Subscription::inert())
    }

    /// Run `callback` once if the stream fails. Inert once terminal.
    ///
    /// Like [`StreamHandle::on_token`], capture a [`WeakStreamHandle`] rather
    /// than a clone.
    pub fn on_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        let callback: Arc<ErrorCallback> = Arc::new(callback);
        self.inner
            .errors
            .insert(callback)
            .unwrap_or_else(|_| Subscription::inert())
    }

    /// A new independent consumer of the tokens emitted from now on.
    #[must_use]
    pub fn tokens(&self) -> TokenStream {
        TokenStream::new(&self.inner.emitter)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakStreamHandle {
        WeakStreamHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    #[must_use]
    pub fn phase(&self) -> StreamPhase {
        self.inner.state.lock().phase
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    /// Text accumulated so far.
    #[must_use]
    pub fn text(&self) -> String {
        self.inner.state.lock().text.clone()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    // -- Internals -----------------------------------------------------------

    /// Apply `f` while streaming. Returns whether it ran.
    fn mutate(&self, f: impl FnOnce(&mut StreamState)) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase.is_terminal() {
            return false;
        }
        f(&mut state);
        true
    }

    /// Move to a settling phase and build the result, unless already terminal.
    fn transition(
        &self,
        phase: StreamPhase,
    ) -> Option<(StreamResult, Option<oneshot::Sender<Settlement>>)> {
        let _publish = self.inner.publish.lock();
        let mut state = self.inner.state.lock();
        if state.phase.is_terminal() {
            return None;
        }
        state.phase = phase;

        let accumulators = std::mem::take(&mut state.tool_calls);
        let tool_calls = assemble_tool_calls(
            &self.inner.request_id,
            accumulators,
            state.call_ids.as_deref(),
        );
        let result = StreamResult {
            text: state.text.clone(),
            tool_calls,
            finish_reason: state.finish_reason,
            usage: state.usage,
            aborted: phase == StreamPhase::Aborted,
        };
        Some((result, state.settle.take()))
    }
}

fn assemble_tool_calls(
    request_id: &str,
    accumulators: BTreeMap<u32, ToolCallAccumulator>,
    call_ids: Option<&dyn IdGenerator>,
) -> Vec<ToolCall> {
    let mut tool_calls = Vec::with_capacity(accumulators.len());
    for (index, accumulator) in accumulators {
        let arguments = match accumulator.parse_arguments() {
            Ok(arguments) => arguments,
            Err(err) => {
                tracing::warn!(
                    request_id,
                    index,
                    tool = %accumulator.name,
                    "dropping tool call with malformed arguments: {err}"
                );
                continue;
            }
        };
        let id = match (accumulator.id.is_empty(), call_ids) {
            (true, Some(ids)) => ids.next_id(),
            _ => accumulator.id,
        };
        tool_calls.push(ToolCall {
            id,
            name: accumulator.name,
            arguments,
        });
    }
    tool_calls
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.phase.is_terminal() {
            return;
        }
        // The dropped sender settles the shared future with `Abandoned`.
        tracing::debug!(request_id = %self.request_id, "stream handle dropped while streaming");
        state.settle = None;
        self.cancel.cancel();
        self.emitter.end();
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StreamHandle")
            .field("request_id", &self.inner.request_id)
            .field("phase", &state.phase)
            .field("text_len", &state.text.len())
            .field("tool_calls", &state.tool_calls.len())
            .finish()
    }
}
