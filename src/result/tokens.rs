use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures_util::Stream;
use parking_lot::Mutex;

use crate::emitter::TokenEmitter;
use crate::registry::Subscription;

/// Async sequence of the tokens a stream emits after this consumer was created.
///
/// Yields tokens in emission order and ends once the stream reaches any
/// terminal phase or every handle to it is dropped. Each consumer has its own
/// queue; dropping it unsubscribes from the stream.
pub struct TokenStream {
    slot: Arc<Mutex<TokenSlot>>,
    token_sub: Option<Subscription>,
    end_sub: Option<Subscription>,
}

#[derive(Default)]
struct TokenSlot {
    queue: VecDeque<String>,
    waiter: Option<Waker>,
    done: bool,
}

impl TokenSlot {
    fn take_waiter(&mut self) -> Option<Waker> {
        self.waiter.take()
    }
}

impl TokenStream {
    pub(crate) fn new(emitter: &TokenEmitter) -> Self {
        let slot = Arc::new(Mutex::new(TokenSlot::default()));

        let token_slot = Arc::clone(&slot);
        let token_sub = emitter.on_token(move |token| {
            let waiter = {
                let mut slot = token_slot.lock();
                if slot.done {
                    return;
                }
                slot.queue.push_back(token.to_owned());
                slot.take_waiter()
            };
            if let Some(waker) = waiter {
                waker.wake();
            }
        });

        let end_slot = Arc::clone(&slot);
        let end_sub = emitter.on_end(move || {
            let waiter = {
                let mut slot = end_slot.lock();
                slot.done = true;
                slot.take_waiter()
            };
            if let Some(waker) = waiter {
                waker.wake();
            }
        });

        Self {
            slot,
            token_sub: Some(token_sub),
            end_sub: Some(end_sub),
        }
    }

    /// Number of tokens received but not yet polled.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.slot.lock().queue.len()
    }
}

impl Stream for TokenStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let mut slot = self.slot.lock();
        if let Some(token) = slot.queue.pop_front() {
            return Poll::Ready(Some(token));
        }
        if slot.done {
            return Poll::Ready(None);
        }
        let stale = slot
            .waiter
            .as_ref()
            .map_or(true, |waker| !waker.will_wake(cx.waker()));
        if stale {
            slot.waiter = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        if let Some(sub) = self.token_sub.take() {
            sub.unsubscribe();
        }
        if let Some(sub) = self.end_sub.take() {
            sub.unsubscribe();
        }
    }
}

impl std::fmt::Debug for TokenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("TokenStream")
            .field("buffered", &slot.queue.len())
            .field("done", &slot.done)
            .finish()
    }
}
