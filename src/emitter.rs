use std::sync::Arc;

use crate::registry::{Registry, Subscription};

pub type TokenCallback = dyn Fn(&str) + Send + Sync;
pub type EndCallback = dyn Fn() + Send + Sync;

/// Multicast primitive for streamed tokens.
///
/// Every [`TokenEmitter::emit`] is delivered synchronously to the callbacks
/// registered at that moment, in registration order. Nothing is buffered: a
/// subscriber that registers late never sees earlier tokens. Clones share the
/// same subscribers.
#[derive(Clone)]
pub struct TokenEmitter {
    shared: Arc<EmitterShared>,
}

struct EmitterShared {
    tokens: Registry<TokenCallback>,
    ends: Registry<EndCallback>,
}

impl TokenEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(EmitterShared {
                tokens: Registry::new(),
                ends: Registry::new(),
            }),
        }
    }

    /// Register a token callback. Inert if the emitter has already ended.
    pub fn on_token<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let callback: Arc<TokenCallback> = Arc::new(callback);
        self.shared
            .tokens
            .insert(callback)
            .unwrap_or_else(|_| Subscription::inert())
    }

    /// Register an end callback. Runs immediately if the emitter has already ended.
    pub fn on_end<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback: Arc<EndCallback> = Arc::new(callback);
        match self.shared.ends.insert(callback) {
            Ok(subscription) => subscription,
            Err(callback) => {
                callback();
                Subscription::inert()
            }
        }
    }

    /// Publish `token` to every current subscriber.
    pub fn emit(&self, token: &str) {
        for callback in self.shared.tokens.snapshot() {
            callback(token);
        }
    }

    /// Signal end-of-stream. Idempotent: end callbacks run once, token
    /// subscribers are dropped and later emits are ignored.
    pub fn end(&self) {
        let Some(end_callbacks) = self.shared.ends.close() else {
            return;
        };
        let _ = self.shared.tokens.close();
        for callback in end_callbacks {
            callback();
        }
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.shared.ends.is_closed()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.tokens.len()
    }
}

impl Default for TokenEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEmitter")
            .field("subscribers", &self.subscriber_count())
            .field("ended", &self.is_ended())
            .finish()
    }
}
