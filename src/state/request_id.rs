use std::sync::atomic::{AtomicU64, Ordering};

use crate::util::next_generated_id;

/// Source of request and tool-call identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// `prefix-0000000000000001`, `prefix-0000000000000002`, ...
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIds {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        next_generated_id(&self.prefix, &self.counter)
    }
}

/// Per-process seeded UUIDs, optionally prefixed.
#[derive(Debug)]
pub struct RandomIds {
    prefix: String,
    seed: u128,
    counter: AtomicU64,
}

impl RandomIds {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self::with_seed(prefix, (seed_hi << 64) | seed_lo)
    }

    /// Deterministic variant for tests and replay.
    #[must_use]
    pub fn with_seed(prefix: impl Into<String>, seed: u128) -> Self {
        Self {
            prefix: prefix.into(),
            seed,
            counter: AtomicU64::new(1),
        }
    }

    fn next_uuid(&self) -> uuid::Uuid {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let spread = (u128::from(crate::util::mix_u64(seq)) << 64) | u128::from(seq);
        uuid::Uuid::from_u128(self.seed ^ spread)
    }
}

impl IdGenerator for RandomIds {
    fn next_id(&self) -> String {
        let uuid = self.next_uuid();
        if self.prefix.is_empty() {
            uuid.to_string()
        } else {
            format!("{}-{uuid}", self.prefix)
        }
    }
}
