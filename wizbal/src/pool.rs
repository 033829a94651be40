use crate::Backend;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// An immutable snapshot of the alive backends of a service.
///
/// Pools are never updated: a refresh builds a new one and replaces the old.
#[derive(Debug)]
pub struct Pool {
    backends: Vec<Backend>,
    resolved_at: Instant,
}

impl Pool {
    /// Create a pool stamped with the current instant.
    pub fn new(backends: Vec<Backend>) -> Self {
        Self {
            backends,
            resolved_at: Instant::now(),
        }
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn resolved_at(&self) -> Instant {
        self.resolved_at
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Whether the pool is younger than `ttl`.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.resolved_at.elapsed() < ttl
    }

    /// Pick a backend uniformly at random.
    pub fn select(&self) -> Option<&Backend> {
        self.select_with(&mut rand::thread_rng())
    }

    /// Pick a backend uniformly at random using `rng`.
    ///
    /// A single backend is returned without drawing from `rng`.
    pub fn select_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Backend> {
        match self.backends.len() {
            0 => None,
            1 => self.backends.first(),
            n => self.backends.get(rng.gen_range(0..n)),
        }
    }
}
