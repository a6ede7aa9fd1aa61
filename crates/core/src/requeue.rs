//! Scheduling decision returned by a reconcile pass.

use std::time::Duration;

/// What the work queue should do with a key once a pass finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Nothing left to do until the next watch event.
    Done,
    /// Poll again after the given delay; not a failure.
    After(Duration),
    /// The pass failed; retry with per-key exponential backoff.
    Backoff,
}

impl Requeue {
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}
