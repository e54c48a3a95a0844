//! Cooperative cancellation for agent runs and workflows.
//!
//! A `CancelSignal` is a shared abort flag plus an optional deadline. The
//! agent loop polls it before every iteration and between retry attempts;
//! nothing is interrupted mid-call.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Cloneable cancellation handle. All clones share one flag.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelSignal {
    /// A signal that only fires when `cancel()` is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that also fires once `timeout` has elapsed from now.
    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}
