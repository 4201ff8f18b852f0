//! Timestamps and identifier generation.
//!
//! Wall-clock timestamps come from `chrono`; monotonic millisecond readings
//! come from a process-local [`Clock`] so that latency math never goes
//! backwards across NTP adjustments. Session and trace identifiers are
//! UUID v4 strings.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use uuid::Uuid;

/// Generate a fresh session identifier.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a fresh trace identifier for correlating a single execution's
/// log lines and events.
pub fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Process-local clock combining wall time with a monotonic origin.
///
/// `monotonic_ms` readings are strictly non-decreasing for the lifetime of
/// the `Clock` instance, which makes them safe for latency measurement and
/// for ordering within a single process.
///
/// # Example
///
/// ```rust
/// use agentmesh::clock::Clock;
///
/// let clock = Clock::new();
/// let a = clock.monotonic_ms();
/// let b = clock.monotonic_ms();
/// assert!(b >= a);
/// ```
#[derive(Debug)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Create a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Current UTC wall-clock time.
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Milliseconds elapsed since this clock was created. Never decreases.
    pub fn monotonic_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Strictly increasing sequence numbers, used for per-session realtime
/// event ordering.
///
/// The first value issued is `1`, so `0` can mean "nothing seen yet" for
/// consumers resuming from a snapshot.
#[derive(Debug)]
pub struct SequenceGen {
    next: AtomicU64,
}

impl SequenceGen {
    /// Create a generator whose first issued value is `1`.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Issue the next sequence number.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceGen {
    fn default() -> Self {
        Self::new()
    }
}
