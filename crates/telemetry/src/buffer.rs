use std::collections::VecDeque;

use printlink_protocol::constants::MAX_MISSED_JOB_EVENTS;
use serde_json::{Map, Value};
use tokio::time::Instant;

/// Bounded FIFO of `job_info` payloads generated while the remote session
/// was down.
///
/// Backed by a `VecDeque`. When full, the oldest entry is evicted on each
/// push. Each entry keeps the monotonic time it was generated so replay can
/// report how long ago it happened.
#[derive(Debug, Clone)]
pub struct MissedJobQueue {
    buf: VecDeque<(Instant, Map<String, Value>)>,
    capacity: usize,
}

impl Default for MissedJobQueue {
    fn default() -> Self {
        Self::new(MAX_MISSED_JOB_EVENTS)
    }
}

impl MissedJobQueue {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "MissedJobQueue capacity must be > 0");
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Queues an event, evicting the oldest entry when at capacity.
    pub fn push(&mut self, at: Instant, event: Map<String, Value>) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back((at, event));
    }

    /// Empties the queue, returning events oldest first with `delay` set to
    /// the whole seconds (rounded) elapsed since each was generated.
    pub fn drain_with_delay(&mut self, now: Instant) -> Vec<Map<String, Value>> {
        self.buf
            .drain(..)
            .map(|(at, mut event)| {
                let elapsed = now.saturating_duration_since(at).as_secs_f64();
                event.insert("delay".into(), Value::from((elapsed + 0.5).floor() as i64));
                event
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
