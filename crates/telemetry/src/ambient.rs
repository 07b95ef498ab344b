//! Ambient temperature inference from idle nozzle readings.

use std::time::Duration;

use tokio::time::Instant;

use crate::cache::TempPair;

/// Estimate used until a persisted or detected value exists.
pub const INITIAL_AMBIENT: i64 = 85;

/// Period between detector ticks.
pub const AMBIENT_TICK: Duration = Duration::from_secs(5);

const AMBIENT_CHECK_TIME: Duration = Duration::from_secs(5 * 60);
const TARGET_CHECK_TIME: Duration = Duration::from_secs(60 * 60);
const SAMPLE_CHECK_TIME: Duration = Duration::from_secs(20);

/// Maximum spread in °C between two samples for them to count as steady.
const STEADY_SPREAD: i64 = 2;

/// Polling state machine that infers the ambient temperature.
///
/// Two consecutive idle `tool0` samples that agree within 2 °C become the
/// new estimate. Once settled it re-samples every five minutes. While the
/// heater has a target it backs off for an hour.
#[derive(Debug, Clone)]
pub struct AmbientDetector {
    ambient: i64,
    pending_sample: Option<i64>,
    last_sample: Option<Instant>,
    interval: Duration,
    running: bool,
}

impl AmbientDetector {
    pub fn new(initial: i64) -> Self {
        Self {
            ambient: initial,
            pending_sample: None,
            last_sample: None,
            interval: AMBIENT_CHECK_TIME,
            running: false,
        }
    }

    pub fn ambient(&self) -> i64 {
        self.ambient
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Begins polling. An idle reading below the current estimate lowers it
    /// immediately; the new value is returned when that happens.
    pub fn start(&mut self, tool0: Option<TempPair>) -> Option<i64> {
        if self.running {
            return None;
        }
        self.running = true;
        let [current, _] = tool0?;
        if current < self.ambient {
            self.ambient = current;
            return Some(current);
        }
        None
    }

    /// Halts polling. The estimate is kept.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Processes one tick. Returns the new estimate when it changed.
    pub fn tick(&mut self, now: Instant, tool0: Option<TempPair>) -> Option<i64> {
        if !self.running {
            return None;
        }
        let Some([temp, target]) = tool0 else {
            self.pending_sample = None;
            return None;
        };
        if target != 0 {
            self.pending_sample = None;
            self.last_sample = Some(now);
            self.interval = TARGET_CHECK_TIME;
            return None;
        }
        if let Some(last) = self.last_sample {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }

        match self.pending_sample {
            Some(first) if (temp - first).abs() <= STEADY_SPREAD => {
                let previous = self.ambient;
                self.ambient = ((temp + first) as f64 / 2.0 + 0.5).floor() as i64;
                self.pending_sample = None;
                self.last_sample = Some(now);
                self.interval = AMBIENT_CHECK_TIME;
                if previous != self.ambient {
                    tracing::debug!(ambient = self.ambient, "new ambient estimate");
                    return Some(self.ambient);
                }
                None
            }
            _ => {
                self.pending_sample = Some(temp);
                self.interval = SAMPLE_CHECK_TIME;
                None
            }
        }
    }
}
