//! Periodic host statistics sampler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::platform;
use crate::types::ProcStats;

/// Callback invoked with each sample.
pub type SendFn = Box<dyn Fn(ProcStats) + Send + Sync + 'static>;

/// Host proc-stats sampler.
///
/// Spawns a tokio task that periodically reads cpu, memory and cpu
/// temperature and delivers them through the configured callback.
pub struct ProcSampler {
    inner: Arc<Mutex<SamplerInner>>,
}

struct SamplerInner {
    send_fn: SendFn,
    cancel: Option<CancellationToken>,
    prev_idle: u64,
    prev_total: u64,
    primed: bool,
}

impl ProcSampler {
    pub fn new(send_fn: SendFn) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SamplerInner {
                send_fn,
                cancel: None,
                prev_idle: 0,
                prev_total: 0,
                primed: false,
            })),
        }
    }

    /// Starts periodic sampling at the given interval (seconds).
    ///
    /// Minimum interval is 1 second; default is 2 if 0 is passed.
    pub async fn start(&self, interval_sec: u32) {
        let mut inner = self.inner.lock().await;

        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
        }

        let interval_sec = match interval_sec {
            0 => 2,
            v => v.max(1),
        };

        // Prime CPU counters.
        let (idle, total) = platform::read_cpu_times();
        inner.prev_idle = idle;
        inner.prev_total = total;
        inner.primed = true;

        let cancel = CancellationToken::new();
        inner.cancel = Some(cancel.clone());

        let sampler = Arc::clone(&self.inner);
        let interval = Duration::from_secs(interval_sec as u64);

        tokio::spawn(async move {
            sample_loop(sampler, interval, cancel).await;
        });

        tracing::info!(interval_sec, "proc sampler started");
    }

    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
            inner.primed = false;
            tracing::info!("proc sampler stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.cancel.is_some()
    }
}

async fn sample_loop(inner: Arc<Mutex<SamplerInner>>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the first immediate tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mut guard = inner.lock().await;
                let stats = sample(&mut guard);
                (guard.send_fn)(stats);
            }
        }
    }
}

fn sample(inner: &mut SamplerInner) -> ProcStats {
    let (idle, total) = platform::read_cpu_times();
    let cpu_usage = cpu_usage(inner.primed, inner.prev_idle, inner.prev_total, idle, total);
    inner.prev_idle = idle;
    inner.prev_total = total;
    inner.primed = true;

    let (memory_used, memory_total) = match platform::read_mem_info() {
        Some((total, available)) => (Some(total - available), Some(total)),
        None => (None, None),
    };

    ProcStats {
        cpu_usage,
        cpu_temp: platform::read_cpu_temp(),
        memory_used,
        memory_total,
    }
}

/// Percentage of non-idle jiffies between two `/proc/stat` reads.
fn cpu_usage(primed: bool, prev_idle: u64, prev_total: u64, idle: u64, total: u64) -> Option<f64> {
    if !primed || total <= prev_total {
        return None;
    }
    let d_total = total - prev_total;
    let d_idle = idle.saturating_sub(prev_idle).min(d_total);
    let pct = (1.0 - d_idle as f64 / d_total as f64) * 100.0;
    Some((pct * 10.0).floor() / 10.0)
}
