//! Multi-band FIFO queue with aging-based priority boosts.
//!
//! One FIFO per priority band under a single mutex. A background sweeper
//! re-evaluates waiting entries at the configured cadence: entries whose
//! boosted priority crosses a band boundary move to the head of the higher
//! band, so long-waiting low-priority work eventually overtakes fresh
//! high-priority work instead of starving behind it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use querygate_error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::priority::{AgingConfig, ConnectionPriority};

const BAND_COUNT: usize = 4;

struct Entry<T> {
    payload: T,
    base: ConnectionPriority,
    boost: u32,
    enqueued_at: Instant,
    starved: bool,
}

impl<T> Entry<T> {
    /// Band this entry currently belongs in.
    fn band(&self) -> usize {
        (self.base.value() + self.boost).min(3) as usize
    }
}

#[derive(Default)]
struct StatsCells {
    total_boosts_applied: AtomicU64,
    starvation_alerts: AtomicU64,
    dequeued: AtomicU64,
    total_wait_us: AtomicU64,
    max_wait_us: AtomicU64,
}

/// Aggregate queue statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingStats {
    pub total_boosts_applied: u64,
    pub starvation_alerts: u64,
    pub avg_wait_time_us: u64,
    pub max_wait_time_us: u64,
}

/// Priority queue with background aging.
pub struct AgingQueue<T> {
    config: AgingConfig,
    bands: Mutex<[VecDeque<Entry<T>>; BAND_COUNT]>,
    notify: Notify,
    closed: AtomicBool,
    stats: StatsCells,
}

impl<T: Send + 'static> AgingQueue<T> {
    #[must_use]
    pub fn new(config: AgingConfig) -> Self {
        Self {
            config,
            bands: Mutex::new(std::array::from_fn(|_| VecDeque::new())),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            stats: StatsCells::default(),
        }
    }

    /// Append an entry to its base band.
    ///
    /// Fails once the queue is closed for shutdown.
    pub fn enqueue(&self, priority: ConnectionPriority, payload: T) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::connection_failed("queue is closed"));
        }

        let entry = Entry {
            payload,
            base: priority,
            boost: 0,
            enqueued_at: Instant::now(),
            starved: false,
        };
        self.bands.lock()[priority.value() as usize].push_back(entry);
        self.notify.notify_one();
        Ok(())
    }

    /// Pop the head of the highest-priority non-empty allowed band.
    pub fn try_dequeue(&self, allowed: &[ConnectionPriority]) -> Option<T> {
        let entry = {
            let mut bands = self.bands.lock();
            let mut found = None;
            for band in (0..BAND_COUNT).rev() {
                let band_allowed = allowed.iter().any(|p| p.value() as usize == band);
                if band_allowed {
                    if let Some(entry) = bands[band].pop_front() {
                        found = Some(entry);
                        break;
                    }
                }
            }
            found?
        };

        let waited = entry.enqueued_at.elapsed();
        self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_wait_us
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
        self.stats
            .max_wait_us
            .fetch_max(waited.as_micros() as u64, Ordering::Relaxed);

        // Leftover permit semantics: wake the next waiter if work remains.
        if !self.is_empty() {
            self.notify.notify_one();
        }
        Some(entry.payload)
    }

    /// Wait for an entry in one of the allowed bands.
    ///
    /// Returns `None` when the queue closes or the token fires.
    pub async fn dequeue(
        &self,
        allowed: &[ConnectionPriority],
        token: &CancellationToken,
    ) -> Option<T> {
        loop {
            if let Some(item) = self.try_dequeue(allowed) {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) || token.is_cancelled() {
                return None;
            }
            tokio::select! {
                () = token.cancelled() => return None,
                () = self.notify.notified() => {}
            }
        }
    }

    /// One aging pass: boost waiting entries and promote across bands.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut promoted = 0usize;

        {
            let mut bands = self.bands.lock();
            let mut moved: [Vec<Entry<T>>; BAND_COUNT] = std::array::from_fn(|_| Vec::new());

            for band in 0..BAND_COUNT {
                let mut kept = VecDeque::with_capacity(bands[band].len());
                while let Some(mut entry) = bands[band].pop_front() {
                    let waited = now.duration_since(entry.enqueued_at);

                    if !entry.starved && waited > self.config.starvation_threshold {
                        entry.starved = true;
                        self.stats.starvation_alerts.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            waited_ms = waited.as_millis() as u64,
                            base = %entry.base,
                            "queue entry crossed starvation threshold"
                        );
                    }

                    let target = self.config.boost_for_wait(waited);
                    if target > entry.boost {
                        entry.boost = target;
                        self.stats.total_boosts_applied.fetch_add(1, Ordering::Relaxed);
                    }

                    let target_band = entry.band();
                    if target_band == band {
                        kept.push_back(entry);
                    } else {
                        moved[target_band].push(entry);
                    }
                }
                bands[band] = kept;
            }

            for band in 0..BAND_COUNT {
                // Oldest promoted entry must end up at the very front.
                for entry in moved[band].drain(..).rev() {
                    bands[band].push_front(entry);
                    promoted += 1;
                }
            }
        }

        if promoted > 0 {
            debug!(promoted, "aging sweep promoted entries");
            self.notify.notify_one();
        }
    }

    /// Run [`Self::sweep`] at the configured interval until cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(queue.config.interval) => queue.sweep(),
                }
            }
        })
    }

    /// Close the queue: reject new entries and wake all waiters.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Remove and return every queued payload, highest band first.
    pub fn drain(&self) -> Vec<T> {
        let mut bands = self.bands.lock();
        let mut out = Vec::new();
        for band in (0..BAND_COUNT).rev() {
            out.extend(bands[band].drain(..).map(|e| e.payload));
        }
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bands.lock().iter().map(VecDeque::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bands.lock().iter().all(VecDeque::is_empty)
    }

    /// Entries per band, lowest first.
    #[must_use]
    pub fn band_depths(&self) -> [usize; BAND_COUNT] {
        let bands = self.bands.lock();
        std::array::from_fn(|i| bands[i].len())
    }

    #[must_use]
    pub fn stats(&self) -> AgingStats {
        let dequeued = self.stats.dequeued.load(Ordering::Relaxed);
        let total_wait = self.stats.total_wait_us.load(Ordering::Relaxed);
        AgingStats {
            total_boosts_applied: self.stats.total_boosts_applied.load(Ordering::Relaxed),
            starvation_alerts: self.stats.starvation_alerts.load(Ordering::Relaxed),
            avg_wait_time_us: if dequeued == 0 { 0 } else { total_wait / dequeued },
            max_wait_time_us: self.stats.max_wait_us.load(Ordering::Relaxed),
        }
    }
}
