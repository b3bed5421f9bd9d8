//! Shared broadcast clock.
//!
//! One thread ticks once per second; every session reads. Counters are atomics so
//! concurrent reads never tear.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::frame_index;
use crate::media_buffer::MediaBuffer;

/// Real time between ticks; also the amount radio time advances per tick.
pub const TICK: Duration = Duration::from_secs(1);

pub struct Clock {
    up_ms: AtomicU64,
    radio_ms: AtomicU64,
    /// Wraparound point. Cached; see [`Clock::recompute_total`].
    total_ms: AtomicU64,
}

impl Clock {
    pub fn new(total: Duration) -> Self {
        Self {
            up_ms: AtomicU64::new(0),
            radio_ms: AtomicU64::new(0),
            total_ms: AtomicU64::new(duration_ms(total)),
        }
    }

    pub fn up_time(&self) -> Duration {
        Duration::from_millis(self.up_ms.load(Ordering::Relaxed))
    }

    pub fn radio_time(&self) -> Duration {
        Duration::from_millis(self.radio_ms.load(Ordering::Relaxed))
    }

    pub fn total(&self) -> Duration {
        Duration::from_millis(self.total_ms.load(Ordering::Relaxed))
    }

    /// Re-scan the buffer and use its duration as the new wraparound point.
    ///
    /// Not called on every tick: tracks added while playing only extend the loop once
    /// this runs.
    pub fn recompute_total(&self, buffer: &MediaBuffer) -> Duration {
        let total = frame_index::total_duration(buffer);
        self.total_ms.store(duration_ms(total), Ordering::Relaxed);
        tracing::info!(total_ms = total.as_millis() as u64, "broadcast duration recomputed");
        total
    }

    /// Advance by one tick. Radio time loops to zero instead of passing the total.
    pub fn tick(&self) {
        let step = duration_ms(TICK);
        self.up_ms.fetch_add(step, Ordering::Relaxed);
        let next = self.radio_ms.load(Ordering::Relaxed) + step;
        if next > self.total_ms.load(Ordering::Relaxed) {
            tracing::debug!("radio time wrapped to start of broadcast");
            self.radio_ms.store(0, Ordering::Relaxed);
        } else {
            self.radio_ms.store(next, Ordering::Relaxed);
        }
    }

    /// Tick every [`TICK`] until `running` is cleared.
    pub fn run(&self, running: &AtomicBool) {
        let ticker = crossbeam_channel::tick(TICK);
        while running.load(Ordering::Relaxed) {
            if ticker.recv().is_err() {
                break;
            }
            if !running.load(Ordering::Relaxed) {
                break;
            }
            self.tick();
        }
        tracing::debug!("clock stopped");
    }

    #[cfg(test)]
    pub(crate) fn set_radio_time(&self, at: Duration) {
        self.radio_ms.store(duration_ms(at), Ordering::Relaxed);
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
