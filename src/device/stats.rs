//! Frame counters kept alongside the device.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use crate::capture::FrameStatus;

#[derive(Default)]
struct Counters {
    frames_produced: AtomicU64,
    fill_errors: AtomicU64,
    frames_dequeued: AtomicU64,
}

/// Lock-free counters, readable without taking the device lock.
#[derive(Default)]
pub struct DeviceStats {
    counters: CachePadded<Counters>,
}

/// Point-in-time copy of [`DeviceStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_produced: u64,
    pub fill_errors: u64,
    pub frames_dequeued: u64,
}

impl DeviceStats {
    pub fn record_fill(&self, status: FrameStatus) {
        match status {
            FrameStatus::Done => {
                self.counters.frames_produced.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("synthcam_frames_produced").increment(1);
            }
            FrameStatus::Error => {
                self.counters.fill_errors.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("synthcam_fill_errors").increment(1);
            }
        }
    }

    pub fn record_dequeue(&self) {
        self.counters.frames_dequeued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("synthcam_frames_dequeued").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_produced: self.counters.frames_produced.load(Ordering::Relaxed),
            fill_errors: self.counters.fill_errors.load(Ordering::Relaxed),
            frames_dequeued: self.counters.frames_dequeued.load(Ordering::Relaxed),
        }
    }
}
