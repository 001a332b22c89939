use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Point-in-time copy of [`RecorderMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub records_emitted: u64,
    pub duplicates_inserted: u64,
    pub gaps: u64,
    pub errors_count: u64,
    pub avg_frame_latency_us: u64,
}

/// Session counters shared between the recorder and its observers
#[derive(Debug, Default)]
pub struct RecorderMetrics {
    frames_received: AtomicU64,
    records_emitted: AtomicU64,
    duplicates_inserted: AtomicU64,
    gaps: AtomicU64,
    errors_count: AtomicU64,
    total_latency_us: AtomicU64,
    latency_samples: AtomicU64,
}

impl RecorderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn records_emitted(&self) -> u64 {
        self.records_emitted.load(Ordering::Relaxed)
    }

    pub fn duplicates_inserted(&self) -> u64 {
        self.duplicates_inserted.load(Ordering::Relaxed)
    }

    pub fn gaps(&self) -> u64 {
        self.gaps.load(Ordering::Relaxed)
    }

    pub fn errors_count(&self) -> u64 {
        self.errors_count.load(Ordering::Relaxed)
    }

    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.records_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A gap in the frame numbers, `missing` of them filled by duplication
    pub fn record_gap(&self, missing: u64) {
        self.gaps.fetch_add(1, Ordering::Relaxed);
        self.duplicates_inserted.fetch_add(missing, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn start_processing(&self) -> Instant {
        Instant::now()
    }

    pub fn finish_processing(&self, start: Instant) {
        let latency_us = start.elapsed().as_micros() as u64;
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_frame_latency_us(&self) -> u64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0;
        }
        self.total_latency_us.load(Ordering::Relaxed) / samples
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received(),
            records_emitted: self.records_emitted(),
            duplicates_inserted: self.duplicates_inserted(),
            gaps: self.gaps(),
            errors_count: self.errors_count(),
            avg_frame_latency_us: self.avg_frame_latency_us(),
        }
    }
}
