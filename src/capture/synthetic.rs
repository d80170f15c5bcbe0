//! Software frame source with a fixed buffer pool.
//!
//! Behaves like a camera driver with `buffer_count` frame buffers: an
//! acquire waits for a free buffer up to `acquire_timeout` and returns an
//! invalid buffer when none frees up. Every acquire and release is counted
//! so the pipeline's release discipline can be checked.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::utils::CachePadded;
use tracing::warn;

use super::frame::{FrameBuffer, FrameMetadata, PixelFormat};
use super::FrameSource;
use crate::utils::lock;
use crate::CaptureConfig;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub frame_bytes: usize,
    pub buffer_count: usize,
    pub acquire_timeout: Duration,
    /// Simulated sensor readout time spent in every acquire
    pub frame_interval: Duration,
    /// Keep the instant of every successful acquire
    pub record_timeline: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            format: PixelFormat::Jpeg,
            frame_bytes: 4096,
            buffer_count: 2,
            acquire_timeout: Duration::from_millis(100),
            frame_interval: Duration::ZERO,
            record_timeline: false,
        }
    }
}

impl From<&CaptureConfig> for SyntheticConfig {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            format: config.format,
            frame_bytes: config.synthetic_frame_bytes,
            buffer_count: config.buffer_count as usize,
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            frame_interval: Duration::from_millis(config.synthetic_frame_interval_ms),
            record_timeline: false,
        }
    }
}

/// Snapshot of a source's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub acquired: u64,
    pub released: u64,
    pub failed: u64,
    pub double_released: u64,
    pub in_flight: usize,
}

#[derive(Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
    failed: AtomicU64,
    double_released: AtomicU64,
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    /// In-use flag per buffer
    pool: Mutex<Vec<bool>>,
    freed: Condvar,
    sequence: AtomicU64,
    forced_failures: AtomicUsize,
    counters: CachePadded<Counters>,
    timeline: Mutex<Vec<Instant>>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let buffer_count = config.buffer_count.max(1);
        Self {
            config,
            pool: Mutex::new(vec![false; buffer_count]),
            freed: Condvar::new(),
            sequence: AtomicU64::new(0),
            forced_failures: AtomicUsize::new(0),
            counters: CachePadded::new(Counters::default()),
            timeline: Mutex::new(Vec::new()),
        }
    }

    /// Make the next `count` acquires fail as if the sensor were busy.
    pub fn fail_next(&self, count: usize) {
        self.forced_failures.fetch_add(count, Ordering::SeqCst);
    }

    pub fn stats(&self) -> SourceStats {
        let in_flight = lock(&self.pool).iter().filter(|in_use| **in_use).count();
        SourceStats {
            acquired: self.counters.acquired.load(Ordering::SeqCst),
            released: self.counters.released.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            double_released: self.counters.double_released.load(Ordering::SeqCst),
            in_flight,
        }
    }

    /// Instants of successful acquires, when `record_timeline` is set.
    pub fn timeline(&self) -> Vec<Instant> {
        lock(&self.timeline).clone()
    }

    fn take_forced_failure(&self) -> bool {
        self.forced_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn claim_slot(&self) -> Option<usize> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        let mut pool = lock(&self.pool);
        loop {
            if let Some(slot) = pool.iter().position(|in_use| !*in_use) {
                pool[slot] = true;
                return Some(slot);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            pool = match self.freed.wait_timeout(pool, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn render(&self, sequence: u64) -> Bytes {
        let len = self.config.frame_bytes.max(JPEG_SOI.len() + JPEG_EOI.len());
        let mut data = vec![sequence as u8; len];
        data[..2].copy_from_slice(&JPEG_SOI);
        data[len - 2..].copy_from_slice(&JPEG_EOI);
        Bytes::from(data)
    }
}

impl FrameSource for SyntheticSource {
    fn acquire(&self) -> FrameBuffer {
        if self.take_forced_failure() {
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
            return FrameBuffer::invalid();
        }

        if !self.config.frame_interval.is_zero() {
            thread::sleep(self.config.frame_interval);
        }

        let Some(slot) = self.claim_slot() else {
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
            return FrameBuffer::invalid();
        };

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let captured_at = Instant::now();
        if self.config.record_timeline {
            lock(&self.timeline).push(captured_at);
        }
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);

        let meta = FrameMetadata {
            sequence,
            width: self.config.width,
            height: self.config.height,
            format: self.config.format,
            captured_at,
        };
        FrameBuffer::new(self.render(sequence), meta, slot)
    }

    fn release(&self, buffer: FrameBuffer) {
        let mut pool = lock(&self.pool);
        match pool.get_mut(buffer.slot()) {
            Some(in_use) if *in_use => {
                *in_use = false;
                self.counters.released.fetch_add(1, Ordering::SeqCst);
                drop(pool);
                self.freed.notify_one();
            }
            _ => {
                self.counters.double_released.fetch_add(1, Ordering::SeqCst);
                warn!(
                    slot = buffer.slot(),
                    sequence = buffer.meta.sequence,
                    "Release of a buffer that is not in flight"
                );
            }
        }
    }

    fn current_format(&self) -> PixelFormat {
        self.config.format
    }
}
