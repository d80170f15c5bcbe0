use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;

/// Bytes streamed to clients since the status reporter last looked.
///
/// Streaming connections add to it concurrently; one reporter samples and
/// resets it periodically. Sampling and resetting are two separate steps,
/// so bytes added in between are lost from the next sample.
#[derive(Debug, Default)]
pub struct TelemetryCounter {
    bytes: CachePadded<AtomicU64>,
}

impl TelemetryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Current total without resetting.
    pub fn peek(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Bytes since the previous sample.
    pub fn sample_and_reset(&self) -> u64 {
        let bytes = self.bytes.load(Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        bytes
    }

    /// Sample and express the result in kilobits per second over `elapsed`.
    pub fn sample_kbps(&self, elapsed: Duration) -> f64 {
        let bytes = self.sample_and_reset();
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (bytes as f64 * 8.0) / 1024.0 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn sample_resets() {
        let counter = TelemetryCounter::new();
        counter.add(1000);
        counter.add(24);
        assert_eq!(counter.peek(), 1024);
        assert_eq!(counter.sample_and_reset(), 1024);
        assert_eq!(counter.sample_and_reset(), 0);
    }

    #[test]
    fn kbps_over_elapsed_time() {
        let counter = TelemetryCounter::new();
        counter.add(2048);
        assert_eq!(counter.sample_kbps(Duration::from_secs(2)), 8.0);
        assert_eq!(counter.sample_kbps(Duration::ZERO), 0.0);
    }

    #[test]
    fn concurrent_adds_without_reset_are_exact() {
        let counter = Arc::new(TelemetryCounter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.add(3);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.sample_and_reset(), 12_000);
    }
}
