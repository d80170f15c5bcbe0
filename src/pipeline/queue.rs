//! Bounded frame handoff between the capture and writer tasks

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{Receiver, Sender, TrySendError};

use crate::capture::Frame;

/// Fixed-capacity FIFO of frames with a drop-newest policy.
///
/// Enqueue never blocks. A frame that does not fit is handed back to the
/// caller, which releases it by dropping it.
pub struct FrameQueue {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    capacity: usize,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    enqueued: AtomicUsize,
    rejected: AtomicUsize,
    dequeued: AtomicUsize,
    drained: AtomicUsize,
}

/// Snapshot of a queue's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: usize,
    pub rejected: usize,
    pub dequeued: usize,
    pub drained: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = flume::bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: place a frame without blocking, or get it back if full.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), Frame> {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(frame)) | Err(TrySendError::Disconnected(frame)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                Err(frame)
            }
        }
    }

    /// Consumer: wait up to `timeout` for the oldest frame.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<Frame> {
        let frame = self.rx.recv_timeout(timeout).ok()?;
        self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Remove everything currently queued without waiting.
    pub fn drain(&self) -> Vec<Frame> {
        let frames: Vec<Frame> = self.rx.try_iter().collect();
        self.stats.drained.fetch_add(frames.len(), Ordering::Relaxed);
        frames
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            dequeued: self.stats.dequeued.load(Ordering::Relaxed),
            drained: self.stats.drained.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameSource, SyntheticConfig, SyntheticSource};
    use std::sync::Arc;

    fn source(buffers: usize) -> (Arc<SyntheticSource>, Arc<dyn FrameSource>) {
        let synthetic = Arc::new(SyntheticSource::new(SyntheticConfig {
            buffer_count: buffers,
            ..Default::default()
        }));
        let dynamic: Arc<dyn FrameSource> = synthetic.clone();
        (synthetic, dynamic)
    }

    #[test]
    fn full_queue_hands_frame_back() {
        let (synthetic, source) = source(8);
        let queue = FrameQueue::new(2);

        for _ in 0..5 {
            let frame = Frame::acquire(&source).unwrap();
            if let Err(rejected) = queue.try_enqueue(frame) {
                drop(rejected);
            }
        }

        assert_eq!(queue.len(), 2);
        let stats = synthetic.stats();
        assert_eq!(stats.acquired, 5);
        assert_eq!(stats.released, 3);
        assert_eq!(queue.stats().rejected, 3);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        drop(drained);
        let stats = synthetic.stats();
        assert_eq!(stats.acquired, stats.released);
        assert_eq!(stats.double_released, 0);
    }

    #[test]
    fn keeps_fifo_order() {
        let (_synthetic, source) = source(4);
        let queue = FrameQueue::new(2);

        let first = Frame::acquire(&source).unwrap();
        let second = Frame::acquire(&source).unwrap();
        let (a, b) = (first.meta().sequence, second.meta().sequence);
        queue.try_enqueue(first).unwrap();
        queue.try_enqueue(second).unwrap();

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.dequeue_timeout(timeout).unwrap().meta().sequence, a);
        assert_eq!(queue.dequeue_timeout(timeout).unwrap().meta().sequence, b);
        assert!(queue.is_empty());
    }

    #[test]
    fn dequeue_times_out_empty() {
        let queue = FrameQueue::new(2);
        let started = std::time::Instant::now();
        assert!(queue.dequeue_timeout(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn depth_bounded_under_mixed_operations() {
        let (synthetic, source) = source(16);
        let queue = FrameQueue::new(2);

        // enqueue-heavy pattern with occasional dequeues and drains
        let script = b"eeedeeeddeeeexeededeeeex";
        let mut consumed = 0;
        for op in script {
            match op {
                b'e' => {
                    let frame = Frame::acquire(&source).unwrap();
                    let _ = queue.try_enqueue(frame);
                }
                b'd' => {
                    if queue.dequeue_timeout(Duration::from_millis(1)).is_some() {
                        consumed += 1;
                    }
                }
                _ => consumed += queue.drain().len(),
            }
            assert!(queue.len() <= queue.capacity());
        }
        consumed += queue.drain().len();

        let stats = queue.stats();
        assert_eq!(stats.enqueued, consumed);
        assert_eq!(stats.enqueued + stats.rejected, 17);
        let source_stats = synthetic.stats();
        assert_eq!(source_stats.acquired, source_stats.released);
    }

    #[test]
    fn dropping_queue_releases_frames() {
        let (synthetic, source) = source(4);
        let queue = FrameQueue::new(2);
        queue.try_enqueue(Frame::acquire(&source).unwrap()).unwrap();
        queue.try_enqueue(Frame::acquire(&source).unwrap()).unwrap();

        drop(queue);
        assert_eq!(synthetic.stats().released, 2);
    }
}
