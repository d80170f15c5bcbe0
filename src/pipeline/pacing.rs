use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError};

/// Interval between frames at `fps`; zero is treated as 1 fps.
pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_secs(1) / fps.max(1)
}

/// Absolute-deadline pacing.
///
/// Each wake time is the previous deadline plus the interval, so time spent
/// working or oversleeping in one iteration does not push later frames back.
/// A late iteration does not sleep at all and the next one catches up.
///
/// A pacer built with [`Pacer::with_stop`] sleeps on a channel instead, and
/// wakes early once every sender of that channel is dropped.
#[derive(Debug)]
pub struct Pacer {
    deadline: Instant,
    stop: Option<Receiver<()>>,
}

impl Pacer {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            deadline: start,
            stop: None,
        }
    }

    /// Cut sleeps short when `stop` disconnects.
    pub fn with_stop(mut self, stop: Receiver<()>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Advance the deadline by `interval` and sleep until it.
    ///
    /// Returns `false` if the stop channel fired, before or during the sleep.
    pub fn wait(&mut self, interval: Duration) -> bool {
        self.deadline += interval;
        match &self.stop {
            Some(stop) => matches!(
                stop.recv_deadline(self.deadline),
                Err(RecvTimeoutError::Timeout)
            ),
            None => {
                let now = Instant::now();
                if self.deadline > now {
                    thread::sleep(self.deadline - now);
                }
                true
            }
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new()
    }
}
