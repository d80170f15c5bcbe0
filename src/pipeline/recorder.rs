//! Recording sessions.
//!
//! A session runs two threads around one [`FrameQueue`]: the capture task
//! acquires frames at the target rate and enqueues them, dropping the newest
//! when the queue is full, and the writer task appends queued frames to
//! storage. `stop` waits a bounded time for the writer, then drains whatever
//! is left so no frame outlives the session.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, error, info, instrument, trace, warn};

use super::pacing::{frame_interval, Pacer};
use super::queue::FrameQueue;
use crate::capture::{Frame, FrameSource};
use crate::error::{RecorderError, StorageError};
use crate::storage::Storage;
use crate::utils::{lock, pin_current_thread};
use crate::RecorderConfig;

/// Least time the capture task gets to leave an acquire after a stop
const CAPTURE_GRACE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecorderState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl RecorderState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

/// Outcome of one recording session
#[derive(Debug)]
pub struct SessionReport {
    pub destination: String,
    pub duration: Duration,
    pub frames_enqueued: usize,
    /// Frames released by the capture task because the queue was full
    pub frames_dropped: usize,
    pub frames_written: u64,
    pub bytes_written: u64,
    pub write_errors: u64,
    pub acquire_failures: u64,
    /// Frames still queued at shutdown, released without being written
    pub frames_discarded: usize,
    /// Whether the writer closed storage within the stop timeout
    pub writer_finished: bool,
    pub storage_error: Option<StorageError>,
}

/// State shared between the controller and a session's tasks
#[derive(Default)]
struct SessionShared {
    running: AtomicBool,
    frames_written: AtomicU64,
    bytes_written: AtomicU64,
    write_errors: AtomicU64,
    acquire_failures: AtomicU64,
}

struct ActiveSession {
    destination: String,
    started_at: Instant,
    shared: Arc<SessionShared>,
    queue: Arc<FrameQueue>,
    /// Dropped to wake the capture task out of its pacing sleep
    stop_tx: Sender<()>,
    capture: Task<()>,
    writer: Task<Result<(), StorageError>>,
}

/// A named thread plus a signal that disconnects when its body returns.
struct Task<T> {
    handle: JoinHandle<T>,
    done: Receiver<()>,
}

impl<T: Send + 'static> Task<T> {
    fn spawn<F>(name: &'static str, core: Option<usize>, body: F) -> Result<Self, RecorderError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (done_tx, done) = flume::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                // dropped on exit, including unwinding
                let _done = done_tx;
                if let Some(core) = core {
                    pin_current_thread(core);
                }
                body()
            })
            .map_err(|source| RecorderError::Spawn { task: name, source })?;

        Ok(Self { handle, done })
    }

    fn wait_until(&self, deadline: Instant) -> bool {
        matches!(
            self.done.recv_deadline(deadline),
            Ok(()) | Err(RecvTimeoutError::Disconnected)
        )
    }

    fn is_done(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    fn join(self) -> Option<T> {
        let name = self.handle.thread().name().unwrap_or("task").to_string();
        match self.handle.join() {
            Ok(value) => Some(value),
            Err(_) => {
                error!("{} task panicked", name);
                None
            }
        }
    }
}

/// Start/stop controller for recording sessions over one camera.
///
/// At most one session is active at a time. `start`, `stop` and `state` may
/// be called from any thread.
pub struct Recorder {
    source: Arc<dyn FrameSource>,
    storage: Arc<dyn Storage>,
    config: RecorderConfig,
    fps: Arc<AtomicU32>,
    state: AtomicU8,
    session: Mutex<Option<ActiveSession>>,
}

impl Recorder {
    pub fn new(
        source: Arc<dyn FrameSource>,
        storage: Arc<dyn Storage>,
        config: RecorderConfig,
    ) -> Self {
        let fps = Arc::new(AtomicU32::new(config.fps.max(1)));
        Self {
            source,
            storage,
            config,
            fps,
            state: AtomicU8::new(RecorderState::Idle as u8),
            session: Mutex::new(None),
        }
    }

    /// Current state. A session whose writer gave up (storage would not
    /// open) is cleaned up here and reported as `Idle`.
    pub fn state(&self) -> RecorderState {
        if self.load_state() == RecorderState::Running {
            if let Ok(mut slot) = self.session.try_lock() {
                self.reap_abandoned(&mut slot);
            }
        }
        self.load_state()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Running
    }

    pub fn target_frame_rate(&self) -> u32 {
        self.fps.load(Ordering::Relaxed)
    }

    /// Change the pacing rate. A running capture task picks it up on its
    /// next frame; deadlines already computed are kept.
    pub fn set_target_frame_rate(&self, fps: u32) {
        if fps == 0 {
            warn!("Ignoring target frame rate of 0 fps");
            return;
        }
        self.fps.store(fps, Ordering::Relaxed);
        debug!(fps, "Target frame rate updated");
    }

    /// Begin recording to `destination` at `fps`.
    #[instrument(skip(self))]
    pub fn start(&self, destination: &str, fps: u32) -> Result<(), RecorderError> {
        let mut slot = lock(&self.session);
        self.reap_abandoned(&mut slot);

        if slot.is_some() || self.load_state() != RecorderState::Idle {
            return Err(RecorderError::AlreadyRunning);
        }
        if fps == 0 {
            return Err(RecorderError::InvalidFrameRate);
        }
        if !self.storage.is_present() {
            warn!("Storage medium not present");
            return Err(RecorderError::StorageUnavailable);
        }

        self.fps.store(fps, Ordering::Relaxed);
        let shared = Arc::new(SessionShared::default());
        shared.running.store(true, Ordering::Release);
        let queue = Arc::new(FrameQueue::new(self.config.queue_capacity));

        let writer = {
            let storage = Arc::clone(&self.storage);
            let queue = Arc::clone(&queue);
            let shared = Arc::clone(&shared);
            let destination = destination.to_string();
            let timeout = self.config.dequeue_timeout();
            let core = self.config.pin_cores.then_some(self.config.writer_core);
            Task::spawn("rec-writer", core, move || {
                write_loop(storage.as_ref(), &destination, &queue, &shared, timeout)
            })
        };
        let writer = match writer {
            Ok(writer) => writer,
            Err(e) => {
                shared.running.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let (stop_tx, stop_rx) = flume::bounded::<()>(0);
        let capture = {
            let source = Arc::clone(&self.source);
            let queue = Arc::clone(&queue);
            let shared = Arc::clone(&shared);
            let fps = Arc::clone(&self.fps);
            let backoff = self.config.retry_backoff();
            let core = self.config.pin_cores.then_some(self.config.capture_core);
            Task::spawn("rec-capture", core, move || {
                capture_loop(source, &queue, &shared, &fps, backoff, stop_rx)
            })
        };
        let capture = match capture {
            Ok(capture) => capture,
            Err(e) => {
                // the writer sees the flag and exits after its next dequeue timeout
                shared.running.store(false, Ordering::Release);
                return Err(e);
            }
        };

        *slot = Some(ActiveSession {
            destination: destination.to_string(),
            started_at: Instant::now(),
            shared,
            queue,
            stop_tx,
            capture,
            writer,
        });
        self.store_state(RecorderState::Running);
        info!("Recording started");
        Ok(())
    }

    /// Stop the active session, if any.
    ///
    /// Waits up to the stop timeout for the writer to flush and close, then
    /// releases anything still queued. The capture task is woken out of its
    /// pacing sleep and shares the same deadline, so this returns within the
    /// stop timeout plus a short grace at any frame rate. If the writer is wedged in storage
    /// the session still ends; its storage handle stays open until the
    /// writer thread gets unstuck.
    #[instrument(skip(self))]
    pub fn stop(&self) -> Option<SessionReport> {
        let session = {
            let mut slot = lock(&self.session);
            let session = slot.take()?;
            self.store_state(RecorderState::Stopping);
            session
        };

        session.shared.running.store(false, Ordering::Release);
        let report = self.finish(session, self.config.stop_timeout());
        self.store_state(RecorderState::Idle);

        info!(
            frames_written = report.frames_written,
            frames_dropped = report.frames_dropped,
            frames_discarded = report.frames_discarded,
            bytes_written = report.bytes_written,
            "Recording stopped"
        );
        Some(report)
    }

    fn reap_abandoned(&self, slot: &mut Option<ActiveSession>) -> Option<SessionReport> {
        let abandoned = slot
            .as_ref()
            .is_some_and(|s| !s.shared.running.load(Ordering::Acquire) && s.writer.is_done());
        if !abandoned {
            return None;
        }

        let session = slot.take()?;
        let report = self.finish(session, Duration::ZERO);
        self.store_state(RecorderState::Idle);
        match &report.storage_error {
            Some(e) => warn!(destination = %report.destination, "Recording ended: {}", e),
            None => warn!(destination = %report.destination, "Recording ended on its own"),
        }
        Some(report)
    }

    fn finish(&self, session: ActiveSession, timeout: Duration) -> SessionReport {
        let ActiveSession {
            destination,
            started_at,
            shared,
            queue,
            stop_tx,
            capture,
            writer,
        } = session;
        drop(stop_tx);

        let deadline = Instant::now() + timeout;
        let writer_finished = writer.wait_until(deadline);
        if !writer_finished {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Writer did not finish in time, forcing cleanup"
            );
        }

        let capture_finished = capture.wait_until(deadline.max(Instant::now() + CAPTURE_GRACE));
        if !capture_finished {
            warn!("Capture task still busy, its last frame is released when it exits");
        }

        let discarded = queue.drain();
        let frames_discarded = discarded.len();
        drop(discarded);
        if frames_discarded > 0 {
            debug!(frames_discarded, "Released frames left in the queue");
        }

        let storage_error = if writer_finished {
            writer.join().and_then(Result::err)
        } else {
            None
        };
        if capture_finished {
            capture.join();
        }

        let stats = queue.stats();
        SessionReport {
            destination,
            duration: started_at.elapsed(),
            frames_enqueued: stats.enqueued,
            frames_dropped: stats.rejected,
            frames_written: shared.frames_written.load(Ordering::Acquire),
            bytes_written: shared.bytes_written.load(Ordering::Acquire),
            write_errors: shared.write_errors.load(Ordering::Acquire),
            acquire_failures: shared.acquire_failures.load(Ordering::Acquire),
            frames_discarded,
            writer_finished,
            storage_error,
        }
    }

    fn load_state(&self) -> RecorderState {
        RecorderState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn store_state(&self, state: RecorderState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    source: Arc<dyn FrameSource>,
    queue: &FrameQueue,
    shared: &SessionShared,
    fps: &AtomicU32,
    backoff: Duration,
    stop: Receiver<()>,
) {
    debug!("Capture task running");
    let mut pacer = Pacer::new().with_stop(stop);

    while shared.running.load(Ordering::Acquire) {
        let frame = match Frame::acquire(&source) {
            Ok(frame) => frame,
            Err(_) => {
                shared.acquire_failures.fetch_add(1, Ordering::Relaxed);
                thread::sleep(backoff);
                continue;
            }
        };

        match queue.try_enqueue(frame) {
            Ok(()) => metrics::counter!("framecast_frames_enqueued").increment(1),
            Err(rejected) => {
                metrics::counter!("framecast_frames_dropped").increment(1);
                trace!(sequence = rejected.meta().sequence, "Queue full, dropping frame");
            }
        }

        if !pacer.wait(frame_interval(fps.load(Ordering::Relaxed))) {
            break;
        }
    }

    debug!("Capture task exiting");
}

fn write_loop(
    storage: &dyn Storage,
    destination: &str,
    queue: &FrameQueue,
    shared: &SessionShared,
    dequeue_timeout: Duration,
) -> Result<(), StorageError> {
    let mut writer = match storage.open_append(destination) {
        Ok(writer) => writer,
        Err(e) => {
            error!(destination, "Cannot open recording destination: {}", e);
            shared.running.store(false, Ordering::Release);
            return Err(e);
        }
    };
    debug!(destination, "Writer task running");

    while shared.running.load(Ordering::Acquire) || !queue.is_empty() {
        let Some(frame) = queue.dequeue_timeout(dequeue_timeout) else {
            continue;
        };

        match writer.write_all(frame.data()) {
            Ok(()) => {
                shared.frames_written.fetch_add(1, Ordering::Release);
                shared
                    .bytes_written
                    .fetch_add(frame.len() as u64, Ordering::Release);
                metrics::counter!("framecast_frames_written").increment(1);
            }
            Err(e) => {
                shared.write_errors.fetch_add(1, Ordering::Release);
                warn!(sequence = frame.meta().sequence, "Frame write failed: {}", e);
            }
        }
    }

    if let Err(e) = writer.flush() {
        warn!(destination, "Flush on close failed: {}", e);
    }
    drop(writer);

    debug!(
        frames = shared.frames_written.load(Ordering::Acquire),
        "Writer task finished"
    );
    Ok(())
}
