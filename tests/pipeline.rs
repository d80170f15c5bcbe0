use std::sync::Arc;
use std::thread;
use std::time::Duration;

use framecast::capture::{SyntheticConfig, SyntheticSource};
use framecast::stream::ChunkSink;
use framecast::{
    FrameSource, FsStorage, Recorder, RecorderConfig, RecorderState, StreamError,
    StreamingConnection, TelemetryCounter,
};

fn recorder_config(fps: u32) -> RecorderConfig {
    RecorderConfig {
        fps,
        queue_capacity: 2,
        stop_timeout_ms: 2000,
        dequeue_timeout_ms: 50,
        retry_backoff_ms: 1,
        pin_cores: false,
        capture_core: 1,
        writer_core: 0,
        autostart: None,
    }
}

/// Accepts a fixed number of chunks, then reports the peer gone.
struct HangUpAfter {
    remaining: usize,
    received: Vec<u8>,
}

impl ChunkSink for HangUpAfter {
    fn send(&mut self, chunk: &[u8]) -> Result<(), StreamError> {
        if self.remaining == 0 {
            return Err(StreamError::SendFailed);
        }
        self.remaining -= 1;
        self.received.extend_from_slice(chunk);
        Ok(())
    }
}

#[test]
fn capture_pacing_does_not_drift() {
    let source = Arc::new(SyntheticSource::new(SyntheticConfig {
        frame_bytes: 256,
        buffer_count: 4,
        record_timeline: true,
        ..Default::default()
    }));
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new(
        source.clone() as Arc<dyn FrameSource>,
        Arc::new(FsStorage::new(dir.path())),
        recorder_config(10),
    );

    recorder.start("paced.mjpeg", 10).unwrap();
    thread::sleep(Duration::from_millis(1050));
    let report = recorder.stop().unwrap();
    assert!(report.writer_finished);

    let timeline = source.timeline();
    assert!(timeline.len() >= 8, "only {} frames captured", timeline.len());

    let first = timeline[0];
    for (k, at) in timeline.iter().enumerate() {
        let elapsed = at.duration_since(first);
        let expected = Duration::from_millis(100) * k as u32;
        assert!(
            elapsed + Duration::from_millis(10) >= expected,
            "frame {k} early: {elapsed:?} < {expected:?}"
        );
        assert!(
            elapsed <= expected + Duration::from_millis(80),
            "frame {k} drifted: {elapsed:?} vs {expected:?}"
        );
    }
}

#[test]
fn capture_pacing_holds_over_ten_seconds() {
    let source = Arc::new(SyntheticSource::new(SyntheticConfig {
        frame_bytes: 256,
        buffer_count: 4,
        record_timeline: true,
        ..Default::default()
    }));
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new(
        source.clone() as Arc<dyn FrameSource>,
        Arc::new(FsStorage::new(dir.path())),
        recorder_config(10),
    );

    recorder.start("long.mjpeg", 10).unwrap();
    thread::sleep(Duration::from_millis(10_050));
    recorder.stop().unwrap();

    let timeline = source.timeline();
    assert!(timeline.len() >= 95, "only {} frames captured", timeline.len());

    // per-frame jitter is allowed, a growing offset is not
    let first = timeline[0];
    for (k, at) in timeline.iter().enumerate() {
        let elapsed = at.duration_since(first);
        let expected = Duration::from_millis(100) * k as u32;
        assert!(
            elapsed + Duration::from_millis(10) >= expected,
            "frame {k} early: {elapsed:?} < {expected:?}"
        );
        assert!(
            elapsed <= expected + Duration::from_millis(150),
            "frame {k} drifted: {elapsed:?} vs {expected:?}"
        );
    }
}

#[test]
fn viewer_hang_up_during_recording_keeps_buffers_balanced() {
    let source = Arc::new(SyntheticSource::new(SyntheticConfig {
        frame_bytes: 512,
        buffer_count: 4,
        acquire_timeout: Duration::from_millis(200),
        ..Default::default()
    }));
    let dyn_source: Arc<dyn FrameSource> = source.clone();
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new(
        dyn_source.clone(),
        Arc::new(FsStorage::new(dir.path())),
        recorder_config(50),
    );
    recorder.start("shared.mjpeg", 50).unwrap();

    let telemetry = Arc::new(TelemetryCounter::new());
    let viewer = {
        let source = dyn_source.clone();
        let telemetry = telemetry.clone();
        thread::spawn(move || {
            let connection = StreamingConnection::accept(source, telemetry).unwrap();
            // three chunks per part: five whole parts, then a failed header
            let mut sink = HangUpAfter {
                remaining: 15,
                received: Vec::new(),
            };
            let summary = connection.run(&mut sink);
            (summary, sink.received)
        })
    };

    let (summary, received) = viewer.join().unwrap();
    assert!(matches!(summary.ended_by, StreamError::SendFailed));
    assert_eq!(summary.frames_sent, 5);
    assert_eq!(telemetry.sample_and_reset(), 5 * 512);
    assert_eq!(received.windows(7).filter(|w| *w == b"--frame").count(), 5);

    thread::sleep(Duration::from_millis(200));
    assert_eq!(recorder.state(), RecorderState::Running);
    let report = recorder.stop().unwrap();
    assert!(report.writer_finished);
    assert!(report.frames_written > 0);

    let written = std::fs::read(dir.path().join("shared.mjpeg")).unwrap();
    assert_eq!(written.len() as u64, report.bytes_written);

    let stats = source.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.acquired, stats.released);
    assert_eq!(stats.double_released, 0);
}

#[test]
fn sessions_can_follow_each_other() {
    let source: Arc<dyn FrameSource> = Arc::new(SyntheticSource::new(SyntheticConfig {
        frame_bytes: 128,
        ..Default::default()
    }));
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new(
        source,
        Arc::new(FsStorage::new(dir.path())),
        recorder_config(50),
    );

    for round in 0..3 {
        recorder.start("loop.mjpeg", 50).unwrap();
        thread::sleep(Duration::from_millis(60));
        let report = recorder.stop().unwrap();
        assert!(report.writer_finished, "round {round} writer wedged");
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    // appended across sessions
    let written = std::fs::metadata(dir.path().join("loop.mjpeg")).unwrap();
    assert!(written.len() >= 3 * 128);
}
