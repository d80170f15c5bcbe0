//! framecast: camera frame recorder and MJPEG streaming server

use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use framecast::stream::{self, AppState};
use framecast::{capture, Config, FsStorage, Recorder, TelemetryCounter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framecast=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("framecast launching...");

    // Load configuration
    let config = Config::load()?;

    let source = capture::open_source(&config.capture)?;
    let storage = Arc::new(FsStorage::new(&config.storage.root));
    let recorder = Arc::new(Recorder::new(
        source.clone(),
        storage,
        config.recorder.clone(),
    ));

    if let Some(destination) = &config.recorder.autostart {
        match recorder.start(destination, config.recorder.fps) {
            Ok(()) => info!("Recording to {} at {} fps", destination, config.recorder.fps),
            Err(e) => warn!("Autostart recording failed: {}", e),
        }
    }

    let telemetry = Arc::new(TelemetryCounter::new());
    let reporter = tokio::spawn(report_telemetry(
        telemetry.clone(),
        Duration::from_millis(config.server.telemetry_interval_ms.max(100)),
    ));

    if config.server.enabled {
        let addr = format!("{}:{}", config.server.bind_address, config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;
        info!("Streaming on http://{}{}", addr, config.server.stream_path);

        let app = stream::router(AppState::new(source, telemetry), &config.server.stream_path);

        // Streams never end on their own, so shutdown drops the server
        // instead of waiting for connections to drain.
        tokio::select! {
            result = axum::serve(listener, app) => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                }
            }
            _ = shutdown_signal() => info!("Shutdown requested"),
        }
    } else {
        shutdown_signal().await;
        info!("Shutdown requested");
    }

    reporter.abort();

    let report = tokio::task::spawn_blocking(move || recorder.stop()).await?;
    if let Some(report) = report {
        info!(
            "Recording {} closed: {} frames, {} bytes, {} dropped",
            report.destination, report.frames_written, report.bytes_written, report.frames_dropped
        );
    }

    info!("framecast shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Periodic status line standing in for the dashboard's status endpoint.
async fn report_telemetry(telemetry: Arc<TelemetryCounter>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    let mut last = Instant::now();
    loop {
        ticker.tick().await;
        let kbps = telemetry.sample_kbps(last.elapsed());
        last = Instant::now();
        if kbps > 0.0 {
            info!("Streaming {:.1} kbps", kbps);
        }
    }
}
