pub mod connection;
pub mod server;
pub mod telemetry;

pub use connection::{ChunkSink, ConnectionSummary, StreamingConnection};
pub use server::{router, AppState};
pub use telemetry::TelemetryCounter;
