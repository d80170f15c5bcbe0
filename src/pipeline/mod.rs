pub mod pacing;
pub mod queue;
pub mod recorder;

pub use pacing::{frame_interval, Pacer};
pub use queue::{FrameQueue, QueueStats};
pub use recorder::{Recorder, RecorderState, SessionReport};
