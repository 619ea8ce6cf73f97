pub mod engine;
mod git_cli;
pub mod progress;
pub mod stage;

pub use engine::{PublishEngine, PublishError, PublishOutcome};
pub use progress::ProgressSink;
pub use stage::StagingError;
