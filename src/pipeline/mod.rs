/// Click-triggered retrieval/colorization pipeline
///
/// - Orchestration and progress events (coordinator.rs)
/// - Run-aborting error taxonomy (error.rs)

pub mod coordinator;
pub mod error;

pub use coordinator::{ClickCoordinator, ProgressEvent, RunOutcome};
