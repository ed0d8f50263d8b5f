/// State management module
///
/// This module holds the session state observed by the UI:
/// - Data model of a pipeline run (run.rs)
/// - The single-writer store with stale-write protection (store.rs)

pub mod run;
pub mod store;

pub use run::{FailureKind, PipelineRun, PipelineStatus, RequestId, RunFailure, RunImages};
pub use store::{LayerSettings, PresentationView, StateStore};
