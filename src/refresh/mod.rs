//! Day-based content refresh.

mod hooks;
mod orchestrator;
mod progress;

pub use hooks::{NoopHooks, RefreshHooks};
pub use orchestrator::{RefreshOrchestrator, RefreshOutcome, RefreshReport, RefreshState};
pub use progress::{percent, ProgressChannel, ProgressEvent, PROGRESS_CHANNEL};
