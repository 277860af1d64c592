//! Scenario execution
//!
//! Runs catalog scenarios end to end against the subject and reports the
//! verdicts. Presenters only observe sessions; headless and follow mode
//! share the same pipeline.

mod report;
mod runner;

pub use report::{
    metrics_line, print_summary, progress_bar, status_line, tally, FollowPresenter,
    HeadlessPresenter,
};
pub use runner::{Runner, ScenarioOutcome};
