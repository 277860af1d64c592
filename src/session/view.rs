//! Read-only session state handed to presenters

use crate::evaluate::Verdict;
use crate::telemetry::{DebuggerState, TelemetrySample};

use super::buffer::LineBuffer;
use super::metrics::TestMetrics;
use super::process::ProcessStatus;
use super::ProcessRole;

/// One subject as a presenter sees it
pub struct ProcessView<'a> {
    pub role: ProcessRole,
    /// `None` until the subject was launched
    pub status: Option<ProcessStatus>,
    pub pid: Option<u32>,
    pub port: u16,
    pub debug_port: Option<u16>,
    /// gdbserver port state in debug mode, once sampled
    pub debugger: Option<DebuggerState>,
    pub lines: &'a LineBuffer,
    pub telemetry: &'a TelemetrySample,
}

/// Snapshot of a running session
pub struct SessionView<'a> {
    pub index: usize,
    pub scenario: &'a str,
    pub server: ProcessView<'a>,
    pub client: ProcessView<'a>,
    pub metrics: &'a TestMetrics,
}

impl<'a> SessionView<'a> {
    pub fn process(&self, role: ProcessRole) -> &ProcessView<'a> {
        match role {
            ProcessRole::Server => &self.server,
            ProcessRole::Client => &self.client,
        }
    }
}

/// Renders session progress
///
/// Presenters only observe; nothing they do feeds back into the session.
pub trait Presenter: Send {
    /// Called after every control-loop pass
    fn refresh(&mut self, view: &SessionView<'_>);

    /// Called once the subjects are down and output is fully drained
    fn finish(&mut self, view: &SessionView<'_>) {
        self.refresh(view);
    }

    /// Called with the scenario's verdict
    fn verdict(&mut self, _scenario: &str, _verdict: &Verdict) {}
}

/// Presenter that renders nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn refresh(&mut self, _view: &SessionView<'_>) {}
}
