//! Presenters and the final summary

use std::time::{Duration, Instant};

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::evaluate::Verdict;
use crate::session::{
    Presenter, ProcessRole, ProcessStatus, ProcessView, SessionView, TestMetrics,
};
use crate::telemetry::DebuggerState;

use super::runner::ScenarioOutcome;

/// Renders nothing while sessions run
///
/// Headless runs go through exactly the same pipeline; only
/// [`print_summary`] produces output.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessPresenter;

impl Presenter for HeadlessPresenter {
    fn refresh(&mut self, _view: &SessionView<'_>) {}
}

/// Shared progress bar across all scenarios of a run
pub fn progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  [{bar:40.cyan/blue}] {pos}/{len} scenarios {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb
}

/// Status lines are repeated this often even when nothing changed
const STATUS_EVERY: Duration = Duration::from_secs(5);

type StatusKey = (Option<ProcessStatus>, Option<DebuggerState>);

/// Streams both subjects' output live with colored role prefixes
///
/// A status line per role is printed whenever a subject or its gdbserver
/// changes state, and every [`STATUS_EVERY`] otherwise.
pub struct FollowPresenter {
    bar: ProgressBar,
    /// Lines already printed per role
    printed: [u64; 2],
    announced: bool,
    shown: [Option<StatusKey>; 2],
    status_at: Option<Instant>,
}

impl FollowPresenter {
    pub fn new(bar: ProgressBar) -> Self {
        Self {
            bar,
            printed: [0, 0],
            announced: false,
            shown: [None, None],
            status_at: None,
        }
    }

    fn print_status(&mut self, view: &SessionView<'_>, force: bool) {
        let due = force || self.status_at.map_or(true, |at| at.elapsed() >= STATUS_EVERY);
        for role in ProcessRole::ALL {
            let process = view.process(role);
            let key = (process.status, process.debugger);
            if due || self.shown[role.index()] != Some(key) {
                self.bar.println(format!(
                    "{} {}",
                    prefix(view.index, role),
                    status_line(process).dimmed()
                ));
                self.shown[role.index()] = Some(key);
            }
        }
        if due {
            self.status_at = Some(Instant::now());
        }
    }

    fn print_new_lines(&mut self, view: &SessionView<'_>) {
        for role in ProcessRole::ALL {
            let process = view.process(role);
            let idx = role.index();
            let skipped = process.lines.pushed()
                - self.printed[idx]
                - process.lines.since(self.printed[idx]).count() as u64;

            if skipped > 0 {
                self.bar.println(format!(
                    "{} {}",
                    prefix(view.index, role),
                    format!("... {} lines not shown", skipped).dimmed()
                ));
            }
            for record in process.lines.since(self.printed[idx]) {
                self.bar
                    .println(format!("{} {}", prefix(view.index, role), record.text));
            }
            self.printed[idx] = process.lines.pushed();
        }
    }
}

impl Presenter for FollowPresenter {
    fn refresh(&mut self, view: &SessionView<'_>) {
        if !self.announced && view.server.status.is_some() {
            self.announced = true;
            self.bar.println(format!(
                "\n{} {}",
                "Running Scenario:".blue().bold(),
                view.scenario.white().bold()
            ));
        }
        self.bar.set_message(view.scenario.to_string());
        self.print_new_lines(view);
        self.print_status(view, false);
    }

    fn finish(&mut self, view: &SessionView<'_>) {
        self.print_new_lines(view);
        self.print_status(view, true);
        self.bar.println(format!("  {}", metrics_line(view.metrics).dimmed()));
    }

    fn verdict(&mut self, scenario: &str, verdict: &Verdict) {
        let line = match verdict {
            Verdict::Pass => format!("  {} {}", "✓".green().bold(), scenario.green()),
            Verdict::Fail(cause) => format!(
                "  {} {}: {}",
                "✗".red().bold(),
                scenario.red(),
                cause
            ),
        };
        self.bar.println(line);
        self.bar.inc(1);
    }
}

fn prefix(index: usize, role: ProcessRole) -> String {
    let tag = format!("[{}:{}]", index, role);
    match role {
        ProcessRole::Server => tag.cyan().to_string(),
        ProcessRole::Client => tag.green().to_string(),
    }
}

/// Status, resources and gdbserver state of one subject
pub fn status_line(process: &ProcessView<'_>) -> String {
    let status = process
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "not started".to_string());
    let pid = process
        .pid
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    let sample = process.telemetry;

    let mut line = format!(
        "{} pid {} port {} | cpu {:.1}% mem {} KB | read {} KB written {} KB | {} sockets",
        status,
        pid,
        process.port,
        sample.cpu_percent,
        sample.rss_kb,
        sample.read_bytes / 1024,
        sample.written_bytes / 1024,
        sample.connections
    );
    if let Some(debug_port) = process.debug_port {
        let debugger = match process.debugger {
            Some(state) => state.to_string(),
            None => "starting".to_string(),
        };
        line.push_str(&format!(" | gdbserver :{} {}", debug_port, debugger));
    }
    line
}

/// One-line metrics digest
pub fn metrics_line(metrics: &TestMetrics) -> String {
    format!(
        "{:.1}s, {} sync ops, {} files / {} bytes transferred, \
         mem server {} KB client {} KB, cpu server {:.1}% client {:.1}%, {} connections",
        metrics
            .duration()
            .map(|d| d.as_secs_f64())
            .unwrap_or_default(),
        metrics.sync_operations,
        metrics.files_transferred,
        metrics.bytes_transferred,
        metrics.server_max_memory_kb,
        metrics.client_max_memory_kb,
        metrics.server_avg_cpu,
        metrics.client_avg_cpu,
        metrics.max_connections
    )
}

/// Passed / total
pub fn tally(outcomes: &[ScenarioOutcome]) -> (usize, usize) {
    let passed = outcomes.iter().filter(|o| o.passed()).count();
    (passed, outcomes.len())
}

/// Print PASS/FAIL per scenario and the overall tally
pub fn print_summary(outcomes: &[ScenarioOutcome], verbose: bool) {
    println!("\n{}", "Summary:".cyan());

    for outcome in outcomes {
        match &outcome.verdict {
            Verdict::Pass => println!("  {} {}", "PASS".green().bold(), outcome.name),
            Verdict::Fail(cause) => {
                println!("  {} {} ({})", "FAIL".red().bold(), outcome.name, cause);
                if verbose {
                    print_tail("server", &outcome.server_tail);
                    print_tail("client", &outcome.client_tail);
                }
            }
        }
    }

    let (passed, total) = tally(outcomes);
    let line = format!("Passed {}/{}", passed, total);
    if passed == total {
        println!("\n{}\n", line.green().bold());
    } else {
        println!("\n{}\n", line.red().bold());
    }
}

fn print_tail(role: &str, tail: &[String]) {
    if tail.is_empty() {
        return;
    }
    println!("    last {} output:", role);
    for line in tail {
        println!("      {}", line.dimmed());
    }
}
