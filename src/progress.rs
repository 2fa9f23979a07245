//! Progress reporting.
//!
//! Every step of the pipeline reports consumed work as a plain byte count
//! through [`ProgressSink`]. Per-component bookkeeping (resetting totals,
//! switching between "downloading" and "patching", marking done) goes
//! through [`TaskProgress`]. The console rendering lives in [`ProgressBoard`]
//! and is the only place that knows about indicatif.

use crate::game::Component;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Receives incremental amounts of work.
pub trait ProgressSink: Send + Sync {
    fn report(&self, amount: u64);
}

impl<F> ProgressSink for F
where
    F: Fn(u64) + Send + Sync,
{
    fn report(&self, amount: u64) {
        self(amount)
    }
}

/// Lifecycle of one component's task as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    DownloadWaiting,
    Downloading,
    Downloaded,
    PatchWaiting,
    Patching,
    Patched,
    Skipped,
}

impl TaskState {
    pub fn label(self) -> &'static str {
        match self {
            TaskState::DownloadWaiting => "Download waiting",
            TaskState::Downloading => "Downloading",
            TaskState::Downloaded => "Downloaded",
            TaskState::PatchWaiting => "Patch waiting",
            TaskState::Patching => "Patching",
            TaskState::Patched => "Patched",
            TaskState::Skipped => "Skipped",
        }
    }

    fn color(self) -> &'static str {
        match self {
            TaskState::DownloadWaiting => "yellow",
            TaskState::Downloading => "blue",
            TaskState::Downloaded => "green",
            TaskState::PatchWaiting => "red",
            TaskState::Patching => "yellow",
            TaskState::Patched => "magenta",
            TaskState::Skipped => "white",
        }
    }
}

/// Progress handle for one component.
pub trait TaskProgress: ProgressSink {
    /// Reset the counter and start a new phase with a known amount of work.
    fn begin(&self, state: TaskState, total: u64);

    /// Name the sub-step currently running (e.g. "Verifying").
    fn step(&self, label: &str);

    /// Mark the task as done with the given final state.
    fn finish(&self, state: TaskState);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _amount: u64) {}
}

impl TaskProgress for NoProgress {
    fn begin(&self, _state: TaskState, _total: u64) {}
    fn step(&self, _label: &str) {}
    fn finish(&self, _state: TaskState) {}
}

/// Headless task progress that remembers what happened.
///
/// Used for non-interactive runs and by tests to check byte accounting.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    reported: AtomicU64,
    total: AtomicU64,
    states: Mutex<Vec<TaskState>>,
    steps: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes reported since the last `begin`.
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }

    /// Total announced by the last `begin`.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn states(&self) -> Vec<TaskState> {
        self.states.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn steps(&self) -> Vec<String> {
        self.steps.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_state(&self) -> Option<TaskState> {
        self.states().last().copied()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, amount: u64) {
        self.reported.fetch_add(amount, Ordering::Relaxed);
    }
}

impl TaskProgress for RecordingProgress {
    fn begin(&self, state: TaskState, total: u64) {
        self.reported.store(0, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
        if let Ok(mut states) = self.states.lock() {
            states.push(state);
        }
    }

    fn step(&self, label: &str) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push(label.to_string());
        }
    }

    fn finish(&self, state: TaskState) {
        if let Ok(mut states) = self.states.lock() {
            states.push(state);
        }
    }
}

/// One indicatif bar bound to a component.
pub struct BarTask {
    bar: ProgressBar,
    component: Component,
}

impl BarTask {
    fn style(state: TaskState) -> ProgressStyle {
        let template = format!(
            "{{prefix:>16.{color}}} {{msg:<14.dim}} [{{bar:40.cyan/blue}}] {{percent:>3}}% \
             {{bytes}}/{{total_bytes}} {{bytes_per_sec}} {{eta}}",
            color = state.color()
        );
        ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }

    fn apply_state(&self, state: TaskState) {
        self.bar.set_style(Self::style(state));
        self.bar
            .set_prefix(format!("{} {}", state.label(), self.component.name()));
    }
}

impl ProgressSink for BarTask {
    fn report(&self, amount: u64) {
        self.bar.inc(amount);
    }
}

impl TaskProgress for BarTask {
    fn begin(&self, state: TaskState, total: u64) {
        self.bar.reset();
        self.bar.set_length(total);
        self.bar.set_message("");
        self.apply_state(state);
    }

    fn step(&self, label: &str) {
        self.bar.set_message(label.to_string());
    }

    fn finish(&self, state: TaskState) {
        self.apply_state(state);
        self.bar.set_message("");
        if let Some(len) = self.bar.length() {
            self.bar.set_position(len);
        }
        self.bar.tick();
    }
}

/// Console progress: one bar per component plus an elapsed-time spinner.
pub struct ProgressBoard {
    multi: MultiProgress,
    timer: ProgressBar,
    tasks: BTreeMap<Component, Arc<BarTask>>,
}

impl ProgressBoard {
    pub fn new(components: impl IntoIterator<Item = Component>) -> Self {
        let multi = MultiProgress::new();
        let timer = multi.add(ProgressBar::new_spinner());
        timer.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} gsp - {msg} - [{elapsed_precise}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        timer.set_message("Working your magic");
        timer.enable_steady_tick(Duration::from_millis(250));

        let tasks = components
            .into_iter()
            .map(|component| {
                let bar = multi.add(ProgressBar::new(0));
                let task = BarTask { bar, component };
                task.apply_state(TaskState::DownloadWaiting);
                (component, Arc::new(task))
            })
            .collect();

        Self { multi, timer, tasks }
    }

    /// Task handle for a component, or a no-op handle when it has no bar.
    pub fn task(&self, component: Component) -> Arc<dyn TaskProgress> {
        match self.tasks.get(&component) {
            Some(task) => task.clone(),
            None => Arc::new(NoProgress),
        }
    }

    /// Print a line above the bars without tearing them.
    pub fn println(&self, line: impl AsRef<str>) {
        let _ = self.multi.println(line);
    }

    pub fn finish(&self, message: &str) {
        self.timer.finish_with_message(message.to_string());
    }
}
