use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Where and why a run was halted, for the operator-facing report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbortReport {
    pub message: String,
    pub task: Option<String>,
    pub host: Option<String>,
}

#[derive(Debug, Default)]
struct AbortState {
    flag: AtomicBool,
    report: Mutex<Option<AbortReport>>,
}

/// Run-wide halt signal shared by the dispatcher, the executor and every worker.
///
/// Once triggered no new task invocation or remote command starts; commands
/// already in flight run to completion. Triggering is idempotent: the first
/// message is kept.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    state: Arc<AbortState>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, message: impl Into<String>) {
        let mut report = self
            .state
            .report
            .lock()
            .expect("Mutex should not be poisoned");
        if report.is_none() {
            let message = message.into();
            log::debug!("Abort triggered: {}", message);
            *report = Some(AbortReport {
                message,
                ..Default::default()
            });
        }
        self.state.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.state.flag.load(Ordering::SeqCst)
    }

    /// Records the task/host that was executing when the run halted.
    /// The innermost site unwinds first, so only the first call sticks.
    pub fn locate(&self, task: &str, host: Option<&str>) {
        let mut report = self
            .state
            .report
            .lock()
            .expect("Mutex should not be poisoned");
        let report = report.get_or_insert_with(AbortReport::default);
        if report.task.is_none() {
            report.task = Some(task.to_string());
            report.host = host.map(str::to_string);
        }
    }

    pub fn message(&self) -> Option<String> {
        self.report().map(|r| r.message)
    }

    pub fn report(&self) -> Option<AbortReport> {
        self.state
            .report
            .lock()
            .expect("Mutex should not be poisoned")
            .clone()
    }
}
