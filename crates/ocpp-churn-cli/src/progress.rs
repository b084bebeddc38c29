//! Verbose progress output using indicatif.

use indicatif::{ProgressBar, ProgressStyle};
use ocpp_churn::model::RunStatus;
use ocpp_churn::runner::progress::{ProgressCallback, ProgressEvent};
use std::io::Write;
use std::sync::Mutex;

/// Progress callback that draws a cycle counter on stderr.
///
/// The bar length grows as sessions start and announce their budgets, so it
/// only settles once every session has been spawned.
pub struct VerboseProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl VerboseProgress {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(bar) = self.bar.lock() {
            if let Some(pb) = bar.as_ref() {
                f(pb);
            }
        }
    }
}

impl ProgressCallback for VerboseProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { run_id, sessions } => {
                let _ = writeln!(
                    std::io::stderr(),
                    "run started: {run_id} ({sessions} sessions)"
                );
                let pb = ProgressBar::new(0);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.cyan} [{elapsed_precise}] {bar:30} {pos}/{len} cycles {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                pb.enable_steady_tick(std::time::Duration::from_millis(100));
                if let Ok(mut bar) = self.bar.lock() {
                    *bar = Some(pb);
                }
            }
            ProgressEvent::SessionStarted {
                reconnect_budget, ..
            } => {
                self.with_bar(|pb| pb.inc_length(u64::from(*reconnect_budget)));
            }
            ProgressEvent::StateChanged { .. } => {}
            ProgressEvent::CycleCompleted { .. } => self.with_bar(|pb| pb.inc(1)),
            ProgressEvent::SessionCompleted {
                device_id,
                reconnect_count,
                message_count,
                failed,
                ..
            } => {
                let icon = if *failed {
                    "\x1b[31m✗\x1b[0m"
                } else {
                    "\x1b[32m✓\x1b[0m"
                };
                let line =
                    format!("  {icon} {device_id} ({reconnect_count} reconnects, {message_count} messages)");
                self.with_bar(|pb| pb.println(&line));
            }
            ProgressEvent::RunCompleted {
                run_id: _,
                status,
                duration_ms,
            } => {
                if let Ok(mut bar) = self.bar.lock() {
                    if let Some(pb) = bar.take() {
                        pb.finish_and_clear();
                    }
                }
                let status_msg = match status {
                    RunStatus::Completed => "\x1b[32mcompleted\x1b[0m",
                    RunStatus::Canceled => "\x1b[33mcanceled\x1b[0m",
                };
                let _ = writeln!(
                    std::io::stderr(),
                    "run {status_msg}: {duration_ms}ms total"
                );
            }
        }
    }
}
