use crate::bus::{BuildMessage, MessageBus, ShutdownMessage, Subscription, WorkerMessage};
use crate::status::label::status_icon;
use crate::status::{RunStatus, StatusStore, StatusSummary, StatusUpdate, TestStatus};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::sync::Arc;

/// Prints run events to the terminal.
///
/// Subscribes next to the status store, so by the time its `test` handler
/// runs the store already holds the merged state.
pub struct ConsoleReporter {
    progress: ProgressBar,
    subscriptions: Vec<Subscription>,
}

impl ConsoleReporter {
    pub fn attach(bus: &MessageBus, store: &Arc<StatusStore>, show_progress: bool) -> Self {
        // When not a TTY (piped output), use hidden target to avoid terminal escape codes
        let progress = if show_progress && std::io::stdout().is_terminal() {
            ProgressBar::new(0)
        } else {
            ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden())
        };
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner} [{bar:30}] {pos}/{len} {msg}")
        {
            progress.set_style(style.progress_chars("=> "));
        }

        let mut subscriptions = Vec::new();

        let pb = progress.clone();
        subscriptions.push(bus.subscribe(move |message: &WorkerMessage| {
            let line = match message {
                WorkerMessage::Spawned { worker_id, pid } => format!(
                    "{} Worker {} started{}",
                    "▶".green().bold(),
                    worker_id,
                    pid.map(|p| format!(" (pid {})", p)).unwrap_or_default()
                ),
                WorkerMessage::Exited { worker_id, .. } => {
                    format!("{} Worker {} exited", "■".blue().bold(), worker_id)
                }
                WorkerMessage::Crashed { worker_id, reason } => format!(
                    "{} Worker {} crashed: {}",
                    "✗".red().bold(),
                    worker_id,
                    reason.red()
                ),
            };
            pb.println(line);
        }));

        let pb = progress.clone();
        subscriptions.push(bus.subscribe(move |message: &BuildMessage| match message {
            BuildMessage::Started => pb.println(format!("{} Building stories...", "⚙".cyan())),
            BuildMessage::Progress { percent, message } => pb.set_message(format!(
                "build {:.0}% {}",
                percent,
                message.as_deref().unwrap_or("")
            )),
            BuildMessage::Success => {
                pb.set_message("");
                pb.println(format!("{} Build finished", "✓".green()));
            }
            BuildMessage::Failed { error } => {
                pb.println(format!("{} Build failed: {}", "✗".red(), error.red()))
            }
        }));

        let pb = progress.clone();
        subscriptions.push(bus.subscribe(move |_: &ShutdownMessage| {
            pb.println(format!("{} Shutdown requested", "⏹".yellow()));
        }));

        let pb = progress.clone();
        let reader = store.clone();
        subscriptions.push(bus.subscribe(move |update: &StatusUpdate| {
            let Some(tests) = &update.tests else {
                return;
            };
            let current = reader.current();
            for (id, test_update) in tests.iter() {
                let Some(status) = test_update.and_then(|u| u.status) else {
                    continue;
                };
                // Removed in the same batch.
                let Some(test) = current.tests.get(id) else {
                    continue;
                };
                if !status.is_terminal() {
                    continue;
                }
                pb.println(format_line(test.title(), status, status_icon(Some(status), &test.skip)));
            }
        }));

        let pb = progress.clone();
        subscriptions.push(store.on_change(move |status: &Arc<RunStatus>| {
            let summary = status.summary();
            pb.set_length(summary.total as u64);
            pb.set_position(summary.finished() as u64);
        }));

        Self {
            progress,
            subscriptions,
        }
    }

    /// Detach from the bus and print the run summary.
    pub fn finish(self, status: &RunStatus) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.progress.finish_and_clear();
        print_summary(&status.summary());
    }
}

fn format_line(title: String, status: TestStatus, icon: &str) -> String {
    let label = match status {
        TestStatus::Success => "PASSED".green().bold(),
        TestStatus::Failed => "FAILED".red().bold(),
        TestStatus::Skipped => "SKIPPED".yellow().bold(),
        _ => status.as_str().to_uppercase().white().bold(),
    };
    format!("  {} {} [{}]", icon, title, label)
}

pub fn print_summary(summary: &StatusSummary) {
    println!("\n{} Run finished", "■".blue().bold());
    println!("  Total tests: {}", summary.total);
    println!(
        "  {} passed, {} failed, {} skipped",
        summary.passed.to_string().green(),
        summary.failed.to_string().red(),
        summary.skipped.to_string().yellow()
    );
    let unfinished = summary.running + summary.pending;
    if unfinished > 0 {
        println!("  {} unfinished", unfinished.to_string().dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::TestUpdate;

    #[test]
    fn test_reporter_tracks_progress_and_detaches() {
        let bus = MessageBus::detached();
        let store = StatusStore::attach(&bus);
        let reporter = ConsoleReporter::attach(&bus, &store, false);

        bus.send(BuildMessage::Success);
        bus.send(
            StatusUpdate::default()
                .with_test(
                    "t1",
                    TestUpdate {
                        path: Some(vec!["A".into()]),
                        status: Some(TestStatus::Success),
                        ..Default::default()
                    },
                )
                .with_test(
                    "t2",
                    TestUpdate {
                        status: Some(TestStatus::Running),
                        ..Default::default()
                    },
                ),
        );

        assert_eq!(reporter.progress.length(), Some(2));
        assert_eq!(reporter.progress.position(), 1);

        reporter.finish(&store.current());
        assert_eq!(bus.subscriber_count(crate::bus::Scope::Worker), 0);
        assert_eq!(bus.subscriber_count(crate::bus::Scope::Test), 1);
    }

    #[test]
    fn test_format_line_uses_title_and_label() {
        colored::control::set_override(false);
        let line = format_line("A / B".to_string(), TestStatus::Failed, "❌");
        assert_eq!(line, "  ❌ A / B [FAILED]");
    }
}
