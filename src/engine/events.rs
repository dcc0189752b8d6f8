//! Engine execution events
//!
//! The engine broadcasts progress over a `tokio::sync::broadcast`
//! channel. The bundled console listener renders it for operators;
//! embedders can subscribe for their own rendering.

use tokio::sync::broadcast;

use crate::model::{ActionKind, CaseStatus, StepCounts, SuiteSummary};

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum EngineEvent {
    SuiteStarted {
        run_id: String,
        case_count: usize,
    },
    SuiteFinished {
        summary: SuiteSummary,
    },

    CaseStarted {
        module: String,
        step_count: usize,
    },
    CaseFinished {
        module: String,
        status: CaseStatus,
        counts: StepCounts,
        duration_ms: u64,
    },

    StepStarted {
        index: usize,
        number: u32,
        description: String,
        action: ActionKind,
    },
    StepPassed {
        index: usize,
        duration_ms: u64,
    },
    StepFailed {
        index: usize,
        error: String,
        duration_ms: u64,
    },
    StepSkipped {
        index: usize,
        reason: String,
    },

    /// Device/session/app bring-up progress
    Phase {
        message: String,
    },
    /// Non-fatal condition the operator should see
    Warning {
        message: String,
    },
}

/// Broadcast emitter for engine events
pub struct EventEmitter {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<EngineEvent>) {
        let (sender, receiver) = broadcast::channel(256);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn phase(&self, message: impl Into<String>) {
        self.emit(EngineEvent::Phase {
            message: message.into(),
        });
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(EngineEvent::Warning {
            message: message.into(),
        });
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

/// Console listener for printing real-time progress
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<EngineEvent>) {
        use colored::Colorize;
        use indicatif::{ProgressBar, ProgressStyle};
        use std::io::IsTerminal;
        use std::time::Duration;

        let interactive = std::io::stdout().is_terminal();
        let mut spinner: Option<ProgressBar> = None;

        let clear = |spinner: &mut Option<ProgressBar>| {
            if let Some(bar) = spinner.take() {
                bar.finish_and_clear();
            }
        };

        while let Ok(event) = receiver.recv().await {
            match event {
                EngineEvent::SuiteStarted { run_id, case_count } => {
                    println!(
                        "{} Run {} ({} case{})",
                        "▶".green().bold(),
                        run_id.cyan(),
                        case_count,
                        if case_count == 1 { "" } else { "s" }
                    );
                }
                EngineEvent::SuiteFinished { summary } => {
                    clear(&mut spinner);
                    let counts = summary.counts;
                    println!(
                        "\n{} {} passed, {} failed, {} skipped ({} case{}, {:.1}s)",
                        if summary.failed_cases == 0 {
                            "✔".green().bold()
                        } else {
                            "✖".red().bold()
                        },
                        counts.passed.to_string().green(),
                        counts.failed.to_string().red(),
                        counts.skipped.to_string().yellow(),
                        summary.total_cases,
                        if summary.total_cases == 1 { "" } else { "s" },
                        summary.duration_ms as f64 / 1000.0
                    );
                }
                EngineEvent::CaseStarted { module, step_count } => {
                    clear(&mut spinner);
                    println!(
                        "\n{} {} ({} steps)",
                        "●".cyan(),
                        module.bold(),
                        step_count
                    );
                }
                EngineEvent::CaseFinished {
                    module,
                    status,
                    counts,
                    duration_ms,
                } => {
                    clear(&mut spinner);
                    let label = match status {
                        CaseStatus::Passed => "PASSED".green().bold(),
                        CaseStatus::Failed => "FAILED".red().bold(),
                    };
                    println!(
                        "  {} {}: {}/{}/{} in {:.1}s",
                        label,
                        module,
                        counts.passed,
                        counts.failed,
                        counts.skipped,
                        duration_ms as f64 / 1000.0
                    );
                }
                EngineEvent::StepStarted {
                    number,
                    description,
                    action,
                    ..
                } => {
                    clear(&mut spinner);
                    let message = format!("Step {}: {} [{}]", number, description, action.as_str());
                    if interactive {
                        let bar = ProgressBar::new_spinner();
                        bar.set_style(
                            ProgressStyle::with_template("  {spinner} {msg}")
                                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                        );
                        bar.set_message(message);
                        bar.enable_steady_tick(Duration::from_millis(100));
                        spinner = Some(bar);
                    } else {
                        println!("  … {}", message);
                    }
                }
                EngineEvent::StepPassed { index, duration_ms } => {
                    clear(&mut spinner);
                    println!(
                        "  {} step {} ({}ms)",
                        "✓".green(),
                        index + 1,
                        duration_ms
                    );
                }
                EngineEvent::StepFailed {
                    index,
                    error,
                    duration_ms,
                } => {
                    clear(&mut spinner);
                    println!("  {} step {} ({}ms)", "✗".red(), index + 1, duration_ms);
                    for line in error.lines() {
                        println!("    {}", line.red());
                    }
                }
                EngineEvent::StepSkipped { index, reason } => {
                    clear(&mut spinner);
                    println!(
                        "  {} step {} skipped: {}",
                        "○".dimmed(),
                        index + 1,
                        reason.dimmed()
                    );
                }
                EngineEvent::Phase { message } => {
                    clear(&mut spinner);
                    println!("  {} {}", "⏳".blue(), message);
                }
                EngineEvent::Warning { message } => {
                    clear(&mut spinner);
                    println!("  {} {}", "⚠".yellow(), message.yellow());
                }
            }
        }

        clear(&mut spinner);
    }
}
