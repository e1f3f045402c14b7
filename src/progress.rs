use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// How step output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinner + ring-buffer log lines, collapsed on completion.
    Normal,
    /// No ANSI — plain println output (piped / non-TTY).
    Plain,
    /// Spinners only, no log lines.
    Quiet,
}

/// Numbered steps with a spinner while running and a checkmark when done.
pub struct StepProgress {
    multi: MultiProgress,
    total_steps: usize,
    current_step: usize,
    mode: OutputMode,
}

/// Handle passed into a running step for streaming log lines.
///
/// Log lines are extra lines in the spinner bar's message; completion sets
/// the message back to a single line, so indicatif handles the terminal
/// line delta itself.
pub struct Step {
    bar: ProgressBar,
    lines: Arc<Mutex<VecDeque<String>>>,
    label: String,
    mode: OutputMode,
}

const MAX_LOG_LINES: usize = 8;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] {spinner:.cyan} {msg}")
        .expect("static template")
}

fn done_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] \u{2713} {msg:.green}")
        .expect("static template")
}

impl StepProgress {
    pub fn new(total_steps: usize, mode: OutputMode) -> Self {
        let multi = if mode == OutputMode::Plain {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self {
            multi,
            total_steps,
            current_step: 0,
            mode,
        }
    }

    /// Run an async task as a numbered step.
    pub async fn run<F, Fut, T>(&mut self, label: &str, f: F) -> T
    where
        F: FnOnce(Step) -> Fut,
        Fut: Future<Output = T>,
    {
        self.current_step += 1;
        let prefix = format!("{}/{}", self.current_step, self.total_steps);

        if self.mode == OutputMode::Plain {
            println!("[{prefix}] {label}");
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.set_prefix(prefix.clone());
        bar.set_message(label.to_string());
        bar.enable_steady_tick(std::time::Duration::from_millis(80));

        let step = Step {
            bar: bar.clone(),
            lines: Arc::new(Mutex::new(VecDeque::new())),
            label: label.to_string(),
            mode: self.mode,
        };

        let result = f(step).await;

        if self.mode == OutputMode::Plain {
            println!("[{prefix}] \u{2713} {label}");
        }
        bar.set_style(done_style());
        bar.finish_with_message(label.to_string());

        result
    }

    /// Print an info line below the managed area.
    pub fn info(&self, text: &str) {
        if self.mode == OutputMode::Plain {
            println!("  {text}");
        } else {
            self.multi.println(format!("  {text}")).ok();
        }
    }

    pub fn println(&self, text: &str) {
        if self.mode == OutputMode::Plain {
            println!("{text}");
        } else {
            self.multi.println(text).ok();
        }
    }
}

impl Step {
    /// Stream a log line under this step (ring buffer, collapsed on
    /// completion).
    pub fn log(&self, line: &str) {
        match self.mode {
            OutputMode::Quiet => return,
            OutputMode::Plain => {
                println!("    {line}");
                return;
            }
            OutputMode::Normal => {}
        }

        let mut lines = self.lines.lock().expect("progress lock");
        if lines.len() >= MAX_LOG_LINES {
            lines.pop_front();
        }
        lines.push_back(line.to_string());

        let mut msg = self.label.clone();
        for l in lines.iter() {
            msg.push_str("\n    ");
            msg.push_str(l);
        }
        self.bar.set_message(msg);
    }
}
