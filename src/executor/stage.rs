//! Stage runner
//!
//! Wraps one phase of a run: shows a live status line on terminals while
//! the work is pending, then records how it ended.

#![allow(dead_code)]

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::io::{IsTerminal, Write};
use std::time::Duration;
use tracing::{error, info};

use crate::utils::Timer;

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
}

/// How a stage ended
#[derive(Clone, Debug, Serialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    pub duration_ms: u64,
    /// Success summary or failure message
    pub detail: String,
}

impl fmt::Display for StageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self.status {
            StageStatus::Succeeded => "✓",
            StageStatus::Failed => "✗",
        };
        write!(f, "{} {} ({}ms)", symbol, self.name, self.duration_ms)?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// Output mode of the status line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StatusLine {
    Hidden,
    Final,
    Live,
}

pub struct StageRunner {
    display: StatusLine,
    colorize: bool,
    records: Vec<StageRecord>,
}

impl StageRunner {
    /// Status lines on stderr, animated when it is a terminal
    pub fn new() -> Self {
        let display = if std::io::stderr().is_terminal() {
            StatusLine::Live
        } else {
            StatusLine::Final
        };
        Self {
            display,
            colorize: true,
            records: Vec::new(),
        }
    }

    /// Record stages without printing anything
    pub fn quiet() -> Self {
        Self {
            display: StatusLine::Hidden,
            colorize: false,
            records: Vec::new(),
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&StageRecord> {
        self.records.last()
    }

    /// Run `work` as the stage `name`; `summarize` describes a success
    pub async fn run<T, E, F, S>(&mut self, name: &str, work: F, summarize: S) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
        S: FnOnce(&T) -> String,
    {
        let timer = Timer::start(name);
        tokio::pin!(work);

        let result = if self.display == StatusLine::Live {
            let mut ticker = tokio::time::interval(Duration::from_millis(100));
            let mut frame = 0;
            loop {
                tokio::select! {
                    result = &mut work => break result,
                    _ = ticker.tick() => {
                        eprint!("\r{} {}...", SPINNER[frame % SPINNER.len()], name);
                        let _ = std::io::stderr().flush();
                        frame += 1;
                    }
                }
            }
        } else {
            work.await
        };

        let (status, detail) = match &result {
            Ok(value) => (StageStatus::Succeeded, summarize(value)),
            Err(e) => (StageStatus::Failed, e.to_string()),
        };
        let record = StageRecord {
            name: name.to_string(),
            status,
            duration_ms: timer.elapsed_ms(),
            detail,
        };

        match record.status {
            StageStatus::Succeeded => info!("Stage '{}' finished in {}ms", name, record.duration_ms),
            StageStatus::Failed => error!("Stage '{}' failed: {}", name, record.detail),
        }
        self.print(&record);
        self.records.push(record);
        result
    }

    fn print(&self, record: &StageRecord) {
        let line = match (self.colorize, record.status) {
            (false, _) => record.to_string(),
            (true, StageStatus::Succeeded) => format!("\x1b[32m{record}\x1b[0m"),
            (true, StageStatus::Failed) => format!("\x1b[31m{record}\x1b[0m"),
        };
        match self.display {
            StatusLine::Hidden => {}
            StatusLine::Final => eprintln!("{line}"),
            // Clear the spinner before the final line
            StatusLine::Live => eprintln!("\r\x1b[2K{line}"),
        }
    }
}

impl Default for StageRunner {
    fn default() -> Self {
        Self::new()
    }
}
