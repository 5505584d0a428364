//! Result reporter
//!
//! Projects a finished run into table, summary or JSON output. Failures are
//! rendered nested under their enclosing suite names.

use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::Path;

use crate::models::{FailureReason, FailureResult, RunSummary, TestOutcome, TestStatus};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::JsonPretty)
    }
}

/// JSON shape of a report
#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    summary: &'a RunSummary,
    failures: Vec<FailureResult>,
}

/// Renders run summaries
pub struct ResultReporter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultReporter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Render a full run
    pub fn render(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Table => self.render_table(summary),
            OutputFormat::Summary => self.render_brief(summary),
            OutputFormat::Json => {
                serde_json::to_string(&self.json_report(summary)).unwrap_or_default()
            }
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(&self.json_report(summary)).unwrap_or_default()
            }
        }
    }

    fn json_report<'a>(&self, summary: &'a RunSummary) -> JsonReport<'a> {
        JsonReport {
            summary,
            failures: summary.failures(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if self.colorize {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn status_label(&self, status: TestStatus) -> String {
        let label = format!("{} {}", status.symbol(), status);
        match status {
            TestStatus::Passed => self.paint(&label, "32"),
            TestStatus::Failed => self.paint(&label, "31"),
            TestStatus::TimedOut => self.paint(&label, "35"),
            TestStatus::Disabled => self.paint(&label, "33"),
        }
    }

    /// One line per test outcome
    pub fn format_outcome(&self, outcome: &TestOutcome) -> String {
        format!(
            "{:12} {} > {} [{}ms]",
            self.status_label(outcome.status),
            outcome.scenario,
            outcome.description,
            outcome.duration_ms
        )
    }

    fn render_table(&self, summary: &RunSummary) -> String {
        let mut output = format!("\n{}", found_line(summary));

        output.push_str("╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  Parallel run - {:3} scenario(s), {:4} test(s)                ║\n",
            summary.scenarios, summary.total
        ));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for outcome in &summary.outcomes {
            output.push_str(&format!("  {}\n", self.format_outcome(outcome)));
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        output.push_str(&self.totals(summary));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        if !summary.ignored.is_empty() {
            output.push_str("\n Ignored scenarios (no matching tests):\n");
            for name in &summary.ignored {
                output.push_str(&format!("   - {name}\n"));
            }
        }

        let failures = summary.failures();
        if !failures.is_empty() {
            output.push('\n');
            output.push_str(&self.format_failures(&failures));
        }

        output
    }

    fn totals(&self, summary: &RunSummary) -> String {
        let passed = self.paint(&summary.passed.to_string(), "32");
        let failed = if summary.failed > 0 {
            self.paint(&summary.failed.to_string(), "31")
        } else {
            summary.failed.to_string()
        };
        let timed_out = if summary.timed_out > 0 {
            self.paint(&summary.timed_out.to_string(), "35")
        } else {
            summary.timed_out.to_string()
        };

        format!(
            "  Total: {} | Passed: {} | Failed: {} | Timed out: {} | Disabled: {}\n  {} signers used | Duration: {}ms\n",
            summary.total,
            passed,
            failed,
            timed_out,
            summary.disabled,
            summary.signers_used,
            summary.duration_ms
        )
    }

    fn render_brief(&self, summary: &RunSummary) -> String {
        let mut output = found_line(summary);
        output.push_str(&format!(
            "{}/{} passed, {} failed, {} timed out, {} disabled in {}ms ({} signers used)\n",
            summary.passed,
            summary.total,
            summary.failed,
            summary.timed_out,
            summary.disabled,
            summary.duration_ms,
            summary.signers_used
        ));
        let failures = summary.failures();
        if !failures.is_empty() {
            output.push_str(&self.format_failures(&failures));
        }
        output
    }

    /// Failures nested by suite path, with assertion detail when available
    pub fn format_failures(&self, failures: &[FailureResult]) -> String {
        let mut output = format!(" Failures ({}):\n", failures.len());
        let mut previous: &[String] = &[];

        for (index, failure) in failures.iter().enumerate() {
            let shared = previous
                .iter()
                .zip(&failure.describes)
                .take_while(|(a, b)| a == b)
                .count();

            for (depth, describe) in failure.describes.iter().enumerate().skip(shared) {
                output.push_str(&format!("{}{}\n", "  ".repeat(depth + 1), describe));
            }

            let indent = "  ".repeat(failure.describes.len() + 1);
            output.push_str(&format!(
                "{}{}) {}\n",
                indent,
                index + 1,
                self.paint(&failure.test_case, "31")
            ));
            for line in reason_lines(&failure.reason) {
                output.push_str(&format!("{indent}   {line}\n"));
            }

            previous = &failure.describes;
        }

        output
    }
}

/// Same wording as the parsing stage line, which goes to stderr
fn found_line(summary: &RunSummary) -> String {
    format!("Found {} scenarios to run\n", summary.scenarios)
}

fn show(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{s:?}"),
        other => other.to_string(),
    }
}

fn reason_lines(reason: &FailureReason) -> Vec<String> {
    match reason {
        FailureReason::Assertion {
            actual,
            expected,
            operator,
        } => vec![
            "AssertionError".to_string(),
            format!("actual:   {}", show(actual)),
            format!("expected: {}", show(expected)),
            format!("operator: {operator}"),
        ],
        FailureReason::Timeout { timeout_ms } => {
            vec![format!("Timed out after {timeout_ms}ms")]
        }
        FailureReason::Error { message } => message.lines().map(str::to_string).collect(),
    }
}

impl Default for ResultReporter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Write a rendered report to a file, without color codes
pub fn write_report_to_file(
    path: &Path,
    summary: &RunSummary,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let reporter = ResultReporter::new(format).no_color();
    let content = reporter.render(summary);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
