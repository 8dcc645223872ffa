// Turns structured run results into a console transcript
//
// Pure transform: nothing here touches a sandbox or a session.

use gradebox_common::compare::{first_difference, CompareOptions};
use gradebox_common::types::{
    CaseStatus, CompileError, Mode, PerCaseResult, RunOutcome, RunReport,
};
use gradebox_common::Value;
use serde::Serialize;
use std::fmt;

use crate::evaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Passed,
    Failed,
    RuntimeError,
    Timeout,
    CompileError,
    Detail,
    Console,
    Notice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayLine {
    pub kind: LineKind,
    pub indent: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DisplayModel {
    pub lines: Vec<DisplayLine>,
    pub summary: Option<String>,
}

impl DisplayModel {
    fn push(&mut self, kind: LineKind, indent: usize, text: impl Into<String>) {
        self.lines.push(DisplayLine {
            kind,
            indent,
            text: text.into(),
        });
    }

    /// Adds `label` followed by a possibly multi-line rendering
    fn push_value(&mut self, indent: usize, label: &str, rendered: &str) {
        let mut parts = rendered.lines();
        let first = parts.next().unwrap_or("");
        self.push(LineKind::Detail, indent, format!("{}{}", label, first));
        for rest in parts {
            self.push(LineKind::Detail, indent + 1, rest);
        }
    }
}

impl fmt::Display for DisplayModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{:width$}{}", "", line.text, width = line.indent * 2)?;
        }
        if let Some(summary) = &self.summary {
            if !self.lines.is_empty() {
                writeln!(f)?;
            }
            writeln!(f, "{}", summary)?;
        }
        Ok(())
    }
}

/// Formats results for one problem's function
#[derive(Debug, Clone)]
pub struct Reporter {
    function_name: String,
    compare: CompareOptions,
}

impl Reporter {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            compare: CompareOptions::default(),
        }
    }

    /// Use the same comparison rules the grader used when locating differences
    pub fn with_compare_options(mut self, compare: CompareOptions) -> Self {
        self.compare = compare;
        self
    }

    pub fn format(&self, results: &[PerCaseResult]) -> DisplayModel {
        let mut model = DisplayModel::default();
        for result in results {
            self.format_case(&mut model, result);
        }
        let summary = evaluator::aggregate_results(results);
        model.summary = Some(format!("{}/{} passed", summary.passed_count, summary.total_count));
        model
    }

    pub fn format_outcome(&self, outcome: &RunOutcome) -> DisplayModel {
        match outcome {
            RunOutcome::CompileFailed { error } => {
                let mut model = DisplayModel::default();
                model.push(LineKind::CompileError, 0, compile_error_line(error));
                model.summary = Some("Compilation failed; no test cases were run".to_string());
                model
            }
            RunOutcome::Completed { results, .. } => self.format(results),
            RunOutcome::Cancelled { results } => {
                let mut model = self.format(results);
                model.push(
                    LineKind::Notice,
                    0,
                    format!("Run cancelled after {} case(s)", results.len()),
                );
                model
            }
        }
    }

    /// `stale` marks results produced from text that has since changed
    pub fn format_report(&self, report: &RunReport, stale: bool) -> DisplayModel {
        let mut header = DisplayModel::default();
        if report.mode == Mode::ShowingSolution {
            header.push(LineKind::Notice, 0, "Results for the reference solution");
        }
        if stale {
            header.push(
                LineKind::Notice,
                0,
                "Results are out of date: the source changed since this run",
            );
        }

        let body = self.format_outcome(&report.outcome);
        header.lines.extend(body.lines);
        header.summary = body.summary;
        header
    }

    fn format_case(&self, model: &mut DisplayModel, result: &PerCaseResult) {
        let (glyph, kind) = match result.status {
            CaseStatus::Passed => ("✓", LineKind::Passed),
            CaseStatus::Failed => ("✗", LineKind::Failed),
            CaseStatus::RuntimeError => ("⚠", LineKind::RuntimeError),
            CaseStatus::Timeout => ("⏱", LineKind::Timeout),
        };

        let mut status = format!("{} Case {}", glyph, result.case_index + 1);
        if !result.test_case.description.is_empty() {
            status.push_str(": ");
            status.push_str(&result.test_case.description);
        }
        status.push_str(&format!(" ({} ms)", result.execution_time_ms));
        model.push(kind, 0, status);

        model.push(LineKind::Detail, 1, format!("Input: {}", self.render_call(&result.test_case.input)));
        for line in &result.console_output {
            model.push(LineKind::Console, 1, format!("> {}", line));
        }

        match result.status {
            CaseStatus::Passed => {
                if let Some(actual) = &result.actual {
                    model.push_value(1, "Output: ", &actual.render_pretty());
                }
            }
            CaseStatus::Failed => {
                let expected = &result.test_case.expected;
                model.push_value(1, "Expected: ", &expected.render_pretty());
                let actual = result.actual.clone().unwrap_or(Value::Undefined);
                model.push_value(1, "Actual:   ", &actual.render_pretty());
                if let Some(difference) = first_difference(expected, &actual, &self.compare) {
                    model.push(LineKind::Detail, 1, format!("Difference at {}", difference));
                }
            }
            CaseStatus::RuntimeError => {
                let message = result.error_message.as_deref().unwrap_or("unknown error");
                model.push(LineKind::Detail, 1, format!("Error: {}", message));
            }
            CaseStatus::Timeout => {
                let message = result
                    .error_message
                    .as_deref()
                    .unwrap_or("exceeded the time budget");
                model.push(LineKind::Detail, 1, format!("Timed out: {}", message));
            }
        }
    }

    fn render_call(&self, input: &[Value]) -> String {
        let args: Vec<String> = input.iter().map(Value::render).collect();
        format!("{}({})", self.function_name, args.join(", "))
    }
}

fn compile_error_line(error: &CompileError) -> String {
    match (error.line, error.column) {
        (Some(line), Some(column)) => {
            format!("✗ Compile error (line {}, column {}): {}", line, column, error.message)
        }
        (Some(line), None) => format!("✗ Compile error (line {}): {}", line, error.message),
        _ => format!("✗ Compile error: {}", error.message),
    }
}
