use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "Easy"),
            Difficulty::Medium => write!(f, "Medium"),
            Difficulty::Hard => write!(f, "Hard"),
        }
    }
}

/// Worked example shown next to the problem description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub input: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// One entry per parameter position
    pub input: Vec<Value>,
    pub expected: Value,
    #[serde(default)]
    pub description: String,
}

/// Author-provided problem, as found in problem JSON files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDefinition {
    pub title: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub examples: Vec<Example>,
    pub starter_code: String,
    pub solution_code: String,
    pub test_cases: Vec<TestCase>,
    pub function_name: String,
}

#[derive(Debug, Error)]
pub enum ProblemError {
    #[error("problem title is empty")]
    EmptyTitle,
    #[error("'{0}' is not a valid JavaScript function name")]
    InvalidFunctionName(String),
    #[error("problem declares no test cases")]
    NoTestCases,
    #[error("test case {index} passes {actual} arguments but test case 1 passes {expected}")]
    InconsistentArity {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("failed to parse problem definition: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read problem file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

const RESERVED_WORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete",
    "do", "else", "enum", "export", "extends", "false", "finally", "for", "function", "if",
    "import", "in", "instanceof", "let", "new", "null", "return", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield", "await",
    "static", "implements", "interface", "package", "private", "protected", "public",
];

/// Plain ASCII JavaScript identifier that is not a reserved word
pub fn is_valid_function_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !RESERVED_WORDS.contains(&name)
}

impl ProblemDefinition {
    /// Parse and validate a problem from JSON text
    pub fn from_json_str(json: &str) -> Result<Self, ProblemError> {
        let problem: ProblemDefinition = serde_json::from_str(json)?;
        problem.validate()?;
        Ok(problem)
    }

    pub fn load(path: &Path) -> Result<Self, ProblemError> {
        let content = std::fs::read_to_string(path).map_err(|source| ProblemError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Static checks only; whether `function_name` is really defined by the
    /// code is decided when the sandbox compiles it.
    pub fn validate(&self) -> Result<(), ProblemError> {
        if self.title.trim().is_empty() {
            return Err(ProblemError::EmptyTitle);
        }
        if !is_valid_function_name(&self.function_name) {
            return Err(ProblemError::InvalidFunctionName(self.function_name.clone()));
        }
        let Some(first) = self.test_cases.first() else {
            return Err(ProblemError::NoTestCases);
        };
        let arity = first.input.len();
        for (idx, case) in self.test_cases.iter().enumerate().skip(1) {
            if case.input.len() != arity {
                return Err(ProblemError::InconsistentArity {
                    index: idx + 1,
                    expected: arity,
                    actual: case.input.len(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseStatus {
    Passed,
    Failed,
    RuntimeError,
    Timeout,
}

/// Outcome of one test case within one run; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerCaseResult {
    pub case_index: usize,
    pub test_case: TestCase,
    pub status: CaseStatus,
    pub actual: Option<Value>,
    pub error_message: Option<String>,
    pub console_output: Vec<String>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunSummary {
    pub passed_count: usize,
    pub total_count: usize,
}

impl RunSummary {
    pub fn all_passed(&self) -> bool {
        self.total_count > 0 && self.passed_count == self.total_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompileErrorKind {
    /// Source does not parse
    Syntax,
    /// Top-level code threw while being evaluated
    Evaluation,
    /// Source evaluated but defines no function with the expected name
    MissingFunction,
    /// Top-level code did not finish within the time budget
    Timeout,
    /// The sandbox itself could not process the source
    Sandbox,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// No callable could be produced; no test case was attempted
    CompileFailed { error: CompileError },
    Completed {
        results: Vec<PerCaseResult>,
        summary: RunSummary,
    },
    /// Superseded before every case ran
    Cancelled { results: Vec<PerCaseResult> },
}

impl RunOutcome {
    pub fn results(&self) -> &[PerCaseResult] {
        match self {
            RunOutcome::CompileFailed { .. } => &[],
            RunOutcome::Completed { results, .. } | RunOutcome::Cancelled { results } => results,
        }
    }

    pub fn all_passed(&self) -> bool {
        matches!(self, RunOutcome::Completed { summary, .. } if summary.all_passed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Editing,
    ShowingSolution,
}

/// One finished run as stored by a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: Mode,
    /// The exact text that was graded
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
}
