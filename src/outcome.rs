//! Execution outcomes and the mapping from raw process results to them.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Input of the engine: what to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
    pub input_data: Option<String>,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            input_data: None,
        }
    }

    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input_data = Some(input.into());
        self
    }
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    Success,
    CompileFailure { exit_code: i32 },
    RuntimeFailure { exit_code: i32 },
    Timeout { limit_ms: u64 },
    UnsupportedLanguage { language: String },
    InternalError { message: String },
}

impl Classification {
    pub fn timeout(limit: Duration) -> Self {
        Self::Timeout {
            limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::CompileFailure { exit_code } => {
                write!(f, "compilation failed with exit code {exit_code}")
            }
            Self::RuntimeFailure { exit_code } => {
                write!(f, "program exited with code {exit_code}")
            }
            Self::Timeout { limit_ms } => write!(f, "execution timed out after {limit_ms}ms"),
            Self::UnsupportedLanguage { language } => {
                write!(f, "unsupported language: {language}")
            }
            Self::InternalError { message } => write!(f, "internal error: {message}"),
        }
    }
}

/// Output of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    /// Captured stdout, verbatim.
    pub output: String,
    /// Set when the request did not succeed or the program wrote to stderr.
    pub error: Option<String>,
    pub classification: Classification,
}

impl ExecutionOutcome {
    /// Build an outcome from a classification and the captured streams.
    ///
    /// `error` is the captured stderr when non-empty; otherwise, for anything
    /// other than success, a description of the classification.
    pub fn from_parts(classification: Classification, stdout: String, stderr: String) -> Self {
        let error = if !stderr.is_empty() {
            Some(stderr)
        } else if classification.is_success() {
            None
        } else {
            Some(classification.to_string())
        };
        Self {
            output: stdout,
            error,
            classification,
        }
    }

    /// Outcome that carries only a classification.
    pub fn failed(classification: Classification) -> Self {
        Self::from_parts(classification, String::new(), String::new())
    }

    pub const fn is_success(&self) -> bool {
        self.classification.is_success()
    }
}

/// Classify a finished run stage from its exit code.
pub const fn classify_run(exit_code: i32) -> Classification {
    if exit_code == 0 {
        Classification::Success
    } else {
        Classification::RuntimeFailure { exit_code }
    }
}
