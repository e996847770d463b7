use serde::{Deserialize, Serialize};
use std::panic::Location;

/// Classification of a single failure produced by a guarded run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The unit of work itself returned an error or panicked
    Work,

    /// The budget elapsed before the unit of work completed
    Timeout,

    /// A worker thread did not terminate after being interrupted
    StuckThread,

    /// The run could not be set up (bad configuration, spawn failure, ...)
    Setup,

    /// Extra context contributed by a custom diagnostics hook
    Diagnostic,
}

impl FailureKind {
    /// Returns true if this failure was caused by the deadline
    pub fn is_deadline_related(&self) -> bool {
        matches!(self, Self::Timeout | Self::StuckThread)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Work => "work failed",
            Self::Timeout => "work timed out",
            Self::StuckThread => "worker thread appears to be stuck",
            Self::Setup => "guarded run could not be set up",
            Self::Diagnostic => "timeout diagnostic",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Flattened error chain attached to a failure
///
/// Errors are rendered to strings at capture time so records stay
/// `Clone` and serializable regardless of what the work returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cause {
    pub message: String,
    /// Messages of `source()` errors, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
}

impl Cause {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            chain: Vec::new(),
        }
    }

    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(next) = source {
            chain.push(next.to_string());
            source = next.source();
        }
        Self {
            message: err.to_string(),
            chain,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let mut messages = err.chain().map(ToString::to_string);
        Self {
            message: messages.next().unwrap_or_default(),
            chain: messages.collect(),
        }
    }
}

impl std::fmt::Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for source in &self.chain {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

/// One entry of a captured worker stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub label: String,
    pub file: String,
    pub line: u32,
}

impl Frame {
    pub fn new(label: impl Into<String>, location: &Location<'_>) -> Self {
        Self {
            label: label.into(),
            file: location.file().to_string(),
            line: location.line(),
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at {} ({}:{})", self.label, self.file, self.line)
    }
}

/// Structured description of one failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Cause>,
    /// Innermost frame first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_trace: Vec<Frame>,
}

impl FailureRecord {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            stack_trace: Vec::new(),
        }
    }

    /// Failure reported by the unit of work itself
    pub fn work(err: &anyhow::Error) -> Self {
        let cause = Cause::from_anyhow(err);
        Self {
            kind: FailureKind::Work,
            message: cause.message.clone(),
            cause: Some(cause),
            stack_trace: Vec::new(),
        }
    }

    /// Synthetic record wrapping a configuration or setup error
    pub fn setup(err: &(dyn std::error::Error + 'static)) -> Self {
        let cause = Cause::from_error(err);
        Self {
            kind: FailureKind::Setup,
            message: cause.message.clone(),
            cause: Some(cause),
            stack_trace: Vec::new(),
        }
    }

    pub fn with_cause(mut self, cause: Cause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: Vec<Frame>) -> Self {
        self.stack_trace = stack_trace;
        self
    }

    /// Render message and stack the way a test report would print them
    pub fn render(&self) -> String {
        let mut out = self.message.clone();
        if let Some(cause) = &self.cause {
            if cause.message != self.message || !cause.chain.is_empty() {
                out.push_str("\ncaused by: ");
                out.push_str(&cause.to_string());
            }
        }
        for frame in &self.stack_trace {
            out.push_str("\n    ");
            out.push_str(&frame.to_string());
        }
        out
    }
}

impl std::fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Result of one guarded run
///
/// A single run may fail in several ways at once, so failures are kept as
/// an ordered list. Consumers must not reorder it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "failures", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed(Vec<FailureRecord>),
}

impl Outcome {
    pub(crate) fn from_failures(failures: Vec<FailureRecord>) -> Self {
        if failures.is_empty() {
            Self::Success
        } else {
            Self::Failed(failures)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failures(&self) -> &[FailureRecord] {
        match self {
            Self::Success => &[],
            Self::Failed(failures) => failures,
        }
    }

    pub fn into_failures(self) -> Vec<FailureRecord> {
        match self {
            Self::Success => Vec::new(),
            Self::Failed(failures) => failures,
        }
    }

    pub fn has_timeout(&self) -> bool {
        self.failures()
            .iter()
            .any(|record| record.kind == FailureKind::Timeout)
    }

    pub fn has_stuck_thread(&self) -> bool {
        self.failures()
            .iter()
            .any(|record| record.kind == FailureKind::StuckThread)
    }
}

impl From<Vec<FailureRecord>> for Outcome {
    fn from(failures: Vec<FailureRecord>) -> Self {
        Self::from_failures(failures)
    }
}
