//! Error types for the papercast library.
//!
//! Three layers reflect three places a failure can originate:
//!
//! * [`PapercastError`] - every failure the library reports. Each variant
//!   carries the structured context (stage name, violated bound, voice sample)
//!   a caller needs to render an actionable message without a stack trace.
//!
//! * [`RunFailure`] - what [`crate::orchestrator::PipelineOrchestrator::run`]
//!   returns when a stage fails. It displays the stage's error verbatim and
//!   keeps the records of the stages that completed before it.
//!
//! * [`BackendFault`] - the narrow error type generative and audio back-ends
//!   report through. Provider-specific error types never cross the stage
//!   boundary; they are classified into a [`FailureKind`] plus a detail string.
//!
//! Normalization and parameter errors mean the input is unsuitable and are
//! never retried. Load errors are surfaced immediately and never retried.

use crate::output::StageRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the papercast library.
#[derive(Debug, Error)]
pub enum PapercastError {
    // ── Normalization errors ──────────────────────────────────────────────
    /// Input text was empty or whitespace-only.
    #[error("Input text is empty or whitespace-only")]
    EmptyInput,

    /// Normalization removed (almost) everything: the input was made of
    /// removable artefacts such as a bare citation.
    #[error(
        "Text collapsed to {normalized_len} chars after normalization (original: {original_len} chars, minimum: {min_len})\n\
         The input appears to contain only citations, URLs or markup."
    )]
    NormalizationCollapse {
        original_len: usize,
        normalized_len: usize,
        min_len: usize,
    },

    /// Text length fell outside the accepted range.
    #[error("Text too {}: {actual} chars ({bound}imum: {limit})", .bound.adjective())]
    LengthViolation {
        bound: LengthBound,
        limit: usize,
        actual: usize,
    },

    // ── Lifecycle errors ──────────────────────────────────────────────────
    /// A stage back-end was asked to generate while its model is not loaded.
    #[error("Model for stage '{stage}' is not loaded")]
    BackendNotLoaded { stage: String },

    /// The back-end's load call failed; the stage stays unloaded.
    #[error("Failed to load model for stage '{stage}': {detail}")]
    Load { stage: String, detail: String },

    /// Loading a stage (or running a request) would exceed the memory budget.
    #[error(
        "Loading stage '{stage}' needs {required} bytes but only {available} of the {budget}-byte budget is free\n\
         Unload another stage first."
    )]
    BudgetExceeded {
        stage: String,
        required: u64,
        available: u64,
        budget: u64,
    },

    /// No stage with that name is registered.
    #[error("Unknown stage '{stage}'")]
    UnknownStage { stage: String },

    // ── Generation errors ─────────────────────────────────────────────────
    /// The back-end failed while generating.
    #[error("Stage '{stage}' generation failed ({kind}): {detail}")]
    Generation {
        stage: String,
        kind: FailureKind,
        detail: String,
    },

    /// The orchestrator found a non-skipped stage whose model is not ready.
    #[error("Stage '{stage}' is not ready.\n{}", not_ready_hint(.on_demand))]
    StageNotReady { stage: String, on_demand: bool },

    // ── Synthesis errors ──────────────────────────────────────────────────
    /// The requested voice is not part of the loaded voice set.
    #[error("Voice '{voice}' not found. Available voices ({total}): {}...", .sample.join(", "))]
    VoiceNotFound {
        voice: String,
        sample: Vec<String>,
        total: usize,
    },

    /// A request parameter is out of range or refers to something invalid.
    #[error("Invalid parameter '{name}': {detail}")]
    InvalidParameter { name: String, detail: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The document could not be decoded (bad UTF-8, malformed JSON).
    #[error("Could not read document '{source_name}': {detail}")]
    InvalidDocument { source_name: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or rule-table validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PapercastError {
    /// Stable snake_case identifier of the error kind, for logs and
    /// serialised error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyInput => "empty_input",
            Self::NormalizationCollapse { .. } => "normalization_collapse",
            Self::LengthViolation { .. } => "length_violation",
            Self::BackendNotLoaded { .. } => "backend_not_loaded",
            Self::Load { .. } => "load_error",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::UnknownStage { .. } => "unknown_stage",
            Self::Generation { .. } => "generation_error",
            Self::StageNotReady { .. } => "stage_not_ready",
            Self::VoiceNotFound { .. } => "voice_not_found",
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::FileNotFound { .. } => "file_not_found",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::DownloadFailed { .. } => "download_failed",
            Self::DownloadTimeout { .. } => "download_timeout",
            Self::InvalidDocument { .. } => "invalid_document",
            Self::OutputWriteFailed { .. } => "output_write_failed",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Internal(_) => "internal",
        }
    }

    /// True for errors caused by the input itself. The caller must fix the
    /// input; resubmitting it unchanged fails the same way.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput
                | Self::NormalizationCollapse { .. }
                | Self::LengthViolation { .. }
                | Self::VoiceNotFound { .. }
                | Self::InvalidParameter { .. }
        )
    }

    /// Build a [`PapercastError::Generation`] from a back-end fault.
    pub fn from_fault(stage: impl Into<String>, fault: BackendFault) -> Self {
        Self::Generation {
            stage: stage.into(),
            kind: fault.kind,
            detail: fault.detail,
        }
    }
}

fn not_ready_hint(on_demand: &bool) -> &'static str {
    if *on_demand {
        "Load it with ensure_loaded() before running the pipeline."
    } else {
        "It failed to load at startup; check the startup error."
    }
}

/// Which side of a length range was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthBound {
    Min,
    Max,
}

impl LengthBound {
    /// "short" or "long", as in "text too short".
    pub fn adjective(self) -> &'static str {
        match self {
            LengthBound::Min => "short",
            LengthBound::Max => "long",
        }
    }
}

impl fmt::Display for LengthBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Rendered inside "({bound}imum: ...)".
        match self {
            LengthBound::Min => f.write_str("min"),
            LengthBound::Max => f.write_str("max"),
        }
    }
}

/// Classification of a back-end failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The back-end gave up waiting (request timeout, deadline).
    Timeout,
    /// Out of memory, context window exceeded, rate limited.
    ResourceExhausted,
    /// The back-end returned something unusable (empty completion, no samples).
    MalformedOutput,
    /// Any other execution failure.
    Backend,
}

impl FailureKind {
    /// Transient kinds are worth a retry; the others will fail again.
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::ResourceExhausted)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ResourceExhausted => "resource exhausted",
            FailureKind::MalformedOutput => "malformed output",
            FailureKind::Backend => "backend error",
        };
        f.write_str(s)
    }
}

/// Failure reported by a generative or audio back-end.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {detail}")]
pub struct BackendFault {
    pub kind: FailureKind,
    pub detail: String,
}

impl BackendFault {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Classify a provider error message.
    ///
    /// Providers only expose their errors as text across the boundary, so the
    /// kind is inferred from well-known phrases.
    pub fn classify(message: impl Into<String>) -> Self {
        let detail = message.into();
        let lower = detail.to_lowercase();
        let kind = if lower.contains("timed out") || lower.contains("timeout") {
            FailureKind::Timeout
        } else if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("out of memory")
            || lower.contains("context length")
            || lower.contains("too many tokens")
        {
            FailureKind::ResourceExhausted
        } else {
            FailureKind::Backend
        };
        Self { kind, detail }
    }
}

/// A failed pipeline run.
///
/// Displays the failing stage's error verbatim. `completed` holds the records
/// of every stage that finished (or was skipped) before the failure, for
/// diagnostics only: the run as a whole failed.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct RunFailure {
    /// Stage that failed, or `None` when the request was rejected before any
    /// stage ran.
    pub stage: Option<String>,
    #[source]
    pub source: PapercastError,
    pub completed: Vec<StageRecord>,
}

impl RunFailure {
    /// A failure raised before the first stage started.
    pub fn rejected(source: PapercastError) -> Self {
        Self {
            stage: None,
            source,
            completed: Vec::new(),
        }
    }

    /// The underlying error.
    pub fn error(&self) -> &PapercastError {
        &self.source
    }

    /// Consume the failure and return the underlying error.
    pub fn into_error(self) -> PapercastError {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_violation_display_names_bound() {
        let e = PapercastError::LengthViolation {
            bound: LengthBound::Max,
            limit: 5000,
            actual: 6001,
        };
        let msg = e.to_string();
        assert!(msg.contains("Text too long: 6001 chars"), "got: {msg}");
        assert!(msg.contains("maximum: 5000"), "got: {msg}");
        assert!(msg.contains("6001"), "got: {msg}");

        let e = PapercastError::LengthViolation {
            bound: LengthBound::Min,
            limit: 1,
            actual: 0,
        };
        assert_eq!(e.to_string(), "Text too short: 0 chars (minimum: 1)");
    }

    #[test]
    fn voice_not_found_lists_sample() {
        let e = PapercastError::VoiceNotFound {
            voice: "zz_nobody".into(),
            sample: vec!["af_sarah".into(), "am_adam".into()],
            total: 54,
        };
        let msg = e.to_string();
        assert!(msg.contains("zz_nobody"));
        assert!(msg.contains("af_sarah, am_adam"));
        assert!(msg.contains("54"));
    }

    #[test]
    fn stage_not_ready_mentions_on_demand_hint() {
        let e = PapercastError::StageNotReady {
            stage: "cleanup".into(),
            on_demand: true,
        };
        assert!(e.to_string().contains("ensure_loaded"));

        let e = PapercastError::StageNotReady {
            stage: "cleanup".into(),
            on_demand: false,
        };
        assert!(e.to_string().contains("startup"));
    }

    #[test]
    fn input_errors_are_classified() {
        assert!(PapercastError::EmptyInput.is_input_error());
        assert!(PapercastError::InvalidParameter {
            name: "speed".into(),
            detail: "3.0".into()
        }
        .is_input_error());
        assert!(!PapercastError::Load {
            stage: "cleanup".into(),
            detail: "oom".into()
        }
        .is_input_error());
    }

    #[test]
    fn classify_provider_messages() {
        assert_eq!(
            BackendFault::classify("request timed out after 60s").kind,
            FailureKind::Timeout
        );
        assert_eq!(
            BackendFault::classify("HTTP 429: rate limit reached").kind,
            FailureKind::ResourceExhausted
        );
        assert_eq!(
            BackendFault::classify("invalid api key").kind,
            FailureKind::Backend
        );
    }

    #[test]
    fn run_failure_displays_source_verbatim() {
        let source = PapercastError::Generation {
            stage: "reorganization".into(),
            kind: FailureKind::Timeout,
            detail: "deadline".into(),
        };
        let expected = source.to_string();
        let failure = RunFailure {
            stage: Some("reorganization".into()),
            source,
            completed: Vec::new(),
        };
        assert_eq!(failure.to_string(), expected);
        assert_eq!(failure.error().kind(), "generation_error");
    }
}
