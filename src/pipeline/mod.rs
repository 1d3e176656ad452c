//! Pipeline stages and the interface they share.
//!
//! Every generative step implements [`StageBackend`], so the orchestrator
//! and the lifecycle manager never know which model runtime sits behind a
//! stage. Each submodule holds one back-end or one step around them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ cleanup ──▶ reorganization ──▶ synthesis
//! (path/URL)  (rules)      (LLM)       (LLM, [SECTION:])   (TTS)
//! ```
//!
//! 1. [`input`]       - load extracted text from a file, JSON document or URL
//! 2. [`llm`]         - cleanup and reorganization back-ends over an
//!    `edgequake_llm` provider; the only stages with network I/O
//! 3. [`postprocess`] - deterministic repair of raw completions (fences,
//!    line endings, invisible characters)
//! 4. [`synthesis`]   - adapts the blocking [`crate::synthesis::SynthesisEngine`]
//!    to the async stage interface

pub mod input;
pub mod llm;
pub mod postprocess;
pub mod synthesis;

use crate::error::PapercastError;
use crate::synthesis::{SynthesisOutput, SynthesisParams};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a stage does. Decides its prompt and how its output is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Cleanup,
    Reorganization,
    Synthesis,
}

impl StageKind {
    /// Conventional stage name for this kind.
    pub fn default_name(self) -> &'static str {
        match self {
            StageKind::Cleanup => "cleanup",
            StageKind::Reorganization => "reorganization",
            StageKind::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

/// Static description of a stage, fixed at configuration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub name: String,
    pub kind: StageKind,
    /// Position in the pipeline; stages run in ascending ordinal order.
    pub ordinal: usize,
    /// Whether requests may skip this stage.
    pub skippable: bool,
    /// Approximate resident size of the stage's model, in bytes.
    pub memory_bytes: u64,
}

impl StageDescriptor {
    /// A skippable stage named after its kind, with no declared footprint.
    pub fn new(kind: StageKind, ordinal: usize) -> Self {
        Self {
            name: kind.default_name().to_string(),
            kind,
            ordinal,
            skippable: true,
            memory_bytes: 0,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn skippable(mut self, v: bool) -> Self {
        self.skippable = v;
        self
    }

    pub fn memory_bytes(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }
}

/// Token counts reported by an LLM provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// A rendered stage prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePrompt {
    /// Fixed system instruction of the stage.
    pub system: String,
    /// User turn: the instruction wrapper around `input`.
    pub user: String,
    /// The previous stage's output, unwrapped. Non-chat back-ends
    /// (speech synthesis) consume this directly.
    pub input: String,
}

/// Per-call generation settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub synthesis: SynthesisParams,
}

/// What a stage produced.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Text handed to the next stage.
    pub text: String,
    pub usage: Option<TokenUsage>,
    /// Audio, for synthesis stages.
    pub audio: Option<SynthesisOutput>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            audio: None,
        }
    }
}

/// A generative stage back-end.
///
/// Implementations wrap one model runtime. The lifecycle manager serialises
/// all calls on one back-end behind a per-stage lock, so methods take
/// `&mut self` and implementations need no internal locking.
///
/// Errors crossing this interface are always [`PapercastError`]; provider
/// error types are classified into [`PapercastError::Generation`] or
/// [`PapercastError::Load`] before they leave the implementation.
#[async_trait]
pub trait StageBackend: Send {
    /// Load the backing model. Called only while the stage is unloaded.
    async fn load(&mut self) -> Result<(), PapercastError>;

    /// Run the model on `prompt`.
    ///
    /// # Errors
    /// [`PapercastError::BackendNotLoaded`] when called before [`Self::load`];
    /// [`PapercastError::Generation`] for any execution failure.
    async fn generate(
        &mut self,
        prompt: &StagePrompt,
        options: &GenerateOptions,
    ) -> Result<Generation, PapercastError>;

    /// Release the backing model. Safe to call when not loaded.
    async fn unload(&mut self);

    fn is_loaded(&self) -> bool;

    /// Approximate resident size of the model once loaded, in bytes.
    fn memory_footprint(&self) -> u64;
}
