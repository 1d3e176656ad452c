//! Request and result types of a pipeline run.

use crate::pipeline::{StageKind, TokenUsage};
use crate::synthesis::{SynthesisMetadata, SynthesisOutput, SynthesisParams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Document metadata delivered by the text extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub mod_date: Option<String>,
    pub keywords: Option<String>,
}

impl DocumentMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One request to [`crate::orchestrator::PipelineOrchestrator::run`].
///
/// Built once and passed by reference; the orchestrator never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineRequest {
    pub text: String,
    /// Names of stages to pass through without generating.
    pub skip: BTreeSet<String>,
    pub metadata: DocumentMetadata,
    /// Refuse to run when the stages this request needs add up to more
    /// than this many bytes.
    pub max_memory_bytes: Option<u64>,
    /// Parameters of the synthesis stage, when one is registered.
    pub synthesis: SynthesisParams,
    /// Apply the deterministic normalizer before the first stage. Default: true.
    pub normalize_input: bool,
    /// Cut everything from the first back-matter heading on. Default: false.
    pub trim_back_matter: bool,
}

impl Default for PipelineRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            skip: BTreeSet::new(),
            metadata: DocumentMetadata::default(),
            max_memory_bytes: None,
            synthesis: SynthesisParams::default(),
            normalize_input: true,
            trim_back_matter: false,
        }
    }
}

impl PipelineRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn skip(mut self, stage: impl Into<String>) -> Self {
        self.skip.insert(stage.into());
        self
    }

    pub fn metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    pub fn synthesis(mut self, params: SynthesisParams) -> Self {
        self.synthesis = params;
        self
    }

    pub fn normalize_input(mut self, v: bool) -> Self {
        self.normalize_input = v;
        self
    }

    pub fn trim_back_matter(mut self, v: bool) -> Self {
        self.trim_back_matter = v;
        self
    }

    pub fn is_skipped(&self, stage: &str) -> bool {
        self.skip.contains(stage)
    }
}

/// What one stage did during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub kind: StageKind,
    /// The stage was skipped: `output` equals its input.
    pub skipped: bool,
    /// Characters received from the previous stage.
    pub input_len: usize,
    pub output: String,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    /// One record per registered stage, in execution order.
    pub stages: Vec<StageRecord>,
    /// Output of the last stage.
    pub final_output: String,
    /// Sum of the stages' elapsed times.
    pub total_elapsed_ms: u64,
    /// Characters of the request text.
    pub input_len: usize,
    /// Audio of the synthesis stage, when it ran.
    #[serde(skip)]
    pub audio: Option<SynthesisOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisMetadata>,
}

impl PipelineResult {
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_output(&self, name: &str) -> Option<&str> {
        self.stage(name).map(|s| s.output.as_str())
    }

    pub fn total_input_tokens(&self) -> usize {
        self.stages
            .iter()
            .filter_map(|s| s.usage.as_ref())
            .map(|u| u.prompt_tokens)
            .sum()
    }

    pub fn total_output_tokens(&self) -> usize {
        self.stages
            .iter()
            .filter_map(|s| s.usage.as_ref())
            .map(|u| u.completion_tokens)
            .sum()
    }
}
