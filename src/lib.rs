//! # papercast
//!
//! Turn the extracted text of a scientific paper into narration a speech
//! synthesizer can read aloud.
//!
//! ## Why this crate?
//!
//! Text pulled out of a PDF is full of things nobody wants to hear: citation
//! brackets, DOIs, LaTeX commands, Greek letters, affiliation markers. Each
//! generative stage that could fix it (an LLM cleanup pass, an LLM
//! reorganization pass, a TTS model) is large, and they rarely all fit in
//! memory at once. This crate combines a deterministic normalizer with a
//! stage pipeline whose models are loaded and unloaded under an explicit
//! memory budget.
//!
//! ## Pipeline Overview
//!
//! ```text
//! extracted text
//!  │
//!  ├─ 1. Input       local .txt/.json or URL → RawDocument
//!  ├─ 2. Normalize   7 ordered rule groups (citations … whitespace)
//!  ├─ 3. Cleanup     LLM, sentence-level rewrite for listening
//!  ├─ 4. Reorganize  LLM, [SECTION: Name] markers in standard order
//!  └─ 5. Synthesis   TTS back-end → samples + SynthesisMetadata → WAV
//! ```
//!
//! Every stage may be skipped per request; a skipped stage passes its input
//! through unchanged. Stage models live in a [`ModelLifecycleManager`], which
//! loads them eagerly at startup or on demand and never exceeds its budget.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use papercast::pipeline::llm::{LlmStage, ProviderSource};
//! use papercast::{
//!     LifecycleConfig, LlmStageOptions, ModelLifecycleManager, PipelineConfig,
//!     PipelineOrchestrator, PipelineRequest, StageDescriptor, StageKind,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / EDGEQUAKE_LLM_PROVIDER
//!     let source = ProviderSource::Env { model: None };
//!     let lifecycle = ModelLifecycleManager::new(LifecycleConfig::eager())
//!         .with_stage(
//!             StageDescriptor::new(StageKind::Cleanup, 1),
//!             Box::new(LlmStage::cleanup(source.clone(), LlmStageOptions::cleanup())),
//!         )?
//!         .with_stage(
//!             StageDescriptor::new(StageKind::Reorganization, 2),
//!             Box::new(LlmStage::reorganization(source, LlmStageOptions::reorganization())),
//!         )?;
//!     lifecycle.startup().await?;
//!
//!     let orchestrator = PipelineOrchestrator::new(Arc::new(lifecycle), PipelineConfig::default());
//!     let result = orchestrator
//!         .run(&PipelineRequest::new("Results show (Smith, 2020) a 65% ± 5% effect [1,2]."))
//!         .await?;
//!     println!("{}", result.final_output);
//!     Ok(())
//! }
//! ```
//!
//! Normalization alone needs no model:
//!
//! ```rust
//! use papercast::{NormalizeOptions, TextNormalizer};
//!
//! let out = TextNormalizer::default()
//!     .normalize("The α level (Smith, 2020) was 0.05.", &NormalizeOptions::default())
//!     .unwrap();
//! assert_eq!(out.as_str(), "The alpha level was 0.05.");
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `papercast` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! papercast = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod normalize;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod sections;
pub mod synthesis;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    LifecycleConfig, LlmStageOptions, LoadMode, PipelineConfig, PipelineConfigBuilder,
    SynthesisConfig,
};
pub use error::{BackendFault, FailureKind, LengthBound, PapercastError, RunFailure};
pub use lifecycle::{ModelLifecycleManager, ModelState, StageStatus};
pub use normalize::{
    should_skip_section, trim_back_matter, validate_length, NormalizeOptions, NormalizedText,
    TextNormalizer,
};
pub use orchestrator::PipelineOrchestrator;
pub use output::{DocumentMetadata, PipelineRequest, PipelineResult, StageRecord};
pub use pipeline::{
    GenerateOptions, Generation, StageBackend, StageDescriptor, StageKind, StagePrompt,
    TokenUsage,
};
pub use progress::{NoopProgressCallback, ProgressCallback, StageProgressCallback};
pub use synthesis::{
    AudioBackend, AudioBuffer, SynthesisEngine, SynthesisMetadata, SynthesisOutput,
    SynthesisParams,
};
