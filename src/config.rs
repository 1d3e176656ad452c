//! Configuration types for the narration pipeline.
//!
//! Pipeline behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Setters clamp obviously out-of-range values;
//! [`PipelineConfigBuilder::build`] rejects combinations that can never work.
//!
//! Speech synthesis has its own [`SynthesisConfig`] because the synthesis
//! engine is usable on its own, without a pipeline around it.

use crate::error::PapercastError;
use crate::normalize::NormalizeOptions;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes in one GiB, for converting CLI-style memory sizes.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Upper bound for [`PipelineConfigBuilder::max_retries`].
pub const MAX_RETRIES: u32 = 10;

// ── Lifecycle ─────────────────────────────────────────────────────────────

/// When stage models are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Load every stage at startup. A stage that fails to load (or does not
    /// fit the budget) stays unloaded for the life of the manager.
    #[default]
    Eager,
    /// The caller loads and unloads stages explicitly per request.
    OnDemand,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Eager => f.write_str("eager"),
            LoadMode::OnDemand => f.write_str("on-demand"),
        }
    }
}

/// Model lifecycle settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub mode: LoadMode,
    /// Maximum combined footprint of ready stages. `None` = unbounded.
    pub budget_bytes: Option<u64>,
}

impl LifecycleConfig {
    pub fn eager() -> Self {
        Self {
            mode: LoadMode::Eager,
            budget_bytes: None,
        }
    }

    pub fn on_demand() -> Self {
        Self {
            mode: LoadMode::OnDemand,
            budget_bytes: None,
        }
    }

    pub fn with_budget(mut self, bytes: u64) -> Self {
        self.budget_bytes = Some(bytes);
        self
    }
}

// ── LLM stages ────────────────────────────────────────────────────────────

/// Generation settings for one LLM-backed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmStageOptions {
    /// Sampling temperature. Low values keep the rewrite faithful.
    pub temperature: f32,
    /// Maximum completion tokens. Default: 32 768.
    pub max_tokens: usize,
    /// Retries for timeout / resource-exhaustion faults. Default: 0.
    pub max_retries: u32,
    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,
    /// Replaces the built-in system instruction when set.
    pub system_prompt: Option<String>,
}

impl LlmStageOptions {
    /// Defaults for the cleanup stage (temperature 0.2).
    pub fn cleanup() -> Self {
        Self {
            temperature: 0.2,
            ..Self::base()
        }
    }

    /// Defaults for the reorganization stage (temperature 0.3).
    pub fn reorganization() -> Self {
        Self {
            temperature: 0.3,
            ..Self::base()
        }
    }

    fn base() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 32_768,
            max_retries: 0,
            retry_backoff_ms: 500,
            system_prompt: None,
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────

/// Configuration for a [`crate::orchestrator::PipelineOrchestrator`].
///
/// # Example
/// ```rust
/// use papercast::config::{LifecycleConfig, PipelineConfig, GIB};
///
/// let config = PipelineConfig::builder()
///     .lifecycle(LifecycleConfig::on_demand().with_budget(35 * GIB))
///     .max_input_chars(100_000)
///     .build()
///     .unwrap();
/// assert_eq!(config.cleanup.temperature, 0.2);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    pub lifecycle: LifecycleConfig,

    /// Longest accepted request text, in characters. Default: 200 000.
    pub max_input_chars: usize,

    /// Options of the cleanup stage.
    pub cleanup: LlmStageOptions,

    /// Options of the reorganization stage.
    pub reorganization: LlmStageOptions,

    /// Options used when a request asks for pre-normalization.
    pub normalize: NormalizeOptions,

    /// Stage-level progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleConfig::default(),
            max_input_chars: 200_000,
            cleanup: LlmStageOptions::cleanup(),
            reorganization: LlmStageOptions::reorganization(),
            normalize: NormalizeOptions::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("lifecycle", &self.lifecycle)
            .field("max_input_chars", &self.max_input_chars)
            .field("cleanup", &self.cleanup)
            .field("reorganization", &self.reorganization)
            .field("normalize", &self.normalize)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn StageProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.config.lifecycle = lifecycle;
        self
    }

    pub fn load_mode(mut self, mode: LoadMode) -> Self {
        self.config.lifecycle.mode = mode;
        self
    }

    pub fn memory_budget_bytes(mut self, bytes: u64) -> Self {
        self.config.lifecycle.budget_bytes = Some(bytes);
        self
    }

    pub fn max_input_chars(mut self, n: usize) -> Self {
        self.config.max_input_chars = n.max(1);
        self
    }

    pub fn cleanup(mut self, options: LlmStageOptions) -> Self {
        self.config.cleanup = options;
        self
    }

    pub fn reorganization(mut self, options: LlmStageOptions) -> Self {
        self.config.reorganization = options;
        self
    }

    /// Set the temperature of both LLM stages.
    pub fn temperature(mut self, t: f32) -> Self {
        let t = t.clamp(0.0, 2.0);
        self.config.cleanup.temperature = t;
        self.config.reorganization.temperature = t;
        self
    }

    /// Set the completion token limit of both LLM stages.
    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.cleanup.max_tokens = n;
        self.config.reorganization.max_tokens = n;
        self
    }

    /// Set the retry count of both LLM stages, at most [`MAX_RETRIES`].
    pub fn max_retries(mut self, n: u32) -> Self {
        let n = n.min(MAX_RETRIES);
        self.config.cleanup.max_retries = n;
        self.config.reorganization.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.cleanup.retry_backoff_ms = ms;
        self.config.reorganization.retry_backoff_ms = ms;
        self
    }

    pub fn cleanup_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.cleanup.system_prompt = Some(prompt.into());
        self
    }

    pub fn reorganization_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.reorganization.system_prompt = Some(prompt.into());
        self
    }

    pub fn normalize(mut self, options: NormalizeOptions) -> Self {
        self.config.normalize = options;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PapercastError> {
        let c = &self.config;
        for (name, opts) in [("cleanup", &c.cleanup), ("reorganization", &c.reorganization)] {
            if opts.max_tokens == 0 {
                return Err(PapercastError::InvalidConfig(format!(
                    "{name}: max_tokens must be ≥ 1"
                )));
            }
            if !(0.0..=2.0).contains(&opts.temperature) {
                return Err(PapercastError::InvalidConfig(format!(
                    "{name}: temperature must be 0.0–2.0, got {}",
                    opts.temperature
                )));
            }
        }
        if c.lifecycle.budget_bytes == Some(0) {
            return Err(PapercastError::InvalidConfig(
                "memory budget must be > 0 bytes".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Synthesis ─────────────────────────────────────────────────────────────

/// Settings of a [`crate::synthesis::SynthesisEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Voice used when a request names none. Default: `af_sarah`.
    pub default_voice: String,
    /// Speed used when a request gives none. Default: 1.0.
    pub default_speed: f32,
    /// Language code passed to the back-end. Default: `en-us`.
    pub default_lang: String,
    /// Longest accepted input, in characters. Default: 200 000.
    pub max_text_chars: usize,
    /// Longest text sent to the back-end in one call. Default: 1 000.
    pub chunk_chars: usize,
    /// Shortest acceptable normalized text. Default: 3.
    pub min_output_chars: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            default_voice: "af_sarah".into(),
            default_speed: 1.0,
            default_lang: "en-us".into(),
            max_text_chars: 200_000,
            chunk_chars: 1000,
            min_output_chars: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.lifecycle.mode, LoadMode::Eager);
        assert_eq!(c.lifecycle.budget_bytes, None);
        assert_eq!(c.max_input_chars, 200_000);
        assert_eq!(c.cleanup.temperature, 0.2);
        assert_eq!(c.reorganization.temperature, 0.3);
        assert_eq!(c.cleanup.max_tokens, 32_768);
        assert_eq!(c.cleanup.max_retries, 0);
    }

    #[test]
    fn builder_clamps_temperature() {
        let c = PipelineConfig::builder().temperature(5.0).build().unwrap();
        assert_eq!(c.cleanup.temperature, 2.0);
        assert_eq!(c.reorganization.temperature, 2.0);
    }

    #[test]
    fn builder_clamps_retries() {
        let c = PipelineConfig::builder().max_retries(500).build().unwrap();
        assert_eq!(c.cleanup.max_retries, MAX_RETRIES);
        assert_eq!(c.reorganization.max_retries, MAX_RETRIES);
    }

    #[test]
    fn zero_budget_rejected() {
        let err = PipelineConfig::builder()
            .memory_budget_bytes(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, PapercastError::InvalidConfig(_)));
    }

    #[test]
    fn zero_max_tokens_rejected() {
        assert!(PipelineConfig::builder().max_tokens(0).build().is_err());
    }

    #[test]
    fn lifecycle_helpers() {
        let l = LifecycleConfig::on_demand().with_budget(35 * GIB);
        assert_eq!(l.mode, LoadMode::OnDemand);
        assert_eq!(l.budget_bytes, Some(35 * GIB));
        assert_eq!(l.mode.to_string(), "on-demand");
    }

    #[test]
    fn synthesis_defaults() {
        let s = SynthesisConfig::default();
        assert_eq!(s.default_voice, "af_sarah");
        assert_eq!(s.default_speed, 1.0);
        assert_eq!(s.chunk_chars, 1000);
    }
}
