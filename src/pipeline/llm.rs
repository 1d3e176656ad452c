//! LLM-backed stage: cleanup and reorganization over an `edgequake_llm` provider.
//!
//! The stage is intentionally thin: prompts come from [`crate::prompts`]
//! through the orchestrator, and completion repair lives in
//! [`super::postprocess`]. This module owns provider resolution, retries and
//! error classification.
//!
//! ## Retry Strategy
//!
//! Only transient faults (timeouts, rate limits, exhausted context) are
//! retried, with exponential backoff `retry_backoff_ms * 2^(attempt-1)`.
//! With 500 ms base and 3 retries the waits are 500 ms, 1 s, 2 s. Any other
//! fault fails the stage immediately.

use super::postprocess;
use super::{GenerateOptions, Generation, StageBackend, StageKind, StagePrompt, TokenUsage};
use crate::config::LlmStageOptions;
use crate::error::{BackendFault, FailureKind, PapercastError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Where an [`LlmStage`] gets its provider from when it loads.
#[derive(Clone)]
pub enum ProviderSource {
    /// A provider the caller built and configured entirely.
    Prebuilt(Arc<dyn LLMProvider>),
    /// A provider name (`"openai"`, `"ollama"`, ...) and optional model; the
    /// API key is read from the provider's usual environment variable.
    Named {
        provider: String,
        model: Option<String>,
    },
    /// Auto-detect from the environment. `model` is used for the OpenAI
    /// fallback only.
    Env { model: Option<String> },
}

impl ProviderSource {
    pub fn named(provider: impl Into<String>, model: Option<String>) -> Self {
        ProviderSource::Named {
            provider: provider.into(),
            model,
        }
    }

    /// Resolve the provider, from most-specific to least-specific:
    ///
    /// 1. **Prebuilt** - used as-is.
    /// 2. **Named** - [`ProviderFactory::create_llm_provider`] with the
    ///    given model or [`DEFAULT_MODEL`].
    /// 3. **`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`** when both are set.
    /// 4. **`OPENAI_API_KEY`** present → OpenAI.
    /// 5. [`ProviderFactory::from_env`] auto-detection.
    fn resolve(&self, stage: &str) -> Result<Arc<dyn LLMProvider>, PapercastError> {
        match self {
            ProviderSource::Prebuilt(provider) => Ok(Arc::clone(provider)),
            ProviderSource::Named { provider, model } => {
                create_provider(stage, provider, model.as_deref().unwrap_or(DEFAULT_MODEL))
            }
            ProviderSource::Env { model } => {
                if let (Ok(prov), Ok(env_model)) = (
                    std::env::var("EDGEQUAKE_LLM_PROVIDER"),
                    std::env::var("EDGEQUAKE_MODEL"),
                ) {
                    if !prov.is_empty() && !env_model.is_empty() {
                        return create_provider(stage, &prov, &env_model);
                    }
                }

                if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                    if !key.is_empty() {
                        let model = model.as_deref().unwrap_or(DEFAULT_MODEL);
                        return create_provider(stage, "openai", model);
                    }
                }

                let (llm, _embedding) =
                    ProviderFactory::from_env().map_err(|e| PapercastError::Load {
                        stage: stage.to_string(),
                        detail: format!(
                            "no LLM provider could be auto-detected from the environment; \
                             set OPENAI_API_KEY, ANTHROPIC_API_KEY or EDGEQUAKE_LLM_PROVIDER \
                             ({e})"
                        ),
                    })?;
                Ok(llm)
            }
        }
    }
}

impl fmt::Debug for ProviderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderSource::Prebuilt(_) => f.write_str("Prebuilt(<dyn LLMProvider>)"),
            ProviderSource::Named { provider, model } => f
                .debug_struct("Named")
                .field("provider", provider)
                .field("model", model)
                .finish(),
            ProviderSource::Env { model } => f.debug_struct("Env").field("model", model).finish(),
        }
    }
}

fn create_provider(
    stage: &str,
    provider: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PapercastError> {
    ProviderFactory::create_llm_provider(provider, model).map_err(|e| PapercastError::Load {
        stage: stage.to_string(),
        detail: format!("provider '{provider}' (model '{model}'): {e}"),
    })
}

/// A cleanup or reorganization stage served by a chat-completion provider.
pub struct LlmStage {
    name: String,
    source: ProviderSource,
    options: LlmStageOptions,
    footprint: u64,
    provider: Option<Arc<dyn LLMProvider>>,
}

impl fmt::Debug for LlmStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmStage")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("options", &self.options)
            .field("footprint", &self.footprint)
            .field("loaded", &self.provider.is_some())
            .finish()
    }
}

impl LlmStage {
    pub fn new(kind: StageKind, source: ProviderSource, options: LlmStageOptions) -> Self {
        Self {
            name: kind.default_name().to_string(),
            source,
            options,
            footprint: 0,
            provider: None,
        }
    }

    pub fn cleanup(source: ProviderSource, options: LlmStageOptions) -> Self {
        Self::new(StageKind::Cleanup, source, options)
    }

    pub fn reorganization(source: ProviderSource, options: LlmStageOptions) -> Self {
        Self::new(StageKind::Reorganization, source, options)
    }

    /// Name used in errors and logs. Defaults to the kind's name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Declared resident size of the model behind the provider. Remote
    /// providers occupy no local memory; local runtimes should declare it.
    pub fn with_footprint(mut self, bytes: u64) -> Self {
        self.footprint = bytes;
        self
    }

    pub fn options(&self) -> &LlmStageOptions {
        &self.options
    }

    fn fault(&self, fault: BackendFault) -> PapercastError {
        PapercastError::from_fault(self.name.clone(), fault)
    }
}

#[async_trait]
impl StageBackend for LlmStage {
    async fn load(&mut self) -> Result<(), PapercastError> {
        let provider = self.source.resolve(&self.name)?;
        info!("{}: provider ready ({:?})", self.name, self.source);
        self.provider = Some(provider);
        Ok(())
    }

    async fn generate(
        &mut self,
        prompt: &StagePrompt,
        options: &GenerateOptions,
    ) -> Result<Generation, PapercastError> {
        let provider = self
            .provider
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| PapercastError::BackendNotLoaded {
                stage: self.name.clone(),
            })?;

        let messages = vec![
            ChatMessage::system(prompt.system.as_str()),
            ChatMessage::user(prompt.user.as_str()),
        ];
        let completion = build_options(&self.options, options);
        let start = Instant::now();
        let mut last_fault: Option<BackendFault> = None;

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.options.retry_backoff_ms, attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    self.name, attempt, self.options.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match provider.chat(&messages, Some(&completion)).await {
                Ok(response) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        self.name,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    let text = postprocess::clean_completion(&response.content);
                    if text.is_empty() {
                        return Err(self.fault(BackendFault::new(
                            FailureKind::MalformedOutput,
                            "provider returned an empty completion",
                        )));
                    }
                    return Ok(Generation {
                        text,
                        usage: Some(TokenUsage {
                            prompt_tokens: response.prompt_tokens,
                            completion_tokens: response.completion_tokens,
                        }),
                        audio: None,
                    });
                }
                Err(e) => {
                    let fault = BackendFault::classify(e.to_string());
                    warn!(
                        "{}: attempt {} failed ({}) - {}",
                        self.name,
                        attempt + 1,
                        fault.kind,
                        fault.detail
                    );
                    let transient = fault.kind.is_transient();
                    last_fault = Some(fault);
                    if !transient {
                        break;
                    }
                }
            }
        }

        let fault = last_fault
            .unwrap_or_else(|| BackendFault::new(FailureKind::Backend, "unknown error"));
        Err(self.fault(fault))
    }

    async fn unload(&mut self) {
        if self.provider.take().is_some() {
            debug!("{}: provider released", self.name);
        }
    }

    fn is_loaded(&self) -> bool {
        self.provider.is_some()
    }

    fn memory_footprint(&self) -> u64 {
        self.footprint
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, saturating.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// Per-call overrides win over the stage's configured options.
fn build_options(stage: &LlmStageOptions, call: &GenerateOptions) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(call.temperature.unwrap_or(stage.temperature)),
        max_tokens: Some(call.max_tokens.unwrap_or(stage.max_tokens)),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_uses_stage_defaults() {
        let opts = build_options(&LlmStageOptions::reorganization(), &GenerateOptions::default());
        assert_eq!(opts.temperature, Some(0.3));
        assert_eq!(opts.max_tokens, Some(32_768));
    }

    #[test]
    fn build_options_call_overrides() {
        let call = GenerateOptions {
            temperature: Some(0.0),
            max_tokens: Some(128),
            ..Default::default()
        };
        let opts = build_options(&LlmStageOptions::cleanup(), &call);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(128));
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(500, 64), u64::MAX);
        assert_eq!(backoff_ms(500, u32::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn generate_before_load_is_not_loaded() {
        let mut stage = LlmStage::cleanup(
            ProviderSource::named("openai", None),
            LlmStageOptions::cleanup(),
        );
        assert!(!stage.is_loaded());
        let prompt = StagePrompt {
            system: "s".into(),
            user: "u".into(),
            input: "i".into(),
        };
        let err = stage
            .generate(&prompt, &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PapercastError::BackendNotLoaded { ref stage } if stage == "cleanup"));
    }

    #[tokio::test]
    async fn unload_is_idempotent() {
        let mut stage = LlmStage::reorganization(
            ProviderSource::Env { model: None },
            LlmStageOptions::reorganization(),
        )
        .with_footprint(28);
        stage.unload().await;
        stage.unload().await;
        assert!(!stage.is_loaded());
        assert_eq!(stage.memory_footprint(), 28);
    }

    #[test]
    fn source_debug_hides_provider() {
        let s = format!("{:?}", ProviderSource::named("ollama", Some("llama3".into())));
        assert!(s.contains("ollama"));
        assert!(s.contains("llama3"));
    }
}
