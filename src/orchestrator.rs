//! Pipeline orchestration: run a request through the registered stages.
//!
//! ```text
//! request ──▶ validate ──▶ [trim back matter] ──▶ [normalize]
//!                                                      │
//!          ┌───────────────────────────────────────────┘
//!          ▼
//!   for each stage (ordinal order):
//!     skipped?  ── yes ──▶ record pass-through, output = input
//!        │ no
//!     ready?    ── no ───▶ StageNotReady (run) / ensure_loaded (run_swapping)
//!        │ yes
//!     prompt = system instruction + previous output
//!     generate ──▶ record output + elapsed ──▶ next stage input
//! ```
//!
//! Stages run strictly one after another. The first failure aborts the run;
//! the records of the stages that already finished travel with the error in
//! [`RunFailure::completed`].

use crate::config::{LoadMode, PipelineConfig};
use crate::error::{PapercastError, RunFailure};
use crate::lifecycle::ModelLifecycleManager;
use crate::normalize::{trim_back_matter, validate_length, TextNormalizer};
use crate::output::{PipelineRequest, PipelineResult, StageRecord};
use crate::pipeline::{GenerateOptions, StageDescriptor, StageKind, StagePrompt};
use crate::prompts::{default_system_prompt, user_message};
use crate::sections::render_for_speech;
use crate::synthesis::SynthesisOutput;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Sequences stage back-ends held by a [`ModelLifecycleManager`].
///
/// The orchestrator never loads models in [`Self::run`]; readiness is the
/// lifecycle manager's concern. [`Self::run_swapping`] is the exception: it
/// loads and unloads each stage around its own call.
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    lifecycle: Arc<ModelLifecycleManager>,
    config: PipelineConfig,
    normalizer: TextNormalizer,
}

impl PipelineOrchestrator {
    pub fn new(lifecycle: Arc<ModelLifecycleManager>, config: PipelineConfig) -> Self {
        Self {
            lifecycle,
            config,
            normalizer: TextNormalizer::default(),
        }
    }

    /// Use a custom rule set for input normalization.
    pub fn with_normalizer(mut self, normalizer: TextNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn lifecycle(&self) -> &Arc<ModelLifecycleManager> {
        &self.lifecycle
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage on already-loaded models.
    ///
    /// # Errors
    /// A [`RunFailure`] whose source is:
    /// - an input error (empty, too long, unknown or unskippable skip name,
    ///   normalization collapse, budget override exceeded) when the request
    ///   is rejected before any stage runs;
    /// - [`PapercastError::StageNotReady`] for a non-skipped stage whose model
    ///   is not loaded;
    /// - the stage's own error when generation fails.
    pub async fn run(&self, request: &PipelineRequest) -> Result<PipelineResult, RunFailure> {
        self.execute(request, false).await
    }

    /// Run every stage, loading each one just before it runs and unloading it
    /// right after, so at most one stage this call loaded is resident.
    ///
    /// Stages that were already loaded are used as-is and left loaded.
    pub async fn run_swapping(
        &self,
        request: &PipelineRequest,
    ) -> Result<PipelineResult, RunFailure> {
        self.execute(request, true).await
    }

    async fn execute(
        &self,
        request: &PipelineRequest,
        swapping: bool,
    ) -> Result<PipelineResult, RunFailure> {
        let stages: Vec<StageDescriptor> = self.lifecycle.descriptors().cloned().collect();
        let input = self
            .prepare(request, &stages, swapping)
            .map_err(RunFailure::rejected)?;

        let input_len = request.text.chars().count();
        let total = stages.len();
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_run_start(total, input_len);
        }
        info!(
            "Pipeline start: {} stage(s), {} chars in, {} chars after preparation",
            total,
            input_len,
            input.chars().count()
        );

        let mut current = input;
        let mut records: Vec<StageRecord> = Vec::with_capacity(total);
        let mut audio: Option<SynthesisOutput> = None;

        for (i, descriptor) in stages.iter().enumerate() {
            let ordinal = i + 1;
            let name = descriptor.name.as_str();
            let stage_input_len = current.chars().count();

            // ── Skipped: pass-through ────────────────────────────────────
            if request.is_skipped(name) {
                info!("Stage {}/{} '{}' skipped", ordinal, total, name);
                records.push(StageRecord {
                    name: name.to_string(),
                    kind: descriptor.kind,
                    skipped: true,
                    input_len: stage_input_len,
                    output: current.clone(),
                    elapsed_ms: 0,
                    usage: None,
                });
                if let Some(cb) = cb {
                    cb.on_stage_skipped(name, ordinal, total);
                }
                continue;
            }

            // ── Readiness ────────────────────────────────────────────────
            let mut loaded_here = false;
            if !self.lifecycle.is_ready(name) {
                if swapping {
                    if let Err(e) = self.lifecycle.ensure_loaded(name).await {
                        return Err(self.fail(descriptor, ordinal, total, e, records));
                    }
                    loaded_here = true;
                } else {
                    let e = PapercastError::StageNotReady {
                        stage: name.to_string(),
                        on_demand: self.lifecycle.mode() == LoadMode::OnDemand,
                    };
                    return Err(self.fail(descriptor, ordinal, total, e, records));
                }
            }

            // ── Generate ─────────────────────────────────────────────────
            let stage_text = match descriptor.kind {
                StageKind::Synthesis => render_for_speech(&current),
                _ => current.clone(),
            };
            let prompt = self.build_prompt(descriptor.kind, stage_text, request);
            let options = self.generate_options(descriptor.kind, request);

            if let Some(cb) = cb {
                cb.on_stage_start(name, ordinal, total);
            }
            info!(
                "Stage {}/{} '{}' start ({} chars)",
                ordinal, total, name, stage_input_len
            );
            let start = Instant::now();
            let result = self.lifecycle.generate(name, &prompt, &options).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            if loaded_here {
                if let Err(e) = self.lifecycle.unload(name).await {
                    warn!("Stage '{}' could not be unloaded after swap: {}", name, e);
                }
            }

            let generation = match result {
                Ok(g) => g,
                Err(e) => return Err(self.fail(descriptor, ordinal, total, e, records)),
            };

            let output_len = generation.text.chars().count();
            info!(
                "Stage {}/{} '{}' complete: {} → {} chars in {}ms",
                ordinal, total, name, stage_input_len, output_len, elapsed_ms
            );
            if let Some(cb) = cb {
                cb.on_stage_complete(name, ordinal, total, output_len, elapsed_ms);
            }
            records.push(StageRecord {
                name: name.to_string(),
                kind: descriptor.kind,
                skipped: false,
                input_len: stage_input_len,
                output: generation.text.clone(),
                elapsed_ms,
                usage: generation.usage,
            });
            if generation.audio.is_some() {
                audio = generation.audio;
            }
            current = generation.text;
        }

        let total_elapsed_ms = records.iter().map(|r| r.elapsed_ms).sum();
        let final_output_len = current.chars().count();
        info!(
            "Pipeline complete: {} chars out in {}ms",
            final_output_len, total_elapsed_ms
        );
        if let Some(cb) = cb {
            cb.on_run_complete(total_elapsed_ms, final_output_len);
        }

        let synthesis = audio.as_ref().map(|a| a.metadata.clone());
        Ok(PipelineResult {
            stages: records,
            final_output: current,
            total_elapsed_ms,
            input_len,
            audio,
            synthesis,
        })
    }

    /// Validate the request and produce the first stage's input.
    fn prepare(
        &self,
        request: &PipelineRequest,
        stages: &[StageDescriptor],
        swapping: bool,
    ) -> Result<String, PapercastError> {
        if request.text.trim().is_empty() {
            return Err(PapercastError::EmptyInput);
        }
        validate_length(&request.text, 1, self.config.max_input_chars)?;

        for name in &request.skip {
            let Some(descriptor) = stages.iter().find(|d| &d.name == name) else {
                return Err(PapercastError::UnknownStage {
                    stage: name.clone(),
                });
            };
            if !descriptor.skippable {
                return Err(PapercastError::InvalidParameter {
                    name: "skip".into(),
                    detail: format!("stage '{name}' cannot be skipped"),
                });
            }
        }

        if let Some(limit) = request.max_memory_bytes {
            self.check_request_budget(request, stages, limit, swapping)?;
        }

        let mut text: &str = &request.text;
        if request.trim_back_matter {
            text = trim_back_matter(text);
        }
        if request.normalize_input {
            let normalized = self.normalizer.normalize(text, &self.config.normalize)?;
            debug!(
                "Input normalized: {} → {} chars",
                normalized.original_len(),
                normalized.len()
            );
            Ok(normalized.into_string())
        } else {
            Ok(text.trim().to_string())
        }
    }

    /// `run` needs every non-skipped stage resident at once; `run_swapping`
    /// needs only the largest one.
    fn check_request_budget(
        &self,
        request: &PipelineRequest,
        stages: &[StageDescriptor],
        limit: u64,
        swapping: bool,
    ) -> Result<(), PapercastError> {
        let mut used: u64 = 0;
        for d in stages.iter().filter(|d| !request.is_skipped(&d.name)) {
            let footprint = self.lifecycle.footprint(&d.name).unwrap_or(d.memory_bytes);
            let base = if swapping { 0 } else { used };
            if base + footprint > limit {
                return Err(PapercastError::BudgetExceeded {
                    stage: d.name.clone(),
                    required: footprint,
                    available: limit.saturating_sub(base),
                    budget: limit,
                });
            }
            used += footprint;
        }
        Ok(())
    }

    fn build_prompt(&self, kind: StageKind, input: String, request: &PipelineRequest) -> StagePrompt {
        let override_prompt = match kind {
            StageKind::Cleanup => self.config.cleanup.system_prompt.as_deref(),
            StageKind::Reorganization => self.config.reorganization.system_prompt.as_deref(),
            StageKind::Synthesis => None,
        };
        StagePrompt {
            system: override_prompt
                .unwrap_or_else(|| default_system_prompt(kind))
                .to_string(),
            user: user_message(kind, &input, &request.metadata),
            input,
        }
    }

    fn generate_options(&self, kind: StageKind, request: &PipelineRequest) -> GenerateOptions {
        let llm = match kind {
            StageKind::Cleanup => Some(&self.config.cleanup),
            StageKind::Reorganization => Some(&self.config.reorganization),
            StageKind::Synthesis => None,
        };
        GenerateOptions {
            temperature: llm.map(|o| o.temperature),
            max_tokens: llm.map(|o| o.max_tokens),
            synthesis: request.synthesis.clone(),
        }
    }

    fn fail(
        &self,
        descriptor: &StageDescriptor,
        ordinal: usize,
        total: usize,
        error: PapercastError,
        completed: Vec<StageRecord>,
    ) -> RunFailure {
        warn!(
            "Stage {}/{} '{}' failed ({}): {}",
            ordinal,
            total,
            descriptor.name,
            error.kind(),
            error
        );
        if let Some(cb) = self.config.progress_callback.as_ref() {
            cb.on_stage_error(&descriptor.name, ordinal, total, &error.to_string());
        }
        RunFailure {
            stage: Some(descriptor.name.clone()),
            source: error,
            completed,
        }
    }
}
