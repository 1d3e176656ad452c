//! Integration tests for the stage pipeline.
//!
//! Every back-end here is an in-process fake, so these run without a model,
//! an API key or network access.

use async_trait::async_trait;
use papercast::config::{SynthesisConfig, GIB};
use papercast::pipeline::synthesis::SynthesisStage;
use papercast::{
    AudioBackend, AudioBuffer, BackendFault, FailureKind, GenerateOptions, Generation,
    LifecycleConfig, ModelLifecycleManager, ModelState, NormalizeOptions, PapercastError,
    PipelineConfig, PipelineOrchestrator, PipelineRequest, StageBackend, StageDescriptor,
    StageKind, StageProgressCallback, StagePrompt, SynthesisEngine, SynthesisParams,
    TextNormalizer, TokenUsage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Fakes ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Calls {
    loads: AtomicUsize,
    generates: AtomicUsize,
    unloads: AtomicUsize,
}

/// Text stage that tags its input, e.g. `"x"` → `"x <cleaned>"`.
struct Tagger {
    tag: &'static str,
    calls: Arc<Calls>,
    loaded: bool,
    fail_with: Option<FailureKind>,
}

impl Tagger {
    fn new(tag: &'static str) -> (Self, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        (
            Self {
                tag,
                calls: Arc::clone(&calls),
                loaded: false,
                fail_with: None,
            },
            calls,
        )
    }

    fn failing(mut self, kind: FailureKind) -> Self {
        self.fail_with = Some(kind);
        self
    }
}

#[async_trait]
impl StageBackend for Tagger {
    async fn load(&mut self) -> Result<(), PapercastError> {
        self.calls.loads.fetch_add(1, Ordering::SeqCst);
        self.loaded = true;
        Ok(())
    }

    async fn generate(
        &mut self,
        prompt: &StagePrompt,
        _options: &GenerateOptions,
    ) -> Result<Generation, PapercastError> {
        if !self.loaded {
            return Err(PapercastError::BackendNotLoaded {
                stage: self.tag.into(),
            });
        }
        self.calls.generates.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.fail_with {
            return Err(PapercastError::from_fault(
                self.tag,
                BackendFault::new(kind, "backend gave up"),
            ));
        }
        Ok(Generation {
            text: format!("{} <{}>", prompt.input, self.tag),
            usage: Some(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            }),
            audio: None,
        })
    }

    async fn unload(&mut self) {
        self.calls.unloads.fetch_add(1, Ordering::SeqCst);
        self.loaded = false;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn memory_footprint(&self) -> u64 {
        0
    }
}

/// TTS back-end producing 100 samples per character at 1 kHz, divided by speed.
struct Tone;

impl AudioBackend for Tone {
    fn load(&mut self) -> Result<Vec<String>, BackendFault> {
        Ok(["af_sarah", "af_bella", "am_adam", "bf_emma", "bm_george"]
            .iter()
            .map(|v| v.to_string())
            .collect())
    }

    fn synthesize(
        &mut self,
        text: &str,
        _voice: &str,
        speed: f32,
        _lang: &str,
    ) -> Result<AudioBuffer, BackendFault> {
        let n = (text.chars().count() as f32 * 100.0 / speed) as usize;
        Ok(AudioBuffer {
            samples: vec![0.0; n],
            sample_rate: 1000,
        })
    }

    fn unload(&mut self) {}
}

fn text_stages(
    config: LifecycleConfig,
    cleanup_gb: u64,
    reorg_gb: u64,
) -> (ModelLifecycleManager, Arc<Calls>, Arc<Calls>) {
    let (cleanup, c1) = Tagger::new("cleaned");
    let (reorg, c2) = Tagger::new("reorganized");
    let manager = ModelLifecycleManager::new(config)
        .with_stage(
            StageDescriptor::new(StageKind::Cleanup, 1).memory_bytes(cleanup_gb * GIB),
            Box::new(cleanup),
        )
        .unwrap()
        .with_stage(
            StageDescriptor::new(StageKind::Reorganization, 2).memory_bytes(reorg_gb * GIB),
            Box::new(reorg),
        )
        .unwrap();
    (manager, c1, c2)
}

fn orchestrator(manager: ModelLifecycleManager) -> PipelineOrchestrator {
    PipelineOrchestrator::new(Arc::new(manager), PipelineConfig::default())
}

// ── Skipping ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn skipped_stage_passes_input_through() {
    let (manager, cleanup_calls, reorg_calls) = text_stages(LifecycleConfig::eager(), 1, 1);
    manager.startup().await.unwrap();
    let orch = orchestrator(manager);

    let request = PipelineRequest::new("Plain sentence here.").skip("cleanup");
    let result = orch.run(&request).await.unwrap();

    assert_eq!(cleanup_calls.generates.load(Ordering::SeqCst), 0);
    assert_eq!(reorg_calls.generates.load(Ordering::SeqCst), 1);

    let cleanup = result.stage("cleanup").unwrap();
    assert!(cleanup.skipped);
    assert_eq!(cleanup.output, "Plain sentence here.");
    assert_eq!(cleanup.elapsed_ms, 0);
    assert_eq!(result.final_output, "Plain sentence here. <reorganized>");
}

#[tokio::test]
async fn skipping_every_stage_returns_prepared_input() {
    let (manager, _, _) = text_stages(LifecycleConfig::on_demand(), 1, 1);
    let orch = orchestrator(manager);

    let request = PipelineRequest::new("  Keep me as is.  ")
        .skip("cleanup")
        .skip("reorganization");
    let result = orch.run(&request).await.unwrap();
    assert_eq!(result.final_output, "Keep me as is.");
    assert_eq!(result.stages.len(), 2);
    assert_eq!(result.total_input_tokens(), 0);
}

#[tokio::test]
async fn stages_chain_in_order_and_sum_usage() {
    let (manager, _, _) = text_stages(LifecycleConfig::eager(), 1, 1);
    manager.startup().await.unwrap();
    let result = orchestrator(manager)
        .run(&PipelineRequest::new("Start."))
        .await
        .unwrap();

    assert_eq!(result.stage_output("cleanup"), Some("Start. <cleaned>"));
    assert_eq!(result.final_output, "Start. <cleaned> <reorganized>");
    assert_eq!(result.total_input_tokens(), 20);
    assert_eq!(result.total_output_tokens(), 10);
    assert_eq!(
        result.total_elapsed_ms,
        result.stages.iter().map(|s| s.elapsed_ms).sum::<u64>()
    );
}

// ── Memory budget ────────────────────────────────────────────────────────────

#[tokio::test]
async fn eager_startup_over_budget_leaves_second_stage_unloaded() {
    let (manager, _, reorg_calls) =
        text_stages(LifecycleConfig::eager().with_budget(35 * GIB), 10, 30);

    let err = manager.startup().await.unwrap_err();
    assert!(matches!(err, PapercastError::BudgetExceeded { ref stage, .. } if stage == "reorganization"));
    assert_eq!(manager.state("cleanup"), Some(ModelState::Ready));
    assert_eq!(manager.state("reorganization"), Some(ModelState::Unloaded));
    assert_eq!(reorg_calls.loads.load(Ordering::SeqCst), 0);
    assert!(manager.ready_bytes() <= 35 * GIB);

    // Every later use of the unloaded stage fails fast.
    let orch = orchestrator(manager);
    let failure = orch.run(&PipelineRequest::new("Some text.")).await.unwrap_err();
    assert_eq!(failure.stage.as_deref(), Some("reorganization"));
    assert!(matches!(
        failure.error(),
        PapercastError::StageNotReady { on_demand: false, .. }
    ));
    // The cleanup stage finished before the failure and travels with it.
    assert_eq!(failure.completed.len(), 1);
    assert_eq!(failure.completed[0].output, "Some text. <cleaned>");
}

#[tokio::test]
async fn on_demand_swapping_fits_both_stages_in_budget() {
    let (manager, c1, c2) =
        text_stages(LifecycleConfig::on_demand().with_budget(35 * GIB), 10, 30);
    let orch = orchestrator(manager);

    let result = orch
        .run_swapping(&PipelineRequest::new("Swap me."))
        .await
        .unwrap();
    assert_eq!(result.final_output, "Swap me. <cleaned> <reorganized>");

    for calls in [&c1, &c2] {
        assert_eq!(calls.loads.load(Ordering::SeqCst), 1);
        assert_eq!(calls.unloads.load(Ordering::SeqCst), 1);
    }
    assert_eq!(orch.lifecycle().ready_bytes(), 0);
}

#[tokio::test]
async fn on_demand_run_without_loading_reports_not_ready() {
    let (manager, _, _) = text_stages(LifecycleConfig::on_demand(), 1, 1);
    let failure = orchestrator(manager)
        .run(&PipelineRequest::new("Text."))
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error(),
        PapercastError::StageNotReady { on_demand: true, stage } if stage == "cleanup"
    ));
    assert!(failure.completed.is_empty());
}

#[tokio::test]
async fn request_budget_override_rejects_before_any_stage() {
    let (manager, c1, _) = text_stages(LifecycleConfig::eager(), 10, 30);
    manager.startup().await.unwrap();
    let orch = orchestrator(manager);

    let request = PipelineRequest::new("Text.").max_memory_bytes(35 * GIB);
    let failure = orch.run(&request).await.unwrap_err();
    assert_eq!(failure.stage, None);
    assert!(matches!(failure.error(), PapercastError::BudgetExceeded { .. }));
    assert_eq!(c1.generates.load(Ordering::SeqCst), 0);

    // Skipping the large stage brings the request under its limit.
    let request = request.skip("reorganization");
    assert!(orch.run(&request).await.is_ok());
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stage_failure_aborts_and_keeps_completed_records() {
    let (cleanup, _) = Tagger::new("cleaned");
    let (reorg, _) = Tagger::new("reorganized");
    let manager = ModelLifecycleManager::new(LifecycleConfig::eager())
        .with_stage(StageDescriptor::new(StageKind::Cleanup, 1), Box::new(cleanup))
        .unwrap()
        .with_stage(
            StageDescriptor::new(StageKind::Reorganization, 2),
            Box::new(reorg.failing(FailureKind::Timeout)),
        )
        .unwrap();
    manager.startup().await.unwrap();

    let failure = orchestrator(manager)
        .run(&PipelineRequest::new("Input text."))
        .await
        .unwrap_err();
    assert_eq!(failure.stage.as_deref(), Some("reorganization"));
    assert!(matches!(
        failure.error(),
        PapercastError::Generation {
            kind: FailureKind::Timeout,
            ..
        }
    ));
    assert_eq!(failure.completed.len(), 1);
    assert_eq!(failure.completed[0].name, "cleanup");
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let (manager, _, _) = text_stages(LifecycleConfig::eager(), 1, 1);
    manager.startup().await.unwrap();
    let orch = orchestrator(manager);

    let err = orch.run(&PipelineRequest::new("   ")).await.unwrap_err();
    assert!(matches!(err.error(), PapercastError::EmptyInput));

    let err = orch
        .run(&PipelineRequest::new("Text.").skip("translation"))
        .await
        .unwrap_err();
    assert!(matches!(err.error(), PapercastError::UnknownStage { .. }));

    let err = orch
        .run(&PipelineRequest::new("[1, 2]"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.error(),
        PapercastError::NormalizationCollapse { .. }
    ));
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl StageProgressCallback for Recorder {
    fn on_run_start(&self, total_stages: usize, _input_len: usize) {
        self.push(format!("run:{total_stages}"));
    }
    fn on_stage_start(&self, stage: &str, _ordinal: usize, _total: usize) {
        self.push(format!("start:{stage}"));
    }
    fn on_stage_skipped(&self, stage: &str, _ordinal: usize, _total: usize) {
        self.push(format!("skip:{stage}"));
    }
    fn on_stage_complete(&self, stage: &str, _o: usize, _t: usize, _len: usize, _ms: u64) {
        self.push(format!("done:{stage}"));
    }
    fn on_run_complete(&self, _total_elapsed_ms: u64, _output_len: usize) {
        self.push("end".into());
    }
}

#[tokio::test]
async fn progress_events_follow_stage_order() {
    let (manager, _, _) = text_stages(LifecycleConfig::eager(), 1, 1);
    manager.startup().await.unwrap();
    let recorder = Arc::new(Recorder::default());
    let config = PipelineConfig::builder()
        .progress_callback(Arc::clone(&recorder) as Arc<dyn StageProgressCallback>)
        .build()
        .unwrap();
    let orch = PipelineOrchestrator::new(Arc::new(manager), config);

    orch.run(&PipelineRequest::new("Hello.").skip("cleanup"))
        .await
        .unwrap();
    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "run:2",
            "skip:cleanup",
            "start:reorganization",
            "done:reorganization",
            "end"
        ]
    );
}

// ── Synthesis ────────────────────────────────────────────────────────────────

fn engine() -> SynthesisEngine {
    SynthesisEngine::new(Box::new(Tone), SynthesisConfig::default())
}

#[test]
fn unknown_voice_lists_a_sample() {
    let mut e = engine();
    e.load().unwrap();
    let err = e
        .synthesize("Hello world.", &SynthesisParams::default().voice("xx_ghost"))
        .unwrap_err();
    match err {
        PapercastError::VoiceNotFound { voice, sample, total } => {
            assert_eq!(voice, "xx_ghost");
            assert_eq!(total, 5);
            assert!(sample.contains(&"af_sarah".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn faster_speed_never_lengthens_audio() {
    let mut e = engine();
    e.load().unwrap();
    let text = "A reasonably long sentence to read aloud at several speeds.";
    let durations: Vec<f64> = [0.5_f32, 1.0, 1.5, 2.0]
        .iter()
        .map(|&s| {
            e.synthesize(text, &SynthesisParams::default().speed(s))
                .unwrap()
                .metadata
                .duration_secs
        })
        .collect();
    assert!(durations.windows(2).all(|w| w[1] <= w[0]), "{durations:?}");
}

#[test]
fn speed_outside_range_is_invalid() {
    let mut e = engine();
    e.load().unwrap();
    for speed in [0.4_f32, 2.1] {
        let err = e
            .synthesize("Hello.", &SynthesisParams::default().speed(speed))
            .unwrap_err();
        assert!(matches!(err, PapercastError::InvalidParameter { ref name, .. } if name == "speed"));
    }
}

#[test]
fn metadata_reports_real_time_factor() {
    let mut e = engine();
    e.load().unwrap();
    let out = e.synthesize("Hello there, listener.", &SynthesisParams::default()).unwrap();
    let m = &out.metadata;
    assert_eq!(m.audio_samples, out.samples.len());
    assert!((m.duration_secs - m.audio_samples as f64 / m.sample_rate as f64).abs() < 1e-9);
    assert!((m.rtf - m.processing_time_secs / m.duration_secs).abs() < 1e-9);
}

#[tokio::test]
async fn full_pipeline_ends_in_audio() {
    let (cleanup, _) = Tagger::new("cleaned");
    let manager = ModelLifecycleManager::new(LifecycleConfig::on_demand())
        .with_stage(StageDescriptor::new(StageKind::Cleanup, 1), Box::new(cleanup))
        .unwrap()
        .with_stage(
            StageDescriptor::new(StageKind::Synthesis, 3).skippable(false),
            Box::new(SynthesisStage::new(engine())),
        )
        .unwrap();
    let orch = orchestrator(manager);

    let request = PipelineRequest::new("Results show (Smith, 2020) a 65% ± 5% effect [1,2].")
        .synthesis(SynthesisParams::default().voice("bm_george"));
    let result = orch.run_swapping(&request).await.unwrap();

    let audio = result.audio.as_ref().unwrap();
    let meta = result.synthesis.as_ref().unwrap();
    assert_eq!(meta.voice, "bm_george");
    assert_eq!(audio.metadata, *meta);
    assert!(!result.final_output.contains("(Smith, 2020)"));
    assert!(result.final_output.contains("plus or minus"));

    // Synthesis cannot be skipped.
    let err = orch
        .run_swapping(&PipelineRequest::new("Hello.").skip("synthesis"))
        .await
        .unwrap_err();
    assert!(matches!(err.error(), PapercastError::InvalidParameter { .. }));
}

// ── Normalization ────────────────────────────────────────────────────────────

#[test]
fn citation_and_symbol_example() {
    let input = "Results show (Smith, 2020) a 65% ± 5% effect [1,2].";
    let out = TextNormalizer::default()
        .normalize(input, &NormalizeOptions::default())
        .unwrap();
    let text = out.as_str();
    assert!(!text.contains("(Smith, 2020)"));
    assert!(!text.contains("[1,2]"));
    assert!(text.contains("plus or minus"));
    assert!(out.len() < input.chars().count());
}

#[test]
fn normalization_is_idempotent_on_extracted_text() {
    let n = TextNormalizer::default();
    let opts = NormalizeOptions::default();
    for input in [
        "We used the α-method [3] (see Fig. 2) at https://example.org, e.g. twice.",
        "Results hold (Smith , 2020) in all cases.",
        "Results hold (Smi-\nth, 2020) in all cases.",
        "Noise\u{00A0}fell (Lee\u{200B} et al.,\u{00A0}2019) , then rose .",
        "Models (e.g. (LLMs)) help (see (Smith, 2020) ) here.",
    ] {
        let once = n.normalize(input, &opts).unwrap();
        let twice = n.normalize(once.as_str(), &opts).unwrap();
        assert_eq!(once.as_str(), twice.as_str(), "input: {input:?}");
        assert!(!once.as_str().contains("2020"), "input: {input:?}");
        assert!(!once.as_str().contains("2019"), "input: {input:?}");
    }
}
