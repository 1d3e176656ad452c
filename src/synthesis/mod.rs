//! Speech synthesis: voice validation, speed checks, chunking and audio
//! metadata around an [`AudioBackend`].
//!
//! The engine does not run a speech model itself. It validates the request,
//! normalizes the text with [`TextNormalizer`], hands chunks of it to the
//! back-end and assembles the samples into a [`SynthesisOutput`].
//!
//! ```text
//! text ──▶ validate ──▶ normalize ──▶ chunk ──▶ AudioBackend ──▶ concat ──▶ metadata
//!          voice/speed  (optional)    ≤ N chars  (per chunk)
//! ```
//!
//! All calls are blocking. Async callers run them on the blocking pool (see
//! [`crate::pipeline::synthesis::SynthesisStage`]).

pub mod voice;

pub use voice::{VoiceCategory, VoiceSet, VOICE_SAMPLE_LEN};

use crate::config::SynthesisConfig;
use crate::error::{BackendFault, FailureKind, PapercastError};
use crate::normalize::{validate_length, NormalizeOptions, NormalizedText, TextNormalizer};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Slowest accepted speed factor.
pub const MIN_SPEED: f32 = 0.5;
/// Fastest accepted speed factor.
pub const MAX_SPEED: f32 = 2.0;

/// Stage name used in errors raised by the engine.
pub const SYNTHESIS_STAGE: &str = "synthesis";

// ── Back-end interface ────────────────────────────────────────────────────

/// PCM samples returned by an [`AudioBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// A speech model runtime.
///
/// Implementations wrap an actual TTS model (ONNX, a remote service, ...).
/// Calls block; none of them are invoked on an async executor thread.
pub trait AudioBackend: Send {
    /// Load the model and return the ids of the voices it offers.
    fn load(&mut self) -> Result<Vec<String>, BackendFault>;

    /// Synthesize `text` with `voice` at `speed` (1.0 = natural pace).
    fn synthesize(
        &mut self,
        text: &str,
        voice: &str,
        speed: f32,
        lang: &str,
    ) -> Result<AudioBuffer, BackendFault>;

    /// Release the model. Must be safe to call when nothing is loaded.
    fn unload(&mut self);

    /// Approximate resident size of the loaded model, in bytes.
    fn memory_footprint(&self) -> u64 {
        0
    }
}

// ── Request / result types ────────────────────────────────────────────────

/// Per-request synthesis parameters. `None` fields fall back to the
/// engine's configured defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisParams {
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub lang: Option<String>,
    /// Normalize the text before synthesis. Default: true.
    pub preprocess: bool,
    /// Remove citations during normalization. Default: true.
    pub remove_citations: bool,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            voice: None,
            speed: None,
            lang: None,
            preprocess: true,
            remove_citations: true,
        }
    }
}

impl SynthesisParams {
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn preprocess(mut self, v: bool) -> Self {
        self.preprocess = v;
        self
    }

    pub fn remove_citations(mut self, v: bool) -> Self {
        self.remove_citations = v;
        self
    }
}

/// Facts about one synthesis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisMetadata {
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub processing_time_secs: f64,
    /// `processing_time_secs / duration_secs`; below 1.0 is faster than real time.
    pub rtf: f64,
    pub original_text_len: usize,
    pub processed_text_len: usize,
    pub voice: String,
    pub speed: f32,
    pub audio_samples: usize,
    pub chunks: usize,
}

/// Audio produced by [`SynthesisEngine::synthesize`].
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// The text actually sent to the back-end.
    pub spoken_text: String,
    pub metadata: SynthesisMetadata,
}

impl SynthesisOutput {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        }
    }

    /// Write the audio as a 32-bit float mono WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), PapercastError> {
        let to_err = |e: hound::Error| PapercastError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: hound_to_io(e),
        };
        let mut writer = hound::WavWriter::create(path, self.wav_spec()).map_err(to_err)?;
        for &sample in &self.samples {
            writer.write_sample(sample).map_err(to_err)?;
        }
        writer.finalize().map_err(to_err)?;
        Ok(())
    }

    /// The WAV file as bytes.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, PapercastError> {
        let to_err = |e: hound::Error| PapercastError::Internal(format!("WAV encoding failed: {e}"));
        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 4));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, self.wav_spec()).map_err(to_err)?;
            for &sample in &self.samples {
                writer.write_sample(sample).map_err(to_err)?;
            }
            writer.finalize().map_err(to_err)?;
        }
        Ok(cursor.into_inner())
    }

    /// The WAV file, base64-encoded (for JSON transports).
    pub fn to_wav_base64(&self) -> Result<String, PapercastError> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.to_wav_bytes()?))
    }
}

fn hound_to_io(e: hound::Error) -> std::io::Error {
    match e {
        hound::Error::IoError(io) => io,
        other => std::io::Error::other(other.to_string()),
    }
}

// ── Engine ────────────────────────────────────────────────────────────────

/// Validating front of an [`AudioBackend`].
pub struct SynthesisEngine {
    backend: Box<dyn AudioBackend>,
    config: SynthesisConfig,
    normalizer: TextNormalizer,
    voices: Option<VoiceSet>,
    default_voice: String,
}

impl std::fmt::Debug for SynthesisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisEngine")
            .field("backend", &"<dyn AudioBackend>")
            .field("config", &self.config)
            .field("loaded", &self.voices.is_some())
            .field("default_voice", &self.default_voice)
            .finish()
    }
}

impl SynthesisEngine {
    pub fn new(backend: Box<dyn AudioBackend>, config: SynthesisConfig) -> Self {
        let default_voice = config.default_voice.clone();
        Self {
            backend,
            config,
            normalizer: TextNormalizer::default(),
            voices: None,
            default_voice,
        }
    }

    /// Use a custom rule set for preprocessing.
    pub fn with_normalizer(mut self, normalizer: TextNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Load the speech model. No-op when already loaded.
    ///
    /// When the configured default voice is not offered, the first voice
    /// becomes the default.
    pub fn load(&mut self) -> Result<(), PapercastError> {
        if self.voices.is_some() {
            debug!("Synthesis model already loaded");
            return Ok(());
        }
        let start = Instant::now();
        let voices = self.backend.load().map_err(|f| PapercastError::Load {
            stage: SYNTHESIS_STAGE.to_string(),
            detail: f.to_string(),
        })?;
        let voices = VoiceSet::new(voices);
        let Some(first) = voices.first().map(str::to_string) else {
            self.backend.unload();
            return Err(PapercastError::Load {
                stage: SYNTHESIS_STAGE.to_string(),
                detail: "model offers no voices".into(),
            });
        };

        self.default_voice = if voices.contains(&self.config.default_voice) {
            self.config.default_voice.clone()
        } else {
            warn!(
                "Default voice '{}' not available, using '{}'",
                self.config.default_voice, first
            );
            first
        };

        info!(
            "Synthesis model loaded in {}ms ({} voices available)",
            start.elapsed().as_millis(),
            voices.len()
        );
        self.voices = Some(voices);
        Ok(())
    }

    /// Release the speech model. No-op when not loaded.
    pub fn unload(&mut self) {
        if self.voices.take().is_some() {
            self.backend.unload();
            self.default_voice = self.config.default_voice.clone();
            info!("Synthesis model unloaded");
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.voices.is_some()
    }

    pub fn memory_footprint(&self) -> u64 {
        self.backend.memory_footprint()
    }

    /// Voice used when a request names none.
    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    pub fn available_voices(&self) -> Result<&VoiceSet, PapercastError> {
        self.voices.as_ref().ok_or_else(not_loaded)
    }

    pub fn voice_categories(&self) -> Result<BTreeMap<VoiceCategory, Vec<String>>, PapercastError> {
        Ok(self.available_voices()?.categories())
    }

    pub fn validate_voice(&self, voice: &str) -> Result<(), PapercastError> {
        let voices = self.available_voices()?;
        if voices.contains(voice) {
            Ok(())
        } else {
            Err(PapercastError::VoiceNotFound {
                voice: voice.to_string(),
                sample: voices.sample(),
                total: voices.len(),
            })
        }
    }

    /// Normalize `text` the way [`Self::synthesize`] would.
    pub fn preprocess(
        &self,
        text: &str,
        remove_citations: bool,
    ) -> Result<NormalizedText, PapercastError> {
        let options = NormalizeOptions {
            remove_citations,
            min_output_chars: self.config.min_output_chars,
        };
        self.normalizer.normalize(text, &options)
    }

    /// Synthesize `text`.
    ///
    /// # Errors
    /// - [`PapercastError::BackendNotLoaded`] before [`Self::load`].
    /// - [`PapercastError::InvalidParameter`] for a speed outside
    ///   [`MIN_SPEED`]..=[`MAX_SPEED`].
    /// - [`PapercastError::VoiceNotFound`] for an unknown voice.
    /// - Normalization and length errors for unsuitable text.
    /// - [`PapercastError::Generation`] when the back-end fails or returns
    ///   unusable audio.
    pub fn synthesize(
        &mut self,
        text: &str,
        params: &SynthesisParams,
    ) -> Result<SynthesisOutput, PapercastError> {
        if !self.is_loaded() {
            return Err(not_loaded());
        }

        let speed = params.speed.unwrap_or(self.config.default_speed);
        if !speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(PapercastError::InvalidParameter {
                name: "speed".into(),
                detail: format!("{speed} is outside {MIN_SPEED}–{MAX_SPEED}"),
            });
        }

        let voice = params
            .voice
            .clone()
            .unwrap_or_else(|| self.default_voice.clone());
        self.validate_voice(&voice)?;

        if text.trim().is_empty() {
            return Err(PapercastError::EmptyInput);
        }
        validate_length(text, 1, self.config.max_text_chars)?;
        let original_text_len = text.chars().count();

        let spoken_text = if params.preprocess {
            self.preprocess(text, params.remove_citations)?.into_string()
        } else {
            text.trim().to_string()
        };
        let processed_text_len = spoken_text.chars().count();
        let lang = params
            .lang
            .clone()
            .unwrap_or_else(|| self.config.default_lang.clone());

        let chunks = chunk_text(&spoken_text, self.config.chunk_chars);
        info!(
            "Synthesizing: {} chars in {} chunk(s), voice={}, speed={}",
            processed_text_len,
            chunks.len(),
            voice,
            speed
        );

        let start = Instant::now();
        let mut samples: Vec<f32> = Vec::new();
        let mut sample_rate: Option<u32> = None;
        for (i, chunk) in chunks.iter().enumerate() {
            let buffer = self
                .backend
                .synthesize(chunk, &voice, speed, &lang)
                .map_err(|f| PapercastError::from_fault(SYNTHESIS_STAGE, f))?;
            match sample_rate {
                None => sample_rate = Some(buffer.sample_rate),
                Some(rate) if rate != buffer.sample_rate => {
                    return Err(malformed(format!(
                        "chunk {} has sample rate {} Hz, expected {} Hz",
                        i + 1,
                        buffer.sample_rate,
                        rate
                    )));
                }
                Some(_) => {}
            }
            debug!("Chunk {}/{}: {} samples", i + 1, chunks.len(), buffer.samples.len());
            samples.extend(buffer.samples);
        }
        let processing_time_secs = start.elapsed().as_secs_f64();

        let sample_rate = match sample_rate {
            Some(rate) if rate > 0 => rate,
            _ => return Err(malformed("back-end reported a zero sample rate")),
        };
        if samples.is_empty() {
            return Err(malformed("back-end returned no audio samples"));
        }

        let duration_secs = samples.len() as f64 / sample_rate as f64;
        let rtf = processing_time_secs / duration_secs;
        info!(
            "Synthesis complete: {:.2}s audio generated in {:.2}s (RTF: {:.3})",
            duration_secs, processing_time_secs, rtf
        );

        let metadata = SynthesisMetadata {
            duration_secs,
            sample_rate,
            processing_time_secs,
            rtf,
            original_text_len,
            processed_text_len,
            voice,
            speed,
            audio_samples: samples.len(),
            chunks: chunks.len(),
        };
        Ok(SynthesisOutput {
            samples,
            sample_rate,
            spoken_text,
            metadata,
        })
    }
}

fn not_loaded() -> PapercastError {
    PapercastError::BackendNotLoaded {
        stage: SYNTHESIS_STAGE.to_string(),
    }
}

fn malformed(detail: impl Into<String>) -> PapercastError {
    PapercastError::Generation {
        stage: SYNTHESIS_STAGE.to_string(),
        kind: FailureKind::MalformedOutput,
        detail: detail.into(),
    }
}

// ── Chunking ──────────────────────────────────────────────────────────────

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Sentences are kept whole when they fit; a longer sentence starts a new
/// chunk and is split between words, and words longer than `max_chars` are
/// split between characters. Whitespace between chunks is not preserved.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut packer = Packer::new(max_chars.max(1));
    for sentence in sentences(text) {
        let len = sentence.chars().count();
        if len <= packer.max_chars {
            packer.push(&sentence, len);
            continue;
        }
        packer.flush();
        for word in sentence.split(' ') {
            let word_len = word.chars().count();
            if word_len <= packer.max_chars {
                packer.push(word, word_len);
                continue;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(packer.max_chars) {
                let piece: String = piece.iter().collect();
                packer.push(&piece, piece.chars().count());
            }
        }
    }
    packer.finish()
}

struct Packer {
    max_chars: usize,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
}

impl Packer {
    fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
        }
    }

    fn push(&mut self, unit: &str, unit_len: usize) {
        if self.current_len > 0 && self.current_len + 1 + unit_len > self.max_chars {
            self.flush();
        }
        if self.current_len > 0 {
            self.current.push(' ');
            self.current_len += 1;
        }
        self.current.push_str(unit);
        self.current_len += unit_len;
    }

    fn flush(&mut self) {
        if self.current_len > 0 {
            self.chunks.push(std::mem::take(&mut self.current));
            self.current_len = 0;
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

/// Whitespace-normalized sentences: a sentence ends at a word ending in
/// `.`, `!` or `?`.
fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
        if word.ends_with(['.', '!', '?']) {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
