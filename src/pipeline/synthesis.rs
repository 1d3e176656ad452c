//! Synthesis stage: runs the blocking [`SynthesisEngine`] behind the async
//! [`StageBackend`] interface.
//!
//! Each call moves the engine onto the blocking pool with
//! [`tokio::task::spawn_blocking`] and takes it back when the call returns,
//! so a long synthesis never stalls an executor thread.

use super::{GenerateOptions, Generation, StageBackend, StagePrompt};
use crate::error::PapercastError;
use crate::synthesis::{SynthesisEngine, SYNTHESIS_STAGE};
use async_trait::async_trait;
use tracing::debug;

/// Stage adapter around a [`SynthesisEngine`].
#[derive(Debug)]
pub struct SynthesisStage {
    /// `None` only while a blocking call owns the engine, or after that call
    /// panicked.
    engine: Option<SynthesisEngine>,
    footprint: u64,
}

impl SynthesisStage {
    pub fn new(engine: SynthesisEngine) -> Self {
        Self {
            engine: Some(engine),
            footprint: 0,
        }
    }

    /// Declared model size, used when the back-end does not report one.
    pub fn with_footprint(mut self, bytes: u64) -> Self {
        self.footprint = bytes;
        self
    }

    pub fn engine(&self) -> Option<&SynthesisEngine> {
        self.engine.as_ref()
    }

    /// Run `f` on the blocking pool with the engine moved into it.
    async fn with_engine<T, F>(&mut self, f: F) -> Result<T, PapercastError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SynthesisEngine) -> Result<T, PapercastError> + Send + 'static,
    {
        let mut engine = self.engine.take().ok_or_else(|| {
            PapercastError::Internal("synthesis engine lost after a panicked call".into())
        })?;
        let joined = tokio::task::spawn_blocking(move || {
            let result = f(&mut engine);
            (engine, result)
        })
        .await
        .map_err(|e| PapercastError::Internal(format!("synthesis task failed: {e}")))?;
        let (engine, result) = joined;
        self.engine = Some(engine);
        result
    }
}

#[async_trait]
impl StageBackend for SynthesisStage {
    async fn load(&mut self) -> Result<(), PapercastError> {
        self.with_engine(|engine| engine.load()).await
    }

    async fn generate(
        &mut self,
        prompt: &StagePrompt,
        options: &GenerateOptions,
    ) -> Result<Generation, PapercastError> {
        if !self.is_loaded() {
            return Err(PapercastError::BackendNotLoaded {
                stage: SYNTHESIS_STAGE.to_string(),
            });
        }
        let text = prompt.input.clone();
        let params = options.synthesis.clone();
        let output = self
            .with_engine(move |engine| engine.synthesize(&text, &params))
            .await?;
        debug!(
            "Synthesis stage produced {:.2}s of audio",
            output.metadata.duration_secs
        );
        Ok(Generation {
            text: output.spoken_text.clone(),
            usage: None,
            audio: Some(output),
        })
    }

    async fn unload(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.unload();
        }
    }

    fn is_loaded(&self) -> bool {
        self.engine.as_ref().is_some_and(SynthesisEngine::is_loaded)
    }

    fn memory_footprint(&self) -> u64 {
        self.engine
            .as_ref()
            .map(SynthesisEngine::memory_footprint)
            .unwrap_or(0)
            .max(self.footprint)
    }
}
