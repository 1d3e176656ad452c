//! Progress-callback trait for per-stage pipeline events.
//!
//! Inject an [`Arc<dyn StageProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator moves through its stages. The CLI uses this to
//! drive its progress bar; a server could forward events to a channel.
//!
//! # Example
//!
//! ```rust
//! use papercast::{PipelineConfig, StageProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl StageProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, stage: &str, _ordinal: usize, _total: usize, output_len: usize, _elapsed_ms: u64) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} done ({output_len} chars)");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn StageProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it runs each stage.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Stages of one request run sequentially, but several
/// requests may share one callback, so implementations must be `Send + Sync`.
pub trait StageProgressCallback: Send + Sync {
    /// Called once before the first stage.
    ///
    /// # Arguments
    /// * `total_stages` - registered stages, skipped ones included
    /// * `input_len`    - characters of request text
    fn on_run_start(&self, total_stages: usize, input_len: usize) {
        let _ = (total_stages, input_len);
    }

    /// Called just before a stage generates.
    fn on_stage_start(&self, stage: &str, ordinal: usize, total: usize) {
        let _ = (stage, ordinal, total);
    }

    /// Called when a stage is skipped; its input passes through unchanged.
    fn on_stage_skipped(&self, stage: &str, ordinal: usize, total: usize) {
        let _ = (stage, ordinal, total);
    }

    /// Called when a stage produced its output.
    fn on_stage_complete(
        &self,
        stage: &str,
        ordinal: usize,
        total: usize,
        output_len: usize,
        elapsed_ms: u64,
    ) {
        let _ = (stage, ordinal, total, output_len, elapsed_ms);
    }

    /// Called when a stage fails. No further stage runs.
    fn on_stage_error(&self, stage: &str, ordinal: usize, total: usize, error: &str) {
        let _ = (stage, ordinal, total, error);
    }

    /// Called once after the last stage succeeded.
    fn on_run_complete(&self, total_elapsed_ms: u64, output_len: usize) {
        let _ = (total_elapsed_ms, output_len);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl StageProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn StageProgressCallback>;
