//! Model lifecycle: per-stage load state and the memory budget.
//!
//! [`ModelLifecycleManager`] is the only owner of stage back-ends. Callers
//! never hold a back-end across an await point; they ask the manager to load,
//! unload or generate by stage name.
//!
//! ## Locking
//!
//! Each stage has one exclusive async lock guarding its back-end. Load,
//! unload and generate all take it, so transitions on one stage never overlap
//! with each other or with a generation on that stage. Different stages lock
//! independently and may generate concurrently.
//!
//! The budget is a byte counter of stages that are `loading` or `ready`.
//! A load reserves the stage's footprint before calling the back-end and
//! releases it if the load fails, so the ready set never exceeds the budget
//! once a transition ends. Nothing is ever evicted automatically.
//!
//! ## Modes
//!
//! - [`LoadMode::Eager`]: [`ModelLifecycleManager::startup`] loads every
//!   stage once. A stage that fails (or does not fit) is reported once and
//!   stays unloaded; later use fails fast.
//! - [`LoadMode::OnDemand`]: the caller loads and unloads stages itself.

use crate::config::{LifecycleConfig, LoadMode};
use crate::error::PapercastError;
use crate::pipeline::{
    GenerateOptions, Generation, StageBackend, StageDescriptor, StageKind, StagePrompt,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, error, info};

/// Load state of one stage's model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    Unloading,
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelState::Unloaded => "unloaded",
            ModelState::Loading => "loading",
            ModelState::Ready => "ready",
            ModelState::Unloading => "unloading",
        };
        f.write_str(s)
    }
}

/// One row of [`ModelLifecycleManager::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStatus {
    pub name: String,
    pub kind: StageKind,
    pub ordinal: usize,
    pub state: ModelState,
    pub memory_bytes: u64,
}

struct Slot {
    descriptor: StageDescriptor,
    /// Larger of the declared and the back-end-reported footprint.
    footprint: u64,
    backend: tokio::sync::Mutex<Box<dyn StageBackend>>,
    state: Mutex<ModelState>,
}

impl Slot {
    fn state(&self) -> ModelState {
        match self.state.lock() {
            Ok(s) => *s,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, state: ModelState) {
        match self.state.lock() {
            Ok(mut s) => *s = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }
}

/// Owns every stage back-end and its load state.
pub struct ModelLifecycleManager {
    config: LifecycleConfig,
    /// Sorted by ordinal.
    slots: Vec<Slot>,
    /// Footprint of stages that are loading or ready.
    reserved: Mutex<u64>,
}

impl fmt::Debug for ModelLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLifecycleManager")
            .field("config", &self.config)
            .field("stages", &self.status())
            .field("reserved", &self.reserved_bytes())
            .finish()
    }
}

/// Reverts a load reservation unless disarmed. Covers both load errors and
/// a caller dropping the `ensure_loaded` future mid-load.
struct LoadGuard<'a> {
    manager: &'a ModelLifecycleManager,
    slot: &'a Slot,
    armed: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.manager.release(self.slot.footprint);
            self.slot.set_state(ModelState::Unloaded);
        }
    }
}

impl ModelLifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            reserved: Mutex::new(0),
        }
    }

    /// Add a stage. Stages are kept in ordinal order.
    ///
    /// # Errors
    /// [`PapercastError::InvalidConfig`] when a stage of that name exists.
    pub fn register(
        &mut self,
        descriptor: StageDescriptor,
        backend: Box<dyn StageBackend>,
    ) -> Result<(), PapercastError> {
        if self.slots.iter().any(|s| s.descriptor.name == descriptor.name) {
            return Err(PapercastError::InvalidConfig(format!(
                "stage '{}' is registered twice",
                descriptor.name
            )));
        }
        let footprint = descriptor.memory_bytes.max(backend.memory_footprint());
        debug!(
            "Registered stage '{}' (ordinal {}, {} bytes)",
            descriptor.name, descriptor.ordinal, footprint
        );
        self.slots.push(Slot {
            descriptor,
            footprint,
            backend: tokio::sync::Mutex::new(backend),
            state: Mutex::new(ModelState::Unloaded),
        });
        self.slots.sort_by_key(|s| s.descriptor.ordinal);
        Ok(())
    }

    /// Builder-style [`Self::register`].
    pub fn with_stage(
        mut self,
        descriptor: StageDescriptor,
        backend: Box<dyn StageBackend>,
    ) -> Result<Self, PapercastError> {
        self.register(descriptor, backend)?;
        Ok(self)
    }

    pub fn mode(&self) -> LoadMode {
        self.config.mode
    }

    pub fn budget_bytes(&self) -> Option<u64> {
        self.config.budget_bytes
    }

    /// Descriptors of all stages, in ordinal order.
    pub fn descriptors(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.slots.iter().map(|s| &s.descriptor)
    }

    /// Effective footprint of a stage.
    pub fn footprint(&self, stage: &str) -> Option<u64> {
        self.slots
            .iter()
            .find(|s| s.descriptor.name == stage)
            .map(|s| s.footprint)
    }

    pub fn state(&self, stage: &str) -> Option<ModelState> {
        self.slots
            .iter()
            .find(|s| s.descriptor.name == stage)
            .map(Slot::state)
    }

    pub fn is_ready(&self, stage: &str) -> bool {
        self.state(stage) == Some(ModelState::Ready)
    }

    /// Combined footprint of ready stages.
    pub fn ready_bytes(&self) -> u64 {
        self.slots
            .iter()
            .filter(|s| s.state() == ModelState::Ready)
            .map(|s| s.footprint)
            .sum()
    }

    pub fn status(&self) -> Vec<StageStatus> {
        self.slots
            .iter()
            .map(|s| StageStatus {
                name: s.descriptor.name.clone(),
                kind: s.descriptor.kind,
                ordinal: s.descriptor.ordinal,
                state: s.state(),
                memory_bytes: s.footprint,
            })
            .collect()
    }

    fn slot(&self, stage: &str) -> Result<&Slot, PapercastError> {
        self.slots
            .iter()
            .find(|s| s.descriptor.name == stage)
            .ok_or_else(|| PapercastError::UnknownStage {
                stage: stage.to_string(),
            })
    }

    fn reserved_bytes(&self) -> u64 {
        match self.reserved.lock() {
            Ok(r) => *r,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Reserve `slot`'s footprint, or fail when it does not fit the budget.
    fn reserve(&self, slot: &Slot) -> Result<(), PapercastError> {
        let mut reserved = match self.reserved.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(budget) = self.config.budget_bytes {
            let available = budget.saturating_sub(*reserved);
            if slot.footprint > available {
                return Err(PapercastError::BudgetExceeded {
                    stage: slot.descriptor.name.clone(),
                    required: slot.footprint,
                    available,
                    budget,
                });
            }
        }
        *reserved += slot.footprint;
        Ok(())
    }

    fn release(&self, bytes: u64) {
        let mut reserved = match self.reserved.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        *reserved = reserved.saturating_sub(bytes);
    }

    /// Load a stage's model. No-op when it is already ready.
    ///
    /// # Errors
    /// - [`PapercastError::UnknownStage`] for an unregistered name.
    /// - [`PapercastError::BudgetExceeded`] when the footprint does not fit
    ///   next to the stages already loaded.
    /// - [`PapercastError::Load`] when the back-end fails; the stage stays
    ///   unloaded and the load is not retried.
    pub async fn ensure_loaded(&self, stage: &str) -> Result<(), PapercastError> {
        let slot = self.slot(stage)?;
        let mut backend = slot.backend.lock().await;
        if slot.state() == ModelState::Ready {
            debug!("Stage '{}' already loaded", stage);
            return Ok(());
        }

        self.reserve(slot)?;
        slot.set_state(ModelState::Loading);
        let mut guard = LoadGuard {
            manager: self,
            slot,
            armed: true,
        };

        info!("Loading stage '{}' ({} bytes)", stage, slot.footprint);
        let start = Instant::now();
        match backend.load().await {
            Ok(()) => {
                guard.armed = false;
                slot.set_state(ModelState::Ready);
                info!(
                    "Stage '{}' ready in {}ms ({} of {} bytes in use)",
                    stage,
                    start.elapsed().as_millis(),
                    self.reserved_bytes(),
                    self.config
                        .budget_bytes
                        .map_or_else(|| "unbounded".to_string(), |b| b.to_string())
                );
                Ok(())
            }
            Err(e) => {
                // Half-loaded back-ends must not keep resources.
                backend.unload().await;
                drop(guard);
                error!("Stage '{}' failed to load: {}", stage, e);
                Err(match e {
                    e @ PapercastError::Load { .. } => e,
                    other => PapercastError::Load {
                        stage: stage.to_string(),
                        detail: other.to_string(),
                    },
                })
            }
        }
    }

    /// Release a stage's model. No-op when it is not loaded.
    ///
    /// Waits for an in-flight generation on the same stage to finish.
    pub async fn unload(&self, stage: &str) -> Result<(), PapercastError> {
        let slot = self.slot(stage)?;
        let mut backend = slot.backend.lock().await;
        if slot.state() == ModelState::Unloaded {
            debug!("Stage '{}' already unloaded", stage);
            return Ok(());
        }
        slot.set_state(ModelState::Unloading);
        backend.unload().await;
        self.release(slot.footprint);
        slot.set_state(ModelState::Unloaded);
        info!("Stage '{}' unloaded ({} bytes released)", stage, slot.footprint);
        Ok(())
    }

    /// Run a stage's back-end.
    ///
    /// # Errors
    /// [`PapercastError::BackendNotLoaded`] when the stage is not ready;
    /// otherwise whatever the back-end reports.
    pub async fn generate(
        &self,
        stage: &str,
        prompt: &StagePrompt,
        options: &GenerateOptions,
    ) -> Result<Generation, PapercastError> {
        let slot = self.slot(stage)?;
        let mut backend = slot.backend.lock().await;
        if slot.state() != ModelState::Ready {
            return Err(PapercastError::BackendNotLoaded {
                stage: stage.to_string(),
            });
        }
        backend.generate(prompt, options).await
    }

    /// Load every stage in ordinal order when the mode is eager.
    ///
    /// A failing stage is logged once and stays unloaded; the remaining
    /// stages are still attempted. Returns the first failure. In on-demand
    /// mode this does nothing.
    pub async fn startup(&self) -> Result<(), PapercastError> {
        if self.config.mode == LoadMode::OnDemand {
            debug!("On-demand mode: no models loaded at startup");
            return Ok(());
        }
        let mut first_error = None;
        for slot in &self.slots {
            let name = &slot.descriptor.name;
            if let Err(e) = self.ensure_loaded(name).await {
                error!(
                    "Stage '{}' unavailable: failed to load at startup ({})",
                    name,
                    e.kind()
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    "All {} stages loaded ({} bytes)",
                    self.slots.len(),
                    self.ready_bytes()
                );
                Ok(())
            }
        }
    }

    /// Unload every stage, last ordinal first.
    pub async fn shutdown(&self) {
        for slot in self.slots.iter().rev() {
            // Names come from the slot list, so the lookup cannot fail.
            let _ = self.unload(&slot.descriptor.name).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GIB;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        loads: AtomicUsize,
        unloads: AtomicUsize,
    }

    struct FakeBackend {
        loaded: bool,
        fail_load: bool,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl StageBackend for FakeBackend {
        async fn load(&mut self) -> Result<(), PapercastError> {
            self.counters.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_load {
                return Err(PapercastError::Internal("weights missing".into()));
            }
            self.loaded = true;
            Ok(())
        }

        async fn generate(
            &mut self,
            prompt: &StagePrompt,
            _options: &GenerateOptions,
        ) -> Result<Generation, PapercastError> {
            Ok(Generation::text(prompt.input.to_uppercase()))
        }

        async fn unload(&mut self) {
            self.counters.unloads.fetch_add(1, Ordering::SeqCst);
            self.loaded = false;
        }

        fn is_loaded(&self) -> bool {
            self.loaded
        }

        fn memory_footprint(&self) -> u64 {
            0
        }
    }

    fn backend(fail_load: bool) -> (Box<dyn StageBackend>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (
            Box::new(FakeBackend {
                loaded: false,
                fail_load,
                counters: Arc::clone(&counters),
            }),
            counters,
        )
    }

    fn manager(config: LifecycleConfig) -> (ModelLifecycleManager, Arc<Counters>, Arc<Counters>) {
        let (a, ca) = backend(false);
        let (b, cb) = backend(false);
        let m = ModelLifecycleManager::new(config)
            .with_stage(
                StageDescriptor::new(StageKind::Cleanup, 1).memory_bytes(10 * GIB),
                a,
            )
            .unwrap()
            .with_stage(
                StageDescriptor::new(StageKind::Reorganization, 2).memory_bytes(30 * GIB),
                b,
            )
            .unwrap();
        (m, ca, cb)
    }

    fn prompt() -> StagePrompt {
        StagePrompt {
            system: String::new(),
            user: "abc".into(),
            input: "abc".into(),
        }
    }

    #[tokio::test]
    async fn ensure_loaded_is_idempotent() {
        let (m, ca, _) = manager(LifecycleConfig::on_demand());
        m.ensure_loaded("cleanup").await.unwrap();
        m.ensure_loaded("cleanup").await.unwrap();
        assert_eq!(ca.loads.load(Ordering::SeqCst), 1);
        assert_eq!(m.state("cleanup"), Some(ModelState::Ready));
        assert_eq!(m.ready_bytes(), 10 * GIB);
    }

    #[tokio::test]
    async fn unload_is_idempotent() {
        let (m, ca, _) = manager(LifecycleConfig::on_demand());
        m.unload("cleanup").await.unwrap();
        assert_eq!(ca.unloads.load(Ordering::SeqCst), 0);
        m.ensure_loaded("cleanup").await.unwrap();
        m.unload("cleanup").await.unwrap();
        m.unload("cleanup").await.unwrap();
        assert_eq!(ca.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(m.ready_bytes(), 0);
    }

    #[tokio::test]
    async fn eager_startup_over_budget_leaves_second_stage_unloaded() {
        let (m, _, cb) = manager(LifecycleConfig::eager().with_budget(35 * GIB));
        let err = m.startup().await.unwrap_err();
        assert!(matches!(err, PapercastError::BudgetExceeded { ref stage, .. } if stage == "reorganization"));
        assert!(m.is_ready("cleanup"));
        assert_eq!(m.state("reorganization"), Some(ModelState::Unloaded));
        assert_eq!(cb.loads.load(Ordering::SeqCst), 0);
        assert!(m.ready_bytes() <= 35 * GIB);

        let err = m
            .generate("reorganization", &prompt(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PapercastError::BackendNotLoaded { .. }));
    }

    #[tokio::test]
    async fn on_demand_swap_requires_explicit_unload() {
        let (m, _, _) = manager(LifecycleConfig::on_demand().with_budget(35 * GIB));
        m.startup().await.unwrap();
        assert_eq!(m.ready_bytes(), 0);

        m.ensure_loaded("cleanup").await.unwrap();
        assert!(m.ensure_loaded("reorganization").await.is_err());
        assert!(m.is_ready("cleanup"));

        m.unload("cleanup").await.unwrap();
        m.ensure_loaded("reorganization").await.unwrap();
        assert!(m.is_ready("reorganization"));
        assert_eq!(m.ready_bytes(), 30 * GIB);
    }

    #[tokio::test]
    async fn failed_load_releases_reservation() {
        let (bad, counters) = backend(true);
        let m = ModelLifecycleManager::new(LifecycleConfig::on_demand().with_budget(20 * GIB))
            .with_stage(
                StageDescriptor::new(StageKind::Cleanup, 1).memory_bytes(15 * GIB),
                bad,
            )
            .unwrap();
        let err = m.ensure_loaded("cleanup").await.unwrap_err();
        assert!(matches!(err, PapercastError::Load { ref stage, .. } if stage == "cleanup"));
        assert_eq!(m.state("cleanup"), Some(ModelState::Unloaded));
        assert_eq!(m.reserved_bytes(), 0);
        assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generate_runs_when_ready() {
        let (m, _, _) = manager(LifecycleConfig::on_demand());
        m.ensure_loaded("cleanup").await.unwrap();
        let g = m
            .generate("cleanup", &prompt(), &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(g.text, "ABC");
    }

    #[tokio::test]
    async fn unknown_and_duplicate_stages() {
        let (mut m, _, _) = manager(LifecycleConfig::on_demand());
        assert!(matches!(
            m.ensure_loaded("nope").await.unwrap_err(),
            PapercastError::UnknownStage { .. }
        ));
        let (dup, _) = backend(false);
        assert!(m
            .register(StageDescriptor::new(StageKind::Cleanup, 3), dup)
            .is_err());
    }

    #[tokio::test]
    async fn status_and_shutdown() {
        let (m, ca, cb) = manager(LifecycleConfig::eager());
        m.startup().await.unwrap();
        let status = m.status();
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| s.state == ModelState::Ready));
        assert_eq!(status[0].name, "cleanup");
        m.shutdown().await;
        assert_eq!(ca.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(cb.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(m.ready_bytes(), 0);
    }
}
