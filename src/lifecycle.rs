//! Pre and post save hooks.
//!
//! Hooks run in ascending `order`; registrations with the same order keep
//! their registration order. Pre-hooks may rewrite the entity state before
//! the executor flushes it; post-hooks observe the committed state.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, UnitOfWorkError, UowResult};
use crate::executor::{EntityEntry, EntityRef, EntityState};

/// What to do when a hook fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EventFailureStrategy {
    /// Abort the save; no commit is attempted.
    #[default]
    ThrowOnError,
    /// Skip the remaining hooks of that entity, then carry on.
    StopOnError,
    /// Run every hook, carry on, report the failures afterwards.
    ContinueOnError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    PreSave,
    PostSave,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::PreSave => f.write_str("pre-save"),
            HookPhase::PostSave => f.write_str("post-save"),
        }
    }
}

#[async_trait]
pub trait PreSaveChanges: Send + Sync {
    fn order(&self) -> i32 {
        0
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn pre_save_changes(
        &self,
        state: EntityState,
        entity: &EntityRef,
        cancel: &CancellationToken,
    ) -> Result<EntityState, BoxError>;
}

#[async_trait]
pub trait PostSaveChanges: Send + Sync {
    fn order(&self) -> i32 {
        0
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn post_save_changes(
        &self,
        state: EntityState,
        entity: &EntityRef,
        cancel: &CancellationToken,
    ) -> Result<EntityState, BoxError>;
}

/// A hook failure tolerated by the configured strategy.
#[derive(Debug)]
pub struct HookFailure {
    pub phase: HookPhase,
    pub hook: String,
    pub error: BoxError,
}

impl HookFailure {
    pub fn into_error(self) -> UnitOfWorkError {
        UnitOfWorkError::LifecycleHook {
            phase: self.phase,
            hook: self.hook,
            source: self.error,
        }
    }
}

impl fmt::Display for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hook `{}` failed: {}", self.phase, self.hook, self.error)
    }
}

/// Ordered hook sets plus the failure strategy.
#[derive(Clone, Default)]
pub struct SaveChangesPipeline {
    pre: Vec<Arc<dyn PreSaveChanges>>,
    post: Vec<Arc<dyn PostSaveChanges>>,
    strategy: EventFailureStrategy,
}

impl SaveChangesPipeline {
    pub fn new(strategy: EventFailureStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn add_pre_save(&mut self, hook: Arc<dyn PreSaveChanges>) {
        self.pre.push(hook);
        self.pre.sort_by_key(|hook| hook.order());
    }

    pub fn add_post_save(&mut self, hook: Arc<dyn PostSaveChanges>) {
        self.post.push(hook);
        self.post.sort_by_key(|hook| hook.order());
    }

    /// Runs the pre-save hooks over every entry, rewriting states in place.
    /// Tolerated failures are appended to `failures`.
    pub async fn run_pre_save(
        &self,
        entries: &mut [EntityEntry],
        failures: &mut Vec<HookFailure>,
        cancel: &CancellationToken,
    ) -> UowResult<()> {
        for entry in entries.iter_mut() {
            for hook in &self.pre {
                match hook.pre_save_changes(entry.state, &entry.entity, cancel).await {
                    Ok(state) => entry.state = state,
                    Err(error) => {
                        let failure = HookFailure {
                            phase: HookPhase::PreSave,
                            hook: hook.name().to_string(),
                            error,
                        };
                        if !self.tolerate(failure, failures)? {
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs the post-save hooks over every entry.
    pub async fn run_post_save(
        &self,
        entries: &mut [EntityEntry],
        failures: &mut Vec<HookFailure>,
        cancel: &CancellationToken,
    ) -> UowResult<()> {
        for entry in entries.iter_mut() {
            for hook in &self.post {
                match hook.post_save_changes(entry.state, &entry.entity, cancel).await {
                    Ok(state) => entry.state = state,
                    Err(error) => {
                        let failure = HookFailure {
                            phase: HookPhase::PostSave,
                            hook: hook.name().to_string(),
                            error,
                        };
                        if !self.tolerate(failure, failures)? {
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies the strategy to one failure. `Err` aborts, `Ok(false)` stops
    /// the hooks of the current entity, `Ok(true)` keeps going.
    fn tolerate(&self, failure: HookFailure, failures: &mut Vec<HookFailure>) -> UowResult<bool> {
        match self.strategy {
            EventFailureStrategy::ThrowOnError => Err(failure.into_error()),
            EventFailureStrategy::StopOnError => {
                tracing::warn!(phase = %failure.phase, hook = %failure.hook, error = %failure.error, "hook failed, skipping remaining hooks for entity");
                failures.push(failure);
                Ok(false)
            }
            EventFailureStrategy::ContinueOnError => {
                tracing::warn!(phase = %failure.phase, hook = %failure.hook, error = %failure.error, "hook failed, continuing");
                failures.push(failure);
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording {
        order: i32,
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
        rewrite: Option<EntityState>,
    }

    #[async_trait]
    impl PreSaveChanges for Recording {
        fn order(&self) -> i32 {
            self.order
        }

        fn name(&self) -> &str {
            self.label
        }

        async fn pre_save_changes(
            &self,
            state: EntityState,
            _entity: &EntityRef,
            _cancel: &CancellationToken,
        ) -> Result<EntityState, BoxError> {
            self.log.lock().push(self.label);
            if self.fail {
                return Err(format!("{} rejected", self.label).into());
            }
            Ok(self.rewrite.unwrap_or(state))
        }
    }

    fn hook(order: i32, label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, fail: bool) -> Arc<Recording> {
        Arc::new(Recording {
            order,
            label,
            log: log.clone(),
            fail,
            rewrite: None,
        })
    }

    fn entries() -> Vec<EntityEntry> {
        vec![EntityEntry::new(EntityState::Deleted, 7u32)]
    }

    #[tokio::test]
    async fn test_hooks_run_in_ascending_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = SaveChangesPipeline::default();
        pipeline.add_pre_save(hook(20, "audit", &log, false));
        pipeline.add_pre_save(hook(-5, "tenant", &log, false));
        pipeline.add_pre_save(Arc::new(Recording {
            order: 0,
            label: "soft-delete",
            log: log.clone(),
            fail: false,
            rewrite: Some(EntityState::Modified),
        }));

        let mut entries = entries();
        let mut failures = Vec::new();
        pipeline
            .run_pre_save(&mut entries, &mut failures, &CancellationToken::new())
            .await
            .expect("pre-save");

        assert_eq!(*log.lock(), vec!["tenant", "soft-delete", "audit"]);
        assert_eq!(entries[0].state, EntityState::Modified);
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn test_throw_on_error_aborts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = SaveChangesPipeline::new(EventFailureStrategy::ThrowOnError);
        pipeline.add_pre_save(hook(1, "h1", &log, true));
        pipeline.add_pre_save(hook(2, "h2", &log, false));

        let result = pipeline
            .run_pre_save(&mut entries(), &mut Vec::new(), &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(UnitOfWorkError::LifecycleHook { phase: HookPhase::PreSave, ref hook, .. }) if hook == "h1"
        ));
        assert_eq!(*log.lock(), vec!["h1"]);
    }

    #[tokio::test]
    async fn test_stop_on_error_skips_rest_of_entity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = SaveChangesPipeline::new(EventFailureStrategy::StopOnError);
        pipeline.add_pre_save(hook(1, "h1", &log, true));
        pipeline.add_pre_save(hook(2, "h2", &log, false));

        let mut failures = Vec::new();
        let mut two = vec![EntityEntry::new(EntityState::Added, 1u32), EntityEntry::new(EntityState::Added, 2u32)];
        pipeline
            .run_pre_save(&mut two, &mut failures, &CancellationToken::new())
            .await
            .expect("tolerated");

        assert_eq!(*log.lock(), vec!["h1", "h1"]);
        assert_eq!(failures.len(), 2);
    }

    #[tokio::test]
    async fn test_continue_on_error_runs_every_hook() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = SaveChangesPipeline::new(EventFailureStrategy::ContinueOnError);
        pipeline.add_pre_save(hook(1, "h1", &log, true));
        pipeline.add_pre_save(hook(2, "h2", &log, false));

        let mut failures = Vec::new();
        pipeline
            .run_pre_save(&mut entries(), &mut failures, &CancellationToken::new())
            .await
            .expect("tolerated");

        assert_eq!(*log.lock(), vec!["h1", "h2"]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].to_string(), "pre-save hook `h1` failed: h1 rejected");
    }
}
