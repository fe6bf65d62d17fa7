use std::sync::Arc;

use async_trait::async_trait;

use uow_coordinator::{BoxError, CancellationToken, EntityRef, EntityState, PostSaveChanges, PreSaveChanges};

use super::entities::Order;
use super::resources::Journal;

/// Turns deletes of orders into updates.
pub struct SoftDeleteHook;

#[async_trait]
impl PreSaveChanges for SoftDeleteHook {
    fn order(&self) -> i32 {
        -100
    }

    async fn pre_save_changes(
        &self,
        state: EntityState,
        entity: &EntityRef,
        _cancel: &CancellationToken,
    ) -> Result<EntityState, BoxError> {
        if state == EntityState::Deleted && entity.downcast_ref::<Order>().is_some() {
            return Ok(EntityState::Modified);
        }
        Ok(state)
    }
}

pub struct RecordingPreHook {
    pub label: &'static str,
    pub order: i32,
    pub journal: Arc<Journal>,
}

#[async_trait]
impl PreSaveChanges for RecordingPreHook {
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
        self.journal.record(format!("pre:{}:{:?}", self.label, state));
        Ok(state)
    }
}

pub struct RecordingPostHook {
    pub label: &'static str,
    pub order: i32,
    pub journal: Arc<Journal>,
}

#[async_trait]
impl PostSaveChanges for RecordingPostHook {
    fn order(&self) -> i32 {
        self.order
    }

    fn name(&self) -> &str {
        self.label
    }

    async fn post_save_changes(
        &self,
        state: EntityState,
        _entity: &EntityRef,
        _cancel: &CancellationToken,
    ) -> Result<EntityState, BoxError> {
        self.journal.record(format!("post:{}:{:?}", self.label, state));
        Ok(state)
    }
}

pub struct FailingHook {
    pub label: &'static str,
    pub order: i32,
    pub journal: Arc<Journal>,
}

#[async_trait]
impl PreSaveChanges for FailingHook {
    fn order(&self) -> i32 {
        self.order
    }

    fn name(&self) -> &str {
        self.label
    }

    async fn pre_save_changes(
        &self,
        _state: EntityState,
        _entity: &EntityRef,
        _cancel: &CancellationToken,
    ) -> Result<EntityState, BoxError> {
        self.journal.record(format!("pre:{}:failed", self.label));
        Err(format!("{} rejected the entity", self.label).into())
    }
}
