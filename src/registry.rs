//! Shared, process-wide registrations: providers, save hooks, the scope
//! factory and the configuration.
//!
//! A registry is built once and shared by every [`UnitOfWorkManager`]; each
//! logical flow gets its own manager through [`UnitOfWorkRegistry::manager`].

use std::sync::Arc;

use crate::config::UnitOfWorkConfig;
use crate::lifecycle::{EventFailureStrategy, PostSaveChanges, PreSaveChanges, SaveChangesPipeline};
use crate::manager::UnitOfWorkManager;
use crate::provider::{ProviderSet, TransactionProvider};
use crate::scope::ScopeFactory;

pub struct UnitOfWorkRegistry {
    providers: ProviderSet,
    pipeline: SaveChangesPipeline,
    scope_factory: Option<Arc<dyn ScopeFactory>>,
    config: UnitOfWorkConfig,
}

impl UnitOfWorkRegistry {
    pub fn builder() -> UnitOfWorkRegistryBuilder {
        UnitOfWorkRegistryBuilder::default()
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    pub fn pipeline(&self) -> &SaveChangesPipeline {
        &self.pipeline
    }

    pub fn scope_factory(&self) -> Option<&Arc<dyn ScopeFactory>> {
        self.scope_factory.as_ref()
    }

    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    /// A fresh manager, with its own call context, for one logical flow.
    pub fn manager(self: &Arc<Self>) -> Arc<UnitOfWorkManager> {
        Arc::new(UnitOfWorkManager::new(self.clone()))
    }
}

#[derive(Default)]
pub struct UnitOfWorkRegistryBuilder {
    providers: Vec<Arc<dyn TransactionProvider>>,
    pre_save: Vec<Arc<dyn PreSaveChanges>>,
    post_save: Vec<Arc<dyn PostSaveChanges>>,
    scope_factory: Option<Arc<dyn ScopeFactory>>,
    config: UnitOfWorkConfig,
}

impl UnitOfWorkRegistryBuilder {
    pub fn config(mut self, config: UnitOfWorkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn TransactionProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn pre_save(mut self, hook: Arc<dyn PreSaveChanges>) -> Self {
        self.pre_save.push(hook);
        self
    }

    pub fn post_save(mut self, hook: Arc<dyn PostSaveChanges>) -> Self {
        self.post_save.push(hook);
        self
    }

    pub fn scope_factory(mut self, factory: Arc<dyn ScopeFactory>) -> Self {
        self.scope_factory = Some(factory);
        self
    }

    pub fn event_failure_strategy(mut self, strategy: EventFailureStrategy) -> Self {
        self.config.event_failure_strategy = strategy;
        self
    }

    pub fn build(self) -> Arc<UnitOfWorkRegistry> {
        let mut pipeline = SaveChangesPipeline::new(self.config.event_failure_strategy);
        for hook in self.pre_save {
            pipeline.add_pre_save(hook);
        }
        for hook in self.post_save {
            pipeline.add_post_save(hook);
        }

        tracing::debug!(
            providers = self.providers.len(),
            strategy = ?self.config.event_failure_strategy,
            "unit of work registry built"
        );

        Arc::new(UnitOfWorkRegistry {
            providers: ProviderSet::new(self.providers),
            pipeline,
            scope_factory: self.scope_factory,
            config: self.config,
        })
    }
}
