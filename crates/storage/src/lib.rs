//! Persistence for the cloud marketplace
//!
//! Every entity is reached through [`ResourceRepository`]; Redis and the
//! in-memory store implement the same contract and are picked at startup.

pub mod memory;
pub mod redis_store;
pub mod resource;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use resource::{
    DeploymentFilter, ListFilter, Precondition, ProviderRequestFilter, Resource,
    ResourceRepository, Singleton, SingletonRepository, UserFilter,
};

use marketplace_common::{Deployment, OperatorSettings, PricingConfiguration, ProviderRequest, User};
use std::sync::Arc;

/// Which backend to construct
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Redis { url: String },
    Memory,
}

/// One repository handle per entity, shared by every request
#[derive(Clone)]
pub struct Store {
    pub deployments: Arc<dyn ResourceRepository<Deployment>>,
    pub provider_requests: Arc<dyn ResourceRepository<ProviderRequest>>,
    pub users: Arc<dyn ResourceRepository<User>>,
    pub pricing: Arc<dyn SingletonRepository<PricingConfiguration>>,
    pub settings: Arc<dyn SingletonRepository<OperatorSettings>>,
}

impl Store {
    /// Wire every repository to the same backend
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: ResourceRepository<Deployment>
            + ResourceRepository<ProviderRequest>
            + ResourceRepository<User>
            + SingletonRepository<PricingConfiguration>
            + SingletonRepository<OperatorSettings>
            + Clone
            + 'static,
    {
        Self {
            deployments: Arc::new(backend.clone()),
            provider_requests: Arc::new(backend.clone()),
            users: Arc::new(backend.clone()),
            pricing: Arc::new(backend.clone()),
            settings: Arc::new(backend),
        }
    }

    pub fn memory() -> Self {
        Self::from_backend(MemoryStore::new())
    }

    pub async fn connect(backend: &StoreBackend) -> anyhow::Result<Self> {
        match backend {
            StoreBackend::Redis { url } => Ok(Self::from_backend(RedisStore::new(url).await?)),
            StoreBackend::Memory => Ok(Self::memory()),
        }
    }
}
