//! Repository contracts and the per-entity storage descriptions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketplace_common::{
    Deployment, DeploymentPatch, OperatorSettings, Page, PageRequest, PricingConfiguration,
    ProviderRequest, ProviderRequestPatch, ProviderRequestStatus, Result, User, UserPatch,
};
use serde::{de::DeserializeOwned, Serialize};

/// How an entity is laid out in a backing store.
///
/// Every store keeps one record per id, an ordered set of all ids and one
/// ordered set per secondary index entry, all ordered by creation time.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Patch: Clone + Send + Sync + 'static;
    type Filter: ListFilter;

    /// Collection (table) name
    const COLLECTION: &'static str;

    /// Human-readable entity name used in errors
    const ENTITY: &'static str;

    fn id(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;

    /// Secondary index entries this record belongs to, e.g. `owner:auth0|abc`
    fn indexes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Fields other than the id that must be unique across the collection
    fn unique_fields(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// Merge the provided fields and refresh `updated_at`
    fn apply(&mut self, patch: Self::Patch, now: DateTime<Utc>);
}

/// Restricts a listing to one secondary index, or to the whole collection
pub trait ListFilter: Send + Sync {
    fn index(&self) -> Option<String>;
}

/// Guard evaluated against the current record inside an update
pub type Precondition<'a, T> = &'a (dyn Fn(&T) -> Result<()> + Send + Sync);

/// CRUD plus offset-paginated listing for one entity.
///
/// `list` counts with the same filter it pages with. Count and page are two
/// reads, so concurrent writes may make them disagree.
#[async_trait]
pub trait ResourceRepository<T: Resource>: Send + Sync {
    /// Persist a new record; duplicate ids or unique fields fail with `DuplicateKey`
    async fn create(&self, item: T) -> Result<T>;

    /// `None` when absent
    async fn get_by_id(&self, id: &str) -> Result<Option<T>>;

    async fn list(&self, filter: &T::Filter, page: &PageRequest) -> Result<Page<T>>;

    /// Merge `patch` into an existing record; `NotFound` when absent
    async fn update(&self, id: &str, patch: T::Patch) -> Result<T> {
        self.update_if(id, &|_| Ok(()), patch).await
    }

    /// Like `update`, but `check` sees the stored record first and its error
    /// aborts the write. No other write to the record lands between the two.
    async fn update_if(
        &self,
        id: &str,
        check: Precondition<'_, T>,
        patch: T::Patch,
    ) -> Result<T>;

    /// `true` when a record was removed, `false` when none matched
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Platform-wide configuration documents stored under a fixed key
pub trait Singleton: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KEY: &'static str;
}

#[async_trait]
pub trait SingletonRepository<T: Singleton>: Send + Sync {
    async fn get(&self) -> Result<Option<T>>;

    async fn put(&self, value: T) -> Result<T>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentFilter {
    All,
    Owner(String),
}

impl ListFilter for DeploymentFilter {
    fn index(&self) -> Option<String> {
        match self {
            DeploymentFilter::All => None,
            DeploymentFilter::Owner(subject) => Some(format!("owner:{subject}")),
        }
    }
}

impl Resource for Deployment {
    type Patch = DeploymentPatch;
    type Filter = DeploymentFilter;

    const COLLECTION: &'static str = "deployments";
    const ENTITY: &'static str = "Deployment";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn indexes(&self) -> Vec<String> {
        vec![
            format!("owner:{}", self.owner_subject_id),
            format!("status:{}", self.status),
        ]
    }

    fn apply(&mut self, patch: DeploymentPatch, now: DateTime<Utc>) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            // An empty description clears it, as on create
            self.description = Some(description).filter(|d| !d.is_empty());
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(resources) = patch.resources {
            self.resources = resources;
        }
        if let Some(billing) = patch.billing {
            self.billing = billing;
        }
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderRequestFilter {
    All,
    Status(ProviderRequestStatus),
    Requester(String),
}

impl ListFilter for ProviderRequestFilter {
    fn index(&self) -> Option<String> {
        match self {
            ProviderRequestFilter::All => None,
            ProviderRequestFilter::Status(status) => Some(format!("status:{status}")),
            ProviderRequestFilter::Requester(subject) => Some(format!("requester:{subject}")),
        }
    }
}

impl Resource for ProviderRequest {
    type Patch = ProviderRequestPatch;
    type Filter = ProviderRequestFilter;

    const COLLECTION: &'static str = "provider_requests";
    const ENTITY: &'static str = "Provider request";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn indexes(&self) -> Vec<String> {
        vec![
            format!("status:{}", self.status),
            format!("requester:{}", self.requesting_subject_id),
        ]
    }

    fn apply(&mut self, patch: ProviderRequestPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserFilter {
    All,
}

impl ListFilter for UserFilter {
    fn index(&self) -> Option<String> {
        None
    }
}

impl Resource for User {
    type Patch = UserPatch;
    type Filter = UserFilter;

    const COLLECTION: &'static str = "users";
    const ENTITY: &'static str = "User";

    fn id(&self) -> &str {
        &self.subject_id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn unique_fields(&self) -> Vec<(&'static str, String)> {
        // Providers may omit the email; absent addresses claim nothing
        if self.email.is_empty() {
            return Vec::new();
        }
        vec![("email", self.email.to_lowercase())]
    }

    fn apply(&mut self, patch: UserPatch, now: DateTime<Utc>) {
        if let Some(display_name) = patch.display_name {
            self.display_name = display_name;
        }
        if let Some(picture_url) = patch.picture_url {
            self.picture_url = Some(picture_url);
        }
        if let Some(enabled) = patch.notifications_enabled {
            self.notifications_enabled = enabled;
        }
        self.updated_at = now;
    }
}

impl Singleton for PricingConfiguration {
    const KEY: &'static str = "pricing";
}

impl Singleton for OperatorSettings {
    const KEY: &'static str = "operator_settings";
}

/// Storage key layout shared by every backend
pub(crate) mod keys {
    pub fn record(collection: &str, id: &str) -> String {
        format!("{collection}:record:{id}")
    }

    pub fn all(collection: &str) -> String {
        format!("{collection}:all")
    }

    pub fn index(collection: &str, index: &str) -> String {
        format!("{collection}:idx:{index}")
    }

    pub fn listing(collection: &str, index: Option<&str>) -> String {
        match index {
            Some(index) => self::index(collection, index),
            None => all(collection),
        }
    }

    pub fn unique(collection: &str, field: &str, value: &str) -> String {
        format!("{collection}:unique:{field}:{value}")
    }

    pub fn singleton(key: &str) -> String {
        format!("singleton:{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketplace_common::{BillingInterval, BillingTerms, DeploymentStatus, ResourceSpec};

    fn deployment() -> Deployment {
        Deployment::new(
            "dep-1".to_string(),
            "auth0|alice".to_string(),
            "web-1".to_string(),
            None,
            ResourceSpec {
                cpu: 2,
                memory: 4,
                storage: 100,
            },
            BillingTerms {
                plan_id: "basic".to_string(),
                amount: 10.0,
                currency: "USD".to_string(),
                interval: BillingInterval::Monthly,
            },
        )
    }

    #[test]
    fn test_apply_merges_only_provided_fields() {
        let mut dep = deployment();
        let before = dep.clone();
        let later = before.updated_at + chrono::Duration::seconds(5);

        dep.apply(
            DeploymentPatch {
                name: Some("web-2".to_string()),
                ..Default::default()
            },
            later,
        );

        assert_eq!(dep.name, "web-2");
        assert_eq!(dep.resources, before.resources);
        assert_eq!(dep.billing, before.billing);
        assert_eq!(dep.status, DeploymentStatus::Pending);
        assert_eq!(dep.owner_subject_id, before.owner_subject_id);
        assert_eq!(dep.created_at, before.created_at);
        assert_eq!(dep.updated_at, later);
    }

    #[test]
    fn test_empty_description_clears() {
        let mut dep = deployment();
        dep.apply(
            DeploymentPatch {
                description: Some("edge node".to_string()),
                ..Default::default()
            },
            Utc::now(),
        );
        assert_eq!(dep.description.as_deref(), Some("edge node"));

        dep.apply(
            DeploymentPatch {
                description: Some(String::new()),
                ..Default::default()
            },
            Utc::now(),
        );
        assert_eq!(dep.description, None);
    }

    #[test]
    fn test_status_change_moves_index() {
        let mut dep = deployment();
        assert!(dep.indexes().contains(&"status:pending".to_string()));

        dep.apply(DeploymentPatch::status(DeploymentStatus::Active), Utc::now());
        assert!(dep.indexes().contains(&"status:active".to_string()));
        assert!(dep.indexes().contains(&"owner:auth0|alice".to_string()));
    }

    #[test]
    fn test_filter_indexes() {
        assert_eq!(DeploymentFilter::All.index(), None);
        assert_eq!(
            DeploymentFilter::Owner("auth0|bob".to_string()).index(),
            Some("owner:auth0|bob".to_string())
        );
        assert_eq!(
            ProviderRequestFilter::Status(ProviderRequestStatus::Pending).index(),
            Some("status:pending".to_string())
        );
        assert_eq!(keys::listing("deployments", None), "deployments:all");
        assert_eq!(
            keys::listing("deployments", Some("owner:x")),
            "deployments:idx:owner:x"
        );
    }
}
