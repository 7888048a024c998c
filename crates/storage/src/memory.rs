//! In-process storage with the same key layout and ordering as Redis

use async_trait::async_trait;
use chrono::Utc;
use marketplace_common::{Error, Page, PageRequest, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::resource::{
    keys, ListFilter, Precondition, Resource, ResourceRepository, Singleton, SingletonRepository,
};

/// Ordered set member: creation time in millis, then id
type Member = (i64, String);

#[derive(Default)]
struct State {
    records: HashMap<String, String>,
    sorted: HashMap<String, BTreeSet<Member>>,
    /// unique key -> owning id
    unique: HashMap<String, String>,
    singletons: HashMap<String, String>,
}

impl State {
    fn add_member(&mut self, set: String, member: Member) {
        self.sorted.entry(set).or_default().insert(member);
    }

    fn remove_member(&mut self, set: &str, member: &Member) {
        if let Some(members) = self.sorted.get_mut(set) {
            members.remove(member);
            if members.is_empty() {
                self.sorted.remove(set);
            }
        }
    }
}

/// Storage backend kept entirely in memory, for tests and local runs
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("Using in-memory store");
        Self::default()
    }
}

fn member<T: Resource>(item: &T) -> Member {
    (item.created_at().timestamp_millis(), item.id().to_string())
}

fn decode<T: Resource>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(Error::from)
}

#[async_trait]
impl<T: Resource> ResourceRepository<T> for MemoryStore {
    async fn create(&self, item: T) -> Result<T> {
        let mut state = self.state.write().await;
        let key = keys::record(T::COLLECTION, item.id());

        if state.records.contains_key(&key) {
            return Err(Error::DuplicateKey {
                collection: T::COLLECTION,
                field: "id",
            });
        }

        let uniques = item.unique_fields();
        for (field, value) in &uniques {
            if state
                .unique
                .contains_key(&keys::unique(T::COLLECTION, field, value))
            {
                return Err(Error::DuplicateKey {
                    collection: T::COLLECTION,
                    field: *field,
                });
            }
        }

        state.records.insert(key, serde_json::to_string(&item)?);
        for (field, value) in &uniques {
            state.unique.insert(
                keys::unique(T::COLLECTION, field, value),
                item.id().to_string(),
            );
        }

        let entry = member(&item);
        state.add_member(keys::all(T::COLLECTION), entry.clone());
        for index in item.indexes() {
            state.add_member(keys::index(T::COLLECTION, &index), entry.clone());
        }

        debug!("Created {} {}", T::ENTITY, item.id());
        Ok(item)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<T>> {
        let state = self.state.read().await;
        state
            .records
            .get(&keys::record(T::COLLECTION, id))
            .map(|json| decode(json))
            .transpose()
    }

    async fn list(&self, filter: &T::Filter, page: &PageRequest) -> Result<Page<T>> {
        let state = self.state.read().await;
        let set = keys::listing(T::COLLECTION, filter.index().as_deref());

        let Some(members) = state.sorted.get(&set) else {
            return Ok(Page {
                items: Vec::new(),
                total_count: 0,
            });
        };

        let skip = usize::try_from(page.skip).unwrap_or(usize::MAX);
        let items = members
            .iter()
            .skip(skip)
            .take(page.limit as usize)
            .filter_map(|(_, id)| state.records.get(&keys::record(T::COLLECTION, id)))
            .map(|json| decode(json))
            .collect::<Result<Vec<T>>>()?;

        Ok(Page {
            items,
            total_count: members.len() as u64,
        })
    }

    async fn update_if(
        &self,
        id: &str,
        check: Precondition<'_, T>,
        patch: T::Patch,
    ) -> Result<T> {
        let mut state = self.state.write().await;
        let key = keys::record(T::COLLECTION, id);

        let mut item: T = match state.records.get(&key) {
            Some(json) => decode(json)?,
            None => return Err(Error::not_found(T::ENTITY, id)),
        };
        check(&item)?;

        let old_indexes = item.indexes();
        let old_uniques = item.unique_fields();
        item.apply(patch, Utc::now());
        let new_indexes = item.indexes();
        let new_uniques = item.unique_fields();

        for (field, value) in new_uniques.iter().filter(|u| !old_uniques.contains(u)) {
            let claimed = state.unique.get(&keys::unique(T::COLLECTION, field, value));
            if claimed.is_some_and(|owner| owner != id) {
                return Err(Error::DuplicateKey {
                    collection: T::COLLECTION,
                    field: *field,
                });
            }
        }

        for (field, value) in old_uniques.iter().filter(|u| !new_uniques.contains(u)) {
            state.unique.remove(&keys::unique(T::COLLECTION, field, value));
        }
        for (field, value) in &new_uniques {
            state
                .unique
                .insert(keys::unique(T::COLLECTION, field, value), id.to_string());
        }

        let entry = member(&item);
        for index in old_indexes.iter().filter(|i| !new_indexes.contains(i)) {
            state.remove_member(&keys::index(T::COLLECTION, index), &entry);
        }
        for index in &new_indexes {
            state.add_member(keys::index(T::COLLECTION, index), entry.clone());
        }

        state.records.insert(key, serde_json::to_string(&item)?);

        debug!("Updated {} {}", T::ENTITY, id);
        Ok(item)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;

        let Some(json) = state.records.remove(&keys::record(T::COLLECTION, id)) else {
            return Ok(false);
        };
        let item: T = decode(&json)?;

        let entry = member(&item);
        state.remove_member(&keys::all(T::COLLECTION), &entry);
        for index in item.indexes() {
            state.remove_member(&keys::index(T::COLLECTION, &index), &entry);
        }
        for (field, value) in item.unique_fields() {
            state.unique.remove(&keys::unique(T::COLLECTION, field, &value));
        }

        debug!("Deleted {} {}", T::ENTITY, id);
        Ok(true)
    }
}

#[async_trait]
impl<T: Singleton> SingletonRepository<T> for MemoryStore {
    async fn get(&self) -> Result<Option<T>> {
        let state = self.state.read().await;
        state
            .singletons
            .get(&keys::singleton(T::KEY))
            .map(|json| serde_json::from_str(json).map_err(Error::from))
            .transpose()
    }

    async fn put(&self, value: T) -> Result<T> {
        let json = serde_json::to_string(&value)?;
        self.state
            .write()
            .await
            .singletons
            .insert(keys::singleton(T::KEY), json);
        Ok(value)
    }
}
