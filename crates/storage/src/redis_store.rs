//! Redis storage for marketplace resources
//!
//! Records are JSON strings under `{collection}:record:{id}`. Listings are
//! sorted sets scored by creation time, so members with equal scores fall
//! back to lexicographic id order.
//!
//! Every write touching a record and its indexes runs as one Lua script.
//! Updates and deletes compare the stored JSON with the snapshot they read
//! and start over when another writer got in between.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use marketplace_common::{Error, Page, PageRequest, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use tracing::{debug, info, warn};

use crate::resource::{
    keys, ListFilter, Precondition, Resource, ResourceRepository, Singleton, SingletonRepository,
};

/// Attempts before a contended compare-and-set gives up
const MAX_ATTEMPTS: usize = 16;

/// KEYS: record, then sorted sets. ARGV: json, id, score.
/// Returns 0 when the record already exists.
const CREATE_SCRIPT: &str = r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX') == false then
  return 0
end
for i = 2, #KEYS do
  redis.call('ZADD', KEYS[i], ARGV[3], ARGV[2])
end
return 1
";

/// KEYS: record, removed indexes, added indexes, released unique keys.
/// ARGV: expected json, new json, id, score, removed count, added count.
/// Returns -1 when the record is gone and 0 when it changed underneath.
const UPDATE_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if current == false then
  return -1
end
if current ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'XX')
local removed = tonumber(ARGV[5])
local added = tonumber(ARGV[6])
local i = 2
for _ = 1, removed do
  redis.call('ZREM', KEYS[i], ARGV[3])
  i = i + 1
end
for _ = 1, added do
  redis.call('ZADD', KEYS[i], ARGV[4], ARGV[3])
  i = i + 1
end
while i <= #KEYS do
  redis.call('DEL', KEYS[i])
  i = i + 1
end
return 1
";

/// KEYS: record, sorted sets, unique keys. ARGV: expected json, id, set count.
/// Same return codes as the update script.
const DELETE_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if current == false then
  return -1
end
if current ~= ARGV[1] then
  return 0
end
redis.call('DEL', KEYS[1])
local sets = tonumber(ARGV[3])
for i = 2, #KEYS do
  if i <= sets + 1 then
    redis.call('ZREM', KEYS[i], ARGV[2])
  else
    redis.call('DEL', KEYS[i])
  end
end
return 1
";

/// Outcome of a compare-and-set script
enum Swap {
    Done,
    Changed,
    Missing,
}

impl From<i64> for Swap {
    fn from(code: i64) -> Self {
        match code {
            1 => Swap::Done,
            -1 => Swap::Missing,
            _ => Swap::Changed,
        }
    }
}

/// Storage backend for marketplace resources
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    create_script: Script,
    update_script: Script,
    delete_script: Script,
}

impl RedisStore {
    /// Create a new storage instance
    pub async fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            create_script: Script::new(CREATE_SCRIPT),
            update_script: Script::new(UPDATE_SCRIPT),
            delete_script: Script::new(DELETE_SCRIPT),
        })
    }

    async fn fetch<T: Resource>(&self, id: &str) -> Result<Option<T>> {
        self.fetch_raw::<T>(id)
            .await?
            .map(|data| serde_json::from_str(&data).map_err(Error::from))
            .transpose()
    }

    async fn fetch_raw<T: Resource>(&self, id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(keys::record(T::COLLECTION, id))
            .await
            .map_err(backend)
    }

    async fn release(&self, unique_keys: &[String]) {
        if unique_keys.is_empty() {
            return;
        }
        let mut conn = self.conn.clone();
        if let Err(err) = conn.del::<_, ()>(unique_keys).await {
            warn!("Failed to release unique keys {:?}: {}", unique_keys, err);
        }
    }

    /// Claim unique values for `id` and return the keys newly taken.
    /// Releases what it took if any claim fails.
    async fn claim_uniques(
        &self,
        collection: &'static str,
        id: &str,
        uniques: &[(&'static str, String)],
    ) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut claimed = Vec::new();

        for (field, value) in uniques {
            let key = keys::unique(collection, field, value);
            let won: bool = conn.set_nx(&key, id).await.map_err(backend)?;

            if !won {
                let holder: Option<String> = conn.get(&key).await.map_err(backend)?;
                if holder.as_deref() != Some(id) {
                    self.release(&claimed).await;
                    return Err(Error::DuplicateKey {
                        collection,
                        field: *field,
                    });
                }
            } else {
                claimed.push(key);
            }
        }

        Ok(claimed)
    }
}

fn backend(err: RedisError) -> Error {
    Error::Persistence(err.to_string())
}

fn score<T: Resource>(item: &T) -> f64 {
    item.created_at().timestamp_millis() as f64
}

#[async_trait]
impl<T: Resource> ResourceRepository<T> for RedisStore {
    async fn create(&self, item: T) -> Result<T> {
        let mut conn = self.conn.clone();
        let id = item.id().to_string();
        let json = serde_json::to_string(&item)?;

        let exists: bool = conn
            .exists(keys::record(T::COLLECTION, &id))
            .await
            .map_err(backend)?;
        if exists {
            debug!("{} already exists: {}", T::ENTITY, id);
            return Err(Error::DuplicateKey {
                collection: T::COLLECTION,
                field: "id",
            });
        }

        let claimed = self
            .claim_uniques(T::COLLECTION, &id, &item.unique_fields())
            .await?;

        let mut script = self.create_script.prepare_invoke();
        script
            .key(keys::record(T::COLLECTION, &id))
            .key(keys::all(T::COLLECTION));
        for index in item.indexes() {
            script.key(keys::index(T::COLLECTION, &index));
        }
        script.arg(&json).arg(&id).arg(score(&item));

        let created: i64 = match script.invoke_async(&mut conn).await {
            Ok(created) => created,
            Err(err) => {
                self.release(&claimed).await;
                return Err(backend(err));
            }
        };
        if created == 0 {
            self.release(&claimed).await;
            debug!("{} already exists: {}", T::ENTITY, id);
            return Err(Error::DuplicateKey {
                collection: T::COLLECTION,
                field: "id",
            });
        }

        info!("Created {} {}", T::ENTITY, id);
        Ok(item)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<T>> {
        self.fetch(id).await
    }

    async fn list(&self, filter: &T::Filter, page: &PageRequest) -> Result<Page<T>> {
        let mut conn = self.conn.clone();
        let set = keys::listing(T::COLLECTION, filter.index().as_deref());

        let total_count: u64 = conn.zcard(&set).await.map_err(backend)?;

        let start = isize::try_from(page.skip).unwrap_or(isize::MAX);
        let stop = start.saturating_add(page.limit as isize - 1);
        let ids: Vec<String> = conn.zrange(&set, start, stop).await.map_err(backend)?;

        if ids.is_empty() {
            return Ok(Page {
                items: Vec::new(),
                total_count,
            });
        }

        let record_keys: Vec<String> = ids
            .iter()
            .map(|id| keys::record(T::COLLECTION, id))
            .collect();
        let records: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&record_keys)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        // A record deleted between ZRANGE and MGET is skipped
        let items = records
            .into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(Error::from))
            .collect::<Result<Vec<T>>>()?;

        Ok(Page { items, total_count })
    }

    async fn update_if(
        &self,
        id: &str,
        check: Precondition<'_, T>,
        patch: T::Patch,
    ) -> Result<T> {
        let mut conn = self.conn.clone();

        for _ in 0..MAX_ATTEMPTS {
            let Some(current) = self.fetch_raw::<T>(id).await? else {
                return Err(Error::not_found(T::ENTITY, id));
            };
            let mut item: T = serde_json::from_str(&current)?;
            check(&item)?;

            let old_indexes = item.indexes();
            let old_uniques = item.unique_fields();
            item.apply(patch.clone(), Utc::now());
            let new_indexes = item.indexes();
            let new_uniques = item.unique_fields();

            let added: Vec<_> = new_uniques
                .iter()
                .filter(|u| !old_uniques.contains(u))
                .cloned()
                .collect();
            let claimed = self.claim_uniques(T::COLLECTION, id, &added).await?;

            let removed: Vec<_> = old_indexes
                .iter()
                .filter(|i| !new_indexes.contains(i))
                .collect();

            let mut script = self.update_script.prepare_invoke();
            script.key(keys::record(T::COLLECTION, id));
            for index in &removed {
                script.key(keys::index(T::COLLECTION, index));
            }
            for index in &new_indexes {
                script.key(keys::index(T::COLLECTION, index));
            }
            for (field, value) in old_uniques.iter().filter(|u| !new_uniques.contains(u)) {
                script.key(keys::unique(T::COLLECTION, field, value));
            }
            script
                .arg(&current)
                .arg(serde_json::to_string(&item)?)
                .arg(id)
                .arg(score(&item))
                .arg(removed.len())
                .arg(new_indexes.len());

            let outcome: i64 = match script.invoke_async(&mut conn).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.release(&claimed).await;
                    return Err(backend(err));
                }
            };

            match Swap::from(outcome) {
                Swap::Done => {
                    debug!("Updated {} {}", T::ENTITY, id);
                    return Ok(item);
                }
                Swap::Missing => {
                    self.release(&claimed).await;
                    return Err(Error::not_found(T::ENTITY, id));
                }
                Swap::Changed => {
                    self.release(&claimed).await;
                    debug!("{} {} changed during update, retrying", T::ENTITY, id);
                }
            }
        }

        Err(Error::Persistence(format!(
            "{} {} kept changing during update",
            T::ENTITY,
            id
        )))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();

        for _ in 0..MAX_ATTEMPTS {
            let Some(current) = self.fetch_raw::<T>(id).await? else {
                return Ok(false);
            };
            let item: T = serde_json::from_str(&current)?;
            let indexes = item.indexes();

            let mut script = self.delete_script.prepare_invoke();
            script
                .key(keys::record(T::COLLECTION, id))
                .key(keys::all(T::COLLECTION));
            for index in &indexes {
                script.key(keys::index(T::COLLECTION, index));
            }
            for (field, value) in item.unique_fields() {
                script.key(keys::unique(T::COLLECTION, field, &value));
            }
            script.arg(&current).arg(id).arg(indexes.len() + 1);

            let outcome: i64 = script.invoke_async(&mut conn).await.map_err(backend)?;
            match Swap::from(outcome) {
                Swap::Done => {
                    info!("Deleted {} {}", T::ENTITY, id);
                    return Ok(true);
                }
                // Lost a race with another delete
                Swap::Missing => return Ok(false),
                Swap::Changed => {
                    debug!("{} {} changed during delete, retrying", T::ENTITY, id);
                }
            }
        }

        Err(Error::Persistence(format!(
            "{} {} kept changing during delete",
            T::ENTITY,
            id
        )))
    }
}

#[async_trait]
impl<T: Singleton> SingletonRepository<T> for RedisStore {
    async fn get(&self) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn
            .get(keys::singleton(T::KEY))
            .await
            .map_err(backend)?;

        json.map(|data| serde_json::from_str(&data).map_err(Error::from))
            .transpose()
    }

    async fn put(&self, value: T) -> Result<T> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&value)?;
        let _: () = conn
            .set(keys::singleton(T::KEY), json)
            .await
            .map_err(backend)?;
        Ok(value)
    }
}
