use crate::error::{AppError, ErrorKind};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Document store semantics - partitioned items addressed by sort key.
///
/// Every item carries a version that increases on each write. Writers that
/// must not lose concurrent updates read the version and write back with
/// [`DocumentStore::put_if_version`].

pub const DOC_PREFIX: &str = "studdy:doc";
pub const VERSION_PREFIX: &str = "studdy:ver";
pub const INDEX_PREFIX: &str = "studdy:idx";

/// Partition and sort-key layout shared by every backend
pub mod keys {
    use chrono::{DateTime, SecondsFormat, Utc};
    use uuid::Uuid;

    pub const USER_PREFIX: &str = "USER#";
    pub const PROFILE_KEY: &str = "PROFILE";
    pub const REVIEW_PREFIX: &str = "REVIEW#";
    pub const XP_PREFIX: &str = "XP#";

    pub fn user_partition(user_id: &str) -> String {
        format!("{}{}", USER_PREFIX, user_id)
    }

    pub fn review_key(concept_id: &str) -> String {
        format!("{}{}", REVIEW_PREFIX, concept_id)
    }

    /// Millisecond UTC timestamps sort lexicographically in time order
    pub fn xp_history_key(at: DateTime<Utc>, id: Uuid) -> String {
        format!(
            "{}{}#{}",
            XP_PREFIX,
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
            id
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store throttled: {0}")]
    Throttled(String),

    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("stored record is unreadable: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        let throttled = err.is_timeout()
            || matches!(
                err.kind(),
                redis::ErrorKind::TryAgain | redis::ErrorKind::BusyLoadingError
            );
        if throttled {
            StoreError::Throttled(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::Throttled(_) => ErrorKind::DatabaseThrottled,
            _ => ErrorKind::DatabaseError,
        };
        AppError::new(kind, err.to_string()).with_source(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub version: u64,
    pub body: String,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, partition: &str, sort_key: &str) -> Result<Option<Item>, StoreError>;

    /// Unconditional write; returns the new version
    async fn put(&self, partition: &str, sort_key: &str, body: String) -> Result<u64, StoreError>;

    /// Write only if the stored version equals `expected` (`None` means the
    /// item must not exist yet). Returns whether the write happened.
    async fn put_if_version(
        &self,
        partition: &str,
        sort_key: &str,
        body: String,
        expected: Option<u64>,
    ) -> Result<bool, StoreError>;

    /// Items whose sort key starts with `prefix`, ordered by sort key
    async fn query_prefix(
        &self,
        partition: &str,
        prefix: &str,
        limit: Option<usize>,
        descending: bool,
    ) -> Result<Vec<(String, Item)>, StoreError>;
}

/// Read and decode one item along with its version
pub async fn load<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    partition: &str,
    sort_key: &str,
) -> Result<Option<(u64, T)>, StoreError> {
    match store.get(partition, sort_key).await? {
        Some(item) => Ok(Some((item.version, serde_json::from_str(&item.body)?))),
        None => Ok(None),
    }
}

pub async fn save<T: Serialize + Sync>(
    store: &dyn DocumentStore,
    partition: &str,
    sort_key: &str,
    value: &T,
) -> Result<u64, StoreError> {
    store
        .put(partition, sort_key, serde_json::to_string(value)?)
        .await
}

pub async fn load_prefix<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    partition: &str,
    prefix: &str,
    limit: Option<usize>,
    descending: bool,
) -> Result<Vec<T>, StoreError> {
    store
        .query_prefix(partition, prefix, limit, descending)
        .await?
        .into_iter()
        .map(|(_, item)| serde_json::from_str(&item.body).map_err(StoreError::from))
        .collect()
}

fn order_and_limit(
    mut items: Vec<(String, Item)>,
    limit: Option<usize>,
    descending: bool,
) -> Vec<(String, Item)> {
    items.sort_by(|a, b| a.0.cmp(&b.0));
    if descending {
        items.reverse();
    }
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

// KEYS[1] item hash, KEYS[2] version hash, KEYS[3] sort-key index
// ARGV[1] sort key, ARGV[2] body, ARGV[3] expected version ("" = absent)
const CAS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[2], ARGV[1])
if ARGV[3] == '' then
  if current then return -1 end
elseif current ~= ARGV[3] then
  return -1
end
local version = redis.call('HINCRBY', KEYS[2], ARGV[1], 1)
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZADD', KEYS[3], 0, ARGV[1])
return version
"#;

/// Redis backend: per partition, a hash of bodies, a hash of versions and a
/// zero-score sorted set of sort keys that serves prefix queries by lex range
pub struct RedisStore {
    conn: ConnectionManager,
    cas: redis::Script,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            cas: redis::Script::new(CAS_SCRIPT),
        }
    }

    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    pub fn doc_key(partition: &str) -> String {
        format!("{}:{}", DOC_PREFIX, partition)
    }

    pub fn version_key(partition: &str) -> String {
        format!("{}:{}", VERSION_PREFIX, partition)
    }

    pub fn index_key(partition: &str) -> String {
        format!("{}:{}", INDEX_PREFIX, partition)
    }
}

/// Inclusive `ZRANGEBYLEX` bounds covering every key that starts with
/// `prefix`. Sort keys are UTF-8 and never contain 0xFF.
fn lex_range(prefix: &str) -> (Vec<u8>, Vec<u8>) {
    let mut min = Vec::with_capacity(prefix.len() + 1);
    min.push(b'[');
    min.extend_from_slice(prefix.as_bytes());
    let mut max = min.clone();
    max.push(0xFF);
    (min, max)
}

#[async_trait]
impl DocumentStore for RedisStore {
    async fn get(&self, partition: &str, sort_key: &str) -> Result<Option<Item>, StoreError> {
        let mut conn = self.conn.clone();
        let (body, version): (Option<String>, Option<u64>) = redis::pipe()
            .atomic()
            .hget(Self::doc_key(partition), sort_key)
            .hget(Self::version_key(partition), sort_key)
            .query_async(&mut conn)
            .await?;

        Ok(body.map(|body| Item {
            version: version.unwrap_or(0),
            body,
        }))
    }

    async fn put(&self, partition: &str, sort_key: &str, body: String) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let (version,): (u64,) = redis::pipe()
            .atomic()
            .hset(Self::doc_key(partition), sort_key, body)
            .ignore()
            .hincr(Self::version_key(partition), sort_key, 1)
            .zadd(Self::index_key(partition), sort_key, 0)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(version)
    }

    async fn put_if_version(
        &self,
        partition: &str,
        sort_key: &str,
        body: String,
        expected: Option<u64>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let expected = expected.map(|v| v.to_string()).unwrap_or_default();
        let outcome: i64 = self
            .cas
            .key(Self::doc_key(partition))
            .key(Self::version_key(partition))
            .key(Self::index_key(partition))
            .arg(sort_key)
            .arg(body)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(outcome >= 0)
    }

    async fn query_prefix(
        &self,
        partition: &str,
        prefix: &str,
        limit: Option<usize>,
        descending: bool,
    ) -> Result<Vec<(String, Item)>, StoreError> {
        let mut conn = self.conn.clone();
        let (min, max) = lex_range(prefix);
        let count = limit.map_or(-1, |limit| limit as isize);
        let sort_keys: Vec<String> = if descending {
            conn.zrevrangebylex_limit(Self::index_key(partition), max, min, 0, count)
                .await?
        } else {
            conn.zrangebylex_limit(Self::index_key(partition), min, max, 0, count)
                .await?
        };
        if sort_keys.is_empty() {
            return Ok(Vec::new());
        }

        let (bodies, versions): (Vec<Option<String>>, Vec<Option<u64>>) = redis::pipe()
            .atomic()
            .cmd("HMGET")
            .arg(Self::doc_key(partition))
            .arg(&sort_keys)
            .cmd("HMGET")
            .arg(Self::version_key(partition))
            .arg(&sort_keys)
            .query_async(&mut conn)
            .await?;

        Ok(sort_keys
            .into_iter()
            .zip(bodies.into_iter().zip(versions))
            .filter_map(|(key, (body, version))| {
                body.map(|body| {
                    let item = Item {
                        version: version.unwrap_or(0),
                        body,
                    };
                    (key, item)
                })
            })
            .collect())
    }
}

/// In-process backend for local runs and tests
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<BTreeMap<(String, String), Item>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, partition: &str, sort_key: &str) -> Result<Option<Item>, StoreError> {
        let items = self.items.read().await;
        Ok(items
            .get(&(partition.to_string(), sort_key.to_string()))
            .cloned())
    }

    async fn put(&self, partition: &str, sort_key: &str, body: String) -> Result<u64, StoreError> {
        let mut items = self.items.write().await;
        let entry = items
            .entry((partition.to_string(), sort_key.to_string()))
            .or_insert(Item {
                version: 0,
                body: String::new(),
            });
        entry.version += 1;
        entry.body = body;
        Ok(entry.version)
    }

    async fn put_if_version(
        &self,
        partition: &str,
        sort_key: &str,
        body: String,
        expected: Option<u64>,
    ) -> Result<bool, StoreError> {
        let mut items = self.items.write().await;
        let key = (partition.to_string(), sort_key.to_string());
        let current = items.get(&key).map(|item| item.version);
        if current != expected {
            return Ok(false);
        }
        items.insert(
            key,
            Item {
                version: current.unwrap_or(0) + 1,
                body,
            },
        );
        Ok(true)
    }

    async fn query_prefix(
        &self,
        partition: &str,
        prefix: &str,
        limit: Option<usize>,
        descending: bool,
    ) -> Result<Vec<(String, Item)>, StoreError> {
        let items = self.items.read().await;
        let matching = items
            .iter()
            .filter(|((p, key), _)| p == partition && key.starts_with(prefix))
            .map(|((_, key), item)| (key.clone(), item.clone()))
            .collect();
        Ok(order_and_limit(matching, limit, descending))
    }
}
