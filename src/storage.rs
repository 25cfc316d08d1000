//! Persistence for the web layer. The classification core never touches these.

use crate::{
    error::AppError,
    types::{FeedbackTally, Vote},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::{collections::HashMap, path::PathBuf};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info};

#[async_trait]
pub trait BlocklistStore: Send + Sync {
    async fn list(&self) -> Result<Vec<String>, AppError>;

    /// Returns `false` when the URL was already blocked.
    async fn add(&self, url: &str) -> Result<bool, AppError>;
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// The reason is kept only from the first submission for a URL.
    async fn record(&self, url: &str, vote: Vote, reason: &str) -> Result<(), AppError>;

    async fn get(&self, url: &str) -> Result<Option<FeedbackTally>, AppError>;
}

/// Plain-text blocklist, one URL per line.
pub struct FileBlocklist {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileBlocklist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_urls(&self) -> Result<Vec<String>, AppError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BlocklistStore for FileBlocklist {
    async fn list(&self) -> Result<Vec<String>, AppError> {
        self.read_urls().await
    }

    async fn add(&self, url: &str) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().await;

        if self.read_urls().await?.iter().any(|existing| existing == url) {
            debug!("{} is already blocked", url);
            return Ok(false);
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", url).as_bytes()).await?;
        file.flush().await?;

        info!("Blocked {}", url);
        Ok(true)
    }
}

#[derive(Default)]
pub struct MemoryFeedbackStore {
    entries: Mutex<HashMap<String, FeedbackTally>>,
}

impl MemoryFeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedbackStore for MemoryFeedbackStore {
    async fn record(&self, url: &str, vote: Vote, reason: &str) -> Result<(), AppError> {
        let mut entries = self.entries.lock();
        let tally = entries.entry(url.to_string()).or_insert_with(|| FeedbackTally {
            reason: Some(reason.to_string()),
            ..Default::default()
        });
        match vote {
            Vote::Safe => tally.safe_votes += 1,
            Vote::Suspicious => tally.suspicious_votes += 1,
        }
        Ok(())
    }

    async fn get(&self, url: &str) -> Result<Option<FeedbackTally>, AppError> {
        Ok(self.entries.lock().get(url).cloned())
    }
}

/// One Redis hash per URL holding the two vote counters and the first reason.
#[derive(Clone)]
pub struct RedisFeedbackStore {
    manager: ConnectionManager,
    key_prefix: String,
}

const SAFE_FIELD: &str = "safe_votes";
const SUSPICIOUS_FIELD: &str = "suspicious_votes";
const REASON_FIELD: &str = "reason";

impl RedisFeedbackStore {
    pub async fn connect(redis_url: &str, key_prefix: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        info!("Redis feedback store initialized");
        Ok(Self {
            manager,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn key(&self, url: &str) -> String {
        format!("{}:{}", self.key_prefix, url)
    }
}

#[async_trait]
impl FeedbackStore for RedisFeedbackStore {
    async fn record(&self, url: &str, vote: Vote, reason: &str) -> Result<(), AppError> {
        let key = self.key(url);
        let field = match vote {
            Vote::Safe => SAFE_FIELD,
            Vote::Suspicious => SUSPICIOUS_FIELD,
        };

        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_nx(&key, REASON_FIELD, reason)
            .ignore()
            .hset_nx(&key, SAFE_FIELD, 0)
            .ignore()
            .hset_nx(&key, SUSPICIOUS_FIELD, 0)
            .ignore()
            .hincr(&key, field, 1)
            .ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;

        debug!("Recorded {} for {}", field, url);
        Ok(())
    }

    async fn get(&self, url: &str) -> Result<Option<FeedbackTally>, AppError> {
        let mut conn = self.manager.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.key(url)).await?;
        tally_from_hash(url, &fields)
    }
}

/// Decodes a feedback hash. An empty hash means the URL has no feedback; a
/// missing counter reads as zero.
fn tally_from_hash(url: &str, fields: &HashMap<String, String>) -> Result<Option<FeedbackTally>, AppError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let count = |name: &str| -> Result<u64, AppError> {
        fields
            .get(name)
            .map(|v| v.parse::<u64>())
            .transpose()
            .map(Option::unwrap_or_default)
            .map_err(|e| AppError::Storage(format!("corrupt counter {} for {}: {}", name, url, e)))
    };

    Ok(Some(FeedbackTally {
        safe_votes: count(SAFE_FIELD)?,
        suspicious_votes: count(SUSPICIOUS_FIELD)?,
        reason: fields.get(REASON_FIELD).cloned(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_missing_blocklist_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlocklist::new(dir.path().join("blocked.txt"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blocklist_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlocklist::new(dir.path().join("blocked.txt"));

        assert!(assert_ok!(store.add("http://192.168.1.1/login").await));
        assert!(assert_ok!(store.add("bit.ly/abc").await));
        assert!(!assert_ok!(store.add("http://192.168.1.1/login").await));

        assert_eq!(
            store.list().await.unwrap(),
            vec!["http://192.168.1.1/login".to_string(), "bit.ly/abc".to_string()]
        );
    }

    #[tokio::test]
    async fn test_blocklist_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocked.txt");
        std::fs::write(&path, "a.example\n\n  \nb.example\n").unwrap();

        let store = FileBlocklist::new(&path);
        assert_eq!(store.list().await.unwrap(), vec!["a.example", "b.example"]);
    }

    #[tokio::test]
    async fn test_memory_feedback_counts_votes() {
        let store = MemoryFeedbackStore::new();
        assert_eq!(store.get("example.com").await.unwrap(), None);

        store.record("example.com", Vote::Safe, "looks fine").await.unwrap();
        store.record("example.com", Vote::Suspicious, "odd login form").await.unwrap();
        store.record("example.com", Vote::Safe, "").await.unwrap();

        let tally = store.get("example.com").await.unwrap().unwrap();
        assert_eq!(tally.safe_votes, 2);
        assert_eq!(tally.suspicious_votes, 1);
        assert_eq!(tally.reason.as_deref(), Some("looks fine"));
    }

    fn hash(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_redis_hash_decodes_counters_and_reason() {
        let fields = hash(&[("safe_votes", "3"), ("suspicious_votes", "1"), ("reason", "my bank")]);
        let tally = assert_ok!(tally_from_hash("example.com", &fields)).unwrap();
        assert_eq!(
            tally,
            FeedbackTally {
                safe_votes: 3,
                suspicious_votes: 1,
                reason: Some("my bank".to_string()),
            }
        );
    }

    #[test]
    fn test_redis_hash_missing_entries() {
        assert_eq!(assert_ok!(tally_from_hash("example.com", &HashMap::new())), None);

        let tally = assert_ok!(tally_from_hash("example.com", &hash(&[("suspicious_votes", "2")]))).unwrap();
        assert_eq!(tally.safe_votes, 0);
        assert_eq!(tally.suspicious_votes, 2);
        assert_eq!(tally.reason, None);
    }

    #[test]
    fn test_redis_hash_corrupt_counter_is_storage_error() {
        let fields = hash(&[("safe_votes", "many"), ("suspicious_votes", "0")]);
        match tally_from_hash("example.com", &fields) {
            Err(AppError::Storage(message)) => {
                assert!(message.contains("safe_votes"));
                assert!(message.contains("example.com"));
            }
            other => panic!("expected storage error, got {:?}", other),
        }
    }
}
