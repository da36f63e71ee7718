use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, ScraperError};
use crate::types::{BatchResult, CacheEntry};

/// Holds the single latest batch result.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Replaces whatever was cached with `result`, stamped now. Readers see
    /// either the previous entry or the new one, never a mix.
    async fn put(&self, result: &BatchResult) -> Result<CacheEntry>;

    /// The cached entry, or `None` when no batch has been stored yet.
    async fn get_latest(&self) -> Result<Option<CacheEntry>>;
}

/// Serialized form of a cache slot.
#[derive(Debug, Clone)]
struct StoredBlob {
    data: String,
    timestamp: DateTime<Utc>,
}

impl StoredBlob {
    fn encode(result: &BatchResult) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_string(result)?,
            timestamp: Utc::now(),
        })
    }

    fn decode(&self) -> Result<CacheEntry> {
        Ok(CacheEntry {
            data: serde_json::from_str(&self.data)?,
            timestamp: self.timestamp,
        })
    }
}

/// In-memory store for development and tests. Lost on restart.
#[derive(Default)]
pub struct InMemoryCacheStore {
    slot: Mutex<Option<StoredBlob>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> ScraperError {
    ScraperError::LockPoisoned
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn put(&self, result: &BatchResult) -> Result<CacheEntry> {
        let blob = StoredBlob::encode(result)?;
        let entry = blob.decode()?;

        let mut slot = self.slot.lock().map_err(poisoned)?;
        *slot = Some(blob);

        debug!("Cached {} records in memory", entry.data.len());
        Ok(entry)
    }

    async fn get_latest(&self) -> Result<Option<CacheEntry>> {
        let blob = self.slot.lock().map_err(poisoned)?.clone();
        blob.map(|b| b.decode()).transpose()
    }
}

/// SQLite-backed store. The table only ever holds the latest row.
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        info!("Opened scrape cache at {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS scrape_results (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                data      TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn put(&self, result: &BatchResult) -> Result<CacheEntry> {
        let blob = StoredBlob::encode(result)?;
        let entry = blob.decode()?;

        let mut conn = self.conn.lock().map_err(poisoned)?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM scrape_results", [])?;
        tx.execute(
            "INSERT INTO scrape_results (data, timestamp) VALUES (?1, ?2)",
            params![blob.data, blob.timestamp.to_rfc3339()],
        )?;
        tx.commit()?;

        debug!("Cached {} records in sqlite", entry.data.len());
        Ok(entry)
    }

    async fn get_latest(&self) -> Result<Option<CacheEntry>> {
        let row: Option<(String, String)> = {
            let conn = self.conn.lock().map_err(poisoned)?;
            conn.query_row(
                "SELECT data, timestamp FROM scrape_results ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        let Some((data, timestamp)) = row else {
            return Ok(None);
        };
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| ScraperError::CorruptCache(format!("bad timestamp '{timestamp}': {e}")))?
            .with_timezone(&Utc);
        StoredBlob { data, timestamp }.decode().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ShowFields, ShowRecord};
    use tempfile::tempdir;

    fn batch(titles: &[&str]) -> BatchResult {
        titles
            .iter()
            .map(|t| {
                ShowRecord::assemble(
                    ShowFields { title: t.to_string(), date: "Jun 12".into(), ..Default::default() },
                    "Venue",
                    "https://v.test",
                )
                .unwrap()
            })
            .collect()
    }

    async fn replace_semantics(store: &dyn CacheStore) {
        assert!(store.get_latest().await.unwrap().is_none());

        store.put(&batch(&["one", "two"])).await.unwrap();
        let second = store.put(&batch(&["three"])).await.unwrap();

        let latest = store.get_latest().await.unwrap().unwrap();
        assert_eq!(latest, second);
        assert_eq!(latest.data.len(), 1);
        assert_eq!(latest.data[0].title, "three");
    }

    #[tokio::test]
    async fn in_memory_put_replaces_previous_entry() {
        replace_semantics(&InMemoryCacheStore::new()).await;
    }

    #[tokio::test]
    async fn in_memory_store_is_shared_by_handle() {
        let store = std::sync::Arc::new(InMemoryCacheStore::new());
        let writer = std::sync::Arc::clone(&store);
        tokio::spawn(async move { writer.put(&batch(&["from task"])).await.unwrap() })
            .await
            .unwrap();

        let latest = store.get_latest().await.unwrap().unwrap();
        assert_eq!(latest.data[0].title, "from task");
    }

    #[tokio::test]
    async fn sqlite_put_replaces_previous_entry() {
        let dir = tempdir().unwrap();
        let store = SqliteCacheStore::open(dir.path().join("cache.db")).unwrap();
        replace_semantics(&store).await;

        let conn = store.conn.lock().unwrap();
        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM scrape_results", [], |r| r.get(0)).unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn sqlite_entry_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        let stored = SqliteCacheStore::open(&path).unwrap().put(&batch(&["kept"])).await.unwrap();

        let reopened = SqliteCacheStore::open(&path).unwrap();
        let latest = reopened.get_latest().await.unwrap().unwrap();
        assert_eq!(latest.data, stored.data);
        assert_eq!(latest.timestamp.timestamp_millis(), stored.timestamp.timestamp_millis());
    }
}
