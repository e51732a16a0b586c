//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage and
//! PersistentStore traits.

use crate::crawler::{Priority, Request};
use crate::state::RequestState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{PersistentStore, Storage, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus};
use crate::CrawlError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(CrawlError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, CrawlError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, CrawlError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        mode: row.get(4)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
            .unwrap_or(RunStatus::Running),
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str, mode: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, mode, status) VALUES (?1, ?2, ?3, ?4)",
            params![now, config_hash, mode, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, mode, status FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, mode, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let finished_at = if status == RunStatus::Running {
            None
        } else {
            Some(now)
        };
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), finished_at, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn complete_run(&mut self, run_id: i64) -> StorageResult<()> {
        self.update_run_status(run_id, RunStatus::Completed)
    }

    // ===== Request Queue =====

    fn insert_request(&mut self, request: &Request) -> StorageResult<bool> {
        let payload = serde_json::to_string(request)?;
        let now = Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO requests
             (dedup_key, url, label, front, payload, retry_count, state, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                request.dedup_key,
                request.url,
                request.kind.label(),
                request.priority == Priority::Front,
                payload,
                request.retry_count,
                RequestState::Queued.to_db_string(),
                now,
            ],
        )?;
        Ok(inserted > 0)
    }

    fn update_request_state(
        &mut self,
        dedup_key: &str,
        state: RequestState,
        retry_count: u32,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE requests SET state = ?1, retry_count = ?2, error_message = ?3, updated_at = ?4
             WHERE dedup_key = ?5",
            params![state.to_db_string(), retry_count, error_message, now, dedup_key],
        )?;
        if updated == 0 {
            return Err(StorageError::RequestNotFound(dedup_key.to_string()));
        }
        Ok(())
    }

    fn load_pending_requests(&self) -> StorageResult<Vec<Request>> {
        let mut stmt = self.conn.prepare(
            "SELECT payload, retry_count FROM requests
             WHERE state IN (?1, ?2)
             ORDER BY front DESC, seq ASC",
        )?;

        let rows = stmt.query_map(
            params![
                RequestState::Queued.to_db_string(),
                RequestState::InFlight.to_db_string()
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
        )?;

        let mut requests = Vec::new();
        for row in rows {
            let (payload, retry_count) = row?;
            let mut request: Request = serde_json::from_str(&payload)?;
            request.retry_count = retry_count;
            requests.push(request);
        }

        Ok(requests)
    }

    fn load_request_keys(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT dedup_key FROM requests")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn count_requests_by_state(&self, state: RequestState) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM requests WHERE state = ?1",
            params![state.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn clear_requests(&mut self) -> StorageResult<()> {
        self.conn.execute("DELETE FROM requests", [])?;
        Ok(())
    }
}

impl PersistentStore for SqliteStorage {
    fn load(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn save(&mut self, key: &str, value: &str) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.conn.execute("DELETE FROM kv", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::RequestKind;

    fn page_request(url: &str, page: u32) -> Request {
        Request::new(
            url,
            RequestKind::Page {
                category_id: Some("42".to_string()),
                category_name: Some("Kávovary".to_string()),
                page,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_create_in_memory() {
        let storage = SqliteStorage::new_in_memory();
        assert!(storage.is_ok());
    }

    #[test]
    fn test_create_and_complete_run() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("test_hash", "full").unwrap();
        assert!(run_id > 0);

        let run = storage.get_latest_run().unwrap().unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.mode, "full");
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());

        storage.complete_run(run_id).unwrap();
        let run = storage.get_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_get_missing_run() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        assert!(matches!(
            storage.get_run(7),
            Err(StorageError::RunNotFound(7))
        ));
        assert!(storage.get_latest_run().unwrap().is_none());
    }

    #[test]
    fn test_insert_duplicate_request() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let request = page_request("https://shop.cz/kavovary", 1);

        assert!(storage.insert_request(&request).unwrap());
        assert!(!storage.insert_request(&request).unwrap());
        assert_eq!(storage.load_request_keys().unwrap().len(), 1);
    }

    #[test]
    fn test_pending_requests_replay_front_first() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();

        let first = page_request("https://shop.cz/a", 1);
        let second = page_request("https://shop.cz/b", 1);
        let front = page_request("https://shop.cz/a?page=2", 2).with_priority(Priority::Front);
        let done = page_request("https://shop.cz/c", 1);

        for request in [&first, &second, &front, &done] {
            storage.insert_request(request).unwrap();
        }
        storage
            .update_request_state(&done.dedup_key, RequestState::Handled, 0, None)
            .unwrap();
        storage
            .update_request_state(&second.dedup_key, RequestState::InFlight, 2, None)
            .unwrap();

        let pending = storage.load_pending_requests().unwrap();
        let urls: Vec<&str> = pending.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://shop.cz/a?page=2", "https://shop.cz/a", "https://shop.cz/b"]
        );
        assert_eq!(pending[2].retry_count, 2);
        assert_eq!(pending[0].kind, front.kind);
    }

    #[test]
    fn test_count_requests_by_state() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let request = page_request("https://shop.cz/a", 1);
        storage.insert_request(&request).unwrap();
        storage
            .update_request_state(&request.dedup_key, RequestState::Failed, 3, Some("HTTP 404"))
            .unwrap();

        assert_eq!(
            storage.count_requests_by_state(RequestState::Failed).unwrap(),
            1
        );
        assert_eq!(
            storage.count_requests_by_state(RequestState::Queued).unwrap(),
            0
        );
    }

    #[test]
    fn test_update_unknown_request() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(matches!(
            storage.update_request_state("nope", RequestState::Handled, 0, None),
            Err(StorageError::RequestNotFound(_))
        ));
    }

    #[test]
    fn test_clear_requests() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .insert_request(&page_request("https://shop.cz/a", 1))
            .unwrap();
        storage.clear_requests().unwrap();
        assert!(storage.load_request_keys().unwrap().is_empty());
    }

    #[test]
    fn test_kv_save_replaces_existing() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert_eq!(storage.load("stats").unwrap(), None);

        storage.save("stats", "{\"pages_fetched\":1}").unwrap();
        storage.save("stats", "{\"pages_fetched\":2}").unwrap();
        assert_eq!(
            storage.load("stats").unwrap().as_deref(),
            Some("{\"pages_fetched\":2}")
        );

        storage.clear().unwrap();
        assert_eq!(storage.load("stats").unwrap(), None);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.db");

        {
            let mut storage = SqliteStorage::new(&path).unwrap();
            storage.create_run("hash", "price").unwrap();
            storage
                .insert_request(&page_request("https://shop.cz/a", 1))
                .unwrap();
            storage.save("handled-ids", "[\"1\",\"2\"]").unwrap();
        }

        let storage = SqliteStorage::new(&path).unwrap();
        assert_eq!(storage.get_latest_run().unwrap().unwrap().mode, "price");
        assert_eq!(storage.load_pending_requests().unwrap().len(), 1);
        assert!(storage.load("handled-ids").unwrap().is_some());
    }
}
