//! Manifest and content-area storage
//!
//! Every value has one manifest row. Values up to the inline threshold are
//! embedded in the row; larger ones live in `data/<filename>` and the row
//! references the file. Files are made durable before a row points at them,
//! and rows are deleted before their files, so an interruption can only ever
//! leave an unreferenced file behind. [`Store::open`] sweeps those up.

use crate::error::Result;
use crate::types::{DiskCacheStats, DiskItem};
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::FromRow;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const MANIFEST_FILE: &str = "manifest.sqlite";
const DATA_DIR: &str = "data";

/// Records removed per trim step
pub(crate) const TRIM_BATCH: i64 = 16;

#[derive(Debug, FromRow)]
struct ManifestRow {
    key: String,
    filename: Option<String>,
    size: i64,
    inline_data: Option<Vec<u8>>,
    modification_time: i64,
    extended_data: Option<Vec<u8>>,
}

/// Name of the content file for `key` written at `ordinal`
pub(crate) fn file_name_for(key: &str, ordinal: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{}.{:x}", hex::encode(hasher.finalize()), ordinal)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

pub(crate) struct Store {
    pool: SqlitePool,
    data_dir: PathBuf,
    inline_threshold: usize,
    next_ordinal: i64,
    hits: u64,
    misses: u64,
}

impl Store {
    /// Open or create the store at `path` and reconcile it with the content area
    pub async fn open(path: &Path, inline_threshold: usize) -> Result<Self> {
        let data_dir = path.join(DATA_DIR);
        fs::create_dir_all(&data_dir).await?;

        let options = SqliteConnectOptions::new()
            .filename(path.join(MANIFEST_FILE))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let (max_ordinal,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(access_ordinal) FROM manifest")
                .fetch_one(&pool)
                .await?;

        let mut store = Self {
            pool,
            data_dir,
            inline_threshold,
            next_ordinal: max_ordinal.unwrap_or(0) + 1,
            hits: 0,
            misses: 0,
        };
        store.reconcile().await?;
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Highest ordinal handed out so far. Records written or read later rank above it.
    pub fn last_ordinal(&self) -> i64 {
        self.next_ordinal - 1
    }

    fn next_ordinal(&mut self) -> i64 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        ordinal
    }

    /// Delete unreferenced files and rows whose file has gone missing
    async fn reconcile(&mut self) -> Result<()> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, filename FROM manifest WHERE filename IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;
        let referenced: HashSet<&str> = rows.iter().map(|(_, f)| f.as_str()).collect();

        let mut present = HashSet::new();
        let mut orphans = 0usize;
        let mut entries = fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if referenced.contains(name.as_str()) {
                present.insert(name);
                continue;
            }
            let removed = if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(entry.path()).await
            } else {
                fs::remove_file(entry.path()).await
            };
            match removed {
                Ok(()) => orphans += 1,
                Err(e) => warn!(file = %name, error = %e, "Failed to remove orphaned file"),
            }
        }

        let mut stale = 0usize;
        for (key, filename) in &rows {
            if !present.contains(filename) {
                self.delete_row(key).await?;
                stale += 1;
            }
        }

        if orphans > 0 || stale > 0 {
            info!(orphans, stale, "Reconciled disk cache");
        } else {
            debug!(records = rows.len(), "Disk cache consistent");
        }
        Ok(())
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM manifest WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Read a value and refresh its access time. Unreadable files count as a miss.
    pub async fn get_item(&mut self, key: &str) -> Result<Option<DiskItem>> {
        let row: Option<ManifestRow> = sqlx::query_as(
            r#"
            SELECT key, filename, size, inline_data, modification_time, extended_data
            FROM manifest
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(mut row) = row else {
            self.misses += 1;
            return Ok(None);
        };

        let value = match &row.filename {
            None => row.inline_data.take().unwrap_or_default(),
            Some(name) => match fs::read(self.data_dir.join(name)).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(key = %key, file = %name, error = %e, "Failed to read cached file, removing entry");
                    self.delete_row(key).await?;
                    self.delete_file(name).await;
                    self.misses += 1;
                    return Ok(None);
                }
            },
        };

        let now = now_millis();
        let ordinal = self.next_ordinal();
        let touched = sqlx::query(
            "UPDATE manifest SET last_access_time = ?, access_ordinal = ? WHERE key = ?",
        )
        .bind(now)
        .bind(ordinal)
        .bind(key)
        .execute(&self.pool)
        .await;
        if let Err(e) = touched {
            warn!(key = %key, error = %e, "Failed to update access time");
        }

        self.hits += 1;
        Ok(Some(DiskItem {
            key: row.key,
            value,
            size: row.size as u64,
            filename: row.filename,
            modified_at: from_millis(row.modification_time),
            accessed_at: from_millis(now),
            extended: row.extended_data,
        }))
    }

    /// Store a value. Nothing is committed if the write fails.
    pub async fn set(&mut self, key: &str, value: &[u8], extended: Option<&[u8]>) -> Result<()> {
        let previous: Option<(Option<String>,)> =
            sqlx::query_as("SELECT filename FROM manifest WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        let previous = previous.and_then(|(filename,)| filename);

        let now = now_millis();
        let ordinal = self.next_ordinal();
        let filename = if value.len() > self.inline_threshold {
            let name = file_name_for(key, ordinal);
            self.write_file(&name, value).await?;
            Some(name)
        } else {
            None
        };
        let inline_data = if filename.is_none() { Some(value) } else { None };

        let upsert = sqlx::query(
            r#"
            INSERT INTO manifest
                (key, filename, size, inline_data, modification_time,
                 last_access_time, access_ordinal, extended_data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                filename = excluded.filename,
                size = excluded.size,
                inline_data = excluded.inline_data,
                modification_time = excluded.modification_time,
                last_access_time = excluded.last_access_time,
                access_ordinal = excluded.access_ordinal,
                extended_data = excluded.extended_data
            "#,
        )
        .bind(key)
        .bind(&filename)
        .bind(value.len() as i64)
        .bind(inline_data)
        .bind(now)
        .bind(now)
        .bind(ordinal)
        .bind(extended)
        .execute(&self.pool)
        .await;

        if let Err(e) = upsert {
            if let Some(name) = &filename {
                self.delete_file(name).await;
            }
            return Err(e.into());
        }

        if let Some(old) = previous {
            if filename.as_deref() != Some(old.as_str()) {
                self.delete_file(&old).await;
            }
        }
        debug!(key = %key, size = value.len(), inline = filename.is_none(), "Stored value");
        Ok(())
    }

    async fn write_file(&self, name: &str, value: &[u8]) -> Result<()> {
        let path = self.data_dir.join(name);
        // Nothing to clean up if the file was never created
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        let written = async {
            file.write_all(value).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            self.delete_file(name).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete_file(&self, name: &str) {
        if let Err(e) = fs::remove_file(self.data_dir.join(name)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(file = %name, error = %e, "Failed to remove cache file");
            }
        }
    }

    async fn delete_row(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM manifest WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a record, row first. Returns whether it existed.
    pub async fn remove(&mut self, key: &str) -> Result<bool> {
        let deleted: Option<(Option<String>,)> =
            sqlx::query_as("DELETE FROM manifest WHERE key = ? RETURNING filename")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        match deleted {
            Some((filename,)) => {
                if let Some(name) = filename {
                    self.delete_file(&name).await;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop every row, then empty the content area
    pub async fn remove_all(&mut self) -> Result<()> {
        let removed = sqlx::query("DELETE FROM manifest")
            .execute(&self.pool)
            .await?
            .rows_affected();

        let mut files = 0usize;
        let mut entries = fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            match fs::remove_file(entry.path()).await {
                Ok(()) => files += 1,
                Err(e) => warn!(path = ?entry.path(), error = %e, "Failed to remove cache file"),
            }
        }
        info!(removed, files, "Removed all disk cache entries");
        Ok(())
    }

    /// Remove records oldest first, reporting `(removed, total)` after each one
    pub async fn remove_all_with_progress(
        &mut self,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<()> {
        let total = self.counts().await?.0 as usize;
        let mut removed = 0usize;
        loop {
            let batch = self.oldest(TRIM_BATCH, i64::MAX).await?;
            if batch.is_empty() {
                break;
            }
            for (key, filename, _) in batch {
                self.delete_row(&key).await?;
                if let Some(name) = filename {
                    self.delete_file(&name).await;
                }
                removed += 1;
                progress(removed, total.max(removed));
            }
        }
        info!(removed, "Removed all disk cache entries");
        Ok(())
    }

    /// Least recently used records whose ordinal is at most `ceiling`
    async fn oldest(&self, limit: i64, ceiling: i64) -> Result<Vec<(String, Option<String>, i64)>> {
        let rows = sqlx::query_as(
            r#"
            SELECT key, filename, size FROM manifest
            WHERE access_ordinal <= ?
            ORDER BY access_ordinal ASC
            LIMIT ?
            "#,
        )
        .bind(ceiling)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_record(&self, key: &str, filename: Option<&str>) -> Result<()> {
        self.delete_row(key).await?;
        if let Some(name) = filename {
            self.delete_file(name).await;
        }
        Ok(())
    }

    /// Remove up to one batch of the oldest records toward `limit` entries,
    /// touching only records with an ordinal at most `ceiling`.
    /// Returns true while more work remains.
    pub async fn trim_count_step(&mut self, limit: u64, ceiling: i64) -> Result<bool> {
        let (count, _, _) = self.counts().await?;
        let count = count as u64;
        if count <= limit {
            return Ok(false);
        }
        let batch = (count - limit).min(TRIM_BATCH as u64);
        let victims = self.oldest(batch as i64, ceiling).await?;
        let removed = victims.len() as u64;
        for (key, filename, _) in victims {
            self.delete_record(&key, filename.as_deref()).await?;
        }
        debug!(removed, limit, "Trimmed disk cache to count");
        Ok(removed == batch && count - removed > limit)
    }

    /// Remove up to one batch of the oldest records toward `limit` total bytes,
    /// touching only records with an ordinal at most `ceiling`.
    /// Returns true while more work remains.
    pub async fn trim_cost_step(&mut self, limit: u64, ceiling: i64) -> Result<bool> {
        let (_, total, _) = self.counts().await?;
        let mut total = total as u64;
        if total <= limit {
            return Ok(false);
        }
        let mut removed = 0usize;
        for (key, filename, size) in self.oldest(TRIM_BATCH, ceiling).await? {
            if total <= limit {
                break;
            }
            self.delete_record(&key, filename.as_deref()).await?;
            total = total.saturating_sub(size as u64);
            removed += 1;
        }
        debug!(removed, limit, "Trimmed disk cache to cost");
        Ok(removed > 0 && total > limit)
    }

    /// Remove up to one batch of records not accessed within `age`.
    /// Returns true when more expired records may remain.
    pub async fn trim_age_step(&mut self, age: Duration, ceiling: i64) -> Result<bool> {
        let Ok(age_ms) = i64::try_from(age.as_millis()) else {
            return Ok(false);
        };
        let cutoff = now_millis().saturating_sub(age_ms);
        let expired: Vec<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT key, filename FROM manifest
            WHERE last_access_time < ? AND access_ordinal <= ?
            ORDER BY access_ordinal ASC
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(ceiling)
        .bind(TRIM_BATCH)
        .fetch_all(&self.pool)
        .await?;

        let removed = expired.len();
        for (key, filename) in expired {
            self.delete_record(&key, filename.as_deref()).await?;
        }
        if removed > 0 {
            debug!(removed, "Trimmed expired disk cache entries");
        }
        Ok(removed as i64 == TRIM_BATCH)
    }

    /// `(entries, total bytes, file-backed entries)`
    pub async fn counts(&self) -> Result<(i64, i64, i64)> {
        let counts = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(size), 0), COUNT(filename) FROM manifest",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    pub async fn stats(&self) -> Result<DiskCacheStats> {
        let (entries, total_size, file_entries) = self.counts().await?;
        Ok(DiskCacheStats {
            entries: entries as u64,
            total_size: total_size as u64,
            inline_entries: (entries - file_entries) as u64,
            file_entries: file_entries as u64,
            hits: self.hits,
            misses: self.misses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn data_files(dir: &Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(dir.join(DATA_DIR)).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names
    }

    #[test]
    fn test_file_name_generation() {
        let name1 = file_name_for("https://example.com/a.png", 7);
        let name2 = file_name_for("https://example.com/a.png", 7);
        let name3 = file_name_for("https://example.com/b.png", 7);

        assert_eq!(name1, name2);
        assert_ne!(name1, name3);
        assert_ne!(name1, file_name_for("https://example.com/a.png", 8));

        let (digest, ordinal) = name1.split_once('.').unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ordinal, "7");
    }

    #[tokio::test]
    async fn test_small_values_stay_inline() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), 16).await.unwrap();

        store.set("small", b"0123456789abcdef", None).await.unwrap();

        assert!(data_files(dir.path()).await.is_empty());
        let item = store.get_item("small").await.unwrap().unwrap();
        assert!(item.is_inline());
        assert_eq!(item.value, b"0123456789abcdef");
        assert_eq!(item.size, 16);
    }

    #[tokio::test]
    async fn test_large_values_get_one_file() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), 16).await.unwrap();
        let value = vec![7u8; 17];

        store.set("large", &value, None).await.unwrap();

        let files = data_files(dir.path()).await;
        assert_eq!(files.len(), 1);
        let on_disk = fs::read(dir.path().join(DATA_DIR).join(&files[0]))
            .await
            .unwrap();
        assert_eq!(on_disk, value);

        let item = store.get_item("large").await.unwrap().unwrap();
        assert_eq!(item.filename.as_deref(), Some(files[0].as_str()));
        assert_eq!(item.value, value);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_backing_file() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), 4).await.unwrap();

        store.set("k", b"first large", None).await.unwrap();
        let first = data_files(dir.path()).await;
        store.set("k", b"second large", None).await.unwrap();
        let second = data_files(dir.path()).await;

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_ne!(first, second);

        store.set("k", b"tiny", None).await.unwrap();
        assert!(data_files(dir.path()).await.is_empty());
        let item = store.get_item("k").await.unwrap().unwrap();
        assert_eq!(item.value, b"tiny");
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_value() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), 4).await.unwrap();
        store.set("k", b"first large", None).await.unwrap();
        let before = data_files(dir.path()).await;
        assert_eq!(before.len(), 1);

        // Occupy the name the next write would use
        let blocker = file_name_for("k", store.next_ordinal);
        fs::write(dir.path().join(DATA_DIR).join(&blocker), b"not ours")
            .await
            .unwrap();

        assert!(store.set("k", b"second large", None).await.is_err());

        let item = store.get_item("k").await.unwrap().unwrap();
        assert_eq!(item.value, b"first large");
        assert_eq!(item.filename.as_deref(), Some(before[0].as_str()));
        assert_eq!(store.counts().await.unwrap().0, 1);

        let mut after = data_files(dir.path()).await;
        after.sort();
        let mut expected = vec![before[0].clone(), blocker.clone()];
        expected.sort();
        assert_eq!(after, expected);
        let blocked = fs::read(dir.path().join(DATA_DIR).join(&blocker))
            .await
            .unwrap();
        assert_eq!(blocked, b"not ours");

        // A later write uses a fresh name and succeeds
        store.set("k", b"third large", None).await.unwrap();
        assert_eq!(store.get_item("k").await.unwrap().unwrap().value, b"third large");
    }

    #[tokio::test]
    async fn test_trim_ceiling_spares_newer_records() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), 1024).await.unwrap();
        for i in 0..40 {
            store.set(&format!("k{i}"), b"v", None).await.unwrap();
        }
        let ceiling = store.last_ordinal();

        assert!(store.trim_count_step(0, ceiling).await.unwrap());
        store.set("after", b"later", None).await.unwrap();
        while store.trim_count_step(0, ceiling).await.unwrap() {}

        assert_eq!(store.counts().await.unwrap().0, 1);
        assert_eq!(
            store.get_item("after").await.unwrap().unwrap().value,
            b"later"
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_a_miss_and_drops_row() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), 0).await.unwrap();
        store.set("k", b"value", None).await.unwrap();

        let files = data_files(dir.path()).await;
        fs::remove_file(dir.path().join(DATA_DIR).join(&files[0]))
            .await
            .unwrap();

        assert!(store.get_item("k").await.unwrap().is_none());
        assert!(!store.contains("k").await.unwrap());
        assert_eq!(store.stats().await.unwrap().misses, 1);
    }

    #[tokio::test]
    async fn test_reconcile_on_open() {
        let dir = tempdir().unwrap();
        {
            let mut store = Store::open(dir.path(), 0).await.unwrap();
            store.set("kept", b"kept value", None).await.unwrap();
            store.set("lost", b"lost value", None).await.unwrap();
            store.close().await;
        }

        // A file nobody references, and a referenced file that disappeared
        fs::write(dir.path().join(DATA_DIR).join("orphan.bin"), b"junk")
            .await
            .unwrap();
        let lost = file_name_for("lost", 2);
        fs::remove_file(dir.path().join(DATA_DIR).join(&lost))
            .await
            .unwrap();

        let mut store = Store::open(dir.path(), 0).await.unwrap();

        let files = data_files(dir.path()).await;
        assert_eq!(files, vec![file_name_for("kept", 1)]);
        assert!(!store.contains("lost").await.unwrap());
        assert!(store.get_item("lost").await.unwrap().is_none());
        assert_eq!(
            store.get_item("kept").await.unwrap().unwrap().value,
            b"kept value"
        );
    }

    #[tokio::test]
    async fn test_ordinals_resume_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut store = Store::open(dir.path(), 1024).await.unwrap();
            store.set("a", b"1", None).await.unwrap();
            store.set("b", b"2", None).await.unwrap();
            store.close().await;
        }
        let store = Store::open(dir.path(), 1024).await.unwrap();
        assert_eq!(store.next_ordinal, 3);
    }

    #[tokio::test]
    async fn test_trim_count_step_removes_oldest() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), 1024).await.unwrap();
        for i in 0..10 {
            store.set(&format!("k{i}"), b"v", None).await.unwrap();
        }
        store.get_item("k0").await.unwrap();

        while store.trim_count_step(5, i64::MAX).await.unwrap() {}

        assert_eq!(store.counts().await.unwrap().0, 5);
        assert!(store.contains("k0").await.unwrap());
        for i in 1..=5 {
            assert!(!store.contains(&format!("k{i}")).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_trim_cost_step() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), 8).await.unwrap();
        for i in 0..4 {
            store.set(&format!("k{i}"), &[0u8; 10], None).await.unwrap();
        }

        while store.trim_cost_step(25, i64::MAX).await.unwrap() {}

        let (entries, total, files) = store.counts().await.unwrap();
        assert_eq!(entries, 2);
        assert_eq!(total, 20);
        assert_eq!(files, 2);
        assert_eq!(data_files(dir.path()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_trim_age_step() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), 1024).await.unwrap();
        store.set("old", b"1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        store.set("new", b"2", None).await.unwrap();

        let more = store.trim_age_step(Duration::from_millis(60), i64::MAX).await.unwrap();

        assert!(!more);
        assert!(!store.contains("old").await.unwrap());
        assert!(store.contains("new").await.unwrap());
        assert!(!store.trim_age_step(Duration::MAX, i64::MAX).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_all_with_progress() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), 2).await.unwrap();
        for i in 0..20 {
            store.set(&format!("k{i}"), b"abc", None).await.unwrap();
        }

        let mut reports = Vec::new();
        store
            .remove_all_with_progress(&mut |removed, total| reports.push((removed, total)))
            .await
            .unwrap();

        assert_eq!(reports.len(), 20);
        assert_eq!(reports.last(), Some(&(20, 20)));
        assert_eq!(store.counts().await.unwrap().0, 0);
        assert!(data_files(dir.path()).await.is_empty());
    }
}
