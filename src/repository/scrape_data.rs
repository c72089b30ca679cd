//! Append-only scrape record store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{parse_datetime, Result};
use crate::models::{ScrapeEnvelope, ScrapeRecord};

/// SQLite-backed store for scrape outcome records.
///
/// Records are created once and never updated; retention is unbounded here
/// (pruning, if any, belongs to a collaborator).
pub struct ScrapeDataRepository {
    db_path: PathBuf,
}

impl ScrapeDataRepository {
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS scrape_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data TEXT NOT NULL,
                scraped_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scrape_data_scraped_at
                ON scrape_data(scraped_at);
        "#,
        )?;
        Ok(())
    }

    /// Append a new record.
    pub fn append(&self, envelope: &ScrapeEnvelope) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO scrape_data (data, scraped_at) VALUES (?1, ?2)",
            params![
                serde_json::to_string(envelope)?,
                envelope.scraped_at.to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append a record and stamp the configuration's `last_scrape` in one
    /// transaction, so the two land atomically from the caller's view.
    pub fn append_run(&self, envelope: &ScrapeEnvelope, finished_at: DateTime<Utc>) -> Result<i64> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO scrape_data (data, scraped_at) VALUES (?1, ?2)",
            params![
                serde_json::to_string(envelope)?,
                envelope.scraped_at.to_rfc3339()
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE scrape_config SET last_scrape = ?1, updated_at = ?1 WHERE id = 1",
            params![finished_at.to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(id)
    }

    /// Most recent record, if any.
    pub fn latest(&self) -> Result<Option<ScrapeRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, data, scraped_at FROM scrape_data ORDER BY id DESC LIMIT 1",
        )?;

        let row = super::to_option(stmt.query_row([], |row| {
            Ok((
                row.get::<_, i64>("id")?,
                row.get::<_, String>("data")?,
                row.get::<_, String>("scraped_at")?,
            ))
        }))?;

        match row {
            Some((id, data, scraped_at)) => Ok(Some(ScrapeRecord {
                id,
                envelope: serde_json::from_str(&data)?,
                scraped_at: parse_datetime(&scraped_at),
            })),
            None => Ok(None),
        }
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<i64> {
        let conn = self.connect()?;
        let count = conn.query_row("SELECT COUNT(*) FROM scrape_data", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScrapeStatus;

    fn repo() -> (tempfile::TempDir, ScrapeDataRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = ScrapeDataRepository::new(&dir.path().join("test.db")).unwrap();
        (dir, repo)
    }

    #[test]
    fn latest_returns_most_recent_append() {
        let (_dir, repo) = repo();
        assert!(repo.latest().unwrap().is_none());

        repo.append(&ScrapeEnvelope::error("https://a", "first")).unwrap();
        repo.append(&ScrapeEnvelope::success("https://b", serde_json::json!([])))
            .unwrap();

        let latest = repo.latest().unwrap().unwrap();
        assert_eq!(latest.envelope.status, ScrapeStatus::Success);
        assert_eq!(latest.envelope.url, "https://b");
        assert_eq!(repo.count().unwrap(), 2);
    }

    #[test]
    fn append_run_touches_config_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("test.db");
        let config_repo = crate::repository::ScrapeConfigRepository::new(&db).unwrap();
        let data_repo = ScrapeDataRepository::new(&db).unwrap();

        config_repo
            .upsert(&crate::models::ScrapeConfig::new("https://pstrax.com"))
            .unwrap();

        let now = Utc::now();
        data_repo
            .append_run(&ScrapeEnvelope::error("https://a", "login failed"), now)
            .unwrap();

        let config = config_repo.get().unwrap().unwrap();
        assert_eq!(
            config.last_scrape.unwrap().timestamp_millis(),
            now.timestamp_millis()
        );
        assert_eq!(data_repo.count().unwrap(), 1);
    }
}
