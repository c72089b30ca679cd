//! Scrape configuration repository (singleton row).

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection};

use super::{parse_datetime, parse_datetime_opt, Result};
use crate::models::ScrapeConfig;

/// SQLite-backed store for the single `ScrapeConfig` row.
pub struct ScrapeConfigRepository {
    db_path: PathBuf,
}

impl ScrapeConfigRepository {
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
            CREATE TABLE IF NOT EXISTS scrape_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                base_url TEXT NOT NULL,
                username TEXT,
                password_encrypted TEXT,
                last_scrape TEXT,
                scrape_interval_minutes INTEGER NOT NULL DEFAULT 15,
                updated_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    /// Get the configuration row, if one has been created.
    pub fn get(&self) -> Result<Option<ScrapeConfig>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM scrape_config WHERE id = 1")?;

        super::to_option(stmt.query_row([], |row| {
            Ok(ScrapeConfig {
                base_url: row.get("base_url")?,
                username: row.get("username")?,
                password_encrypted: row.get("password_encrypted")?,
                last_scrape: parse_datetime_opt(row.get::<_, Option<String>>("last_scrape")?),
                scrape_interval_minutes: row.get("scrape_interval_minutes")?,
                updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
            })
        }))
    }

    /// Insert or replace the singleton row. `updated_at` is set here; the
    /// `id = 1` constraint keeps a second row from ever existing.
    pub fn upsert(&self, config: &ScrapeConfig) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO scrape_config
                (id, base_url, username, password_encrypted, last_scrape,
                 scrape_interval_minutes, updated_at)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                base_url = excluded.base_url,
                username = excluded.username,
                password_encrypted = excluded.password_encrypted,
                last_scrape = excluded.last_scrape,
                scrape_interval_minutes = excluded.scrape_interval_minutes,
                updated_at = excluded.updated_at
            "#,
            params![
                config.base_url,
                config.username,
                config.password_encrypted,
                config.last_scrape.map(|dt| dt.to_rfc3339()),
                config.scrape_interval_minutes,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Update only the poll interval.
    pub fn set_interval(&self, minutes: u32) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE scrape_config SET scrape_interval_minutes = ?1, updated_at = ?2 WHERE id = 1",
            params![minutes, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}
