//! Alert repository.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{parse_datetime, parse_datetime_opt, Result};
use crate::models::Alert;

/// SQLite-backed store for broadcast alerts.
pub struct AlertRepository {
    db_path: PathBuf,
}

impl AlertRepository {
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
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message TEXT NOT NULL,
                start_time TEXT,
                end_time TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    fn row_to_alert(row: &Row) -> rusqlite::Result<Alert> {
        Ok(Alert {
            id: row.get("id")?,
            message: row.get("message")?,
            start_time: parse_datetime_opt(row.get::<_, Option<String>>("start_time")?),
            end_time: parse_datetime(&row.get::<_, String>("end_time")?),
            is_active: row.get("is_active")?,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        })
    }

    /// Create a new alert (inactive until the next evaluation pass).
    pub fn add(
        &self,
        message: &str,
        start_time: Option<DateTime<Utc>>,
        end_time: DateTime<Utc>,
    ) -> Result<Alert> {
        let conn = self.connect()?;
        let created_at = Utc::now();
        conn.execute(
            r#"
            INSERT INTO alerts (message, start_time, end_time, is_active, created_at)
            VALUES (?1, ?2, ?3, 0, ?4)
            "#,
            params![
                message,
                start_time.map(|dt| dt.to_rfc3339()),
                end_time.to_rfc3339(),
                created_at.to_rfc3339(),
            ],
        )?;
        Ok(Alert {
            id: conn.last_insert_rowid(),
            message: message.to_string(),
            start_time,
            end_time,
            is_active: false,
            created_at,
        })
    }

    /// All alerts, oldest first.
    pub fn all(&self) -> Result<Vec<Alert>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM alerts ORDER BY id")?;
        let alerts = stmt
            .query_map([], Self::row_to_alert)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(alerts)
    }

    /// Get one alert by id.
    pub fn get(&self, id: i64) -> Result<Option<Alert>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM alerts WHERE id = ?1")?;
        super::to_option(stmt.query_row(params![id], Self::row_to_alert))
    }

    /// Persist an activation flip.
    pub fn set_active(&self, id: i64, is_active: bool) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE alerts SET is_active = ?1 WHERE id = ?2",
            params![is_active, id],
        )?;
        Ok(())
    }

    /// Currently active alert, if any (most recent wins).
    pub fn active(&self) -> Result<Option<Alert>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT * FROM alerts WHERE is_active = 1 ORDER BY id DESC LIMIT 1")?;
        super::to_option(stmt.query_row([], Self::row_to_alert))
    }
}
