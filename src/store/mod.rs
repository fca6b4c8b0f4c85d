//! Local structured log of every attempt and its captured API calls.

use crate::error::StoreFault;
use crate::runner::state::ExecutionAttempt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::path::Path;

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS execution_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        case_id TEXT NOT NULL,
        serial TEXT NOT NULL,
        model TEXT,
        os_version TEXT,
        app_version TEXT,
        start_time TEXT NOT NULL,
        end_time TEXT,
        elapsed_secs REAL NOT NULL,
        status TEXT NOT NULL,
        error_msg TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS api_call (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        case_id TEXT NOT NULL,
        serial TEXT NOT NULL,
        started_at TEXT NOT NULL,
        url TEXT NOT NULL,
        method TEXT NOT NULL,
        status_code INTEGER,
        elapsed_ms REAL,
        request_snippet TEXT,
        response_snippet TEXT
    )
    "#,
];

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ExecutionLogRow {
    pub run_id: String,
    pub case_id: String,
    pub serial: String,
    pub model: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub elapsed_secs: f64,
    pub status: String,
    pub error_msg: Option<String>,
}

/// SQLite-backed store scoped to one batch run
pub struct ExecutionStore {
    pool: SqlitePool,
    run_id: String,
}

impl ExecutionStore {
    /// Open (or create) the database file and its tables.
    pub async fn open(path: &Path, run_id: &str) -> Result<Self, StoreFault> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StoreFault::Directory {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool, run_id).await
    }

    pub async fn in_memory(run_id: &str) -> Result<Self, StoreFault> {
        // One connection: every new in-memory connection is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool, run_id).await
    }

    async fn with_pool(pool: SqlitePool, run_id: &str) -> Result<Self, StoreFault> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self {
            pool,
            run_id: run_id.to_string(),
        })
    }

    /// Insert the attempt row and its API calls atomically.
    pub async fn record_attempt(&self, attempt: &ExecutionAttempt) -> Result<(), StoreFault> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO execution_log
                (run_id, case_id, serial, model, os_version, app_version,
                 start_time, end_time, elapsed_secs, status, error_msg)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.run_id)
        .bind(&attempt.case_id)
        .bind(&attempt.device.serial)
        .bind(&attempt.device.model)
        .bind(&attempt.device.os_version)
        .bind(&attempt.device.app_version)
        .bind(attempt.started_at.to_rfc3339())
        .bind(attempt.finished_at.map(|t| t.to_rfc3339()))
        .bind(attempt.elapsed_secs())
        .bind(attempt.status.as_str())
        .bind(attempt.error_excerpt.as_deref())
        .execute(&mut *tx)
        .await?;

        for call in &attempt.api_calls {
            sqlx::query(
                r#"
                INSERT INTO api_call
                    (run_id, case_id, serial, started_at, url, method, status_code,
                     elapsed_ms, request_snippet, response_snippet)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&self.run_id)
            .bind(&call.case_id)
            .bind(&call.serial)
            .bind(call.started_at.to_rfc3339())
            .bind(&call.url)
            .bind(&call.method)
            .bind(call.status_code.map(i64::from))
            .bind(call.elapsed_ms)
            .bind(call.request_snippet.as_deref())
            .bind(call.response_snippet.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Record every attempt; failures are logged and do not stop the rest.
    pub async fn record_all(&self, attempts: &[ExecutionAttempt]) {
        for attempt in attempts {
            if let Err(e) = self.record_attempt(attempt).await {
                log::warn!(
                    "TC{} on {}: not stored: {}",
                    attempt.case_id,
                    attempt.device.serial,
                    e
                );
            }
        }
    }

    pub async fn executions(&self, case_id: &str) -> Result<Vec<ExecutionLogRow>, StoreFault> {
        let rows = sqlx::query_as::<_, ExecutionLogRow>(
            r#"
            SELECT run_id, case_id, serial, model, start_time, end_time,
                   elapsed_secs, status, error_msg
            FROM execution_log
            WHERE run_id = ? AND case_id = ?
            ORDER BY id
            "#,
        )
        .bind(&self.run_id)
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
