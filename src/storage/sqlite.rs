use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use crate::battery::TestKind;
use crate::config::DatabaseConfig;
use crate::error::{SinkError, SinkResult};
use crate::session::Profile;

use super::{
    CorsiMetrics, FluencyMetrics, RavenMetrics, ReactionMetrics, ResultRecord, ResultSink,
    RotationMetrics, StroopMetrics, TestMetrics,
};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed Result Sink
#[derive(Clone)]
pub struct SqliteResultSink {
    pool: SqlitePool,
}

/// The sentinel column of each test's group; non-null exactly when the test
/// has been attempted at least once.
fn sentinel_column(kind: TestKind) -> &'static str {
    match kind {
        TestKind::Corsi => "corsi_interrupted",
        TestKind::Stroop => "stroop_interrupted",
        TestKind::Reaction => "reaction_interrupted",
        TestKind::Fluency => "fluency_interrupted",
        TestKind::Rotation => "rotation_interrupted",
        TestKind::Raven => "raven_interrupted",
    }
}

impl SqliteResultSink {
    /// Create a new SQLite sink backed by the configured file
    pub async fn new(config: &DatabaseConfig) -> SinkResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SinkError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| SinkError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| SinkError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let sink = Self { pool };
        sink.run_migrations().await?;

        Ok(sink)
    }

    /// In-memory sink for tests. Pinned to one connection, since every
    /// SQLite in-memory connection is its own database.
    pub async fn new_in_memory() -> SinkResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| SinkError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| SinkError::Connection {
                message: format!("Failed to connect to in-memory database: {}", e),
            })?;

        let sink = Self { pool };
        sink.run_migrations().await?;

        Ok(sink)
    }

    async fn run_migrations(&self) -> SinkResult<()> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| SinkError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    unique_id: String,
    display_name: String,
    age: i64,
    external_user_id: i64,
    updated_at: String,

    corsi_max_length: Option<i64>,
    corsi_total_errors: Option<i64>,
    corsi_interrupted: Option<i64>,

    stroop_part1_ms: Option<i64>,
    stroop_part2_ms: Option<i64>,
    stroop_part3_ms: Option<i64>,
    stroop_errors: Option<i64>,
    stroop_interrupted: Option<i64>,

    reaction_best_ms: Option<i64>,
    reaction_attempts: Option<i64>,
    reaction_succeeded: Option<i64>,
    reaction_interrupted: Option<i64>,

    fluency_word_count: Option<i64>,
    fluency_words: Option<String>,
    fluency_interrupted: Option<i64>,

    rotation_correct: Option<i64>,
    rotation_total: Option<i64>,
    rotation_elapsed_ms: Option<i64>,
    rotation_interrupted: Option<i64>,

    raven_correct: Option<i64>,
    raven_total: Option<i64>,
    raven_elapsed_ms: Option<i64>,
    raven_interrupted: Option<i64>,
}

impl From<ResultRow> for ResultRecord {
    fn from(row: ResultRow) -> Self {
        let corsi = row.corsi_interrupted.map(|interrupted| CorsiMetrics {
            max_length: row.corsi_max_length.unwrap_or(0) as u32,
            total_errors: row.corsi_total_errors.unwrap_or(0) as u32,
            interrupted: interrupted != 0,
        });
        let stroop = row.stroop_interrupted.map(|interrupted| StroopMetrics {
            part1_ms: row.stroop_part1_ms.unwrap_or(0) as u64,
            part2_ms: row.stroop_part2_ms.unwrap_or(0) as u64,
            part3_ms: row.stroop_part3_ms.unwrap_or(0) as u64,
            errors: row.stroop_errors.unwrap_or(0) as u32,
            interrupted: interrupted != 0,
        });
        let reaction = row.reaction_interrupted.map(|interrupted| ReactionMetrics {
            best_ms: row.reaction_best_ms.map(|v| v as u64),
            attempts: row.reaction_attempts.unwrap_or(0) as u32,
            succeeded: row.reaction_succeeded.unwrap_or(0) != 0,
            interrupted: interrupted != 0,
        });
        let fluency = row.fluency_interrupted.map(|interrupted| FluencyMetrics {
            word_count: row.fluency_word_count.unwrap_or(0) as u32,
            words: row
                .fluency_words
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default(),
            interrupted: interrupted != 0,
        });
        let rotation = row.rotation_interrupted.map(|interrupted| RotationMetrics {
            correct: row.rotation_correct.unwrap_or(0) as u32,
            total: row.rotation_total.unwrap_or(0) as u32,
            elapsed_ms: row.rotation_elapsed_ms.unwrap_or(0) as u64,
            interrupted: interrupted != 0,
        });
        let raven = row.raven_interrupted.map(|interrupted| RavenMetrics {
            correct: row.raven_correct.unwrap_or(0) as u32,
            total: row.raven_total.unwrap_or(0) as u32,
            elapsed_ms: row.raven_elapsed_ms.unwrap_or(0) as u64,
            interrupted: interrupted != 0,
        });

        ResultRecord {
            unique_id: row.unique_id,
            display_name: row.display_name,
            age: row.age as u32,
            external_user_id: row.external_user_id,
            updated_at: DateTime::parse_from_rfc3339(&row.updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            corsi,
            stroop,
            reaction,
            fluency,
            rotation,
            raven,
        }
    }
}

#[async_trait]
impl ResultSink for SqliteResultSink {
    async fn has_prior_result(&self, unique_id: &str, kind: TestKind) -> SinkResult<bool> {
        // Column name comes from a closed enum, never from user input.
        let sql = format!(
            "SELECT {} IS NOT NULL FROM results WHERE unique_id = ?",
            sentinel_column(kind)
        );
        let attempted: Option<bool> = sqlx::query_scalar(&sql)
            .bind(unique_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(attempted.unwrap_or(false))
    }

    async fn write_result(&self, profile: &Profile, metrics: &TestMetrics) -> SinkResult<()> {
        let now = Utc::now().to_rfc3339();
        let identity = |sql: &str| {
            format!(
                "INSERT INTO results (unique_id, display_name, age, external_user_id, updated_at, {cols}) \
                 VALUES (?, ?, ?, ?, ?, {marks}) \
                 ON CONFLICT(unique_id) DO UPDATE SET \
                 display_name = excluded.display_name, \
                 age = excluded.age, \
                 external_user_id = excluded.external_user_id, \
                 updated_at = excluded.updated_at, \
                 {updates}",
                cols = sql,
                marks = sql.split(',').map(|_| "?").collect::<Vec<_>>().join(", "),
                updates = sql
                    .split(',')
                    .map(|c| format!("{c} = excluded.{c}", c = c.trim()))
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        };

        match metrics {
            TestMetrics::Corsi(m) => {
                let sql = identity("corsi_max_length, corsi_total_errors, corsi_interrupted");
                sqlx::query(&sql)
                    .bind(&profile.unique_id)
                    .bind(&profile.display_name)
                    .bind(profile.age as i64)
                    .bind(profile.external_user_id)
                    .bind(&now)
                    .bind(m.max_length as i64)
                    .bind(m.total_errors as i64)
                    .bind(m.interrupted as i64)
                    .execute(&self.pool)
                    .await?;
            }
            TestMetrics::Stroop(m) => {
                let sql = identity(
                    "stroop_part1_ms, stroop_part2_ms, stroop_part3_ms, stroop_errors, stroop_interrupted",
                );
                sqlx::query(&sql)
                    .bind(&profile.unique_id)
                    .bind(&profile.display_name)
                    .bind(profile.age as i64)
                    .bind(profile.external_user_id)
                    .bind(&now)
                    .bind(m.part1_ms as i64)
                    .bind(m.part2_ms as i64)
                    .bind(m.part3_ms as i64)
                    .bind(m.errors as i64)
                    .bind(m.interrupted as i64)
                    .execute(&self.pool)
                    .await?;
            }
            TestMetrics::Reaction(m) => {
                let sql = identity(
                    "reaction_best_ms, reaction_attempts, reaction_succeeded, reaction_interrupted",
                );
                sqlx::query(&sql)
                    .bind(&profile.unique_id)
                    .bind(&profile.display_name)
                    .bind(profile.age as i64)
                    .bind(profile.external_user_id)
                    .bind(&now)
                    .bind(m.best_ms.map(|v| v as i64))
                    .bind(m.attempts as i64)
                    .bind(m.succeeded as i64)
                    .bind(m.interrupted as i64)
                    .execute(&self.pool)
                    .await?;
            }
            TestMetrics::Fluency(m) => {
                let sql = identity("fluency_word_count, fluency_words, fluency_interrupted");
                sqlx::query(&sql)
                    .bind(&profile.unique_id)
                    .bind(&profile.display_name)
                    .bind(profile.age as i64)
                    .bind(profile.external_user_id)
                    .bind(&now)
                    .bind(m.word_count as i64)
                    .bind(serde_json::to_string(&m.words).unwrap_or_default())
                    .bind(m.interrupted as i64)
                    .execute(&self.pool)
                    .await?;
            }
            TestMetrics::Rotation(m) => {
                let sql = identity(
                    "rotation_correct, rotation_total, rotation_elapsed_ms, rotation_interrupted",
                );
                sqlx::query(&sql)
                    .bind(&profile.unique_id)
                    .bind(&profile.display_name)
                    .bind(profile.age as i64)
                    .bind(profile.external_user_id)
                    .bind(&now)
                    .bind(m.correct as i64)
                    .bind(m.total as i64)
                    .bind(m.elapsed_ms as i64)
                    .bind(m.interrupted as i64)
                    .execute(&self.pool)
                    .await?;
            }
            TestMetrics::Raven(m) => {
                let sql =
                    identity("raven_correct, raven_total, raven_elapsed_ms, raven_interrupted");
                sqlx::query(&sql)
                    .bind(&profile.unique_id)
                    .bind(&profile.display_name)
                    .bind(profile.age as i64)
                    .bind(profile.external_user_id)
                    .bind(&now)
                    .bind(m.correct as i64)
                    .bind(m.total as i64)
                    .bind(m.elapsed_ms as i64)
                    .bind(m.interrupted as i64)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    async fn ensure_row(&self, profile: &Profile) -> SinkResult<()> {
        sqlx::query(
            r#"
            INSERT INTO results (unique_id, display_name, age, external_user_id, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(unique_id) DO UPDATE SET
                display_name = excluded.display_name,
                age = excluded.age,
                external_user_id = excluded.external_user_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&profile.unique_id)
        .bind(&profile.display_name)
        .bind(profile.age as i64)
        .bind(profile.external_user_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_record(&self, unique_id: &str) -> SinkResult<Option<ResultRecord>> {
        let row: Option<ResultRow> = sqlx::query_as(
            r#"
            SELECT * FROM results WHERE unique_id = ?
            "#,
        )
        .bind(unique_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }
}
