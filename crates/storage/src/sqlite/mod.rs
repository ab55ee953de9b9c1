use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use snafu::{ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    CreateSqliteDirectorySnafu, EmptyQuestionSnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu,
    SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu, StorageError, StorageResult,
};
use super::ids::QuestionId;
use super::types::{NewQuestion, QuestionRecord};
use super::{BoxFuture, QuestionLog};

pub const DEFAULT_QUESTION_LOG_RELATIVE_PATH: &str = ".chatline/questions.sqlite3";

#[derive(Debug, Clone)]
pub struct SqliteQuestionLog {
    pool: SqlitePool,
}

impl SqliteQuestionLog {
    /// Opens (creating when needed) and migrates the log at `database_location`.
    ///
    /// Accepts a filesystem path, a `sqlite:` URL or `:memory:`.
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let in_memory = database_url.contains(":memory:");
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let mut pool_options = SqlitePoolOptions::new().max_connections(1);
        if in_memory {
            // An in-memory database lives only as long as its single connection.
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, "question log opened");
        Ok(Self { pool })
    }

    /// Waits for in-flight queries and closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn insert_question(&self, input: NewQuestion) -> StorageResult<QuestionRecord> {
        ensure!(
            !input.question.trim().is_empty(),
            EmptyQuestionSnafu {
                stage: "question-append-validate",
            }
        );

        let id = QuestionId::new_v7();
        let now = unix_timestamp_seconds();
        let seq = sqlx::query_scalar::<_, i64>(
            "INSERT INTO questions (id, question, created_at) VALUES (?, ?, ?) RETURNING seq",
        )
        .bind(id.to_string())
        .bind(input.question.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "question-append-insert",
        })?;

        Ok(QuestionRecord {
            id,
            seq: i64_to_u64(seq, "question-append-seq")?,
            question: input.question,
            created_at_unix_seconds: i64_to_u64(now, "question-append-created-at")?,
        })
    }

    async fn select_questions(&self) -> StorageResult<Vec<QuestionRecord>> {
        let rows = sqlx::query_as::<_, QuestionRow>(
            "SELECT seq, id, question, created_at FROM questions ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "question-list-select",
        })?;

        rows.into_iter().map(question_row_to_record).collect()
    }
}

impl QuestionLog for SqliteQuestionLog {
    fn append_question<'a>(
        &'a self,
        input: NewQuestion,
    ) -> BoxFuture<'a, StorageResult<QuestionRecord>> {
        Box::pin(self.insert_question(input))
    }

    fn list_questions<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<QuestionRecord>>> {
        Box::pin(self.select_questions())
    }
}

#[derive(Debug, FromRow)]
struct QuestionRow {
    seq: i64,
    id: String,
    question: String,
    created_at: i64,
}

fn question_row_to_record(row: QuestionRow) -> StorageResult<QuestionRecord> {
    Ok(QuestionRecord {
        id: QuestionId::parse(&row.id)?,
        seq: i64_to_u64(row.seq, "question-row-seq")?,
        question: row.question,
        created_at_unix_seconds: i64_to_u64(row.created_at, "question-row-created-at")?,
    })
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_secs() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
