//! Append-only log of the questions users submit.

pub mod error;
pub mod ids;
pub mod sqlite;
pub mod types;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinHandle;

pub use error::{StorageError, StorageResult};
pub use ids::QuestionId;
pub use sqlite::SqliteQuestionLog;
pub use types::{NewQuestion, QuestionRecord};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait QuestionLog: Send + Sync {
    fn append_question<'a>(
        &'a self,
        input: NewQuestion,
    ) -> BoxFuture<'a, StorageResult<QuestionRecord>>;

    fn list_questions<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<QuestionRecord>>>;
}

/// Records a question without making the caller wait.
///
/// The outcome is only observable through logs; chat flow never depends on it. The
/// returned handle exists so tests can await completion.
pub fn record_question_detached(
    log: Arc<dyn QuestionLog>,
    question: impl Into<String>,
) -> JoinHandle<()> {
    let input = NewQuestion::new(question);
    tokio::spawn(async move {
        match log.append_question(input).await {
            Ok(record) => {
                tracing::info!(
                    question_id = %record.id,
                    seq = record.seq,
                    "question saved to log"
                );
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to save question to log");
            }
        }
    })
}
