use super::ids::QuestionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuestion {
    pub question: String,
}

impl NewQuestion {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRecord {
    pub id: QuestionId,
    /// Append order, starting at 1.
    pub seq: u64,
    pub question: String,
    pub created_at_unix_seconds: u64,
}
