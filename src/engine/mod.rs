// src/engine/mod.rs

//! The lesson engine: page graph, attempt ledger, access resolution,
//! navigation and grading. Everything in here is synchronous and works on
//! snapshots loaded by the session layer.

pub mod access;
pub mod evaluate;
pub mod grading;
pub mod graph;
pub mod jump;
pub mod ledger;
pub mod navigation;
pub mod progress;

use serde::Serialize;
use thiserror::Error;

/// Errors raised by the engine and the storage port.
///
/// Expected learner-facing outcomes (closed lesson, wrong password, ...) are
/// not errors; see [`PolicyViolation`].
#[derive(Debug, Error)]
pub enum LessonError {
    #[error("lesson {0} not found")]
    LessonNotFound(i64),

    #[error("page {0} not found")]
    PageNotFound(i64),

    #[error("answer {0} not found")]
    AnswerNotFound(i64),

    #[error("attempt {0} not found")]
    AttemptNotFound(i64),

    /// Walking up the chain reached the lesson start without finding the
    /// enclosing structure.
    #[error("page {page_id} is not inside a {structure}")]
    NoEnclosingStructure { page_id: i64, structure: &'static str },

    #[error("data integrity: {0}")]
    DataIntegrity(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

pub type LessonResult<T> = Result<T, LessonError>;

impl From<sqlx::Error> for LessonError {
    fn from(err: sqlx::Error) -> Self {
        LessonError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for LessonError {
    fn from(err: serde_json::Error) -> Self {
        LessonError::DataIntegrity(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// A message for the learner, returned next to navigation and grading results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }
}

/// Recoverable refusals. These travel back to the caller as values so the
/// presentation layer can render a proper message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum PolicyViolation {
    NotYetAvailable { available: i64 },
    Closed { deadline: i64 },
    PasswordRequired,
    PasswordMismatch,
    NoMoreRetakes,
    Prerequisite { lesson_id: i64, unmet: Vec<String> },
    NotStarted,
    ReviewUnavailable,
}

impl PolicyViolation {
    pub fn message(&self) -> String {
        match self {
            PolicyViolation::NotYetAvailable { available } => {
                format!("This lesson will be open from {}", available)
            }
            PolicyViolation::Closed { deadline } => {
                format!("This lesson closed at {}", deadline)
            }
            PolicyViolation::PasswordRequired => "This lesson is password protected".to_string(),
            PolicyViolation::PasswordMismatch => "Incorrect password".to_string(),
            PolicyViolation::NoMoreRetakes => {
                "You are not allowed to retake this lesson".to_string()
            }
            PolicyViolation::Prerequisite { lesson_id, unmet } => format!(
                "You must first meet the conditions of lesson {}: {}",
                lesson_id,
                unmet.join(", ")
            ),
            PolicyViolation::NotStarted => "Start the lesson before continuing".to_string(),
            PolicyViolation::ReviewUnavailable => {
                "There is no completed attempt to review".to_string()
            }
        }
    }
}
