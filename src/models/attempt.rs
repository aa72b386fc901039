// src/models/attempt.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

use crate::engine::jump::Jump;

/// Represents the 'lesson_attempts' table: one answer to one question page.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub lesson_id: i64,
    pub page_id: i64,
    pub user_id: i64,

    /// 0-based playthrough number.
    pub retry: i64,

    pub answer_id: Option<i64>,
    pub correct: bool,

    /// Serialized learner input. Essays store an [`EssayPayload`].
    pub useranswer: Option<String>,

    pub timeseen: DateTime<Utc>,
}

/// Represents the 'lesson_branch' table: a visit to a structural page.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct BranchView {
    pub id: i64,
    pub lesson_id: i64,
    pub page_id: i64,
    pub user_id: i64,
    pub retry: i64,

    /// Set on the branch table that triggered a random-branch jump.
    pub flag: bool,

    /// Where the button led: a page id, or -9 for the end of the lesson.
    pub next_page_id: i64,

    pub timeseen: DateTime<Utc>,
}

/// Represents the 'lesson_timer' table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Timer {
    pub id: i64,
    pub lesson_id: i64,
    pub user_id: i64,
    pub starttime: DateTime<Utc>,
    pub lessontime: DateTime<Utc>,
    pub completed: bool,
}

impl Timer {
    /// Seconds between start and the last update.
    pub fn elapsed_secs(&self) -> i64 {
        (self.lessontime - self.starttime).num_seconds().max(0)
    }

    /// Seconds left before `timelimit` runs out, `None` when unlimited.
    pub fn remaining_secs(&self, timelimit: i64, now: DateTime<Utc>) -> Option<i64> {
        if timelimit <= 0 {
            return None;
        }
        let used = (now - self.starttime).num_seconds();
        Some((timelimit - used).max(0))
    }

    pub fn is_expired(&self, timelimit: i64, now: DateTime<Utc>) -> bool {
        self.remaining_secs(timelimit, now) == Some(0)
    }
}

/// Represents the 'lesson_grades' table: one row per completed retry.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Grade {
    pub id: i64,
    pub lesson_id: i64,
    pub user_id: i64,
    /// Percentage, 0 to 100.
    pub grade: f64,
    pub late: bool,
    pub completed: DateTime<Utc>,
}

/// Insert payload for an attempt.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub lesson_id: i64,
    pub page_id: i64,
    pub user_id: i64,
    pub retry: i64,
    pub answer_id: Option<i64>,
    pub correct: bool,
    pub useranswer: Option<String>,
    pub timeseen: DateTime<Utc>,
}

/// Insert payload for a branch view.
#[derive(Debug, Clone)]
pub struct NewBranchView {
    pub lesson_id: i64,
    pub page_id: i64,
    pub user_id: i64,
    pub retry: i64,
    pub flag: bool,
    pub next_page_id: i64,
    pub timeseen: DateTime<Utc>,
}

/// Stored learner input for essay pages, including the teacher's mark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EssayPayload {
    pub answer: String,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub graded: bool,
}

/// DTO for answering a page.
///
/// Which fields matter depends on the page type: `answer_id` for single
/// choice and branch buttons, `answer_ids` for multi-answer multichoice,
/// `response` for free text, `matches` for matching pages.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct SubmitAnswerRequest {
    pub answer_id: Option<i64>,
    pub answer_ids: Vec<i64>,
    #[validate(length(max = 20000))]
    pub response: Option<String>,
    /// Matching pairs: answer id to the chosen right-hand item.
    pub matches: BTreeMap<i64, String>,
    /// Step through the last completed retry instead of playing a new one.
    pub review: bool,
}

/// DTO for starting (or resuming) a lesson.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct StartLessonRequest {
    #[validate(length(max = 128))]
    pub password: Option<String>,
}

/// DTO for a navigation request.
#[derive(Debug, Clone, Deserialize)]
pub struct NavigateRequest {
    pub current_page_id: i64,
    pub jump: Jump,
    #[serde(default)]
    pub review: bool,
}

/// DTO for finishing a lesson.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FinishLessonRequest {
    pub review: bool,
}

/// DTO for a teacher marking an essay.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GradeEssayRequest {
    #[validate(range(min = 0))]
    pub score: i64,
    #[serde(default)]
    #[validate(length(max = 20000))]
    pub comment: Option<String>,
}
