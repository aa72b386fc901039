// src/models/page.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

use crate::engine::jump::{Jump, PageKind};

/// Represents the 'lesson_pages' table.
///
/// Pages form a doubly linked chain through `prev_page_id` / `next_page_id`,
/// where 0 marks the boundary.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Page {
    pub id: i64,
    pub lesson_id: i64,
    pub prev_page_id: i64,
    pub next_page_id: i64,

    /// Mapped from the 'qtype' column.
    #[sqlx(rename = "qtype", try_from = "i32")]
    pub kind: PageKind,

    pub title: String,
    pub contents: String,

    /// Multi-answer for multichoice, case sensitivity for short answer.
    pub qoption: bool,
    pub layout: bool,
    pub display: bool,

    pub created_at: Option<DateTime<Utc>>,
}

/// Represents the 'lesson_answers' table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Answer {
    pub id: i64,
    pub page_id: i64,
    pub lesson_id: i64,

    #[sqlx(try_from = "i64")]
    pub jumpto: Jump,

    pub score: i64,

    /// Text matched against the learner's input (choice label, pattern,
    /// numeric value or range, matching item).
    pub answer: String,

    /// Feedback, or the right-hand item of a matching pair.
    pub response: String,
}

/// Insert payload for a page.
#[derive(Debug, Clone)]
pub struct NewPage {
    pub lesson_id: i64,
    pub prev_page_id: i64,
    pub next_page_id: i64,
    pub kind: PageKind,
    pub title: String,
    pub contents: String,
    pub qoption: bool,
    pub layout: bool,
    pub display: bool,
}

/// Insert payload for an answer.
#[derive(Debug, Clone)]
pub struct NewAnswer {
    pub page_id: i64,
    pub lesson_id: i64,
    pub jumpto: Jump,
    pub score: i64,
    pub answer: String,
    pub response: String,
}

/// DTO for an answer supplied with a new page.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAnswerRequest {
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub answer: String,
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub response: String,
    pub jumpto: Jump,
    #[serde(default)]
    pub score: i64,
}

/// DTO for adding a page to a lesson.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePageRequest {
    /// The page after which the new page is inserted; 0 puts it first.
    #[serde(default)]
    pub after_page_id: i64,
    pub kind: PageKind,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 50000))]
    pub contents: String,
    #[serde(default)]
    pub qoption: bool,
    #[serde(default)]
    pub layout: bool,
    #[serde(default = "default_display")]
    pub display: bool,
    #[serde(default)]
    #[validate(nested)]
    pub answers: Vec<CreateAnswerRequest>,
}

fn default_display() -> bool {
    true
}

/// DTO for moving a page.
#[derive(Debug, Clone, Deserialize)]
pub struct MovePageRequest {
    /// The page after which the moved page lands; 0 puts it first.
    pub after_page_id: i64,
}

/// Page as shown to a learner.
#[derive(Debug, Clone, Serialize)]
pub struct PublicPage {
    pub id: i64,
    pub kind: PageKind,
    pub title: String,
    pub contents: String,
    pub qoption: bool,
    pub layout: bool,
    pub answers: Vec<PublicAnswer>,
}

/// Answer as shown to a learner: no score, no jump.
#[derive(Debug, Clone, Serialize)]
pub struct PublicAnswer {
    pub id: i64,
    pub answer: String,
    /// Only matching pages expose their right-hand items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,
}

impl PublicPage {
    pub fn from_page(page: &Page, answers: &[Answer]) -> Self {
        let answers = match page.kind {
            // Free-text questions reveal nothing.
            PageKind::ShortAnswer | PageKind::Numerical | PageKind::Essay => Vec::new(),
            // The first two answers of a matching page carry the outcome jumps.
            PageKind::Matching => answers
                .iter()
                .skip(2)
                .map(|a| PublicAnswer {
                    id: a.id,
                    answer: a.answer.clone(),
                    choice: Some(a.response.clone()),
                })
                .collect(),
            _ => answers
                .iter()
                .map(|a| PublicAnswer {
                    id: a.id,
                    answer: a.answer.clone(),
                    choice: None,
                })
                .collect(),
        };

        Self {
            id: page.id,
            kind: page.kind,
            title: page.title.clone(),
            contents: page.contents.clone(),
            qoption: page.qoption,
            layout: page.layout,
            answers,
        }
    }
}

/// Authoring view of an answer, with the jump validity flag.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerOutline {
    #[serde(flatten)]
    pub answer: Answer,
    pub jump_is_correct: bool,
}

/// Authoring view of a page.
#[derive(Debug, Clone, Serialize)]
pub struct PageOutline {
    #[serde(flatten)]
    pub page: Page,
    pub answers: Vec<AnswerOutline>,
}
