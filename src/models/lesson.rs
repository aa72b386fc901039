// src/models/lesson.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::Validate;

use crate::engine::LessonError;

/// Behaviour of the NEXT_PAGE jump ("flash card" modes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum NextPageDefault {
    /// Follow the chain.
    #[default]
    Normal,
    /// Show any page the learner has not seen in this retry.
    Unseen,
    /// Show any page the learner has not answered correctly in this retry.
    Unanswered,
}

impl From<NextPageDefault> for i32 {
    fn from(value: NextPageDefault) -> Self {
        match value {
            NextPageDefault::Normal => 0,
            NextPageDefault::Unseen => 1,
            NextPageDefault::Unanswered => 2,
        }
    }
}

impl TryFrom<i32> for NextPageDefault {
    type Error = LessonError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NextPageDefault::Normal),
            1 => Ok(NextPageDefault::Unseen),
            2 => Ok(NextPageDefault::Unanswered),
            other => Err(LessonError::InvalidInput(format!(
                "unknown next page policy {}",
                other
            ))),
        }
    }
}

/// Conditions a learner must meet on the prerequisite lesson.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyConditions {
    /// Minutes spent in the prerequisite lesson.
    #[serde(default)]
    pub timespent: i64,
    /// The prerequisite lesson must have been completed at least once.
    #[serde(default)]
    pub completed: bool,
    /// Minimum percentage reached in at least one retry.
    #[serde(default)]
    pub gradebetterthan: f64,
}

/// Represents the 'lessons' table: the base settings of a lesson.
///
/// Timestamps in `available` and `deadline` are unix seconds, 0 meaning unset.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub course_id: i64,
    pub name: String,

    /// Practice lessons never reach the gradebook.
    pub practice: bool,

    /// Learners may step through a completed retry again.
    pub modattempts: bool,

    pub usepassword: bool,

    /// Argon2 hash. Skipped during serialization.
    #[serde(skip)]
    pub password: Option<String>,

    /// Prerequisite lesson.
    pub dependency: Option<i64>,
    pub conditions: Json<DependencyConditions>,

    /// Maximum gradebook points.
    pub grade: i32,

    /// Per-answer scoring instead of one point per correct answer.
    pub custom: bool,

    /// Show the running score after every answer.
    pub ongoing: bool,

    pub usemaxgrade: bool,
    pub maxanswers: i32,
    pub maxattempts: i32,
    pub review: bool,

    #[sqlx(try_from = "i32")]
    pub nextpagedefault: NextPageDefault,

    /// Fall back to the default feedback text when an answer has none.
    pub feedback: bool,

    pub minquestions: i32,
    pub maxpages: i32,

    /// Seconds, 0 for no limit.
    pub timelimit: i64,

    pub retake: bool,
    pub available: i64,
    pub deadline: i64,

    pub created_at: Option<DateTime<Utc>>,
}

impl Default for Lesson {
    fn default() -> Self {
        Self {
            id: 0,
            course_id: 0,
            name: String::new(),
            practice: false,
            modattempts: false,
            usepassword: false,
            password: None,
            dependency: None,
            conditions: Json(DependencyConditions::default()),
            grade: 100,
            custom: true,
            ongoing: false,
            usemaxgrade: false,
            maxanswers: 5,
            maxattempts: 1,
            review: false,
            nextpagedefault: NextPageDefault::Normal,
            feedback: false,
            minquestions: 0,
            maxpages: 0,
            timelimit: 0,
            retake: false,
            available: 0,
            deadline: 0,
            created_at: None,
        }
    }
}

/// DTO for creating a lesson.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct CreateLessonRequest {
    pub course_id: i64,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub practice: bool,
    pub modattempts: bool,
    /// Plain text; hashed before it is stored.
    #[validate(length(max = 128))]
    pub password: Option<String>,
    pub dependency: Option<i64>,
    pub conditions: DependencyConditions,
    #[validate(range(min = 0, max = 1000))]
    pub grade: Option<i32>,
    pub custom: Option<bool>,
    pub ongoing: bool,
    pub usemaxgrade: bool,
    #[validate(range(min = 0, max = 20))]
    pub maxanswers: Option<i32>,
    #[validate(range(min = 0, max = 10))]
    pub maxattempts: Option<i32>,
    pub review: bool,
    pub nextpagedefault: NextPageDefault,
    pub feedback: bool,
    #[validate(range(min = 0, max = 100))]
    pub minquestions: i32,
    #[validate(range(min = 0, max = 100))]
    pub maxpages: i32,
    #[validate(range(min = 0))]
    pub timelimit: i64,
    pub retake: bool,
    #[validate(range(min = 0))]
    pub available: i64,
    #[validate(range(min = 0))]
    pub deadline: i64,
}

impl CreateLessonRequest {
    /// Builds the lesson row; `password_hash` replaces the plain password.
    pub fn into_lesson(self, password_hash: Option<String>) -> Lesson {
        let defaults = Lesson::default();
        Lesson {
            id: 0,
            course_id: self.course_id,
            name: self.name,
            practice: self.practice,
            modattempts: self.modattempts,
            usepassword: password_hash.is_some(),
            password: password_hash,
            dependency: self.dependency,
            conditions: Json(self.conditions),
            grade: self.grade.unwrap_or(defaults.grade),
            custom: self.custom.unwrap_or(defaults.custom),
            ongoing: self.ongoing,
            usemaxgrade: self.usemaxgrade,
            maxanswers: self.maxanswers.unwrap_or(defaults.maxanswers),
            maxattempts: self.maxattempts.unwrap_or(defaults.maxattempts),
            review: self.review,
            nextpagedefault: self.nextpagedefault,
            feedback: self.feedback,
            minquestions: self.minquestions,
            maxpages: self.maxpages,
            timelimit: self.timelimit,
            retake: self.retake,
            available: self.available,
            deadline: self.deadline,
            created_at: None,
        }
    }
}
