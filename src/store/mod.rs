// src/store/mod.rs

//! Persistence port. The engine only sees snapshots; everything that reads
//! or writes rows goes through [`LessonStore`].

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    engine::{LessonResult, graph::LinkPatch},
    models::{
        attempt::{Attempt, BranchView, Grade, NewAttempt, NewBranchView, Timer},
        lesson::Lesson,
        overrides::Override,
        page::{Answer, NewAnswer, NewPage, Page},
    },
};

pub use memory::MemoryStore;
pub use postgres::PgLessonStore;

#[async_trait]
pub trait LessonStore: Send + Sync {
    // Lessons
    async fn create_lesson(&self, lesson: Lesson) -> LessonResult<Lesson>;
    async fn get_lesson(&self, lesson_id: i64) -> LessonResult<Option<Lesson>>;

    // Pages and answers
    async fn load_pages(&self, lesson_id: i64) -> LessonResult<Vec<Page>>;
    async fn load_answers(&self, lesson_id: i64) -> LessonResult<Vec<Answer>>;
    async fn insert_page(&self, page: NewPage) -> LessonResult<Page>;
    async fn insert_answer(&self, answer: NewAnswer) -> LessonResult<Answer>;
    async fn update_page_links(&self, patch: LinkPatch) -> LessonResult<()>;
    /// Deletes the page together with its answers.
    async fn delete_page(&self, lesson_id: i64, page_id: i64) -> LessonResult<()>;

    // Attempts
    async fn insert_attempt(&self, attempt: NewAttempt) -> LessonResult<Attempt>;
    async fn attempts(&self, lesson_id: i64, user_id: i64, retry: i64)
    -> LessonResult<Vec<Attempt>>;
    async fn get_attempt(&self, attempt_id: i64) -> LessonResult<Option<Attempt>>;
    async fn update_attempt_response(
        &self,
        attempt_id: i64,
        useranswer: String,
        correct: bool,
    ) -> LessonResult<()>;

    // Branch views
    async fn insert_branch_view(&self, view: NewBranchView) -> LessonResult<BranchView>;
    async fn update_branch_view_destination(&self, view_id: i64, next_page_id: i64)
    -> LessonResult<()>;
    async fn branch_views(
        &self,
        lesson_id: i64,
        user_id: i64,
        retry: i64,
    ) -> LessonResult<Vec<BranchView>>;

    // Timers
    async fn latest_timer(&self, lesson_id: i64, user_id: i64) -> LessonResult<Option<Timer>>;
    async fn timers(&self, lesson_id: i64, user_id: i64) -> LessonResult<Vec<Timer>>;
    async fn insert_timer(
        &self,
        lesson_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> LessonResult<Timer>;
    async fn update_timer(
        &self,
        timer_id: i64,
        lessontime: DateTime<Utc>,
        completed: bool,
    ) -> LessonResult<()>;

    // Grades
    /// Completed retries, oldest first.
    async fn grades(&self, lesson_id: i64, user_id: i64) -> LessonResult<Vec<Grade>>;
    async fn insert_grade(
        &self,
        lesson_id: i64,
        user_id: i64,
        grade: f64,
        late: bool,
        completed: DateTime<Utc>,
    ) -> LessonResult<Grade>;
    async fn update_grade(&self, grade_id: i64, grade: f64) -> LessonResult<()>;

    // Overrides and groups
    async fn user_override(&self, lesson_id: i64, user_id: i64)
    -> LessonResult<Option<Override>>;
    async fn group_overrides(
        &self,
        lesson_id: i64,
        group_ids: &[i64],
    ) -> LessonResult<Vec<Override>>;
    async fn list_overrides(&self, lesson_id: i64) -> LessonResult<Vec<Override>>;
    /// Inserts, or replaces the override with the same scope.
    async fn save_override(&self, data: Override) -> LessonResult<Override>;
    async fn delete_override(&self, lesson_id: i64, override_id: i64) -> LessonResult<bool>;
    async fn user_groups(&self, user_id: i64) -> LessonResult<Vec<i64>>;
    async fn add_group_member(&self, group_id: i64, user_id: i64) -> LessonResult<()>;
}
