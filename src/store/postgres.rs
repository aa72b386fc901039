// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::LessonStore;
use crate::{
    engine::{LessonResult, graph::LinkPatch},
    models::{
        attempt::{Attempt, BranchView, Grade, NewAttempt, NewBranchView, Timer},
        lesson::Lesson,
        overrides::Override,
        page::{Answer, NewAnswer, NewPage, Page},
    },
};

const LESSON_COLUMNS: &str = r#"
    id, course_id, name, practice, modattempts, usepassword, password,
    dependency, conditions, grade, custom, ongoing, usemaxgrade, maxanswers,
    maxattempts, review, nextpagedefault, feedback, minquestions, maxpages,
    timelimit, retake, available, deadline, created_at
"#;

const PAGE_COLUMNS: &str = r#"
    id, lesson_id, prev_page_id, next_page_id, qtype, title, contents,
    qoption, layout, display, created_at
"#;

const OVERRIDE_COLUMNS: &str = r#"
    id, lesson_id, user_id, group_id, available, deadline, timelimit,
    review, maxattempts, retake, password
"#;

/// [`LessonStore`] backed by the Postgres schema in `migrations/`.
#[derive(Debug, Clone)]
pub struct PgLessonStore {
    pool: PgPool,
}

impl PgLessonStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LessonStore for PgLessonStore {
    async fn create_lesson(&self, lesson: Lesson) -> LessonResult<Lesson> {
        let sql = format!(
            r#"
            INSERT INTO lessons (
                course_id, name, practice, modattempts, usepassword, password,
                dependency, conditions, grade, custom, ongoing, usemaxgrade, maxanswers,
                maxattempts, review, nextpagedefault, feedback, minquestions, maxpages,
                timelimit, retake, available, deadline
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)
            RETURNING {}
            "#,
            LESSON_COLUMNS
        );
        let row = sqlx::query_as::<_, Lesson>(&sql)
            .bind(lesson.course_id)
            .bind(&lesson.name)
            .bind(lesson.practice)
            .bind(lesson.modattempts)
            .bind(lesson.usepassword)
            .bind(&lesson.password)
            .bind(lesson.dependency)
            .bind(&lesson.conditions)
            .bind(lesson.grade)
            .bind(lesson.custom)
            .bind(lesson.ongoing)
            .bind(lesson.usemaxgrade)
            .bind(lesson.maxanswers)
            .bind(lesson.maxattempts)
            .bind(lesson.review)
            .bind(i32::from(lesson.nextpagedefault))
            .bind(lesson.feedback)
            .bind(lesson.minquestions)
            .bind(lesson.maxpages)
            .bind(lesson.timelimit)
            .bind(lesson.retake)
            .bind(lesson.available)
            .bind(lesson.deadline)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_lesson(&self, lesson_id: i64) -> LessonResult<Option<Lesson>> {
        let sql = format!("SELECT {} FROM lessons WHERE id = $1", LESSON_COLUMNS);
        let row = sqlx::query_as::<_, Lesson>(&sql)
            .bind(lesson_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn load_pages(&self, lesson_id: i64) -> LessonResult<Vec<Page>> {
        let sql = format!(
            "SELECT {} FROM lesson_pages WHERE lesson_id = $1 ORDER BY id",
            PAGE_COLUMNS
        );
        let rows = sqlx::query_as::<_, Page>(&sql)
            .bind(lesson_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn load_answers(&self, lesson_id: i64) -> LessonResult<Vec<Answer>> {
        let rows = sqlx::query_as::<_, Answer>(
            r#"
            SELECT id, page_id, lesson_id, jumpto, score, answer, response
            FROM lesson_answers
            WHERE lesson_id = $1
            ORDER BY id
            "#,
        )
        .bind(lesson_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_page(&self, page: NewPage) -> LessonResult<Page> {
        let sql = format!(
            r#"
            INSERT INTO lesson_pages (
                lesson_id, prev_page_id, next_page_id, qtype, title, contents,
                qoption, layout, display
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            PAGE_COLUMNS
        );
        let row = sqlx::query_as::<_, Page>(&sql)
            .bind(page.lesson_id)
            .bind(page.prev_page_id)
            .bind(page.next_page_id)
            .bind(page.kind.code())
            .bind(&page.title)
            .bind(&page.contents)
            .bind(page.qoption)
            .bind(page.layout)
            .bind(page.display)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn insert_answer(&self, answer: NewAnswer) -> LessonResult<Answer> {
        let row = sqlx::query_as::<_, Answer>(
            r#"
            INSERT INTO lesson_answers (page_id, lesson_id, jumpto, score, answer, response)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, page_id, lesson_id, jumpto, score, answer, response
            "#,
        )
        .bind(answer.page_id)
        .bind(answer.lesson_id)
        .bind(answer.jumpto.code())
        .bind(answer.score)
        .bind(&answer.answer)
        .bind(&answer.response)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_page_links(&self, patch: LinkPatch) -> LessonResult<()> {
        sqlx::query("UPDATE lesson_pages SET prev_page_id = $1, next_page_id = $2 WHERE id = $3")
            .bind(patch.prev_page_id)
            .bind(patch.next_page_id)
            .bind(patch.page_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_page(&self, lesson_id: i64, page_id: i64) -> LessonResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM lesson_answers WHERE page_id = $1 AND lesson_id = $2")
            .bind(page_id)
            .bind(lesson_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM lesson_pages WHERE id = $1 AND lesson_id = $2")
            .bind(page_id)
            .bind(lesson_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_attempt(&self, attempt: NewAttempt) -> LessonResult<Attempt> {
        let row = sqlx::query_as::<_, Attempt>(
            r#"
            INSERT INTO lesson_attempts
                (lesson_id, page_id, user_id, retry, answer_id, correct, useranswer, timeseen)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, lesson_id, page_id, user_id, retry, answer_id, correct, useranswer, timeseen
            "#,
        )
        .bind(attempt.lesson_id)
        .bind(attempt.page_id)
        .bind(attempt.user_id)
        .bind(attempt.retry)
        .bind(attempt.answer_id)
        .bind(attempt.correct)
        .bind(&attempt.useranswer)
        .bind(attempt.timeseen)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn attempts(
        &self,
        lesson_id: i64,
        user_id: i64,
        retry: i64,
    ) -> LessonResult<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, Attempt>(
            r#"
            SELECT id, lesson_id, page_id, user_id, retry, answer_id, correct, useranswer, timeseen
            FROM lesson_attempts
            WHERE lesson_id = $1 AND user_id = $2 AND retry = $3
            ORDER BY timeseen, id
            "#,
        )
        .bind(lesson_id)
        .bind(user_id)
        .bind(retry)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_attempt(&self, attempt_id: i64) -> LessonResult<Option<Attempt>> {
        let row = sqlx::query_as::<_, Attempt>(
            r#"
            SELECT id, lesson_id, page_id, user_id, retry, answer_id, correct, useranswer, timeseen
            FROM lesson_attempts
            WHERE id = $1
            "#,
        )
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_attempt_response(
        &self,
        attempt_id: i64,
        useranswer: String,
        correct: bool,
    ) -> LessonResult<()> {
        sqlx::query("UPDATE lesson_attempts SET useranswer = $1, correct = $2 WHERE id = $3")
            .bind(useranswer)
            .bind(correct)
            .bind(attempt_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_branch_view(&self, view: NewBranchView) -> LessonResult<BranchView> {
        let row = sqlx::query_as::<_, BranchView>(
            r#"
            INSERT INTO lesson_branch
                (lesson_id, page_id, user_id, retry, flag, next_page_id, timeseen)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, lesson_id, page_id, user_id, retry, flag, next_page_id, timeseen
            "#,
        )
        .bind(view.lesson_id)
        .bind(view.page_id)
        .bind(view.user_id)
        .bind(view.retry)
        .bind(view.flag)
        .bind(view.next_page_id)
        .bind(view.timeseen)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_branch_view_destination(
        &self,
        view_id: i64,
        next_page_id: i64,
    ) -> LessonResult<()> {
        sqlx::query("UPDATE lesson_branch SET next_page_id = $1 WHERE id = $2")
            .bind(next_page_id)
            .bind(view_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn branch_views(
        &self,
        lesson_id: i64,
        user_id: i64,
        retry: i64,
    ) -> LessonResult<Vec<BranchView>> {
        let rows = sqlx::query_as::<_, BranchView>(
            r#"
            SELECT id, lesson_id, page_id, user_id, retry, flag, next_page_id, timeseen
            FROM lesson_branch
            WHERE lesson_id = $1 AND user_id = $2 AND retry = $3
            ORDER BY timeseen, id
            "#,
        )
        .bind(lesson_id)
        .bind(user_id)
        .bind(retry)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn latest_timer(&self, lesson_id: i64, user_id: i64) -> LessonResult<Option<Timer>> {
        let row = sqlx::query_as::<_, Timer>(
            r#"
            SELECT id, lesson_id, user_id, starttime, lessontime, completed
            FROM lesson_timer
            WHERE lesson_id = $1 AND user_id = $2
            ORDER BY starttime DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(lesson_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn timers(&self, lesson_id: i64, user_id: i64) -> LessonResult<Vec<Timer>> {
        let rows = sqlx::query_as::<_, Timer>(
            r#"
            SELECT id, lesson_id, user_id, starttime, lessontime, completed
            FROM lesson_timer
            WHERE lesson_id = $1 AND user_id = $2
            ORDER BY starttime
            "#,
        )
        .bind(lesson_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_timer(
        &self,
        lesson_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> LessonResult<Timer> {
        let row = sqlx::query_as::<_, Timer>(
            r#"
            INSERT INTO lesson_timer (lesson_id, user_id, starttime, lessontime, completed)
            VALUES ($1, $2, $3, $3, FALSE)
            RETURNING id, lesson_id, user_id, starttime, lessontime, completed
            "#,
        )
        .bind(lesson_id)
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_timer(
        &self,
        timer_id: i64,
        lessontime: DateTime<Utc>,
        completed: bool,
    ) -> LessonResult<()> {
        sqlx::query("UPDATE lesson_timer SET lessontime = $1, completed = $2 WHERE id = $3")
            .bind(lessontime)
            .bind(completed)
            .bind(timer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn grades(&self, lesson_id: i64, user_id: i64) -> LessonResult<Vec<Grade>> {
        let rows = sqlx::query_as::<_, Grade>(
            r#"
            SELECT id, lesson_id, user_id, grade, late, completed
            FROM lesson_grades
            WHERE lesson_id = $1 AND user_id = $2
            ORDER BY completed, id
            "#,
        )
        .bind(lesson_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_grade(
        &self,
        lesson_id: i64,
        user_id: i64,
        grade: f64,
        late: bool,
        completed: DateTime<Utc>,
    ) -> LessonResult<Grade> {
        let row = sqlx::query_as::<_, Grade>(
            r#"
            INSERT INTO lesson_grades (lesson_id, user_id, grade, late, completed)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, lesson_id, user_id, grade, late, completed
            "#,
        )
        .bind(lesson_id)
        .bind(user_id)
        .bind(grade)
        .bind(late)
        .bind(completed)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_grade(&self, grade_id: i64, grade: f64) -> LessonResult<()> {
        sqlx::query("UPDATE lesson_grades SET grade = $1 WHERE id = $2")
            .bind(grade)
            .bind(grade_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn user_override(
        &self,
        lesson_id: i64,
        user_id: i64,
    ) -> LessonResult<Option<Override>> {
        let sql = format!(
            "SELECT {} FROM lesson_overrides WHERE lesson_id = $1 AND user_id = $2",
            OVERRIDE_COLUMNS
        );
        let row = sqlx::query_as::<_, Override>(&sql)
            .bind(lesson_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn group_overrides(
        &self,
        lesson_id: i64,
        group_ids: &[i64],
    ) -> LessonResult<Vec<Override>> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM lesson_overrides WHERE lesson_id = $1 AND group_id = ANY($2) ORDER BY id",
            OVERRIDE_COLUMNS
        );
        let rows = sqlx::query_as::<_, Override>(&sql)
            .bind(lesson_id)
            .bind(group_ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_overrides(&self, lesson_id: i64) -> LessonResult<Vec<Override>> {
        let sql = format!(
            "SELECT {} FROM lesson_overrides WHERE lesson_id = $1 ORDER BY id",
            OVERRIDE_COLUMNS
        );
        let rows = sqlx::query_as::<_, Override>(&sql)
            .bind(lesson_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn save_override(&self, data: Override) -> LessonResult<Override> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM lesson_overrides
            WHERE lesson_id = $1
              AND user_id IS NOT DISTINCT FROM $2
              AND group_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(data.lesson_id)
        .bind(data.user_id)
        .bind(data.group_id)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match existing {
            Some((id,)) => {
                let sql = format!(
                    r#"
                    UPDATE lesson_overrides
                    SET available = $2, deadline = $3, timelimit = $4, review = $5,
                        maxattempts = $6, retake = $7, password = $8
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    OVERRIDE_COLUMNS
                );
                sqlx::query_as::<_, Override>(&sql)
                    .bind(id)
                    .bind(data.available)
                    .bind(data.deadline)
                    .bind(data.timelimit)
                    .bind(data.review)
                    .bind(data.maxattempts)
                    .bind(data.retake)
                    .bind(&data.password)
                    .fetch_one(&mut *tx)
                    .await?
            }
            None => {
                let sql = format!(
                    r#"
                    INSERT INTO lesson_overrides
                        (lesson_id, user_id, group_id, available, deadline, timelimit,
                         review, maxattempts, retake, password)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    RETURNING {}
                    "#,
                    OVERRIDE_COLUMNS
                );
                sqlx::query_as::<_, Override>(&sql)
                    .bind(data.lesson_id)
                    .bind(data.user_id)
                    .bind(data.group_id)
                    .bind(data.available)
                    .bind(data.deadline)
                    .bind(data.timelimit)
                    .bind(data.review)
                    .bind(data.maxattempts)
                    .bind(data.retake)
                    .bind(&data.password)
                    .fetch_one(&mut *tx)
                    .await?
            }
        };

        tx.commit().await?;
        Ok(row)
    }

    async fn delete_override(&self, lesson_id: i64, override_id: i64) -> LessonResult<bool> {
        let result = sqlx::query("DELETE FROM lesson_overrides WHERE id = $1 AND lesson_id = $2")
            .bind(override_id)
            .bind(lesson_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn user_groups(&self, user_id: i64) -> LessonResult<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT group_id FROM group_members WHERE user_id = $1 ORDER BY group_id")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn add_group_member(&self, group_id: i64, user_id: i64) -> LessonResult<()> {
        sqlx::query(
            "INSERT INTO group_members (group_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(group_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
