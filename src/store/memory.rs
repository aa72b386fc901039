// src/store/memory.rs

use std::{
    collections::BTreeSet,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::LessonStore;
use crate::{
    engine::{LessonError, LessonResult, graph::LinkPatch},
    models::{
        attempt::{Attempt, BranchView, Grade, NewAttempt, NewBranchView, Timer},
        lesson::Lesson,
        overrides::Override,
        page::{Answer, NewAnswer, NewPage, Page},
    },
};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    lessons: Vec<Lesson>,
    pages: Vec<Page>,
    answers: Vec<Answer>,
    attempts: Vec<Attempt>,
    branch_views: Vec<BranchView>,
    timers: Vec<Timer>,
    grades: Vec<Grade>,
    overrides: Vec<Override>,
    group_members: BTreeSet<(i64, i64)>,
}

impl Tables {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local store used when no database is configured, and by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> LessonResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| LessonError::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl LessonStore for MemoryStore {
    async fn create_lesson(&self, mut lesson: Lesson) -> LessonResult<Lesson> {
        let mut t = self.lock()?;
        lesson.id = t.id();
        lesson.created_at = Some(Utc::now());
        t.lessons.push(lesson.clone());
        Ok(lesson)
    }

    async fn get_lesson(&self, lesson_id: i64) -> LessonResult<Option<Lesson>> {
        let t = self.lock()?;
        Ok(t.lessons.iter().find(|l| l.id == lesson_id).cloned())
    }

    async fn load_pages(&self, lesson_id: i64) -> LessonResult<Vec<Page>> {
        let t = self.lock()?;
        Ok(t.pages
            .iter()
            .filter(|p| p.lesson_id == lesson_id)
            .cloned()
            .collect())
    }

    async fn load_answers(&self, lesson_id: i64) -> LessonResult<Vec<Answer>> {
        let t = self.lock()?;
        Ok(t.answers
            .iter()
            .filter(|a| a.lesson_id == lesson_id)
            .cloned()
            .collect())
    }

    async fn insert_page(&self, page: NewPage) -> LessonResult<Page> {
        let mut t = self.lock()?;
        let row = Page {
            id: t.id(),
            lesson_id: page.lesson_id,
            prev_page_id: page.prev_page_id,
            next_page_id: page.next_page_id,
            kind: page.kind,
            title: page.title,
            contents: page.contents,
            qoption: page.qoption,
            layout: page.layout,
            display: page.display,
            created_at: Some(Utc::now()),
        };
        t.pages.push(row.clone());
        Ok(row)
    }

    async fn insert_answer(&self, answer: NewAnswer) -> LessonResult<Answer> {
        let mut t = self.lock()?;
        let row = Answer {
            id: t.id(),
            page_id: answer.page_id,
            lesson_id: answer.lesson_id,
            jumpto: answer.jumpto,
            score: answer.score,
            answer: answer.answer,
            response: answer.response,
        };
        t.answers.push(row.clone());
        Ok(row)
    }

    async fn update_page_links(&self, patch: LinkPatch) -> LessonResult<()> {
        let mut t = self.lock()?;
        let page = t
            .pages
            .iter_mut()
            .find(|p| p.id == patch.page_id)
            .ok_or(LessonError::PageNotFound(patch.page_id))?;
        page.prev_page_id = patch.prev_page_id;
        page.next_page_id = patch.next_page_id;
        Ok(())
    }

    async fn delete_page(&self, lesson_id: i64, page_id: i64) -> LessonResult<()> {
        let mut t = self.lock()?;
        t.answers.retain(|a| a.page_id != page_id);
        t.pages
            .retain(|p| !(p.id == page_id && p.lesson_id == lesson_id));
        Ok(())
    }

    async fn insert_attempt(&self, attempt: NewAttempt) -> LessonResult<Attempt> {
        let mut t = self.lock()?;
        let row = Attempt {
            id: t.id(),
            lesson_id: attempt.lesson_id,
            page_id: attempt.page_id,
            user_id: attempt.user_id,
            retry: attempt.retry,
            answer_id: attempt.answer_id,
            correct: attempt.correct,
            useranswer: attempt.useranswer,
            timeseen: attempt.timeseen,
        };
        t.attempts.push(row.clone());
        Ok(row)
    }

    async fn attempts(
        &self,
        lesson_id: i64,
        user_id: i64,
        retry: i64,
    ) -> LessonResult<Vec<Attempt>> {
        let t = self.lock()?;
        Ok(t.attempts
            .iter()
            .filter(|a| a.lesson_id == lesson_id && a.user_id == user_id && a.retry == retry)
            .cloned()
            .collect())
    }

    async fn get_attempt(&self, attempt_id: i64) -> LessonResult<Option<Attempt>> {
        let t = self.lock()?;
        Ok(t.attempts.iter().find(|a| a.id == attempt_id).cloned())
    }

    async fn update_attempt_response(
        &self,
        attempt_id: i64,
        useranswer: String,
        correct: bool,
    ) -> LessonResult<()> {
        let mut t = self.lock()?;
        let attempt = t
            .attempts
            .iter_mut()
            .find(|a| a.id == attempt_id)
            .ok_or(LessonError::AttemptNotFound(attempt_id))?;
        attempt.useranswer = Some(useranswer);
        attempt.correct = correct;
        Ok(())
    }

    async fn insert_branch_view(&self, view: NewBranchView) -> LessonResult<BranchView> {
        let mut t = self.lock()?;
        let row = BranchView {
            id: t.id(),
            lesson_id: view.lesson_id,
            page_id: view.page_id,
            user_id: view.user_id,
            retry: view.retry,
            flag: view.flag,
            next_page_id: view.next_page_id,
            timeseen: view.timeseen,
        };
        t.branch_views.push(row.clone());
        Ok(row)
    }

    async fn update_branch_view_destination(
        &self,
        view_id: i64,
        next_page_id: i64,
    ) -> LessonResult<()> {
        let mut t = self.lock()?;
        if let Some(view) = t.branch_views.iter_mut().find(|v| v.id == view_id) {
            view.next_page_id = next_page_id;
        }
        Ok(())
    }

    async fn branch_views(
        &self,
        lesson_id: i64,
        user_id: i64,
        retry: i64,
    ) -> LessonResult<Vec<BranchView>> {
        let t = self.lock()?;
        Ok(t.branch_views
            .iter()
            .filter(|v| v.lesson_id == lesson_id && v.user_id == user_id && v.retry == retry)
            .cloned()
            .collect())
    }

    async fn latest_timer(&self, lesson_id: i64, user_id: i64) -> LessonResult<Option<Timer>> {
        let t = self.lock()?;
        Ok(t.timers
            .iter()
            .filter(|r| r.lesson_id == lesson_id && r.user_id == user_id)
            .max_by(|a, b| a.starttime.cmp(&b.starttime).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn timers(&self, lesson_id: i64, user_id: i64) -> LessonResult<Vec<Timer>> {
        let t = self.lock()?;
        Ok(t.timers
            .iter()
            .filter(|r| r.lesson_id == lesson_id && r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_timer(
        &self,
        lesson_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> LessonResult<Timer> {
        let mut t = self.lock()?;
        let row = Timer {
            id: t.id(),
            lesson_id,
            user_id,
            starttime: now,
            lessontime: now,
            completed: false,
        };
        t.timers.push(row.clone());
        Ok(row)
    }

    async fn update_timer(
        &self,
        timer_id: i64,
        lessontime: DateTime<Utc>,
        completed: bool,
    ) -> LessonResult<()> {
        let mut t = self.lock()?;
        if let Some(timer) = t.timers.iter_mut().find(|r| r.id == timer_id) {
            timer.lessontime = lessontime;
            timer.completed = completed;
        }
        Ok(())
    }

    async fn grades(&self, lesson_id: i64, user_id: i64) -> LessonResult<Vec<Grade>> {
        let t = self.lock()?;
        let mut grades: Vec<Grade> = t
            .grades
            .iter()
            .filter(|g| g.lesson_id == lesson_id && g.user_id == user_id)
            .cloned()
            .collect();
        grades.sort_by(|a, b| a.completed.cmp(&b.completed).then(a.id.cmp(&b.id)));
        Ok(grades)
    }

    async fn insert_grade(
        &self,
        lesson_id: i64,
        user_id: i64,
        grade: f64,
        late: bool,
        completed: DateTime<Utc>,
    ) -> LessonResult<Grade> {
        let mut t = self.lock()?;
        let row = Grade {
            id: t.id(),
            lesson_id,
            user_id,
            grade,
            late,
            completed,
        };
        t.grades.push(row.clone());
        Ok(row)
    }

    async fn update_grade(&self, grade_id: i64, grade: f64) -> LessonResult<()> {
        let mut t = self.lock()?;
        if let Some(row) = t.grades.iter_mut().find(|g| g.id == grade_id) {
            row.grade = grade;
        }
        Ok(())
    }

    async fn user_override(
        &self,
        lesson_id: i64,
        user_id: i64,
    ) -> LessonResult<Option<Override>> {
        let t = self.lock()?;
        Ok(t.overrides
            .iter()
            .find(|o| o.lesson_id == lesson_id && o.user_id == Some(user_id))
            .cloned())
    }

    async fn group_overrides(
        &self,
        lesson_id: i64,
        group_ids: &[i64],
    ) -> LessonResult<Vec<Override>> {
        let t = self.lock()?;
        Ok(t.overrides
            .iter()
            .filter(|o| {
                o.lesson_id == lesson_id && o.group_id.is_some_and(|g| group_ids.contains(&g))
            })
            .cloned()
            .collect())
    }

    async fn list_overrides(&self, lesson_id: i64) -> LessonResult<Vec<Override>> {
        let t = self.lock()?;
        Ok(t.overrides
            .iter()
            .filter(|o| o.lesson_id == lesson_id)
            .cloned()
            .collect())
    }

    async fn save_override(&self, mut data: Override) -> LessonResult<Override> {
        let mut t = self.lock()?;
        let existing = t.overrides.iter().position(|o| {
            o.lesson_id == data.lesson_id && o.user_id == data.user_id && o.group_id == data.group_id
        });
        match existing {
            Some(index) => {
                data.id = t.overrides[index].id;
                t.overrides[index] = data.clone();
            }
            None => {
                data.id = t.id();
                t.overrides.push(data.clone());
            }
        }
        Ok(data)
    }

    async fn delete_override(&self, lesson_id: i64, override_id: i64) -> LessonResult<bool> {
        let mut t = self.lock()?;
        let before = t.overrides.len();
        t.overrides
            .retain(|o| !(o.id == override_id && o.lesson_id == lesson_id));
        Ok(t.overrides.len() != before)
    }

    async fn user_groups(&self, user_id: i64) -> LessonResult<Vec<i64>> {
        let t = self.lock()?;
        Ok(t.group_members
            .iter()
            .filter(|(_, member)| *member == user_id)
            .map(|(group, _)| *group)
            .collect())
    }

    async fn add_group_member(&self, group_id: i64, user_id: i64) -> LessonResult<()> {
        let mut t = self.lock()?;
        t.group_members.insert((group_id, user_id));
        Ok(())
    }
}
