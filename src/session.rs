// src/session.rs

//! Request-level orchestration: loads snapshots from the store, applies the
//! access policy, runs the engine and records the outcome.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use serde::Serialize;

use crate::{
    engine::{
        LessonError, LessonResult, Notice, PolicyViolation,
        access::{self, EffectiveAccess},
        evaluate::evaluate,
        grading::{self, GradeInfo},
        graph::PageGraph,
        jump::{Destination, Jump, PageKind},
        ledger::Ledger,
        navigation::{Navigator, jumpto_is_correct},
        progress::calculate_progress,
    },
    models::{
        attempt::{
            Attempt, EssayPayload, Grade, NewAttempt, NewBranchView, SubmitAnswerRequest, Timer,
        },
        lesson::Lesson,
        overrides::Override,
        page::{AnswerOutline, CreatePageRequest, NewAnswer, NewPage, PageOutline, PublicPage},
    },
    store::LessonStore,
    utils::{hash::verify_password, html::clean_html},
};

/// Who is acting on the lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    /// Teachers preview the lesson: no policy checks, no recorded attempts,
    /// and clusters are walked literally.
    pub can_manage: bool,
}

impl Actor {
    pub fn learner(user_id: i64) -> Self {
        Self {
            user_id,
            can_manage: false,
        }
    }

    pub fn manager(user_id: i64) -> Self {
        Self {
            user_id,
            can_manage: true,
        }
    }
}

/// Either the operation ran, or a policy refused it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Gate<T> {
    Open(T),
    Blocked(PolicyViolation),
}

#[derive(Debug, Clone, Serialize)]
pub struct StartInfo {
    pub retry: i64,
    /// First displayable page.
    pub page: Destination,
    pub view: Option<PublicPage>,
    /// Where the learner stopped in this retry, if anywhere.
    pub last_page_seen: Option<i64>,
    /// Seconds, `None` without a time limit.
    pub time_remaining: Option<i64>,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NavigationResult {
    pub page: Destination,
    pub view: Option<PublicPage>,
    pub time_remaining: Option<i64>,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptResult {
    pub correct: bool,
    pub score: i64,
    pub new_page: Destination,
    pub feedback: Option<String>,
    pub attempts_remaining: Option<i64>,
    pub max_attempts_reached: bool,
    pub attempt_id: Option<i64>,
    pub no_answer: bool,
    pub notices: Vec<Notice>,
}

impl AttemptResult {
    fn stay(page_id: i64, notice: Notice) -> Self {
        Self {
            correct: false,
            score: 0,
            new_page: Destination::Page(page_id),
            feedback: None,
            attempts_remaining: None,
            max_attempts_reached: false,
            attempt_id: None,
            no_answer: true,
            notices: vec![notice],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub retry: i64,
    pub grade: GradeInfo,
    /// A grade row was written for this retry.
    pub recorded: bool,
    pub progress: i64,
    /// Aggregate scaled to the lesson's maximum grade.
    pub gradebook: Option<f64>,
    pub can_retake: bool,
    pub can_review: bool,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserGrade {
    pub user_id: i64,
    pub grades: Vec<Grade>,
    pub aggregate: Option<f64>,
    pub gradebook: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EssayGrading {
    pub attempt: Attempt,
    /// The recomputed grade of the attempt's retry, when that retry was completed.
    pub regraded: Option<f64>,
}

/// Everything a play request works on.
struct PlayContext {
    access: EffectiveAccess,
    effective: Lesson,
    graph: PageGraph,
    ledger: Ledger,
    grades: Vec<Grade>,
    timer: Option<Timer>,
    reviewing: bool,
    now: DateTime<Utc>,
}

impl PlayContext {
    fn retries(&self) -> i64 {
        self.grades.len() as i64
    }

    fn navigator(&self, actor: Actor) -> Navigator<'_> {
        Navigator::new(&self.effective, &self.graph, &self.ledger)
            .managing(actor.can_manage)
            .reviewing(self.reviewing)
    }

    fn time_remaining(&self) -> Option<i64> {
        self.timer
            .as_ref()
            .and_then(|t| t.remaining_secs(self.access.timelimit, self.now))
    }

    fn out_of_time(&self, actor: Actor) -> bool {
        !actor.can_manage
            && !self.reviewing
            && self
                .timer
                .as_ref()
                .is_some_and(|t| t.is_expired(self.access.timelimit, self.now))
    }

    fn view(&self, destination: Destination) -> Option<PublicPage> {
        let page = self.graph.get(destination.page_id()?).ok()?;
        Some(PublicPage::from_page(page, self.graph.answers(page.id)))
    }
}

const OUT_OF_TIME: &str = "You ran out of time for this lesson";

/// Lesson engine entry point, shared across requests.
#[derive(Clone)]
pub struct LessonSession {
    store: Arc<dyn LessonStore>,
    rng: Arc<Mutex<StdRng>>,
}

impl LessonSession {
    pub fn new(store: Arc<dyn LessonStore>, rng: StdRng) -> Self {
        Self {
            store,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn store(&self) -> &Arc<dyn LessonStore> {
        &self.store
    }

    /// Runs `f` with the shared random source. Never held across an await.
    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> LessonResult<T> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| LessonError::Storage("random source lock poisoned".to_string()))?;
        Ok(f(&mut rng))
    }

    async fn load_lesson(&self, lesson_id: i64) -> LessonResult<Lesson> {
        self.store
            .get_lesson(lesson_id)
            .await?
            .ok_or(LessonError::LessonNotFound(lesson_id))
    }

    /// Loads the page graph and writes back any link repairs.
    async fn load_graph(&self, lesson_id: i64) -> LessonResult<PageGraph> {
        let pages = self.store.load_pages(lesson_id).await?;
        let answers = self.store.load_answers(lesson_id).await?;
        let graph = PageGraph::load(lesson_id, pages, answers);
        for patch in graph.repairs() {
            self.store.update_page_links(*patch).await?;
        }
        Ok(graph)
    }

    async fn load_ledger(&self, lesson_id: i64, user_id: i64, retry: i64) -> LessonResult<Ledger> {
        let attempts = self.store.attempts(lesson_id, user_id, retry).await?;
        let views = self.store.branch_views(lesson_id, user_id, retry).await?;
        Ok(Ledger::new(retry, attempts, views))
    }

    async fn resolve_access(&self, lesson: &Lesson, user_id: i64) -> LessonResult<EffectiveAccess> {
        let user_override = self.store.user_override(lesson.id, user_id).await?;
        let groups = self.store.user_groups(user_id).await?;
        let group_overrides = self.store.group_overrides(lesson.id, &groups).await?;
        Ok(access::resolve(
            lesson,
            user_id,
            user_override.as_ref(),
            &group_overrides,
        ))
    }

    /// Effective settings of `user_id` for a lesson.
    pub async fn effective_access(
        &self,
        lesson_id: i64,
        user_id: i64,
    ) -> LessonResult<EffectiveAccess> {
        let lesson = self.load_lesson(lesson_id).await?;
        self.resolve_access(&lesson, user_id).await
    }

    async fn dependency_violation(
        &self,
        lesson: &Lesson,
        user_id: i64,
    ) -> LessonResult<Option<PolicyViolation>> {
        let Some(dependency) = lesson.dependency else {
            return Ok(None);
        };
        if self.store.get_lesson(dependency).await?.is_none() {
            tracing::warn!(
                "Lesson {} depends on missing lesson {}",
                lesson.id,
                dependency
            );
            return Ok(None);
        }

        let conditions = &lesson.conditions.0;
        let mut unmet = Vec::new();
        if conditions.timespent > 0 {
            let timers = self.store.timers(dependency, user_id).await?;
            let spent: i64 = timers.iter().map(Timer::elapsed_secs).sum();
            if spent < conditions.timespent * 60 {
                unmet.push(format!(
                    "spend at least {} minutes in the lesson",
                    conditions.timespent
                ));
            }
        }
        let grades = self.store.grades(dependency, user_id).await?;
        if conditions.completed && grades.is_empty() {
            unmet.push("complete the lesson".to_string());
        }
        if conditions.gradebetterthan > 0.0
            && !grades.iter().any(|g| g.grade >= conditions.gradebetterthan)
        {
            unmet.push(format!(
                "reach a grade of at least {}%",
                conditions.gradebetterthan
            ));
        }

        Ok((!unmet.is_empty()).then_some(PolicyViolation::Prerequisite {
            lesson_id: dependency,
            unmet,
        }))
    }

    /// Starts a new retry or resumes the active one.
    pub async fn start(
        &self,
        lesson_id: i64,
        actor: Actor,
        password: Option<&str>,
    ) -> LessonResult<Gate<StartInfo>> {
        let lesson = self.load_lesson(lesson_id).await?;
        let access = self.resolve_access(&lesson, actor.user_id).await?;
        let grades = self.store.grades(lesson_id, actor.user_id).await?;
        let retries = grades.len() as i64;
        let now = Utc::now();

        if !actor.can_manage {
            if let Some(violation) = access.window_violation(now.timestamp()) {
                return Ok(Gate::Blocked(violation));
            }
            if access.usepassword {
                let Some(password) = password.filter(|p| !p.is_empty()) else {
                    return Ok(Gate::Blocked(PolicyViolation::PasswordRequired));
                };
                let accepted = access.accepted_passwords().any(|hash| {
                    verify_password(password, hash).unwrap_or_else(|e| {
                        tracing::warn!("Unusable password hash on lesson {}: {}", lesson_id, e);
                        false
                    })
                });
                if !accepted {
                    return Ok(Gate::Blocked(PolicyViolation::PasswordMismatch));
                }
            }
            if let Some(violation) = self.dependency_violation(&lesson, actor.user_id).await? {
                return Ok(Gate::Blocked(violation));
            }
            if retries > 0 && !access.retake {
                return Ok(Gate::Blocked(PolicyViolation::NoMoreRetakes));
            }
        }

        let timer = match self.store.latest_timer(lesson_id, actor.user_id).await? {
            Some(timer) if !timer.completed => timer,
            _ => {
                tracing::info!(
                    "User {} starts retry {} of lesson {}",
                    actor.user_id,
                    retries,
                    lesson_id
                );
                self.store
                    .insert_timer(lesson_id, actor.user_id, now)
                    .await?
            }
        };

        let effective = access.apply_to(&lesson);
        let graph = self.load_graph(lesson_id).await?;
        let ledger = self.load_ledger(lesson_id, actor.user_id, retries).await?;

        let first = graph
            .first_page()
            .map(|p| Destination::Page(p.id))
            .unwrap_or(Destination::EndOfLesson);
        let navigator = Navigator::new(&effective, &graph, &ledger).managing(actor.can_manage);
        let page = self.with_rng(|rng| navigator.settle(first, rng))??;

        let mut notices = Vec::new();
        if actor.can_manage {
            notices.push(Notice::info(
                "You are previewing this lesson: attempts are not recorded",
            ));
        }
        let last_page_seen = ledger.last_seen_page();
        if last_page_seen.is_some() {
            notices.push(Notice::info(
                "You have already seen pages of this lesson; you may continue where you left off",
            ));
        }
        let time_remaining = timer.remaining_secs(access.timelimit, now);
        if let Some(seconds) = time_remaining {
            notices.push(Notice::info(format!(
                "You have {} minute(s) to finish the lesson",
                seconds / 60
            )));
        }

        let view = page
            .page_id()
            .and_then(|id| graph.get(id).ok())
            .map(|p| PublicPage::from_page(p, graph.answers(p.id)));

        Ok(Gate::Open(StartInfo {
            retry: retries,
            page,
            view,
            last_page_seen,
            time_remaining,
            notices,
        }))
    }

    /// Loads the state a play request works on, or the policy refusing it.
    async fn play_context(
        &self,
        lesson_id: i64,
        actor: Actor,
        review: bool,
    ) -> LessonResult<Gate<PlayContext>> {
        let lesson = self.load_lesson(lesson_id).await?;
        let access = self.resolve_access(&lesson, actor.user_id).await?;
        let grades = self.store.grades(lesson_id, actor.user_id).await?;
        let retries = grades.len() as i64;
        let now = Utc::now();

        if !actor.can_manage {
            if let Some(violation) = access.window_violation(now.timestamp()) {
                return Ok(Gate::Blocked(violation));
            }
        }

        let effective = access.apply_to(&lesson);
        let (retry, timer) = if review {
            if !effective.modattempts || retries == 0 {
                return Ok(Gate::Blocked(PolicyViolation::ReviewUnavailable));
            }
            (retries - 1, None)
        } else {
            let timer = self
                .store
                .latest_timer(lesson_id, actor.user_id)
                .await?
                .filter(|t| !t.completed);
            if timer.is_none() && !actor.can_manage {
                return Ok(Gate::Blocked(PolicyViolation::NotStarted));
            }
            (retries, timer)
        };

        let graph = self.load_graph(lesson_id).await?;
        let ledger = self.load_ledger(lesson_id, actor.user_id, retry).await?;

        Ok(Gate::Open(PlayContext {
            access,
            effective,
            graph,
            ledger,
            grades,
            timer,
            reviewing: review,
            now,
        }))
    }

    async fn touch_timer(&self, ctx: &PlayContext) -> LessonResult<()> {
        if let Some(timer) = ctx.timer.as_ref().filter(|_| !ctx.reviewing) {
            self.store.update_timer(timer.id, ctx.now, false).await?;
        }
        Ok(())
    }

    /// Resolves a destination, turning a missing branch table or cluster
    /// into the end of the lesson.
    fn resolve_or_end(
        &self,
        ctx: &PlayContext,
        actor: Actor,
        page_id: i64,
        jump: Jump,
        notices: &mut Vec<Notice>,
    ) -> LessonResult<Destination> {
        let navigator = ctx.navigator(actor);
        match self.with_rng(|rng| navigator.resolve(page_id, jump, rng))? {
            Ok(destination) => Ok(destination),
            Err(err @ LessonError::NoEnclosingStructure { .. }) => {
                tracing::warn!(
                    "Lesson {}: {}; ending the lesson instead",
                    ctx.graph.lesson_id(),
                    err
                );
                notices.push(Notice::warning(
                    "This page jumps inside a structure it does not belong to; the lesson ends here",
                ));
                Ok(Destination::EndOfLesson)
            }
            Err(err) => Err(err),
        }
    }

    /// Follows `jump` from `current_page_id` without answering.
    pub async fn next_page(
        &self,
        lesson_id: i64,
        actor: Actor,
        current_page_id: i64,
        jump: Jump,
        review: bool,
    ) -> LessonResult<Gate<NavigationResult>> {
        let ctx = match self.play_context(lesson_id, actor, review).await? {
            Gate::Open(ctx) => ctx,
            Gate::Blocked(violation) => return Ok(Gate::Blocked(violation)),
        };
        ctx.graph.get(current_page_id)?;

        let mut notices = Vec::new();
        let page = if ctx.out_of_time(actor) {
            notices.push(Notice::warning(OUT_OF_TIME));
            Destination::EndOfLesson
        } else {
            self.resolve_or_end(&ctx, actor, current_page_id, jump, &mut notices)?
        };
        self.touch_timer(&ctx).await?;

        Ok(Gate::Open(NavigationResult {
            page,
            view: ctx.view(page),
            time_remaining: ctx.time_remaining(),
            notices,
        }))
    }

    /// Evaluates and records an answer, then computes where to go next.
    pub async fn record_answer(
        &self,
        lesson_id: i64,
        actor: Actor,
        page_id: i64,
        submission: &SubmitAnswerRequest,
    ) -> LessonResult<Gate<AttemptResult>> {
        let mut ctx = match self.play_context(lesson_id, actor, submission.review).await? {
            Gate::Open(ctx) => ctx,
            Gate::Blocked(violation) => return Ok(Gate::Blocked(violation)),
        };
        let page = ctx.graph.get(page_id)?.clone();

        if ctx.out_of_time(actor) {
            let mut result = AttemptResult::stay(page.id, Notice::warning(OUT_OF_TIME));
            result.new_page = Destination::EndOfLesson;
            result.no_answer = false;
            return Ok(Gate::Open(result));
        }

        let mut notices = Vec::new();

        if page.kind == PageKind::BranchTable {
            let Some(answer_id) = submission.answer_id else {
                return Ok(Gate::Open(AttemptResult::stay(
                    page.id,
                    Notice::warning("Choose one of the buttons to continue"),
                )));
            };
            let answer = ctx
                .graph
                .answers(page.id)
                .iter()
                .find(|a| a.id == answer_id)
                .cloned()
                .ok_or(LessonError::AnswerNotFound(answer_id))?;

            // The view must exist before a random-branch jump is resolved.
            let mut view_id = None;
            if !ctx.reviewing {
                let view = self
                    .store
                    .insert_branch_view(NewBranchView {
                        lesson_id,
                        page_id: page.id,
                        user_id: actor.user_id,
                        retry: ctx.retries(),
                        flag: answer.jumpto == Jump::RandomBranch,
                        next_page_id: 0,
                        timeseen: ctx.now,
                    })
                    .await?;
                view_id = Some(view.id);
                ctx.ledger.record_branch_view(view);
            }

            let new_page = self.resolve_or_end(&ctx, actor, page.id, answer.jumpto, &mut notices)?;
            if let Some(view_id) = view_id {
                self.store
                    .update_branch_view_destination(view_id, new_page.into())
                    .await?;
            }
            self.touch_timer(&ctx).await?;
            return Ok(Gate::Open(AttemptResult {
                correct: false,
                score: 0,
                new_page,
                feedback: None,
                attempts_remaining: None,
                max_attempts_reached: false,
                attempt_id: None,
                no_answer: false,
                notices,
            }));
        }

        let evaluation = evaluate(&ctx.effective, &ctx.graph, &page, submission)?;
        if evaluation.no_answer {
            return Ok(Gate::Open(AttemptResult::stay(
                page.id,
                Notice::warning("No answer given. Please go back and submit an answer"),
            )));
        }

        let maxattempts = ctx.effective.maxattempts.max(0) as usize;
        let mut nattempts = ctx.ledger.attempt_count(page.id);

        if maxattempts > 0 && nattempts >= maxattempts {
            let new_page = self.resolve_or_end(&ctx, actor, page.id, Jump::NextPage, &mut notices)?;
            self.touch_timer(&ctx).await?;
            return Ok(Gate::Open(AttemptResult {
                correct: false,
                score: 0,
                new_page,
                feedback: Some("Maximum number of attempts reached - Moving to next page".to_string()),
                attempts_remaining: None,
                max_attempts_reached: true,
                attempt_id: None,
                no_answer: false,
                notices,
            }));
        }

        let mut attempt_id = None;
        let may_record = !ctx.reviewing
            && !actor.can_manage
            && (ctx.effective.retake || ctx.retries() == 0);
        if may_record {
            let attempt = self
                .store
                .insert_attempt(NewAttempt {
                    lesson_id,
                    page_id: page.id,
                    user_id: actor.user_id,
                    retry: ctx.retries(),
                    answer_id: evaluation.answer_id,
                    correct: evaluation.correct,
                    useranswer: evaluation.user_response.clone(),
                    timeseen: ctx.now,
                })
                .await?;
            tracing::debug!(
                "Recorded attempt {} on page {} for user {}",
                attempt.id,
                page.id,
                actor.user_id
            );
            attempt_id = Some(attempt.id);
            ctx.ledger.record_attempt(attempt);
        }
        nattempts += 1;

        let mut jump = evaluation.jump;
        let mut max_attempts_reached = false;
        let mut attempts_remaining = None;
        if !evaluation.correct && jump == Jump::ThisPage && !actor.can_manage {
            if maxattempts > 0 && nattempts >= maxattempts {
                max_attempts_reached = maxattempts > 1;
                jump = Jump::NextPage;
            } else if maxattempts > 1 {
                attempts_remaining = Some((maxattempts - nattempts) as i64);
            }
        }

        let new_page = self.resolve_or_end(&ctx, actor, page.id, jump, &mut notices)?;

        if ctx.access.review && !evaluation.correct && !evaluation.is_essay {
            notices.push(Notice::info("Would you like to try this question again?"));
        }
        if evaluation.is_essay {
            notices.push(Notice::info(
                "Your essay will be graded by your teacher",
            ));
        }
        if ctx.effective.ongoing && !ctx.effective.practice {
            let info = grading::grade(&ctx.effective, &ctx.graph, ctx.ledger.attempts());
            let message = if ctx.effective.custom {
                format!(
                    "You have earned {} point(s) out of {} point(s) thus far",
                    info.earned, info.total
                )
            } else {
                format!(
                    "You have answered {} correctly out of {} attempts",
                    info.earned, info.attempts_viewed
                )
            };
            notices.push(Notice::info(message));
        }
        self.touch_timer(&ctx).await?;

        Ok(Gate::Open(AttemptResult {
            correct: evaluation.correct,
            score: evaluation.score,
            new_page,
            feedback: evaluation.feedback,
            attempts_remaining,
            max_attempts_reached,
            attempt_id,
            no_answer: false,
            notices,
        }))
    }

    /// Grades a retry (the one in progress by default) without recording anything.
    pub async fn compute_grade(
        &self,
        lesson_id: i64,
        user_id: i64,
        retry: Option<i64>,
    ) -> LessonResult<GradeInfo> {
        let lesson = self.load_lesson(lesson_id).await?;
        let access = self.resolve_access(&lesson, user_id).await?;
        let effective = access.apply_to(&lesson);
        let current = self.store.grades(lesson_id, user_id).await?.len() as i64;
        let retry = match retry {
            Some(retry) if !(0..=current).contains(&retry) => {
                return Err(LessonError::InvalidInput(format!(
                    "retry must be between 0 and {}",
                    current
                )));
            }
            Some(retry) => retry,
            None => current,
        };
        let graph = self.load_graph(lesson_id).await?;
        let ledger = self.load_ledger(lesson_id, user_id, retry).await?;
        Ok(grading::grade(&effective, &graph, ledger.attempts()))
    }

    /// Ends the current retry: stops the timer and writes the grade.
    pub async fn finish(
        &self,
        lesson_id: i64,
        actor: Actor,
        review: bool,
    ) -> LessonResult<Gate<Completion>> {
        let ctx = match self.play_context(lesson_id, actor, review).await? {
            Gate::Open(ctx) => ctx,
            Gate::Blocked(violation) => return Ok(Gate::Blocked(violation)),
        };

        let progress = calculate_progress(&ctx.graph, &ctx.ledger);
        let info = grading::grade(&ctx.effective, &ctx.graph, ctx.ledger.attempts());
        let mut grades = ctx.grades.clone();
        let mut notices = Vec::new();
        let mut recorded = false;

        if ctx.reviewing {
            notices.push(Notice::info("End of review"));
        } else {
            if let Some(timer) = &ctx.timer {
                self.store.update_timer(timer.id, ctx.now, true).await?;
            }

            let expired = ctx
                .timer
                .as_ref()
                .is_some_and(|t| t.is_expired(ctx.access.timelimit, ctx.now));

            if actor.can_manage {
                notices.push(Notice::info("End of preview: no grade was recorded"));
            } else if info.attempts_viewed > 0 {
                let grade = self
                    .store
                    .insert_grade(lesson_id, actor.user_id, info.percentage, expired, ctx.now)
                    .await?;
                tracing::info!(
                    "User {} finished retry {} of lesson {} with {}%",
                    actor.user_id,
                    ctx.retries(),
                    lesson_id,
                    grade.grade
                );
                grades.push(grade);
                recorded = true;
                notices.push(Notice::info(format!(
                    "Your score is {} (out of {})",
                    info.earned, info.total
                )));
                if info.manual_count > 0 {
                    notices.push(Notice::info(format!(
                        "{} essay question(s) worth {} point(s) will be graded by your teacher",
                        info.manual_count, info.manual_points
                    )));
                }
            } else if ctx.access.timelimit > 0 && expired {
                let grade = self
                    .store
                    .insert_grade(lesson_id, actor.user_id, 0.0, true, ctx.now)
                    .await?;
                grades.push(grade);
                recorded = true;
                notices.push(Notice::warning(
                    "You ran out of time without answering any question: your grade is 0",
                ));
            } else {
                notices.push(Notice::info("Congratulations - end of lesson reached"));
            }
        }

        let aggregate = grading::aggregate(&grades, ctx.effective.usemaxgrade);
        let retry = if ctx.reviewing {
            ctx.ledger.retry()
        } else {
            ctx.retries()
        };

        Ok(Gate::Open(Completion {
            retry,
            grade: info,
            recorded,
            progress,
            gradebook: grading::gradebook_value(&ctx.effective, aggregate),
            can_retake: ctx.effective.retake,
            can_review: ctx.effective.modattempts && !grades.is_empty(),
            notices,
        }))
    }

    /// Progress through the current retry, 0 to 100.
    pub async fn progress(&self, lesson_id: i64, user_id: i64) -> LessonResult<i64> {
        self.load_lesson(lesson_id).await?;
        let retry = self.store.grades(lesson_id, user_id).await?.len() as i64;
        let graph = self.load_graph(lesson_id).await?;
        let ledger = self.load_ledger(lesson_id, user_id, retry).await?;
        Ok(calculate_progress(&graph, &ledger))
    }

    /// All recorded grades of a user and their aggregate.
    pub async fn user_grade(&self, lesson_id: i64, user_id: i64) -> LessonResult<UserGrade> {
        let lesson = self.load_lesson(lesson_id).await?;
        let grades = self.store.grades(lesson_id, user_id).await?;
        let aggregate = grading::aggregate(&grades, lesson.usemaxgrade);
        Ok(UserGrade {
            user_id,
            gradebook: grading::gradebook_value(&lesson, aggregate),
            aggregate,
            grades,
        })
    }

    /// A page as the learner sees it.
    pub async fn page_view(
        &self,
        lesson_id: i64,
        actor: Actor,
        page_id: i64,
    ) -> LessonResult<Gate<PublicPage>> {
        let lesson = self.load_lesson(lesson_id).await?;
        if !actor.can_manage {
            let access = self.resolve_access(&lesson, actor.user_id).await?;
            if let Some(violation) = access.window_violation(Utc::now().timestamp()) {
                return Ok(Gate::Blocked(violation));
            }
        }
        let graph = self.load_graph(lesson_id).await?;
        let page = graph.get(page_id)?;
        Ok(Gate::Open(PublicPage::from_page(page, graph.answers(page_id))))
    }

    /// Marks an essay attempt and regrades its retry if it was completed.
    pub async fn grade_essay(
        &self,
        lesson_id: i64,
        attempt_id: i64,
        score: i64,
        comment: Option<String>,
    ) -> LessonResult<EssayGrading> {
        let lesson = self.load_lesson(lesson_id).await?;
        let attempt = self
            .store
            .get_attempt(attempt_id)
            .await?
            .filter(|a| a.lesson_id == lesson_id)
            .ok_or(LessonError::AttemptNotFound(attempt_id))?;
        let graph = self.load_graph(lesson_id).await?;
        let page = graph.get(attempt.page_id)?;
        if page.kind != PageKind::Essay {
            return Err(LessonError::InvalidInput(format!(
                "attempt {} is not an essay",
                attempt_id
            )));
        }

        let access = self.resolve_access(&lesson, attempt.user_id).await?;
        let effective = access.apply_to(&lesson);
        let max_score = if effective.custom {
            graph.first_answer(page.id).map(|a| a.score).unwrap_or(0)
        } else {
            1
        };
        if score < 0 || score > max_score {
            return Err(LessonError::InvalidInput(format!(
                "score must be between 0 and {}",
                max_score
            )));
        }

        let raw = attempt.useranswer.as_deref().ok_or_else(|| {
            LessonError::DataIntegrity(format!("essay attempt {} has no answer", attempt_id))
        })?;
        let mut payload: EssayPayload = serde_json::from_str(raw)?;
        payload.score = score;
        payload.graded = true;
        payload.response = comment.map(|c| clean_html(&c));
        self.store
            .update_attempt_response(attempt_id, serde_json::to_string(&payload)?, score > 0)
            .await?;

        let grades = self.store.grades(lesson_id, attempt.user_id).await?;
        let mut regraded = None;
        if let Some(row) = usize::try_from(attempt.retry)
            .ok()
            .and_then(|retry| grades.get(retry))
        {
            let attempts = self
                .store
                .attempts(lesson_id, attempt.user_id, attempt.retry)
                .await?;
            let info = grading::grade(&effective, &graph, &attempts);
            self.store.update_grade(row.id, info.percentage).await?;
            regraded = Some(info.percentage);
        }

        let attempt = self
            .store
            .get_attempt(attempt_id)
            .await?
            .ok_or(LessonError::AttemptNotFound(attempt_id))?;
        Ok(EssayGrading { attempt, regraded })
    }

    // Authoring

    pub async fn create_lesson(&self, lesson: Lesson) -> LessonResult<Lesson> {
        if let Some(dependency) = lesson.dependency {
            self.load_lesson(dependency).await?;
        }
        let lesson = self.store.create_lesson(lesson).await?;
        tracing::info!("Created lesson {} ({})", lesson.id, lesson.name);
        Ok(lesson)
    }

    pub async fn lesson(&self, lesson_id: i64) -> LessonResult<Lesson> {
        self.load_lesson(lesson_id).await
    }

    /// Every page with its answers, in chain order.
    pub async fn outline(&self, lesson_id: i64) -> LessonResult<Vec<PageOutline>> {
        self.load_lesson(lesson_id).await?;
        let graph = self.load_graph(lesson_id).await?;
        graph
            .pages()
            .map(|page| outline_page(&graph, page.id))
            .collect()
    }

    /// Inserts a page after `req.after_page_id`.
    pub async fn add_page(
        &self,
        lesson_id: i64,
        req: CreatePageRequest,
    ) -> LessonResult<PageOutline> {
        let lesson = self.load_lesson(lesson_id).await?;
        let graph = self.load_graph(lesson_id).await?;

        let limit = match req.kind {
            PageKind::Matching => lesson.maxanswers + 2,
            _ => lesson.maxanswers,
        };
        if req.kind.is_question() && lesson.maxanswers > 0 && req.answers.len() > limit as usize {
            return Err(LessonError::InvalidInput(format!(
                "a page may have at most {} answers",
                limit
            )));
        }
        if req.kind == PageKind::Matching && req.answers.len() < 3 {
            return Err(LessonError::InvalidInput(
                "a matching page needs two outcome answers and at least one pair".to_string(),
            ));
        }
        for answer in &req.answers {
            if let Jump::Page(target) = answer.jumpto {
                if !graph.contains(target) {
                    return Err(LessonError::InvalidInput(format!(
                        "jump target {} is not a page of this lesson",
                        target
                    )));
                }
            }
        }

        let mut answers: Vec<(Jump, i64, String, String)> = req
            .answers
            .into_iter()
            .map(|a| (a.jumpto, a.score, a.answer, a.response))
            .collect();
        if answers.is_empty() {
            let default_jump = match req.kind {
                PageKind::EndOfBranch => {
                    let branch = if req.after_page_id == 0 {
                        None
                    } else {
                        graph.enclosing(req.after_page_id, PageKind::BranchTable).ok()
                    };
                    let branch = branch.ok_or_else(|| {
                        LessonError::InvalidInput(
                            "an end of branch needs a branch table before it".to_string(),
                        )
                    })?;
                    Some((Jump::Page(branch.id), 0))
                }
                PageKind::Cluster => Some((Jump::ClusterJump, 0)),
                PageKind::EndOfCluster => Some((Jump::NextPage, 0)),
                PageKind::Essay => Some((Jump::NextPage, 1)),
                _ => None,
            };
            if let Some((jump, score)) = default_jump {
                answers.push((jump, score, String::new(), String::new()));
            }
        }

        let splice = graph.plan_insert_after(req.after_page_id)?;
        let page = self
            .store
            .insert_page(NewPage {
                lesson_id,
                prev_page_id: splice.prev_page_id,
                next_page_id: splice.next_page_id,
                kind: req.kind,
                title: req.title,
                contents: clean_html(&req.contents),
                qoption: req.qoption,
                layout: req.layout,
                display: req.display,
            })
            .await?;
        for patch in graph.link_in(splice, page.id) {
            self.store.update_page_links(patch).await?;
        }
        for (jumpto, score, answer, response) in answers {
            let response = if req.kind == PageKind::Matching {
                response
            } else {
                clean_html(&response)
            };
            self.store
                .insert_answer(NewAnswer {
                    page_id: page.id,
                    lesson_id,
                    jumpto,
                    score,
                    answer,
                    response,
                })
                .await?;
        }
        tracing::info!(
            "Added {} page {} to lesson {}",
            page.kind.name(),
            page.id,
            lesson_id
        );

        let graph = self.load_graph(lesson_id).await?;
        outline_page(&graph, page.id)
    }

    /// Deletes a page and its answers, closing the gap in the chain.
    pub async fn remove_page(&self, lesson_id: i64, page_id: i64) -> LessonResult<()> {
        self.load_lesson(lesson_id).await?;
        let graph = self.load_graph(lesson_id).await?;
        let patches = graph.plan_remove(page_id)?;
        self.store.delete_page(lesson_id, page_id).await?;
        for patch in patches {
            self.store.update_page_links(patch).await?;
        }
        tracing::info!("Removed page {} from lesson {}", page_id, lesson_id);
        Ok(())
    }

    /// Moves a page right after `after_page_id` (0 moves it first).
    pub async fn move_page(
        &self,
        lesson_id: i64,
        page_id: i64,
        after_page_id: i64,
    ) -> LessonResult<Vec<PageOutline>> {
        self.load_lesson(lesson_id).await?;
        let graph = self.load_graph(lesson_id).await?;
        for patch in graph.plan_move(page_id, after_page_id)? {
            self.store.update_page_links(patch).await?;
        }
        self.outline(lesson_id).await
    }

    // Overrides

    pub async fn list_overrides(&self, lesson_id: i64) -> LessonResult<Vec<Override>> {
        self.load_lesson(lesson_id).await?;
        self.store.list_overrides(lesson_id).await
    }

    pub async fn save_override(&self, data: Override) -> LessonResult<Override> {
        self.load_lesson(data.lesson_id).await?;
        self.store.save_override(data).await
    }

    pub async fn delete_override(&self, lesson_id: i64, override_id: i64) -> LessonResult<bool> {
        self.store.delete_override(lesson_id, override_id).await
    }

    pub async fn add_group_member(&self, group_id: i64, user_id: i64) -> LessonResult<()> {
        self.store.add_group_member(group_id, user_id).await
    }
}

fn outline_page(graph: &PageGraph, page_id: i64) -> LessonResult<PageOutline> {
    let page = graph.get(page_id)?;
    let answers = graph
        .answers(page_id)
        .iter()
        .map(|answer| {
            Ok(AnswerOutline {
                jump_is_correct: jumpto_is_correct(graph, page_id, answer.jumpto)?,
                answer: answer.clone(),
            })
        })
        .collect::<LessonResult<Vec<_>>>()?;
    Ok(PageOutline {
        page: page.clone(),
        answers,
    })
}
