// src/handlers/play.rs

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::{
    engine::jump::catalogue,
    error::AppError,
    handlers::open,
    models::attempt::{
        FinishLessonRequest, NavigateRequest, StartLessonRequest, SubmitAnswerRequest,
    },
    session::LessonSession,
    utils::jwt::Claims,
};

/// Optional `?user_id=` for teachers looking at a learner's data.
#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<i64>,
}

/// Whose data the request is about: the caller, or for teachers anyone.
fn subject(claims: &Claims, query: &UserQuery) -> Result<i64, AppError> {
    let actor = claims.actor()?;
    match query.user_id {
        Some(user_id) if user_id != actor.user_id => {
            if actor.can_manage {
                Ok(user_id)
            } else {
                Err(AppError::Forbidden(
                    "Only teachers can look at other users".to_string(),
                ))
            }
        }
        _ => Ok(actor.user_id),
    }
}

/// Jump codes and page types, so clients do not hard-code them.
pub async fn list_codes() -> impl IntoResponse {
    Json(catalogue())
}

/// The settings that apply to the caller once overrides are merged.
pub async fn get_access(
    State(session): State<LessonSession>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<i64>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = subject(&claims, &query)?;
    let access = session.effective_access(lesson_id, user_id).await?;
    Ok(Json(access))
}

/// Starts a new retry or resumes the active one.
pub async fn start_lesson(
    State(session): State<LessonSession>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<i64>,
    Json(payload): Json<StartLessonRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    let actor = claims.actor()?;

    let info = open(
        session
            .start(lesson_id, actor, payload.password.as_deref())
            .await?,
    )?;
    Ok(Json(info))
}

pub async fn view_page(
    State(session): State<LessonSession>,
    Extension(claims): Extension<Claims>,
    Path((lesson_id, page_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let actor = claims.actor()?;
    let page = open(session.page_view(lesson_id, actor, page_id).await?)?;
    Ok(Json(page))
}

/// Follows a jump without answering (content pages, "continue" buttons).
pub async fn navigate(
    State(session): State<LessonSession>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<i64>,
    Json(payload): Json<NavigateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let actor = claims.actor()?;
    let result = open(
        session
            .next_page(
                lesson_id,
                actor,
                payload.current_page_id,
                payload.jump,
                payload.review,
            )
            .await?,
    )?;
    Ok(Json(result))
}

/// Answers a question page or presses a branch table button.
pub async fn submit_answer(
    State(session): State<LessonSession>,
    Extension(claims): Extension<Claims>,
    Path((lesson_id, page_id)): Path<(i64, i64)>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    let actor = claims.actor()?;

    let result = open(
        session
            .record_answer(lesson_id, actor, page_id, &payload)
            .await?,
    )?;
    Ok(Json(result))
}

/// Ends the current retry and records the grade.
pub async fn finish_lesson(
    State(session): State<LessonSession>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<i64>,
    Json(payload): Json<FinishLessonRequest>,
) -> Result<impl IntoResponse, AppError> {
    let actor = claims.actor()?;
    let completion = open(session.finish(lesson_id, actor, payload.review).await?)?;
    Ok(Json(completion))
}

pub async fn get_progress(
    State(session): State<LessonSession>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<i64>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = subject(&claims, &query)?;
    let progress = session.progress(lesson_id, user_id).await?;
    Ok(Json(json!({
        "lesson_id": lesson_id,
        "user_id": user_id,
        "progress": progress,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct GradeQuery {
    pub user_id: Option<i64>,
    pub retry: Option<i64>,
}

/// Score of a retry, the one in progress by default. Nothing is recorded.
pub async fn get_grade(
    State(session): State<LessonSession>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<i64>,
    Query(query): Query<GradeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = subject(&claims, &UserQuery { user_id: query.user_id })?;
    let info = session.compute_grade(lesson_id, user_id, query.retry).await?;
    Ok(Json(info))
}

/// Recorded grades and the gradebook value.
pub async fn get_gradebook(
    State(session): State<LessonSession>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<i64>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = subject(&claims, &query)?;
    let grade = session.user_grade(lesson_id, user_id).await?;
    Ok(Json(grade))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, role: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            role: role.to_string(),
            exp: 0,
        }
    }

    #[test]
    fn test_learner_cannot_read_other_users() {
        let query = UserQuery { user_id: Some(9) };
        assert!(matches!(
            subject(&claims("7", "student"), &query),
            Err(AppError::Forbidden(_))
        ));
        assert_eq!(subject(&claims("1", "teacher"), &query).unwrap(), 9);
    }

    #[test]
    fn test_own_id_is_the_default() {
        assert_eq!(subject(&claims("7", "student"), &UserQuery::default()).unwrap(), 7);
        let own = UserQuery { user_id: Some(7) };
        assert_eq!(subject(&claims("7", "student"), &own).unwrap(), 7);
    }
}
