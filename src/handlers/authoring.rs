// src/handlers/authoring.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        attempt::GradeEssayRequest,
        lesson::CreateLessonRequest,
        page::{CreatePageRequest, MovePageRequest},
    },
    session::LessonSession,
    utils::hash::hash_optional,
};

/// Creates a lesson. The password, if any, is stored as an Argon2 hash.
pub async fn create_lesson(
    State(session): State<LessonSession>,
    Json(payload): Json<CreateLessonRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let password_hash = hash_optional(payload.password.as_deref())?.filter(|h| !h.is_empty());
    let lesson = session
        .create_lesson(payload.into_lesson(password_hash))
        .await?;

    Ok((StatusCode::CREATED, Json(lesson)))
}

pub async fn get_lesson(
    State(session): State<LessonSession>,
    Path(lesson_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.lesson(lesson_id).await?))
}

/// Every page in chain order, with scores, jumps and jump validity.
pub async fn list_pages(
    State(session): State<LessonSession>,
    Path(lesson_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.outline(lesson_id).await?))
}

pub async fn create_page(
    State(session): State<LessonSession>,
    Path(lesson_id): Path<i64>,
    Json(payload): Json<CreatePageRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let page = session.add_page(lesson_id, payload).await?;
    Ok((StatusCode::CREATED, Json(page)))
}

pub async fn delete_page(
    State(session): State<LessonSession>,
    Path((lesson_id, page_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    session.remove_page(lesson_id, page_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn move_page(
    State(session): State<LessonSession>,
    Path((lesson_id, page_id)): Path<(i64, i64)>,
    Json(payload): Json<MovePageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outline = session
        .move_page(lesson_id, page_id, payload.after_page_id)
        .await?;
    Ok(Json(outline))
}

/// Marks an essay attempt; the retry's grade is recomputed if it was recorded.
pub async fn grade_essay(
    State(session): State<LessonSession>,
    Path((lesson_id, attempt_id)): Path<(i64, i64)>,
    Json(payload): Json<GradeEssayRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let graded = session
        .grade_essay(lesson_id, attempt_id, payload.score, payload.comment)
        .await?;
    tracing::info!(
        "Essay attempt {} in lesson {} graded with {}",
        attempt_id,
        lesson_id,
        payload.score
    );
    Ok(Json(graded))
}
