// src/handlers/overrides.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use validator::Validate;

use crate::{
    error::AppError,
    models::overrides::{AddGroupMemberRequest, Override, SaveOverrideRequest},
    session::LessonSession,
    utils::hash::hash_optional,
};

pub async fn list_overrides(
    State(session): State<LessonSession>,
    Path(lesson_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.list_overrides(lesson_id).await?))
}

/// Creates the override for a user or a group, or replaces the existing one.
pub async fn save_override(
    State(session): State<LessonSession>,
    Path(lesson_id): Path<i64>,
    Json(payload): Json<SaveOverrideRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let saved = session
        .save_override(Override {
            id: 0,
            lesson_id,
            user_id: payload.user_id,
            group_id: payload.group_id,
            available: payload.available,
            deadline: payload.deadline,
            timelimit: payload.timelimit,
            review: payload.review,
            maxattempts: payload.maxattempts,
            retake: payload.retake,
            password: hash_optional(payload.password.as_deref())?,
        })
        .await?;
    tracing::info!("Saved override {} on lesson {}", saved.id, lesson_id);

    Ok(Json(saved))
}

pub async fn delete_override(
    State(session): State<LessonSession>,
    Path((lesson_id, override_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    if !session.delete_override(lesson_id, override_id).await? {
        return Err(AppError::NotFound(format!(
            "Override {} not found",
            override_id
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_group_member(
    State(session): State<LessonSession>,
    Path(group_id): Path<i64>,
    Json(payload): Json<AddGroupMemberRequest>,
) -> Result<impl IntoResponse, AppError> {
    session.add_group_member(group_id, payload.user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "group_id": group_id, "user_id": payload.user_id })),
    ))
}
