// src/models/overrides.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::{Validate, ValidationError};

/// Represents the 'lesson_overrides' table.
///
/// Exactly one of `user_id` / `group_id` is set. Every other column is
/// nullable: `None` leaves the lesson setting alone.
#[derive(Debug, Clone, Default, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Override {
    pub id: i64,
    pub lesson_id: i64,
    pub user_id: Option<i64>,
    pub group_id: Option<i64>,
    pub available: Option<i64>,
    pub deadline: Option<i64>,
    pub timelimit: Option<i64>,
    pub review: Option<bool>,
    pub maxattempts: Option<i32>,
    pub retake: Option<bool>,
    /// Argon2 hash, or an empty string to switch the password off.
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Override {
    pub fn is_user_scoped(&self) -> bool {
        self.user_id.is_some() && self.group_id.is_none()
    }

    pub fn is_group_scoped(&self) -> bool {
        self.group_id.is_some() && self.user_id.is_none()
    }
}

/// DTO for creating or replacing an override.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = validate_scope))]
pub struct SaveOverrideRequest {
    pub user_id: Option<i64>,
    pub group_id: Option<i64>,
    #[validate(range(min = 0))]
    pub available: Option<i64>,
    #[validate(range(min = 0))]
    pub deadline: Option<i64>,
    #[validate(range(min = 0))]
    pub timelimit: Option<i64>,
    pub review: Option<bool>,
    #[validate(range(min = 0, max = 10))]
    pub maxattempts: Option<i32>,
    pub retake: Option<bool>,
    /// Plain text; an empty string removes the password for this scope.
    #[validate(length(max = 128))]
    pub password: Option<String>,
}

fn validate_scope(req: &SaveOverrideRequest) -> Result<(), ValidationError> {
    if req.user_id.is_some() == req.group_id.is_some() {
        return Err(ValidationError::new("exactly_one_of_user_or_group"));
    }
    Ok(())
}

/// DTO for adding a user to a group.
#[derive(Debug, Clone, Deserialize)]
pub struct AddGroupMemberRequest {
    pub user_id: i64,
}
