// src/engine/access.rs

//! Effective settings for one learner: lesson base settings, then combined
//! group overrides, then the learner's own override.

use serde::Serialize;

use super::PolicyViolation;
use crate::models::{lesson::Lesson, overrides::Override};

/// The lesson's settings after applying the overrides relevant to one user.
/// Derived on every request and never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveAccess {
    pub lesson_id: i64,
    pub user_id: i64,
    pub available: i64,
    pub deadline: i64,
    pub timelimit: i64,
    pub review: bool,
    pub maxattempts: i32,
    pub retake: bool,
    pub usepassword: bool,
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(skip)]
    pub extra_passwords: Vec<String>,
}

/// Null-able view of every overridable field.
#[derive(Debug, Clone, Default)]
struct Combined {
    available: Option<i64>,
    deadline: Option<i64>,
    timelimit: Option<i64>,
    review: Option<bool>,
    maxattempts: Option<i32>,
    retake: Option<bool>,
    password: Option<String>,
    extra_passwords: Vec<String>,
}

/// Largest value, except that 0 ("unlimited") beats everything.
fn most_lenient_limit(values: &[i64]) -> Option<i64> {
    if values.contains(&0) {
        return Some(0);
    }
    values.iter().copied().max()
}

fn combine_groups(groups: &[&Override]) -> Combined {
    let availables: Vec<i64> = groups.iter().filter_map(|o| o.available).collect();
    let deadlines: Vec<i64> = groups.iter().filter_map(|o| o.deadline).collect();
    let timelimits: Vec<i64> = groups.iter().filter_map(|o| o.timelimit).collect();

    let mut passwords: Vec<String> = Vec::new();
    for password in groups.iter().filter_map(|o| o.password.clone()) {
        if !passwords.contains(&password) {
            passwords.push(password);
        }
    }
    let mut passwords = passwords.into_iter();

    Combined {
        available: availables.iter().copied().min(),
        deadline: most_lenient_limit(&deadlines),
        timelimit: most_lenient_limit(&timelimits),
        review: groups.iter().filter_map(|o| o.review).max(),
        maxattempts: groups.iter().filter_map(|o| o.maxattempts).max(),
        retake: groups.iter().filter_map(|o| o.retake).max(),
        password: passwords.next(),
        extra_passwords: passwords.collect(),
    }
}

/// Resolves the effective settings for `user_id`.
///
/// `user_override` must be scoped to the user, `group_overrides` to groups
/// the user belongs to; rows with the wrong scope are ignored.
pub fn resolve(
    lesson: &Lesson,
    user_id: i64,
    user_override: Option<&Override>,
    group_overrides: &[Override],
) -> EffectiveAccess {
    let user = user_override.filter(|o| {
        let valid = o.is_user_scoped() && o.user_id == Some(user_id) && o.lesson_id == lesson.id;
        if !valid {
            tracing::warn!("Ignoring override {} for user {}: wrong scope", o.id, user_id);
        }
        valid
    });
    let groups: Vec<&Override> = group_overrides
        .iter()
        .filter(|o| o.is_group_scoped() && o.lesson_id == lesson.id)
        .collect();
    let group = combine_groups(&groups);

    let mut access = EffectiveAccess {
        lesson_id: lesson.id,
        user_id,
        available: lesson.available,
        deadline: lesson.deadline,
        timelimit: lesson.timelimit,
        review: lesson.review,
        maxattempts: lesson.maxattempts,
        retake: lesson.retake,
        usepassword: lesson.usepassword,
        password: lesson.password.clone(),
        extra_passwords: Vec::new(),
    };

    let pick = |user_value: Option<i64>, group_value: Option<i64>| user_value.or(group_value);

    if let Some(available) = pick(user.and_then(|o| o.available), group.available) {
        access.available = available;
    }
    if let Some(deadline) = pick(user.and_then(|o| o.deadline), group.deadline) {
        access.deadline = deadline;
    }
    if let Some(timelimit) = pick(user.and_then(|o| o.timelimit), group.timelimit) {
        access.timelimit = timelimit;
    }
    if let Some(review) = user.and_then(|o| o.review).or(group.review) {
        access.review = review;
    }
    if let Some(maxattempts) = user.and_then(|o| o.maxattempts).or(group.maxattempts) {
        access.maxattempts = maxattempts;
    }
    if let Some(retake) = user.and_then(|o| o.retake).or(group.retake) {
        access.retake = retake;
    }

    let (password, extras) = match user.and_then(|o| o.password.clone()) {
        Some(password) => (Some(password), Vec::new()),
        None => (group.password, group.extra_passwords),
    };
    if let Some(password) = password {
        if password.is_empty() {
            access.usepassword = false;
            access.password = None;
        } else {
            access.usepassword = true;
            access.password = Some(password);
            access.extra_passwords = extras;
        }
    }

    access
}

impl EffectiveAccess {
    /// Copies the effective values over the lesson's base settings.
    pub fn apply_to(&self, lesson: &Lesson) -> Lesson {
        Lesson {
            available: self.available,
            deadline: self.deadline,
            timelimit: self.timelimit,
            review: self.review,
            maxattempts: self.maxattempts,
            retake: self.retake,
            usepassword: self.usepassword,
            password: self.password.clone(),
            ..lesson.clone()
        }
    }

    /// Checks the open/close window at `now` (unix seconds).
    pub fn window_violation(&self, now: i64) -> Option<PolicyViolation> {
        if self.available > 0 && now < self.available {
            return Some(PolicyViolation::NotYetAvailable {
                available: self.available,
            });
        }
        if self.deadline > 0 && now > self.deadline {
            return Some(PolicyViolation::Closed {
                deadline: self.deadline,
            });
        }
        None
    }

    /// Every stored password hash that unlocks the lesson.
    pub fn accepted_passwords(&self) -> impl Iterator<Item = &str> + '_ {
        self.password
            .iter()
            .chain(self.extra_passwords.iter())
            .map(String::as_str)
    }
}
