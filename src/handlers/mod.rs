// src/handlers/mod.rs

pub mod authoring;
pub mod overrides;
pub mod play;

use crate::{error::AppError, session::Gate};

/// Unwraps a gated result, turning a policy refusal into a 403.
pub(crate) fn open<T>(gate: Gate<T>) -> Result<T, AppError> {
    match gate {
        Gate::Open(value) => Ok(value),
        Gate::Blocked(violation) => {
            tracing::debug!("Refused by policy: {:?}", violation);
            Err(AppError::Policy(violation))
        }
    }
}
