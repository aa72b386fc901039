// src/state.rs

use axum::extract::FromRef;

use crate::{config::Config, session::LessonSession};

#[derive(Clone)]
pub struct AppState {
    pub session: LessonSession,
    pub config: Config,
}

impl FromRef<AppState> for LessonSession {
    fn from_ref(state: &AppState) -> Self {
        state.session.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
