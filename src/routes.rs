// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{authoring, overrides, play},
    state::AppState,
    utils::jwt::{auth_middleware, manage_middleware},
};

/// Assembles the main application router.
///
/// * `/api/codes` is public.
/// * `/api/lessons` is for learners (and teachers previewing).
/// * `/api/manage` is teacher-only.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let lesson_routes = Router::new()
        .route("/{id}/access", get(play::get_access))
        .route("/{id}/start", post(play::start_lesson))
        .route("/{id}/pages/{page_id}", get(play::view_page))
        .route("/{id}/pages/{page_id}/answer", post(play::submit_answer))
        .route("/{id}/navigate", post(play::navigate))
        .route("/{id}/finish", post(play::finish_lesson))
        .route("/{id}/progress", get(play::get_progress))
        .route("/{id}/grade", get(play::get_grade))
        .route("/{id}/gradebook", get(play::get_gradebook))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let manage_routes = Router::new()
        .route("/lessons", post(authoring::create_lesson))
        .route("/lessons/{id}", get(authoring::get_lesson))
        .route(
            "/lessons/{id}/pages",
            get(authoring::list_pages).post(authoring::create_page),
        )
        .route(
            "/lessons/{id}/pages/{page_id}",
            delete(authoring::delete_page),
        )
        .route("/lessons/{id}/pages/{page_id}/move", put(authoring::move_page))
        .route(
            "/lessons/{id}/overrides",
            get(overrides::list_overrides).post(overrides::save_override),
        )
        .route(
            "/lessons/{id}/overrides/{override_id}",
            delete(overrides::delete_override),
        )
        .route(
            "/lessons/{id}/attempts/{attempt_id}/essay",
            put(authoring::grade_essay),
        )
        .route("/groups/{group_id}/members", post(overrides::add_group_member))
        // Auth first, then the role check
        .layer(middleware::from_fn(manage_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/api/codes", get(play::list_codes))
        .nest("/api/lessons", lesson_routes)
        .nest("/api/manage", manage_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Body, http::Request};
    use rand::{SeedableRng, rngs::StdRng};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::Config, session::LessonSession, store::MemoryStore, utils::jwt::sign_jwt,
    };

    const SECRET: &str = "router-secret";

    fn app() -> Router {
        create_router(AppState {
            session: LessonSession::new(Arc::new(MemoryStore::new()), StdRng::seed_from_u64(1)),
            config: Config {
                database_url: None,
                jwt_secret: SECRET.to_string(),
                rust_log: "error".to_string(),
                bind_addr: "127.0.0.1:0".to_string(),
                rng_seed: Some(1),
            },
        })
    }

    #[tokio::test]
    async fn test_codes_need_no_token() {
        let response = app()
            .oneshot(Request::get("/api/codes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_manage_routes_check_role() {
        let request = Request::get("/api/manage/lessons/1")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), 401);

        let token = sign_jwt(7, "student", SECRET, 60).unwrap();
        let request = Request::get("/api/manage/lessons/1")
            .header("Authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), 403);

        let token = sign_jwt(1, "teacher", SECRET, 60).unwrap();
        let request = Request::get("/api/manage/lessons/1")
            .header("Authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), 404);
    }
}
