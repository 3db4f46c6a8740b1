pub mod auth;
pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;

pub use middleware::require_auth;
pub use rest::ApiDoc;
pub use state::{AppState, SessionRegistry};

/// Builds the API router: signup endpoints are public, everything else needs a bearer token.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/invitations/accept", post(auth::accept_invitation_handler))
        .route("/join", post(auth::join_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/session",
            post(auth::open_session_handler).delete(auth::close_session_handler),
        )
        .route("/snapshot", get(rest::get_snapshot_handler))
        .route("/snapshot/refresh", post(rest::refresh_snapshot_handler))
        .route("/users", get(rest::list_users_handler))
        .route(
            "/matches",
            get(rest::list_matches_handler).post(rest::create_match_handler),
        )
        .route("/events", post(rest::create_event_handler))
        .route(
            "/events/{id}",
            patch(rest::update_event_handler).delete(rest::delete_event_handler),
        )
        .route("/invitations", post(rest::create_invitation_handler))
        .route("/invitations/expire", post(rest::expire_invitations_handler))
        .route("/onboarding", post(rest::onboarding_handler))
        .route("/goals", post(rest::create_goal_handler))
        .route(
            "/goals/{id}",
            patch(rest::update_goal_progress_handler).delete(rest::delete_goal_handler),
        )
        .route("/ratings", post(rest::submit_rating_handler))
        .route("/ratings/{id}/approve", post(rest::approve_rating_handler))
        .route("/ratings/{id}/reject", post(rest::reject_rating_handler))
        .route(
            "/notifications/read-all",
            post(rest::mark_all_notifications_read_handler),
        )
        .route(
            "/notifications/{id}/read",
            post(rest::mark_notification_read_handler),
        )
        .route("/notifications/{id}", delete(rest::delete_notification_handler))
        .route("/organization", patch(rest::update_organization_handler))
        .route("/billing/checkout", post(rest::checkout_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(app_state)
}
