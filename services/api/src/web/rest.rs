//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::to_response;
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use mentorship_core::domain::{Match, User};
use mentorship_core::ports::PageRequest;
use mentorship_core::workflows::{
    EventChanges, NewEvent, NewGoal, NewInvitation, NewMatch, NewRating, OnboardingPayload,
    OrganizationSettings,
};
use mentorship_core::{Entity, OrgSnapshot, SessionContext, SideEffects, SyncSession};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    IntoParams, Modify, OpenApi, ToSchema,
};

type HandlerError = (StatusCode, String);

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::open_session_handler,
        crate::web::auth::close_session_handler,
        crate::web::auth::accept_invitation_handler,
        crate::web::auth::join_handler,
        get_snapshot_handler,
        refresh_snapshot_handler,
        list_users_handler,
        list_matches_handler,
        create_match_handler,
        create_event_handler,
        update_event_handler,
        delete_event_handler,
        create_invitation_handler,
        expire_invitations_handler,
        onboarding_handler,
        create_goal_handler,
        update_goal_progress_handler,
        delete_goal_handler,
        submit_rating_handler,
        approve_rating_handler,
        reject_rating_handler,
        mark_notification_read_handler,
        mark_all_notifications_read_handler,
        delete_notification_handler,
        update_organization_handler,
        checkout_handler,
    ),
    components(
        schemas(
            crate::web::auth::OpenSessionRequest,
            crate::web::auth::AcceptInvitationRequest,
            crate::web::auth::JoinRequest,
            GoalProgressRequest,
            CheckoutRequest,
            CheckoutResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Mentorship API", description = "Organization data sync and mentorship workflows.")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The session's snapshot plus its load status.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub context: SessionContext,
    pub loading: bool,
    /// Set when the last refresh failed; the snapshot is then the previous one.
    pub error: Option<String>,
    pub snapshot: OrgSnapshot,
}

impl SnapshotResponse {
    pub fn from_session(session: &SyncSession) -> Self {
        let state = session.state();
        Self {
            context: session.context().clone(),
            loading: state.loading,
            error: state.error.map(|e| e.to_string()),
            snapshot: (*state.snapshot).clone(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// Cursor returned by the previous page.
    pub cursor: Option<String>,
    pub page_size: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub data: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GoalProgressRequest {
    /// Clamped to 0..=100.
    pub progress: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub plan: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub url: String,
}

fn step_names(side_effects: &SideEffects) -> Vec<String> {
    side_effects.steps().map(str::to_string).collect()
}

async fn sync_session(
    state: &AppState,
    context: &SessionContext,
) -> Result<Arc<SyncSession>, HandlerError> {
    state.session_for(context).await.map_err(to_response)
}

async fn page_of<E: Entity>(
    state: &AppState,
    context: &SessionContext,
    query: PageQuery,
) -> Result<Json<PageResponse<E>>, HandlerError> {
    let request = PageRequest {
        page_size: query.page_size.unwrap_or(state.config.page_size),
        cursor: query.cursor.filter(|c| !c.is_empty()),
    };
    let page = state
        .store
        .page::<E>(&context.organization_id, &request)
        .await
        .map_err(to_response)?;
    Ok(Json(PageResponse {
        data: page.data,
        next_cursor: page.next_cursor,
        has_more: page.has_more,
    }))
}

//=========================================================================================
// Snapshot Handlers
//=========================================================================================

/// GET /snapshot - The caller's current organization snapshot
#[utoipa::path(
    get,
    path = "/snapshot",
    responses(
        (status = 200, description = "Current snapshot with loading and error status"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = []))
)]
pub async fn get_snapshot_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
) -> Result<impl IntoResponse, HandlerError> {
    let session = sync_session(&state, &context).await?;
    Ok(Json(SnapshotResponse::from_session(&session)))
}

/// POST /snapshot/refresh - Re-read everything from the store
#[utoipa::path(
    post,
    path = "/snapshot/refresh",
    responses(
        (status = 200, description = "Refreshed snapshot"),
        (status = 503, description = "The store is unavailable; the previous snapshot is kept")
    ),
    security(("bearer" = []))
)]
pub async fn refresh_snapshot_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
) -> Result<impl IntoResponse, HandlerError> {
    let session = sync_session(&state, &context).await?;
    session.refresh().await.map_err(to_response)?;
    Ok(Json(SnapshotResponse::from_session(&session)))
}

//=========================================================================================
// Paged Listings
//=========================================================================================

/// GET /users - One page of the organization's users
#[utoipa::path(
    get,
    path = "/users",
    params(PageQuery),
    responses(
        (status = 200, description = "A page of users and the cursor for the next page"),
        (status = 400, description = "Invalid cursor or page size")
    ),
    security(("bearer" = []))
)]
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PageResponse<User>>, HandlerError> {
    page_of::<User>(&state, &context, query).await
}

/// GET /matches - One page of the organization's matches
#[utoipa::path(
    get,
    path = "/matches",
    params(PageQuery),
    responses(
        (status = 200, description = "A page of matches and the cursor for the next page"),
        (status = 400, description = "Invalid cursor or page size")
    ),
    security(("bearer" = []))
)]
pub async fn list_matches_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PageResponse<Match>>, HandlerError> {
    page_of::<Match>(&state, &context, query).await
}

//=========================================================================================
// Workflow Handlers
//=========================================================================================

/// POST /matches - Pair a mentor with a mentee
#[utoipa::path(
    post,
    path = "/matches",
    request_body(content_type = "application/json", description = "`{ mentorId, menteeId }`"),
    responses(
        (status = 201, description = "Match created; chat, notification and email steps run in the background"),
        (status = 400, description = "Missing participants, self-match or role mismatch"),
        (status = 403, description = "Caller is not an admin, or a participant is in another organization")
    ),
    security(("bearer" = []))
)]
pub async fn create_match_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Json(input): Json<NewMatch>,
) -> Result<impl IntoResponse, HandlerError> {
    let outcome = state
        .orchestrator
        .create_match(&context, input)
        .await
        .map_err(to_response)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "match": outcome.record,
            "sideEffects": step_names(&outcome.side_effects),
        })),
    ))
}

/// POST /events - Schedule a calendar event
#[utoipa::path(
    post,
    path = "/events",
    request_body(content_type = "application/json", description = "Title, date, time, duration, mentor, participants and kind"),
    responses(
        (status = 201, description = "Event created; mentor hours, calendar sync and notices follow"),
        (status = 400, description = "Missing title or unreadable duration")
    ),
    security(("bearer" = []))
)]
pub async fn create_event_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Json(input): Json<NewEvent>,
) -> Result<impl IntoResponse, HandlerError> {
    let outcome = state
        .orchestrator
        .create_event(&context, input)
        .await
        .map_err(to_response)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "event": outcome.event,
            "sideEffects": step_names(&outcome.side_effects),
        })),
    ))
}

/// PATCH /events/{id} - Change an event; mentor hours follow the new duration
#[utoipa::path(
    patch,
    path = "/events/{id}",
    params(("id" = String, Path, description = "The event id.")),
    request_body(content_type = "application/json", description = "Any subset of the event fields; `mentorId: null` unassigns"),
    responses(
        (status = 200, description = "Updated event"),
        (status = 400, description = "No changes or unreadable duration"),
        (status = 403, description = "Caller may not edit this event"),
        (status = 404, description = "Event not found")
    ),
    security(("bearer" = []))
)]
pub async fn update_event_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Path(id): Path<String>,
    Json(changes): Json<EventChanges>,
) -> Result<impl IntoResponse, HandlerError> {
    let outcome = state
        .orchestrator
        .update_event(&context, &id, changes)
        .await
        .map_err(to_response)?;
    Ok(Json(json!({
        "event": outcome.event,
        "sideEffects": step_names(&outcome.side_effects),
    })))
}

/// DELETE /events/{id} - Remove an event and release its mentor hours
#[utoipa::path(
    delete,
    path = "/events/{id}",
    params(("id" = String, Path, description = "The event id.")),
    responses(
        (status = 200, description = "The removed event"),
        (status = 403, description = "Caller may not edit this event"),
        (status = 404, description = "Event not found")
    ),
    security(("bearer" = []))
)]
pub async fn delete_event_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let outcome = state
        .orchestrator
        .delete_event(&context, &id)
        .await
        .map_err(to_response)?;
    Ok(Json(json!({
        "event": outcome.event,
        "sideEffects": step_names(&outcome.side_effects),
    })))
}

/// POST /invitations - Invite someone into the organization
#[utoipa::path(
    post,
    path = "/invitations",
    request_body(content_type = "application/json", description = "`{ email, name, role }`"),
    responses(
        (status = 201, description = "Invitation created"),
        (status = 200, description = "A pending invitation for the same address was reused"),
        (status = 403, description = "Caller is not an admin")
    ),
    security(("bearer" = []))
)]
pub async fn create_invitation_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Json(input): Json<NewInvitation>,
) -> Result<impl IntoResponse, HandlerError> {
    let outcome = state
        .orchestrator
        .invite(&context, input)
        .await
        .map_err(to_response)?;
    let status = if outcome.reused {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(json!({
            "invitation": outcome.invitation,
            "reused": outcome.reused,
            "sideEffects": step_names(&outcome.side_effects),
        })),
    ))
}

/// POST /invitations/expire - Expire pending invitations older than the TTL
#[utoipa::path(
    post,
    path = "/invitations/expire",
    responses(
        (status = 200, description = "Number of invitations expired"),
        (status = 403, description = "Caller is not an admin")
    ),
    security(("bearer" = []))
)]
pub async fn expire_invitations_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
) -> Result<impl IntoResponse, HandlerError> {
    let expired = state
        .orchestrator
        .expire_stale_invitations(&context)
        .await
        .map_err(to_response)?;
    Ok(Json(json!({ "expired": expired })))
}

/// POST /onboarding - Complete the caller's onboarding
#[utoipa::path(
    post,
    path = "/onboarding",
    request_body(content_type = "application/json", description = "Tagged by `role`: `mentor` or `mentee` profile fields"),
    responses(
        (status = 200, description = "The onboarded user and any initial goals"),
        (status = 400, description = "Payload role does not match the user's role")
    ),
    security(("bearer" = []))
)]
pub async fn onboarding_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Json(payload): Json<OnboardingPayload>,
) -> Result<impl IntoResponse, HandlerError> {
    let outcome = state
        .orchestrator
        .complete_onboarding(&context, payload)
        .await
        .map_err(to_response)?;
    Ok(Json(json!({ "user": outcome.user, "goals": outcome.goals })))
}

//=========================================================================================
// Goals, Ratings and Notifications
//=========================================================================================

/// POST /goals - Create a goal
#[utoipa::path(
    post,
    path = "/goals",
    request_body(content_type = "application/json", description = "`{ userId?, title, description?, dueDate? }`"),
    responses(
        (status = 201, description = "Goal created"),
        (status = 403, description = "Goal owner is another user or organization")
    ),
    security(("bearer" = []))
)]
pub async fn create_goal_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Json(input): Json<NewGoal>,
) -> Result<impl IntoResponse, HandlerError> {
    let goal = state
        .orchestrator
        .create_goal(&context, input)
        .await
        .map_err(to_response)?;
    Ok((StatusCode::CREATED, Json(goal)))
}

/// PATCH /goals/{id} - Set a goal's progress
#[utoipa::path(
    patch,
    path = "/goals/{id}",
    params(("id" = String, Path, description = "The goal id.")),
    request_body = GoalProgressRequest,
    responses(
        (status = 200, description = "Updated goal"),
        (status = 404, description = "Goal is not in the caller's snapshot")
    ),
    security(("bearer" = []))
)]
pub async fn update_goal_progress_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Path(id): Path<String>,
    Json(req): Json<GoalProgressRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let session = sync_session(&state, &context).await?;
    let goal = session
        .update_goal_progress(&id, req.progress)
        .await
        .map_err(to_response)?;
    Ok(Json(goal))
}

/// DELETE /goals/{id} - Delete a goal
#[utoipa::path(
    delete,
    path = "/goals/{id}",
    params(("id" = String, Path, description = "The goal id.")),
    responses(
        (status = 204, description = "Goal deleted"),
        (status = 404, description = "Goal is not in the caller's snapshot")
    ),
    security(("bearer" = []))
)]
pub async fn delete_goal_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, HandlerError> {
    let session = sync_session(&state, &context).await?;
    session.delete_goal(&id).await.map_err(to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /ratings - Rate another member
#[utoipa::path(
    post,
    path = "/ratings",
    request_body(content_type = "application/json", description = "`{ toUserId, score, comment? }`"),
    responses(
        (status = 201, description = "Rating submitted"),
        (status = 400, description = "Score outside 1-5, self-rating, or ratings disabled")
    ),
    security(("bearer" = []))
)]
pub async fn submit_rating_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Json(input): Json<NewRating>,
) -> Result<impl IntoResponse, HandlerError> {
    let rating = state
        .orchestrator
        .submit_rating(&context, input)
        .await
        .map_err(to_response)?;
    Ok((StatusCode::CREATED, Json(rating)))
}

/// POST /ratings/{id}/approve - Approve a rating
#[utoipa::path(
    post,
    path = "/ratings/{id}/approve",
    params(("id" = String, Path, description = "The rating id.")),
    responses(
        (status = 204, description = "Rating approved"),
        (status = 403, description = "Caller is not an admin")
    ),
    security(("bearer" = []))
)]
pub async fn approve_rating_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, HandlerError> {
    let session = sync_session(&state, &context).await?;
    session.approve_rating(&id).await.map_err(to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /ratings/{id}/reject - Reject (remove) a rating
#[utoipa::path(
    post,
    path = "/ratings/{id}/reject",
    params(("id" = String, Path, description = "The rating id.")),
    responses(
        (status = 204, description = "Rating removed"),
        (status = 403, description = "Caller is not an admin")
    ),
    security(("bearer" = []))
)]
pub async fn reject_rating_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, HandlerError> {
    let session = sync_session(&state, &context).await?;
    session.reject_rating(&id).await.map_err(to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /notifications/{id}/read - Mark one of the caller's notifications read
#[utoipa::path(
    post,
    path = "/notifications/{id}/read",
    params(("id" = String, Path, description = "The notification id.")),
    responses(
        (status = 204, description = "Notification marked read"),
        (status = 403, description = "Notification belongs to someone else")
    ),
    security(("bearer" = []))
)]
pub async fn mark_notification_read_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, HandlerError> {
    let session = sync_session(&state, &context).await?;
    session.mark_notification_read(&id).await.map_err(to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /notifications/read-all - Mark all of the caller's notifications read
#[utoipa::path(
    post,
    path = "/notifications/read-all",
    responses((status = 204, description = "Notifications marked read")),
    security(("bearer" = []))
)]
pub async fn mark_all_notifications_read_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
) -> Result<StatusCode, HandlerError> {
    let session = sync_session(&state, &context).await?;
    session
        .mark_all_notifications_read()
        .await
        .map_err(to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /notifications/{id} - Delete one of the caller's notifications
#[utoipa::path(
    delete,
    path = "/notifications/{id}",
    params(("id" = String, Path, description = "The notification id.")),
    responses(
        (status = 204, description = "Notification deleted"),
        (status = 403, description = "Notification belongs to someone else")
    ),
    security(("bearer" = []))
)]
pub async fn delete_notification_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, HandlerError> {
    let session = sync_session(&state, &context).await?;
    session.delete_notification(&id).await.map_err(to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Organization and Billing
//=========================================================================================

/// PATCH /organization - Update name, branding or program settings
#[utoipa::path(
    patch,
    path = "/organization",
    request_body(content_type = "application/json", description = "`{ name?, branding?, program? }`"),
    responses(
        (status = 200, description = "Updated organization"),
        (status = 403, description = "Caller is not an admin")
    ),
    security(("bearer" = []))
)]
pub async fn update_organization_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Json(settings): Json<OrganizationSettings>,
) -> Result<impl IntoResponse, HandlerError> {
    let organization = state
        .orchestrator
        .update_organization_settings(&context, settings)
        .await
        .map_err(to_response)?;
    Ok(Json(organization))
}

/// POST /billing/checkout - Start a hosted checkout for a plan
#[utoipa::path(
    post,
    path = "/billing/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Hosted checkout URL", body = CheckoutResponse),
        (status = 403, description = "Caller is not an admin"),
        (status = 503, description = "Billing provider unavailable")
    ),
    security(("bearer" = []))
)]
pub async fn checkout_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, HandlerError> {
    let url = state
        .orchestrator
        .start_checkout(&context, &req.plan)
        .await
        .map_err(to_response)?;
    Ok(Json(CheckoutResponse { url }))
}
