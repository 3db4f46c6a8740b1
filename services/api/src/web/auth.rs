//! services/api/src/web/auth.rs
//!
//! Session lifecycle and signup endpoints: opening and closing a sync session,
//! accepting an invitation and joining an organization by code.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use mentorship_core::domain::User;
use mentorship_core::ports::{ExternalIdentity, PortError};
use mentorship_core::workflows::Signup;
use mentorship_core::{SessionContext, SyncSession};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::error::to_response;
use crate::web::middleware::{bearer_token, Caller};
use crate::web::rest::SnapshotResponse;
use crate::web::state::AppState;

//=========================================================================================
// Request Types
//=========================================================================================

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionRequest {
    /// Platform admins only: view the app as this user.
    pub impersonate_user_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInvitationRequest {
    pub token: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub code: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

//=========================================================================================
// Session Handlers
//=========================================================================================

/// POST /session - Open (or reopen) the caller's sync session
#[utoipa::path(
    post,
    path = "/session",
    request_body = OpenSessionRequest,
    responses(
        (status = 201, description = "Session opened; returns the context and hydrated snapshot"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Impersonation is not allowed for this user"),
        (status = 404, description = "Impersonation target not found")
    ),
    security(("bearer" = []))
)]
pub async fn open_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<OpenSessionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let own = SessionContext::for_user(&caller.user);
    let context = match req.impersonate_user_id.as_deref() {
        Some(target_id) => {
            let target = state
                .store
                .get::<User>(target_id)
                .await
                .map_err(to_response)?
                .ok_or_else(|| to_response(PortError::NotFound(format!("user {}", target_id))))?;
            let context = own.impersonate(&target).map_err(to_response)?;
            info!(
                operator = %caller.user.id,
                target = %target.id,
                "impersonation started"
            );
            context
        }
        None => own,
    };

    let session = SyncSession::open(state.store.clone(), context, state.config.rollback_delay)
        .await
        .map_err(to_response)?;
    state.sessions.replace(session.clone()).await;
    Ok((
        StatusCode::CREATED,
        Json(SnapshotResponse::from_session(&session)),
    ))
}

/// DELETE /session - Close the caller's sync session
#[utoipa::path(
    delete,
    path = "/session",
    responses(
        (status = 204, description = "Session closed"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = []))
)]
pub async fn close_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> StatusCode {
    if !state.sessions.close(&caller.user.id).await {
        info!(user_id = %caller.user.id, "no open session to close");
    }
    StatusCode::NO_CONTENT
}

//=========================================================================================
// Public Signup Handlers
//=========================================================================================

/// An optional bearer token only links the new account to an external identity.
async fn optional_identity(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<ExternalIdentity>, (StatusCode, String)> {
    let Some(token) = bearer_token(headers) else {
        return Ok(None);
    };
    state
        .auth
        .exchange_identity(token)
        .await
        .map(Some)
        .map_err(|e| {
            warn!(kind = e.kind(), "signup token rejected");
            (StatusCode::UNAUTHORIZED, "Invalid bearer token".to_string())
        })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn signup_from(
    name: Option<String>,
    email: Option<String>,
    identity: Option<ExternalIdentity>,
) -> Signup {
    let (external_id, identity_name, identity_email) = match identity {
        Some(i) => (Some(i.external_id), Some(i.name), Some(i.email)),
        None => (None, None, None),
    };
    Signup {
        name: non_empty(name).or_else(|| non_empty(identity_name)),
        email: non_empty(email).or_else(|| non_empty(identity_email)),
        external_id,
    }
}

/// POST /invitations/accept - Complete signup from an invitation token
#[utoipa::path(
    post,
    path = "/invitations/accept",
    request_body = AcceptInvitationRequest,
    responses(
        (status = 201, description = "Account created with the invited role"),
        (status = 400, description = "Invitation already accepted or expired"),
        (status = 404, description = "Unknown invitation token")
    )
)]
pub async fn accept_invitation_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AcceptInvitationRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let identity = optional_identity(&state, &headers).await?;
    let signup = signup_from(req.name, req.email, identity);
    let user = state
        .orchestrator
        .complete_signup(&req.token, signup)
        .await
        .map_err(to_response)?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /join - Self-signup as a mentee with an organization's join code
#[utoipa::path(
    post,
    path = "/join",
    request_body = JoinRequest,
    responses(
        (status = 201, description = "Mentee account created"),
        (status = 400, description = "Missing name or email, or identity already registered"),
        (status = 404, description = "Unknown join code")
    )
)]
pub async fn join_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<JoinRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let identity = optional_identity(&state, &headers).await?;
    let signup = signup_from(req.name, req.email, identity);
    let user = state
        .orchestrator
        .join_with_code(&req.code, signup)
        .await
        .map_err(to_response)?;
    Ok((StatusCode::CREATED, Json(user)))
}
