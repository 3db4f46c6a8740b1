//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use mentorship_core::domain::User;
use mentorship_core::ports::{ExternalIdentity, PortError};
use mentorship_core::SessionContext;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::to_response;
use crate::web::state::AppState;

/// The verified identity and the local user behind a request.
#[derive(Clone, Debug)]
pub struct Caller {
    pub identity: ExternalIdentity,
    pub user: User,
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware that verifies the bearer token and resolves the session context.
///
/// If valid, inserts the `Caller` and `SessionContext` into request extensions.
/// An open session's context wins, so impersonation carries across requests.
/// A missing or rejected token returns 401; a token for an unknown user returns 403.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    // 1. Extract the bearer token
    let token = bearer_token(req.headers())
        .ok_or((StatusCode::UNAUTHORIZED, "A bearer token is required".to_string()))?
        .to_string();

    // 2. Exchange it with the auth provider
    let identity = state.auth.exchange_identity(&token).await.map_err(|e| match e {
        PortError::PermissionDenied(_) | PortError::Validation(_) | PortError::NotFound(_) => {
            warn!(kind = e.kind(), "bearer token rejected");
            (StatusCode::UNAUTHORIZED, "Invalid bearer token".to_string())
        }
        other => to_response(other),
    })?;

    // 3. Resolve the local user
    let user = state
        .store
        .find_one_by::<User>("externalId", &identity.external_id)
        .await
        .map_err(to_response)?
        .ok_or_else(|| {
            debug!(external_id = %identity.external_id, "no user for identity");
            (
                StatusCode::FORBIDDEN,
                "No account is linked to this identity".to_string(),
            )
        })?;

    // 4. Build the session context
    let context = match state.sessions.get(&user.id).await {
        Some(session) if !session.is_closed() => session.context().clone(),
        _ => SessionContext::for_user(&user),
    };

    req.extensions_mut().insert(context);
    req.extensions_mut().insert(Caller { identity, user });

    // 5. Continue to the handler
    Ok(next.run(req).await)
}
