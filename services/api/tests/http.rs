use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use api_lib::adapters::{build_providers, DevTokenAuth, InMemoryStore};
use api_lib::config::Config;
use api_lib::web::{router, AppState, SessionRegistry};
use mentorship_core::domain::{Organization, Role, User};
use mentorship_core::{Orchestrator, StoreClient, WorkflowSettings};

struct TestApp {
    app: Router,
    sessions: SessionRegistry,
    org: Organization,
    admin: User,
    mentor: User,
    mentee: User,
}

async fn seed_user(client: &StoreClient, org: &Organization, role: Role, name: &str) -> User {
    let email = format!("{}@acme.example.com", name.to_lowercase());
    let mut user = User::new(&org.id, role, name, email);
    user.external_id = Some(format!("ext-{}", name.to_lowercase()));
    client.create(&org.id, user).await.unwrap()
}

async fn test_app() -> TestApp {
    let config = Arc::new(Config::default());
    let store = StoreClient::new(Arc::new(InMemoryStore::new()));
    let orchestrator = Orchestrator::new(
        store.clone(),
        build_providers(&config.providers),
        WorkflowSettings::default(),
    );

    let org = Organization::new("Acme", None);
    let org = store.create(&org.id.clone(), org).await.unwrap();
    let admin = seed_user(&store, &org, Role::Admin, "Ann").await;
    let mentor = seed_user(&store, &org, Role::Mentor, "Max").await;
    let mentee = seed_user(&store, &org, Role::Mentee, "Eve").await;

    let sessions = SessionRegistry::default();
    let state = Arc::new(AppState {
        config,
        store,
        orchestrator,
        auth: Arc::new(DevTokenAuth),
        sessions: sessions.clone(),
    });
    TestApp {
        app: router(state),
        sessions,
        org,
        admin,
        mentor,
        mentee,
    }
}

fn token(user: &User) -> String {
    format!("Bearer {}", user.external_id.clone().unwrap_or_default())
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    auth: Option<String>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    Ok((status, value))
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() -> Result<()> {
    let t = test_app().await;
    let (status, _) = send(&t.app, "GET", "/snapshot", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &t.app,
        "GET",
        "/snapshot",
        Some("Bearer ext-nobody".to_string()),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn snapshot_is_scoped_to_the_callers_organization() -> Result<()> {
    let t = test_app().await;
    let (status, body) = send(&t.app, "GET", "/snapshot", Some(token(&t.admin)), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context"]["userId"], json!(t.admin.id));
    assert_eq!(body["snapshot"]["users"].as_array().map(Vec::len), Some(3));
    assert_eq!(body["snapshot"]["organization"]["id"], json!(t.org.id));
    assert_eq!(body["error"], Value::Null);

    // The first request opened a session implicitly.
    assert!(t.sessions.get(&t.admin.id).await.is_some());

    let (status, _) = send(&t.app, "DELETE", "/session", Some(token(&t.admin)), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(t.sessions.get(&t.admin.id).await.is_none());
    Ok(())
}

#[tokio::test]
async fn only_admins_create_matches() -> Result<()> {
    let t = test_app().await;
    let input = json!({ "mentorId": t.mentor.id, "menteeId": t.mentee.id });

    let (status, _) = send(&t.app, "POST", "/matches", Some(token(&t.mentee)), Some(input.clone())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&t.app, "POST", "/matches", Some(token(&t.admin)), Some(input)).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["match"]["mentorId"], json!(t.mentor.id));
    assert!(body["sideEffects"].as_array().is_some_and(|steps| !steps.is_empty()));
    Ok(())
}

#[tokio::test]
async fn invalid_input_maps_to_bad_request() -> Result<()> {
    let t = test_app().await;
    let input = json!({ "mentorId": t.mentor.id, "menteeId": t.mentor.id });
    let (status, _) = send(&t.app, "POST", "/matches", Some(token(&t.admin)), Some(input)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn join_code_signup_is_public() -> Result<()> {
    let t = test_app().await;
    let input = json!({
        "code": t.org.join_code.to_lowercase(),
        "name": "Pat",
        "email": "Pat@Example.com",
    });
    let (status, body) = send(&t.app, "POST", "/join", None, Some(input)).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["role"], json!("mentee"));
    assert_eq!(body["email"], json!("pat@example.com"));
    assert_eq!(body["organizationId"], json!(t.org.id));

    let unknown = json!({ "code": "NOPE0000", "name": "Sam", "email": "sam@example.com" });
    let (status, _) = send(&t.app, "POST", "/join", None, Some(unknown)).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn users_are_paged_with_cursors() -> Result<()> {
    let t = test_app().await;
    let (status, first) = send(&t.app, "GET", "/users?pageSize=2", Some(token(&t.admin)), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"].as_array().map(Vec::len), Some(2));
    assert_eq!(first["hasMore"], json!(true));

    let cursor = first["nextCursor"].as_str().unwrap_or_default().to_string();
    let uri = format!("/users?pageSize=2&cursor={}", cursor);
    let (status, second) = send(&t.app, "GET", &uri, Some(token(&t.admin)), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(second["hasMore"], json!(false));
    Ok(())
}

#[tokio::test]
async fn goal_progress_is_clamped_through_the_session() -> Result<()> {
    let t = test_app().await;
    let (status, goal) = send(
        &t.app,
        "POST",
        "/goals",
        Some(token(&t.mentee)),
        Some(json!({ "title": "Ship a side project" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let goal_id = goal["id"].as_str().unwrap_or_default().to_string();

    let (status, updated) = send(
        &t.app,
        "PATCH",
        &format!("/goals/{}", goal_id),
        Some(token(&t.mentee)),
        Some(json!({ "progress": 150 })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["progress"], json!(100));
    assert_eq!(updated["status"], json!("completed"));
    Ok(())
}

#[tokio::test]
async fn non_admins_cannot_start_checkout() -> Result<()> {
    let t = test_app().await;
    let input = json!({ "plan": "pro" });
    let (status, _) = send(&t.app, "POST", "/billing/checkout", Some(token(&t.mentor)), Some(input.clone())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Billing has no configured URL in tests, so the provider is unavailable.
    let (status, _) = send(&t.app, "POST", "/billing/checkout", Some(token(&t.admin)), Some(input)).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}
