//! services/api/src/adapters/providers.rs
//!
//! HTTP adapters for the third-party provider ports, plus the stand-ins used
//! when a provider has no configured URL.

use async_trait::async_trait;
use mentorship_core::domain::{CalendarEvent, Organization};
use mentorship_core::ports::{
    AuthProvider, BillingProvider, CalendarFederation, EmailKind, EmailService, ExternalEventIds,
    ExternalIdentity, MeetingLinkProvider, PortError, PortResult, PushRegistration,
};
use mentorship_core::Providers;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::http::ProviderClient;
use crate::config::{Config, ConfigError, ProviderUrls, StoreBackend};

//=========================================================================================
// Wiring
//=========================================================================================

/// Builds the workflow providers, disabling each one that has no URL.
pub fn build_providers(urls: &ProviderUrls) -> Providers {
    let calendar: Arc<dyn CalendarFederation> = match &urls.calendar {
        Some(url) => Arc::new(HttpCalendarFederation::new(url)),
        None => disabled("calendar"),
    };
    let meetings: Arc<dyn MeetingLinkProvider> = match &urls.meetings {
        Some(url) => Arc::new(HttpMeetingLinks::new(url)),
        None => disabled("meetings"),
    };
    let email: Arc<dyn EmailService> = match &urls.email {
        Some(url) => Arc::new(HttpEmailService::new(url, urls.email_api_key.clone())),
        None => disabled("email"),
    };
    let push: Arc<dyn PushRegistration> = match &urls.push {
        Some(url) => Arc::new(HttpPushRegistration::new(url)),
        None => disabled("push"),
    };
    let billing: Arc<dyn BillingProvider> = match &urls.billing {
        Some(url) => Arc::new(HttpBillingProvider::new(url)),
        None => disabled("billing"),
    };
    Providers {
        calendar,
        meetings,
        email,
        push,
        billing,
    }
}

fn disabled(provider: &str) -> Arc<Disabled> {
    info!(provider, "no URL configured; provider disabled");
    Arc::new(Disabled)
}

/// The auth provider. Without a URL, token-as-identity auth is only allowed
/// on the in-memory development backend.
pub fn build_auth(config: &Config) -> Result<Arc<dyn AuthProvider>, ConfigError> {
    match (&config.providers.auth, config.store_backend) {
        (Some(url), _) => Ok(Arc::new(HttpAuthProvider::new(url))),
        (None, StoreBackend::Memory) => {
            warn!("AUTH_SERVICE_URL is not set; bearer tokens are trusted as external ids");
            Ok(Arc::new(DevTokenAuth))
        }
        (None, StoreBackend::Postgres) => {
            Err(ConfigError::MissingVar("AUTH_SERVICE_URL".to_string()))
        }
    }
}

//=========================================================================================
// Auth
//=========================================================================================

/// Exchanges bearer tokens with the external identity provider.
#[derive(Clone)]
pub struct HttpAuthProvider {
    client: ProviderClient,
}

impl HttpAuthProvider {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: ProviderClient::new("auth", base_url),
        }
    }
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn exchange_identity(&self, token: &str) -> PortResult<ExternalIdentity> {
        self.client
            .post_json("identity", &json!({}), Some(token))
            .await
    }
}

/// Development auth: the bearer token is taken to be the external id itself.
#[derive(Clone, Default)]
pub struct DevTokenAuth;

#[async_trait]
impl AuthProvider for DevTokenAuth {
    async fn exchange_identity(&self, token: &str) -> PortResult<ExternalIdentity> {
        let token = token.trim();
        if token.is_empty() {
            return Err(PortError::PermissionDenied("empty bearer token".to_string()));
        }
        Ok(ExternalIdentity {
            external_id: token.to_string(),
            email: String::new(),
            name: String::new(),
            picture: None,
        })
    }
}

//=========================================================================================
// Calendar, meetings, email, push, billing
//=========================================================================================

#[derive(Clone)]
pub struct HttpCalendarFederation {
    client: ProviderClient,
}

impl HttpCalendarFederation {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: ProviderClient::new("calendar", base_url),
        }
    }
}

#[async_trait]
impl CalendarFederation for HttpCalendarFederation {
    async fn create_event_everywhere(
        &self,
        event: &CalendarEvent,
        owner_id: &str,
        meeting_link: Option<&str>,
    ) -> PortResult<ExternalEventIds> {
        let body = json!({
            "event": event,
            "ownerId": owner_id,
            "meetingLink": meeting_link,
        });
        self.client.post_json("events", &body, None).await
    }
}

#[derive(Deserialize)]
struct UrlReply {
    url: String,
}

#[derive(Clone)]
pub struct HttpMeetingLinks {
    client: ProviderClient,
}

impl HttpMeetingLinks {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: ProviderClient::new("meetings", base_url),
        }
    }
}

#[async_trait]
impl MeetingLinkProvider for HttpMeetingLinks {
    async fn create_meeting_link(&self, title: &str) -> PortResult<String> {
        let reply: UrlReply = self
            .client
            .post_json("rooms", &json!({ "title": title }), None)
            .await?;
        if reply.url.trim().is_empty() {
            return Err(PortError::Unexpected("meetings returned an empty link".to_string()));
        }
        Ok(reply.url)
    }
}

#[derive(Clone)]
pub struct HttpEmailService {
    client: ProviderClient,
}

impl HttpEmailService {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: ProviderClient::new("email", base_url).with_api_key(api_key),
        }
    }
}

#[async_trait]
impl EmailService for HttpEmailService {
    async fn send_templated_email(
        &self,
        kind: EmailKind,
        recipient: &str,
        template_data: Value,
    ) -> PortResult<()> {
        let body = json!({
            "template": kind,
            "to": recipient,
            "data": template_data,
        });
        self.client.post("send", &body).await?;
        debug!(?kind, recipient, "email sent");
        Ok(())
    }
}

#[derive(Deserialize)]
struct DeviceReply {
    token: Option<String>,
}

#[derive(Clone)]
pub struct HttpPushRegistration {
    client: ProviderClient,
}

impl HttpPushRegistration {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: ProviderClient::new("push", base_url),
        }
    }
}

#[async_trait]
impl PushRegistration for HttpPushRegistration {
    async fn register_device(&self, user_id: &str) -> PortResult<Option<String>> {
        let reply: DeviceReply = self
            .client
            .post_json("devices", &json!({ "userId": user_id }), None)
            .await?;
        Ok(reply.token.filter(|t| !t.is_empty()))
    }
}

#[derive(Clone)]
pub struct HttpBillingProvider {
    client: ProviderClient,
}

impl HttpBillingProvider {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: ProviderClient::new("billing", base_url),
        }
    }
}

#[async_trait]
impl BillingProvider for HttpBillingProvider {
    async fn create_checkout(&self, organization: &Organization, plan: &str) -> PortResult<String> {
        let body = json!({
            "organizationId": organization.id,
            "organizationName": organization.name,
            "plan": plan,
        });
        let reply: UrlReply = self.client.post_json("checkout", &body, None).await?;
        Ok(reply.url)
    }
}

//=========================================================================================
// Disabled providers
//=========================================================================================

/// Stands in for any provider whose URL is not configured.
///
/// Calls are logged and answered with an empty result. Meeting links and
/// checkouts have no empty form, so those report the provider as unavailable.
#[derive(Clone, Copy, Debug, Default)]
pub struct Disabled;

fn not_configured(provider: &str) -> PortError {
    PortError::Transient(format!("{} provider is not configured", provider))
}

#[async_trait]
impl CalendarFederation for Disabled {
    async fn create_event_everywhere(
        &self,
        event: &CalendarEvent,
        _owner_id: &str,
        _meeting_link: Option<&str>,
    ) -> PortResult<ExternalEventIds> {
        info!(event_id = %event.id, "calendar provider disabled; skipping sync");
        Ok(ExternalEventIds::default())
    }
}

#[async_trait]
impl MeetingLinkProvider for Disabled {
    async fn create_meeting_link(&self, title: &str) -> PortResult<String> {
        info!(title, "meeting provider disabled");
        Err(not_configured("meetings"))
    }
}

#[async_trait]
impl EmailService for Disabled {
    async fn send_templated_email(
        &self,
        kind: EmailKind,
        recipient: &str,
        _template_data: Value,
    ) -> PortResult<()> {
        info!(?kind, recipient, "email provider disabled; not sending");
        Ok(())
    }
}

#[async_trait]
impl PushRegistration for Disabled {
    async fn register_device(&self, user_id: &str) -> PortResult<Option<String>> {
        debug!(user_id, "push provider disabled");
        Ok(None)
    }
}

#[async_trait]
impl BillingProvider for Disabled {
    async fn create_checkout(&self, organization: &Organization, plan: &str) -> PortResult<String> {
        info!(organization_id = %organization.id, plan, "billing provider disabled");
        Err(not_configured("billing"))
    }
}
