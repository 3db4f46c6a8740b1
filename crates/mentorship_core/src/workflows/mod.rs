//! crates/mentorship_core/src/workflows/mod.rs
//!
//! Multi-record workflows triggered by a single user action. Prerequisite steps
//! are awaited in order and abort the action on failure; everything else is
//! handed to a [`BestEffort`](crate::executor::BestEffort) run.

pub mod events;
pub mod invitations;
pub mod matches;
pub mod onboarding;
pub mod records;

use chrono::Duration as ChronoDuration;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::domain::Notification;
use crate::ports::{
    BillingProvider, CalendarFederation, EmailKind, EmailService, MeetingLinkProvider, PortResult,
    PushRegistration,
};
use crate::store::StoreClient;

pub use events::{hour_adjustments, EventChanges, EventOutcome, HourAdjustment, NewEvent};
pub use invitations::{InvitationOutcome, NewInvitation, Signup};
pub use matches::{MatchOutcome, NewMatch};
pub use onboarding::{MenteeOnboarding, MentorOnboarding, OnboardingOutcome, OnboardingPayload};
pub use records::{
    BillingUpdate, ContentChanges, NewBlogPost, NewContent, NewGoal, NewRating,
    OrganizationSettings,
};

/// The third-party collaborators the workflows call.
#[derive(Clone)]
pub struct Providers {
    pub calendar: Arc<dyn CalendarFederation>,
    pub meetings: Arc<dyn MeetingLinkProvider>,
    pub email: Arc<dyn EmailService>,
    pub push: Arc<dyn PushRegistration>,
    pub billing: Arc<dyn BillingProvider>,
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Base URL invitation links are derived from.
    pub app_base_url: String,
    pub invitation_ttl: ChronoDuration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            app_base_url: "http://localhost:3000".to_string(),
            invitation_ttl: ChronoDuration::days(14),
        }
    }
}

/// Entry point for every cascading workflow. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    store: StoreClient,
    providers: Providers,
    settings: WorkflowSettings,
}

impl Orchestrator {
    pub fn new(store: StoreClient, providers: Providers, settings: WorkflowSettings) -> Self {
        Self {
            store,
            providers,
            settings,
        }
    }

    pub fn store(&self) -> &StoreClient {
        &self.store
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }
}

/// Writes a notification, attaching a push delivery token when the recipient has one.
pub(crate) async fn deliver_notification(
    store: StoreClient,
    push: Arc<dyn PushRegistration>,
    mut notification: Notification,
) -> PortResult<()> {
    match push.register_device(&notification.user_id).await {
        Ok(token) => notification.delivery_token = token,
        Err(e) => warn!(
            user_id = %notification.user_id,
            kind = e.kind(),
            "push registration failed; notification stored without delivery token"
        ),
    }
    let organization_id = notification.organization_id.clone();
    store.create(&organization_id, notification).await?;
    Ok(())
}

pub(crate) async fn send_email(
    email: Arc<dyn EmailService>,
    kind: EmailKind,
    recipient: String,
    data: Value,
) -> PortResult<()> {
    email.send_templated_email(kind, &recipient, data).await
}
