//! crates/mentorship_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the document database and the third-party providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::broadcast;

use crate::domain::{CalendarEvent, Organization};

//=========================================================================================
// Error Taxonomy
//=========================================================================================

/// The classified error type for every port and core operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    /// Caller-supplied data failed a precondition. Raised before any remote write.
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Tenant mismatch: {entity} {id} does not belong to organization {expected}")]
    TenantMismatch {
        entity: String,
        id: String,
        expected: String,
    },
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// The store or a provider is unavailable. Callers may retry via a refresh.
    #[error("Transient failure: {0}")]
    Transient(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    pub fn tenant_mismatch(entity: &str, id: &str, expected: &str) -> Self {
        PortError::TenantMismatch {
            entity: entity.to_string(),
            id: id.to_string(),
            expected: expected.to_string(),
        }
    }

    /// Stable name of the error class, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            PortError::Validation(_) => "validation",
            PortError::TenantMismatch { .. } => "tenant_mismatch",
            PortError::NotFound(_) => "not_found",
            PortError::PermissionDenied(_) => "permission_denied",
            PortError::Transient(_) => "transient",
            PortError::Unexpected(_) => "unexpected",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PortError::Transient(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Document Store Vocabulary
//=========================================================================================

/// The logical collections of the document database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Organizations,
    Users,
    Matches,
    Goals,
    Ratings,
    Resources,
    CalendarEvents,
    Notifications,
    Invitations,
    BlogPosts,
    DiscussionGuides,
    CareerTemplates,
    TrainingVideos,
    ChatMessages,
}

impl Collection {
    pub const ALL: [Collection; 14] = [
        Collection::Organizations,
        Collection::Users,
        Collection::Matches,
        Collection::Goals,
        Collection::Ratings,
        Collection::Resources,
        Collection::CalendarEvents,
        Collection::Notifications,
        Collection::Invitations,
        Collection::BlogPosts,
        Collection::DiscussionGuides,
        Collection::CareerTemplates,
        Collection::TrainingVideos,
        Collection::ChatMessages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Organizations => "organizations",
            Collection::Users => "users",
            Collection::Matches => "matches",
            Collection::Goals => "goals",
            Collection::Ratings => "ratings",
            Collection::Resources => "resources",
            Collection::CalendarEvents => "calendarEvents",
            Collection::Notifications => "notifications",
            Collection::Invitations => "invitations",
            Collection::BlogPosts => "blogPosts",
            Collection::DiscussionGuides => "discussionGuides",
            Collection::CareerTemplates => "careerTemplates",
            Collection::TrainingVideos => "trainingVideos",
            Collection::ChatMessages => "chatMessages",
        }
    }

    /// Collections that may hold platform-wide documents without an organization.
    pub fn allows_platform_items(&self) -> bool {
        matches!(
            self,
            Collection::Resources
                | Collection::BlogPosts
                | Collection::DiscussionGuides
                | Collection::CareerTemplates
                | Collection::TrainingVideos
        )
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An equality predicate on a top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// A missing field matches a `null` filter value.
    pub fn matches(&self, document: &Value) -> bool {
        match document.get(&self.field) {
            Some(found) => found == &self.value,
            None => self.value.is_null(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page_size: usize,
    /// Opaque token returned by the previous page; `None` starts from the beginning.
    pub cursor: Option<String>,
}

impl PageRequest {
    pub fn first(page_size: usize) -> Self {
        Self {
            page_size,
            cursor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPage {
    pub documents: Vec<Value>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Published by a store after every successful write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub collection: Collection,
    pub id: String,
    pub organization_id: Option<String>,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    /// Describes a write to `body`. An organization document is owned by itself.
    pub fn for_document(collection: Collection, id: &str, body: &Value, kind: ChangeKind) -> Self {
        let organization_id = match collection {
            Collection::Organizations => Some(id.to_string()),
            _ => body
                .get("organizationId")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        Self {
            collection,
            id: id.to_string(),
            organization_id,
            kind,
        }
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The remote document database.
///
/// Implementations must make `increment` and `patch_if` atomic at the document
/// level. They are the only safe ways to mutate shared counters and to move a
/// document out of a state exactly once.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn insert(&self, collection: Collection, id: &str, document: Value) -> PortResult<()>;

    async fn get(&self, collection: Collection, id: &str) -> PortResult<Option<Value>>;

    /// Shallow merge of `fields` into an existing document.
    async fn patch(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> PortResult<()>;

    /// Merges `fields` only while every `expected` filter still matches the stored
    /// document, checked and written as one step. Returns whether it wrote.
    async fn patch_if(
        &self,
        collection: Collection,
        id: &str,
        expected: &[Filter],
        fields: Map<String, Value>,
    ) -> PortResult<bool>;

    async fn delete(&self, collection: Collection, id: &str) -> PortResult<()>;

    async fn query(&self, collection: Collection, filters: &[Filter]) -> PortResult<Vec<Value>>;

    /// Pages through matching documents in insertion order.
    async fn page(
        &self,
        collection: Collection,
        filters: &[Filter],
        request: &PageRequest,
    ) -> PortResult<DocumentPage>;

    /// Adds `delta` to an integer field, treating a missing field as zero.
    async fn increment(
        &self,
        collection: Collection,
        id: &str,
        field: &str,
        delta: i64,
    ) -> PortResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Identity returned by the external auth provider for a verified token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIdentity {
    pub external_id: String,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn exchange_identity(&self, token: &str) -> PortResult<ExternalIdentity>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEventIds {
    pub google_id: Option<String>,
    pub outlook_id: Option<String>,
    pub apple_id: Option<String>,
}

#[async_trait]
pub trait CalendarFederation: Send + Sync {
    async fn create_event_everywhere(
        &self,
        event: &CalendarEvent,
        owner_id: &str,
        meeting_link: Option<&str>,
    ) -> PortResult<ExternalEventIds>;
}

#[async_trait]
pub trait MeetingLinkProvider: Send + Sync {
    /// Returns the URL of a freshly created virtual meeting room.
    async fn create_meeting_link(&self, title: &str) -> PortResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    Invitation,
    Welcome,
    MatchCreated,
    MeetingScheduled,
}

#[async_trait]
pub trait EmailService: Send + Sync {
    async fn send_templated_email(
        &self,
        kind: EmailKind,
        recipient: &str,
        template_data: Value,
    ) -> PortResult<()>;
}

#[async_trait]
pub trait PushRegistration: Send + Sync {
    /// Returns the delivery token for the user's device, if one is registered.
    async fn register_device(&self, user_id: &str) -> PortResult<Option<String>>;
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Returns the hosted checkout URL for upgrading the organization.
    async fn create_checkout(&self, organization: &Organization, plan: &str) -> PortResult<String>;
}
