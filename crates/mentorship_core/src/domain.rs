//! crates/mentorship_core/src/domain.rs
//!
//! Defines the core records of a mentorship organization.
//! Every record serializes to the camelCase document shape kept in the store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// Generates a fresh opaque document id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

//=========================================================================================
// Roles
//=========================================================================================

/// The canonical role enumeration.
///
/// `PLATFORM_ADMIN` and `PLATFORM_OPERATOR` are accepted when reading older documents
/// and always map to [`Role::PlatformAdmin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(
        rename = "platform-admin",
        alias = "PLATFORM_ADMIN",
        alias = "PLATFORM_OPERATOR"
    )]
    PlatformAdmin,
    #[serde(rename = "mentor")]
    Mentor,
    #[serde(rename = "mentee")]
    Mentee,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::PlatformAdmin => "platform-admin",
            Role::Mentor => "mentor",
            Role::Mentee => "mentee",
        }
    }

    /// Organization admins and platform admins both manage an organization.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::PlatformAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "platform-admin" | "PLATFORM_ADMIN" | "PLATFORM_OPERATOR" => Ok(Role::PlatformAdmin),
            "mentor" => Ok(Role::Mentor),
            "mentee" => Ok(Role::Mentee),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

//=========================================================================================
// Organization
//=========================================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branding {
    pub logo_url: Option<String>,
    pub accent_color: Option<String>,
}

/// Program-level configuration chosen by the organization's admins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgramSettings {
    pub program_name: Option<String>,
    pub match_duration_months: Option<u32>,
    pub meeting_frequency: Option<String>,
    pub goals_enabled: bool,
    pub ratings_enabled: bool,
    pub require_rating_approval: bool,
}

impl Default for ProgramSettings {
    fn default() -> Self {
        Self {
            program_name: None,
            match_duration_months: None,
            meeting_frequency: None,
            goals_enabled: true,
            ratings_enabled: true,
            require_rating_approval: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub branding: Branding,
    #[serde(default)]
    pub program: ProgramSettings,
    pub subscription_status: SubscriptionStatus,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub join_code: String,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>, trial_ends_at: Option<DateTime<Utc>>) -> Self {
        let id = new_id();
        let join_code = id.replace('-', "")[..8].to_uppercase();
        Self {
            id,
            name: name.into(),
            branding: Branding::default(),
            program: ProgramSettings::default(),
            subscription_status: SubscriptionStatus::Trialing,
            trial_ends_at,
            join_code,
            created_at: Utc::now(),
        }
    }
}

//=========================================================================================
// Users
//=========================================================================================

/// A participant of an organization. `organization_id` never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub organization_id: String,
    pub role: Role,
    pub name: String,
    pub email: String,
    pub title: Option<String>,
    pub company: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    pub bio: Option<String>,
    pub availability: Option<String>,
    pub external_id: Option<String>,
    /// Cumulative minutes of scheduled mentoring. Only ever changed by delta.
    #[serde(default)]
    pub committed_minutes: i64,
    #[serde(default)]
    pub onboarding_complete: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        organization_id: impl Into<String>,
        role: Role,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            organization_id: organization_id.into(),
            role,
            name: name.into(),
            email: email.into(),
            title: None,
            company: None,
            skills: Vec::new(),
            goals: Vec::new(),
            bio: None,
            availability: None,
            external_id: None,
            committed_minutes: 0,
            onboarding_complete: false,
            created_at: Utc::now(),
        }
    }

    pub fn committed_hours(&self) -> f64 {
        crate::duration::minutes_to_hours(self.committed_minutes)
    }
}

//=========================================================================================
// Matches, goals, ratings
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStatus {
    Pending,
    Active,
    Completed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: String,
    pub organization_id: String,
    pub mentor_id: String,
    pub mentee_id: String,
    pub status: MatchStatus,
    pub start_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GoalStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl GoalStatus {
    pub fn for_progress(progress: u8) -> Self {
        match progress {
            0 => GoalStatus::NotStarted,
            100.. => GoalStatus::Completed,
            _ => GoalStatus::InProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub progress: u8,
    pub status: GoalStatus,
    pub due_date: Option<NaiveDate>,
}

impl Goal {
    pub fn new(
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        due_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            id: new_id(),
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            title: title.into(),
            description: description.into(),
            progress: 0,
            status: GoalStatus::NotStarted,
            due_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub id: String,
    pub organization_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub score: u8,
    #[serde(default)]
    pub comment: String,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Content (organization-scoped or platform-wide)
//=========================================================================================

/// Marker for the kinds of library content sharing the [`Content`] shape.
pub trait ContentKind: Send + Sync + 'static {
    const LABEL: &'static str;
}

macro_rules! content_kind {
    ($marker:ident, $label:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $marker;

        impl ContentKind for $marker {
            const LABEL: &'static str = $label;
        }
    };
}

content_kind!(ResourceKind, "resource");
content_kind!(DiscussionGuideKind, "discussion guide");
content_kind!(CareerTemplateKind, "career template");
content_kind!(TrainingVideoKind, "training video");

/// A library item. Platform items carry no `organization_id` and are visible to all tenants.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "")]
pub struct Content<K: ContentKind> {
    pub id: String,
    pub organization_id: Option<String>,
    pub is_platform: bool,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub url: Option<String>,
    pub body: Option<String>,
    pub category: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    kind: PhantomData<K>,
}

impl<K: ContentKind> Content<K> {
    pub fn new(
        organization_id: Option<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            is_platform: organization_id.is_none(),
            organization_id,
            title: title.into(),
            description: description.into(),
            url: None,
            body: None,
            category: None,
            created_by: created_by.into(),
            created_at: Utc::now(),
            kind: PhantomData,
        }
    }
}

// Manual impls so the marker type needs no bounds of its own.
impl<K: ContentKind> Clone for Content<K> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            organization_id: self.organization_id.clone(),
            is_platform: self.is_platform,
            title: self.title.clone(),
            description: self.description.clone(),
            url: self.url.clone(),
            body: self.body.clone(),
            category: self.category.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            kind: PhantomData,
        }
    }
}

impl<K: ContentKind> PartialEq for Content<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.organization_id == other.organization_id
            && self.is_platform == other.is_platform
            && self.title == other.title
            && self.description == other.description
            && self.url == other.url
            && self.body == other.body
            && self.category == other.category
            && self.created_by == other.created_by
            && self.created_at == other.created_at
    }
}

pub type Resource = Content<ResourceKind>;
pub type DiscussionGuide = Content<DiscussionGuideKind>;
pub type CareerTemplate = Content<CareerTemplateKind>;
pub type TrainingVideo = Content<TrainingVideoKind>;

/// Blog posts are platform-wide unless an organization publishes its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPost {
    pub id: String,
    pub organization_id: Option<String>,
    pub is_platform: bool,
    pub title: String,
    pub body: String,
    pub author_id: String,
    pub published: bool,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Calendar
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    InPerson,
    Virtual,
}

impl EventKind {
    pub fn needs_meeting_link(&self) -> bool {
        matches!(self, EventKind::Virtual)
    }
}

/// Per-provider sync markers written back after federation succeeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSync {
    pub google_synced: bool,
    pub google_event_id: Option<String>,
    pub outlook_synced: bool,
    pub outlook_event_id: Option<String>,
    pub apple_synced: bool,
    pub apple_event_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub organization_id: String,
    pub title: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub time: Option<String>,
    /// Free text such as "1h", "2h30m" or "45 minutes".
    pub duration: String,
    pub mentor_id: Option<String>,
    #[serde(default)]
    pub participant_ids: Vec<String>,
    pub kind: EventKind,
    pub meeting_link: Option<String>,
    #[serde(default)]
    pub sync: ProviderSync,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Notifications, invitations, chat
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    Match,
    Meeting,
    Goal,
    Rating,
    Message,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    /// Id of the chat this notification opens, if any.
    pub chat_link: Option<String>,
    pub delivery_token: Option<String>,
}

impl Notification {
    pub fn new(
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            kind,
            title: title.into(),
            body: body.into(),
            is_read: false,
            created_at: Utc::now(),
            chat_link: None,
            delivery_token: None,
        }
    }

    pub fn with_chat_link(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_link = Some(chat_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: String,
    pub organization_id: String,
    /// Stored lowercased so lookups by address are case-insensitive.
    pub email: String,
    pub name: String,
    pub role: Role,
    pub status: InvitationStatus,
    pub token: String,
    pub link: String,
    pub invited_by: String,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

/// One message in a chat thread. `chat_id` is the id of the counterpart whose
/// chat view lists the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub organization_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
