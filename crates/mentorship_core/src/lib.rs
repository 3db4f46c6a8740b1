pub mod aggregator;
pub mod domain;
pub mod duration;
pub mod executor;
pub mod memory;
pub mod optimistic;
pub mod pagination;
pub mod ports;
pub mod session;
pub mod store;
pub mod workflows;

pub use aggregator::{AggregateState, DataAggregator, OrgSnapshot};
pub use domain::{
    BlogPost, CalendarEvent, CareerTemplate, ChatMessage, DiscussionGuide, EventKind, Goal,
    GoalStatus, Invitation, InvitationStatus, Match, MatchStatus, Notification, NotificationKind,
    Organization, ProgramSettings, Rating, Resource, Role, SubscriptionStatus, TrainingVideo, User,
};
pub use executor::{BestEffort, SideEffects, StepOutcome};
pub use memory::InMemoryStore;
pub use optimistic::{LocalState, MutationHooks, OptimisticCoordinator, Rollback};
pub use pagination::Paginator;
pub use ports::{
    AuthProvider, BillingProvider, CalendarFederation, Collection, EmailKind, EmailService,
    EntityStore, ExternalEventIds, ExternalIdentity, MeetingLinkProvider, PortError, PortResult,
    PushRegistration,
};
pub use session::{Authorizer, SessionContext, SyncSession};
pub use store::{Entity, Page, StoreClient};
pub use workflows::{Orchestrator, Providers, WorkflowSettings};
