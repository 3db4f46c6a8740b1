pub mod db;
pub mod http;
pub mod providers;

pub use db::PgDocumentStore;
pub use mentorship_core::memory::InMemoryStore;
pub use providers::{
    build_auth, build_providers, DevTokenAuth, Disabled, HttpAuthProvider, HttpBillingProvider,
    HttpCalendarFederation, HttpEmailService, HttpMeetingLinks, HttpPushRegistration,
};
