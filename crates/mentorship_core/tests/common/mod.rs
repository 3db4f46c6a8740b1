#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use mentorship_core::domain::{CalendarEvent, Organization, Role, User};
use mentorship_core::ports::{
    BillingProvider, CalendarFederation, ChangeEvent, Collection, DocumentPage, EmailKind,
    EmailService, EntityStore, ExternalEventIds, Filter, MeetingLinkProvider, PageRequest,
    PortError, PortResult, PushRegistration,
};
use mentorship_core::workflows::{Orchestrator, Providers, WorkflowSettings};
use mentorship_core::{InMemoryStore, StoreClient};

//=========================================================================================
// Store decorator with failure injection
//=========================================================================================

/// Wraps the in-memory store, fails chosen operations with a transient error
/// and can slow reads down so that concurrent callers interleave.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failing_writes: Mutex<HashSet<Collection>>,
    fail_reads: AtomicBool,
    reads: AtomicUsize,
    read_delay_ms: AtomicU64,
}

impl FlakyStore {
    pub fn fail_writes_to(&self, collection: Collection) {
        self.failing_writes.lock().unwrap().insert(collection);
    }

    pub fn heal(&self) {
        self.failing_writes.lock().unwrap().clear();
        self.fail_reads.store(false, Ordering::SeqCst);
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Every read sleeps this long before it reaches the store.
    pub fn slow_reads(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn check_write(&self, collection: Collection) -> PortResult<()> {
        if self.failing_writes.lock().unwrap().contains(&collection) {
            return Err(PortError::Transient(format!("{} unavailable", collection)));
        }
        Ok(())
    }

    async fn check_read(&self) -> PortResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PortError::Transient("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn insert(&self, collection: Collection, id: &str, document: Value) -> PortResult<()> {
        self.check_write(collection)?;
        self.inner.insert(collection, id, document).await
    }

    async fn get(&self, collection: Collection, id: &str) -> PortResult<Option<Value>> {
        self.check_read().await?;
        self.inner.get(collection, id).await
    }

    async fn patch(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> PortResult<()> {
        self.check_write(collection)?;
        self.inner.patch(collection, id, fields).await
    }

    async fn patch_if(
        &self,
        collection: Collection,
        id: &str,
        expected: &[Filter],
        fields: Map<String, Value>,
    ) -> PortResult<bool> {
        self.check_write(collection)?;
        self.inner.patch_if(collection, id, expected, fields).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> PortResult<()> {
        self.check_write(collection)?;
        self.inner.delete(collection, id).await
    }

    async fn query(&self, collection: Collection, filters: &[Filter]) -> PortResult<Vec<Value>> {
        self.check_read().await?;
        self.inner.query(collection, filters).await
    }

    async fn page(
        &self,
        collection: Collection,
        filters: &[Filter],
        request: &PageRequest,
    ) -> PortResult<DocumentPage> {
        self.check_read().await?;
        self.inner.page(collection, filters, request).await
    }

    async fn increment(
        &self,
        collection: Collection,
        id: &str,
        field: &str,
        delta: i64,
    ) -> PortResult<()> {
        self.check_write(collection)?;
        self.inner.increment(collection, id, field, delta).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.subscribe()
    }
}

//=========================================================================================
// Recording providers
//=========================================================================================

#[derive(Default)]
pub struct RecordingEmail {
    pub sent: Mutex<Vec<(EmailKind, String)>>,
}

impl RecordingEmail {
    pub fn sent_to(&self, recipient: &str) -> Vec<EmailKind> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, to)| to == recipient)
            .map(|(kind, _)| *kind)
            .collect()
    }
}

#[async_trait]
impl EmailService for RecordingEmail {
    async fn send_templated_email(
        &self,
        kind: EmailKind,
        recipient: &str,
        _template_data: Value,
    ) -> PortResult<()> {
        self.sent.lock().unwrap().push((kind, recipient.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCalendar {
    pub synced: Mutex<Vec<String>>,
}

#[async_trait]
impl CalendarFederation for RecordingCalendar {
    async fn create_event_everywhere(
        &self,
        event: &CalendarEvent,
        _owner_id: &str,
        _meeting_link: Option<&str>,
    ) -> PortResult<ExternalEventIds> {
        self.synced.lock().unwrap().push(event.id.clone());
        Ok(ExternalEventIds {
            google_id: Some(format!("g-{}", event.id)),
            outlook_id: None,
            apple_id: None,
        })
    }
}

#[derive(Default)]
pub struct StubMeetings {
    pub unavailable: AtomicBool,
}

#[async_trait]
impl MeetingLinkProvider for StubMeetings {
    async fn create_meeting_link(&self, _title: &str) -> PortResult<String> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortError::Transient("meeting service down".to_string()));
        }
        Ok("https://meet.example.com/room".to_string())
    }
}

pub struct StubPush;

#[async_trait]
impl PushRegistration for StubPush {
    async fn register_device(&self, user_id: &str) -> PortResult<Option<String>> {
        Ok(Some(format!("device-{}", user_id)))
    }
}

pub struct StubBilling;

#[async_trait]
impl BillingProvider for StubBilling {
    async fn create_checkout(&self, organization: &Organization, plan: &str) -> PortResult<String> {
        Ok(format!("https://billing.example.com/{}/{}", organization.id, plan))
    }
}

//=========================================================================================
// Harness
//=========================================================================================

pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub client: StoreClient,
    pub email: Arc<RecordingEmail>,
    pub calendar: Arc<RecordingCalendar>,
    pub meetings: Arc<StubMeetings>,
    pub orchestrator: Orchestrator,
    pub org: Organization,
    pub admin: User,
    pub mentor: User,
    pub mentee: User,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(WorkflowSettings::default()).await
    }

    pub async fn with_settings(settings: WorkflowSettings) -> Self {
        let store = Arc::new(FlakyStore::default());
        let client = StoreClient::new(store.clone());
        let email = Arc::new(RecordingEmail::default());
        let calendar = Arc::new(RecordingCalendar::default());
        let meetings = Arc::new(StubMeetings::default());
        let providers = Providers {
            calendar: calendar.clone(),
            meetings: meetings.clone(),
            email: email.clone(),
            push: Arc::new(StubPush),
            billing: Arc::new(StubBilling),
        };
        let orchestrator = Orchestrator::new(client.clone(), providers, settings);

        let org = seed_organization(&client, "Acme").await;
        let admin = seed_user(&client, &org, Role::Admin, "Ann").await;
        let mentor = seed_user(&client, &org, Role::Mentor, "Max").await;
        let mentee = seed_user(&client, &org, Role::Mentee, "Eve").await;

        Self {
            store,
            client,
            email,
            calendar,
            meetings,
            orchestrator,
            org,
            admin,
            mentor,
            mentee,
        }
    }

    pub async fn user(&self, id: &str) -> User {
        self.client.get::<User>(id).await.unwrap().unwrap()
    }
}

pub async fn seed_organization(client: &StoreClient, name: &str) -> Organization {
    let org = Organization::new(name, None);
    client.create(&org.id.clone(), org).await.unwrap()
}

pub async fn seed_user(client: &StoreClient, org: &Organization, role: Role, name: &str) -> User {
    let email = format!("{}@{}.example.com", name.to_lowercase(), org.name.to_lowercase());
    let user = User::new(&org.id, role, name, email);
    client.create(&org.id, user).await.unwrap()
}
