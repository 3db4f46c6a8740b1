//! crates/mentorship_core/src/aggregator.rs
//!
//! Hydrates and keeps current the full working set of one organization for one
//! signed-in user, published as a single immutable snapshot.

use futures::try_join;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{
    BlogPost, CalendarEvent, CareerTemplate, DiscussionGuide, Goal, Invitation, Match,
    Notification, Organization, ProgramSettings, Rating, Resource, TrainingVideo, User,
};
use crate::optimistic::LocalState;
use crate::ports::{ChangeEvent, Filter, PortError, PortResult};
use crate::session::SessionContext;
use crate::store::{Entity, StoreClient};

//=========================================================================================
// Snapshot Types
//=========================================================================================

/// Everything a signed-in user works with, loaded together.
///
/// Content collections hold platform items first, then the organization's own
/// items; each item's `is_platform` flag tells them apart.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgSnapshot {
    pub current_user: Option<User>,
    pub users: Vec<User>,
    pub matches: Vec<Match>,
    pub goals: Vec<Goal>,
    pub ratings: Vec<Rating>,
    pub resources: Vec<Resource>,
    pub calendar_events: Vec<CalendarEvent>,
    pub notifications: Vec<Notification>,
    pub invitations: Vec<Invitation>,
    pub organization: Option<Organization>,
    pub program_settings: Option<ProgramSettings>,
    pub blog_posts: Vec<BlogPost>,
    pub discussion_guides: Vec<DiscussionGuide>,
    pub career_templates: Vec<CareerTemplate>,
    pub training_videos: Vec<TrainingVideo>,
}

impl OrgSnapshot {
    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }
}

/// What consumers observe: the snapshot plus load status.
#[derive(Debug, Clone, Default)]
pub struct AggregateState {
    pub snapshot: Arc<OrgSnapshot>,
    pub loading: bool,
    pub error: Option<PortError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Scope {
    user_id: String,
    organization_id: String,
}

//=========================================================================================
// The Aggregator
//=========================================================================================

pub struct DataAggregator {
    store: StoreClient,
    scope: Option<Scope>,
    state: watch::Sender<AggregateState>,
    /// Id of the most recently started refresh. Only it may publish.
    latest_refresh: AtomicU64,
}

impl DataAggregator {
    /// A missing or empty id yields a guest aggregator that never reads the store.
    pub fn new(store: StoreClient, user_id: Option<&str>, organization_id: Option<&str>) -> Self {
        let scope = match (user_id, organization_id) {
            (Some(user), Some(org)) if !user.is_empty() && !org.is_empty() => Some(Scope {
                user_id: user.to_string(),
                organization_id: org.to_string(),
            }),
            _ => None,
        };
        let (state, _) = watch::channel(AggregateState {
            snapshot: Arc::new(OrgSnapshot::default()),
            loading: scope.is_some(),
            error: None,
        });
        Self {
            store,
            scope,
            state,
            latest_refresh: AtomicU64::new(0),
        }
    }

    pub fn for_session(store: StoreClient, context: &SessionContext) -> Self {
        Self::new(
            store,
            Some(&context.user_id),
            Some(&context.organization_id),
        )
    }

    pub fn is_guest(&self) -> bool {
        self.scope.is_none()
    }

    pub fn state(&self) -> AggregateState {
        self.state.borrow().clone()
    }

    pub fn snapshot(&self) -> Arc<OrgSnapshot> {
        self.state.borrow().snapshot.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AggregateState> {
        self.state.subscribe()
    }

    /// Re-reads everything and swaps the snapshot in one step.
    ///
    /// A failed read leaves the previous snapshot in place and records the error.
    /// When refreshes overlap, only the most recently started one publishes.
    pub async fn refresh(&self) -> PortResult<()> {
        let Some(scope) = &self.scope else {
            self.state.send_modify(|s| s.loading = false);
            return Ok(());
        };
        let refresh_id = self.latest_refresh.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.send_modify(|s| s.loading = true);

        let loaded = load_snapshot(&self.store, scope).await;

        if self.latest_refresh.load(Ordering::Acquire) != refresh_id {
            debug!(refresh_id, "refresh superseded; discarding its result");
            return loaded.map(|_| ());
        }
        match loaded {
            Ok(snapshot) => {
                self.state.send_modify(|s| {
                    s.snapshot = Arc::new(snapshot);
                    s.loading = false;
                    s.error = None;
                });
                Ok(())
            }
            Err(e) => {
                error!(
                    organization_id = %scope.organization_id,
                    kind = e.kind(),
                    error = %e,
                    "snapshot refresh failed"
                );
                self.state.send_modify(|s| {
                    s.loading = false;
                    s.error = Some(e.clone());
                });
                Err(e)
            }
        }
    }

    /// Refreshes whenever the store reports a change relevant to this organization,
    /// until `cancel` fires.
    pub fn watch_changes(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);
        let mut changes = self.store.port().subscribe();
        tokio::spawn(async move {
            let Some(organization_id) = aggregator
                .scope
                .as_ref()
                .map(|s| s.organization_id.clone())
            else {
                return;
            };
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = changes.recv() => next,
                };
                match next {
                    Ok(event) if !is_relevant(&event, &organization_id) => continue,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "change feed lagged; refreshing");
                    }
                    Err(RecvError::Closed) => break,
                }
                if let Err(e) = aggregator.refresh().await {
                    warn!(kind = e.kind(), "refresh after change failed");
                }
            }
            info!(organization_id = %organization_id, "change watcher stopped");
        })
    }
}

impl LocalState for DataAggregator {
    type State = Arc<OrgSnapshot>;

    fn current(&self) -> Arc<OrgSnapshot> {
        self.snapshot()
    }

    fn replace(&self, next: Arc<OrgSnapshot>) {
        self.state.send_modify(|s| s.snapshot = next);
    }
}

fn is_relevant(event: &ChangeEvent, organization_id: &str) -> bool {
    match event.organization_id.as_deref() {
        Some(owner) => owner == organization_id,
        // Platform content changes are visible to every organization.
        None => event.collection.allows_platform_items(),
    }
}

//=========================================================================================
// Loading
//=========================================================================================

async fn load_snapshot(store: &StoreClient, scope: &Scope) -> PortResult<OrgSnapshot> {
    let org = scope.organization_id.as_str();
    let own_notifications = [Filter::eq("userId", scope.user_id.as_str())];
    let published = [Filter::eq("published", true)];

    let (
        current_user,
        users,
        matches,
        goals,
        ratings,
        calendar_events,
        notifications,
        invitations,
        organization,
    ) = try_join!(
        store.get_scoped::<User>(org, &scope.user_id),
        store.list_by_organization::<User>(org, &[]),
        store.list_by_organization::<Match>(org, &[]),
        store.list_by_organization::<Goal>(org, &[]),
        store.list_by_organization::<Rating>(org, &[]),
        store.list_by_organization::<CalendarEvent>(org, &[]),
        store.list_by_organization::<Notification>(org, &own_notifications),
        store.list_by_organization::<Invitation>(org, &[]),
        store.get_scoped::<Organization>(org, org),
    )?;

    let (resources, discussion_guides, career_templates, training_videos, blog_posts) = try_join!(
        load_merged::<Resource>(store, org, &[]),
        load_merged::<DiscussionGuide>(store, org, &[]),
        load_merged::<CareerTemplate>(store, org, &[]),
        load_merged::<TrainingVideo>(store, org, &[]),
        load_merged::<BlogPost>(store, org, &published),
    )?;

    debug!(
        organization_id = org,
        users = users.len(),
        matches = matches.len(),
        "snapshot loaded"
    );
    Ok(OrgSnapshot {
        current_user: Some(current_user),
        users,
        matches,
        goals,
        ratings,
        resources,
        calendar_events,
        notifications,
        invitations,
        program_settings: Some(organization.program.clone()),
        organization: Some(organization),
        blog_posts,
        discussion_guides,
        career_templates,
        training_videos,
    })
}

/// Platform items followed by the organization's own, without duplicates.
async fn load_merged<E: Entity>(
    store: &StoreClient,
    organization_id: &str,
    filters: &[Filter],
) -> PortResult<Vec<E>> {
    let (platform, own) = try_join!(
        store.list_platform::<E>(filters),
        store.list_by_organization::<E>(organization_id, filters),
    )?;
    let mut seen = HashSet::new();
    Ok(platform
        .into_iter()
        .chain(own)
        .filter(|item| seen.insert(item.id().to_string()))
        .collect())
}
