//! crates/mentorship_core/src/session.rs
//!
//! The explicit session: who is signed in, which organization they see, and
//! whose authority every permission check uses. A `SyncSession` owns the
//! session's snapshot and is torn down explicitly at sign-out.

use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::{AggregateState, DataAggregator, OrgSnapshot};
use crate::domain::{Goal, GoalStatus, Notification, Rating, Role, User};
use crate::optimistic::OptimisticCoordinator;
use crate::ports::{PortError, PortResult};
use crate::store::StoreClient;

//=========================================================================================
// Session Context
//=========================================================================================

/// The identity whose role decides what a session may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorizer {
    pub user_id: String,
    pub role: Role,
}

/// Who is displayed and who is authorizing.
///
/// While a platform admin impersonates someone, `user_id`/`organization_id`
/// describe the impersonated user but `authorizer` stays the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub user_id: String,
    pub organization_id: String,
    pub display_role: Role,
    pub authorizer: Authorizer,
}

impl SessionContext {
    pub fn for_user(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            organization_id: user.organization_id.clone(),
            display_role: user.role,
            authorizer: Authorizer {
                user_id: user.id.clone(),
                role: user.role,
            },
        }
    }

    /// Starts viewing the app as `target`. Only platform admins may do this.
    pub fn impersonate(&self, target: &User) -> PortResult<Self> {
        if self.authorizer.role != Role::PlatformAdmin {
            return Err(PortError::PermissionDenied(
                "only platform admins can impersonate".to_string(),
            ));
        }
        Ok(Self {
            user_id: target.id.clone(),
            organization_id: target.organization_id.clone(),
            display_role: target.role,
            authorizer: self.authorizer.clone(),
        })
    }

    pub fn is_impersonating(&self) -> bool {
        self.authorizer.user_id != self.user_id
    }

    pub fn require_admin(&self) -> PortResult<()> {
        if self.authorizer.role.is_admin() {
            Ok(())
        } else {
            Err(PortError::PermissionDenied(format!(
                "{} role cannot administer the organization",
                self.authorizer.role
            )))
        }
    }

    pub fn require_platform_admin(&self) -> PortResult<()> {
        if self.authorizer.role == Role::PlatformAdmin {
            Ok(())
        } else {
            Err(PortError::PermissionDenied(
                "platform content is managed by platform admins".to_string(),
            ))
        }
    }

    /// The displayed user may act on their own records; admins on anyone's.
    pub fn require_self_or_admin(&self, user_id: &str) -> PortResult<()> {
        if self.user_id == user_id {
            return Ok(());
        }
        self.require_admin()
    }
}

//=========================================================================================
// Sync Session
//=========================================================================================

/// One signed-in session: its snapshot, optimistic mutations, and change watcher.
pub struct SyncSession {
    context: SessionContext,
    store: StoreClient,
    aggregator: Arc<DataAggregator>,
    coordinator: OptimisticCoordinator<DataAggregator>,
    cancel: CancellationToken,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncSession {
    /// Hydrates the snapshot and starts following store changes.
    pub async fn open(
        store: StoreClient,
        context: SessionContext,
        rollback_delay: Duration,
    ) -> PortResult<Arc<Self>> {
        let aggregator = Arc::new(DataAggregator::for_session(store.clone(), &context));
        aggregator.refresh().await?;

        let cancel = CancellationToken::new();
        let watcher = aggregator.watch_changes(cancel.child_token());
        info!(
            user_id = %context.user_id,
            organization_id = %context.organization_id,
            impersonating = context.is_impersonating(),
            "session opened"
        );
        Ok(Arc::new(Self {
            coordinator: OptimisticCoordinator::new(aggregator.clone(), rollback_delay),
            context,
            store,
            aggregator,
            cancel,
            watcher: Mutex::new(Some(watcher)),
        }))
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn aggregator(&self) -> &Arc<DataAggregator> {
        &self.aggregator
    }

    pub fn state(&self) -> AggregateState {
        self.aggregator.state()
    }

    pub fn snapshot(&self) -> Arc<OrgSnapshot> {
        self.aggregator.snapshot()
    }

    pub async fn refresh(&self) -> PortResult<()> {
        self.aggregator.refresh().await
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops the change watcher. In-flight side effects are left to finish on their own.
    pub fn close(&self) {
        self.cancel.cancel();
        if let Ok(mut watcher) = self.watcher.lock() {
            watcher.take();
        }
        info!(user_id = %self.context.user_id, "session closed");
    }

    //-------------------------------------------------------------------------------------
    // Optimistic mutations
    //-------------------------------------------------------------------------------------

    pub async fn mark_notification_read(&self, notification_id: &str) -> PortResult<()> {
        let notification = self.owned_notification(notification_id)?;
        let id = notification.id.clone();
        let change = move |s: &mut OrgSnapshot| {
            for n in s.notifications.iter_mut().filter(|n| n.id == id) {
                n.is_read = true;
            }
        };
        let write = self.store.update::<Notification>(
            &self.context.organization_id,
            &notification.id,
            json!({ "isRead": true }),
        );
        self.run_optimistic(change, write).await
    }

    pub async fn mark_all_notifications_read(&self) -> PortResult<()> {
        let snapshot = self.snapshot();
        let unread: Vec<String> = snapshot
            .notifications
            .iter()
            .filter(|n| !n.is_read && n.user_id == self.context.user_id)
            .map(|n| n.id.clone())
            .collect();
        if unread.is_empty() {
            return Ok(());
        }
        let marked = unread.clone();
        let change = move |s: &mut OrgSnapshot| {
            for n in s.notifications.iter_mut() {
                if marked.contains(&n.id) {
                    n.is_read = true;
                }
            }
        };
        let store = self.store.clone();
        let org = self.context.organization_id.clone();
        let write = async move {
            for id in &unread {
                store
                    .update::<Notification>(&org, id, json!({ "isRead": true }))
                    .await?;
            }
            Ok(())
        };
        self.run_optimistic(change, write).await
    }

    pub async fn delete_notification(&self, notification_id: &str) -> PortResult<()> {
        let notification = self.owned_notification(notification_id)?;
        let id = notification.id.clone();
        let change = move |s: &mut OrgSnapshot| s.notifications.retain(|n| n.id != id);
        let write = self
            .store
            .delete::<Notification>(&self.context.organization_id, &notification.id);
        self.run_optimistic(change, write).await
    }

    /// Progress is clamped to 0–100; the status follows from it.
    pub async fn update_goal_progress(&self, goal_id: &str, progress: i32) -> PortResult<Goal> {
        let goal = self.known_goal(goal_id)?;
        self.context.require_self_or_admin(&goal.user_id)?;
        let progress = progress.clamp(0, 100) as u8;
        let status = GoalStatus::for_progress(progress);

        let id = goal.id.clone();
        let change = move |s: &mut OrgSnapshot| {
            for g in s.goals.iter_mut().filter(|g| g.id == id) {
                g.progress = progress;
                g.status = status;
            }
        };
        let write = self.store.update::<Goal>(
            &self.context.organization_id,
            &goal.id,
            json!({ "progress": progress, "status": status }),
        );
        self.run_optimistic(change, write).await?;
        Ok(Goal {
            progress,
            status,
            ..goal
        })
    }

    pub async fn delete_goal(&self, goal_id: &str) -> PortResult<()> {
        let goal = self.known_goal(goal_id)?;
        self.context.require_self_or_admin(&goal.user_id)?;
        let id = goal.id.clone();
        let change = move |s: &mut OrgSnapshot| s.goals.retain(|g| g.id != id);
        let write = self
            .store
            .delete::<Goal>(&self.context.organization_id, &goal.id);
        self.run_optimistic(change, write).await
    }

    pub async fn approve_rating(&self, rating_id: &str) -> PortResult<()> {
        self.context.require_admin()?;
        let rating = self.known_rating(rating_id)?;
        let id = rating.id.clone();
        let change = move |s: &mut OrgSnapshot| {
            for r in s.ratings.iter_mut().filter(|r| r.id == id) {
                r.is_approved = true;
            }
        };
        let write = self.store.update::<Rating>(
            &self.context.organization_id,
            &rating.id,
            json!({ "isApproved": true }),
        );
        self.run_optimistic(change, write).await
    }

    /// Rejection removes the rating.
    pub async fn reject_rating(&self, rating_id: &str) -> PortResult<()> {
        self.context.require_admin()?;
        let rating = self.known_rating(rating_id)?;
        let id = rating.id.clone();
        let change = move |s: &mut OrgSnapshot| s.ratings.retain(|r| r.id != id);
        let write = self
            .store
            .delete::<Rating>(&self.context.organization_id, &rating.id);
        self.run_optimistic(change, write).await
    }

    /// Applies `change` to the snapshot current at apply time, then runs `write`.
    ///
    /// On failure the snapshot is already rolled back; a background refresh then
    /// resynchronizes with the store.
    async fn run_optimistic<F>(
        &self,
        change: impl FnOnce(&mut OrgSnapshot),
        write: F,
    ) -> PortResult<()>
    where
        F: std::future::Future<Output = PortResult<()>>,
    {
        let result = self
            .coordinator
            .apply_update(|current| Arc::new(with_snapshot(current, change)), write)
            .await;
        if let Err(e) = &result {
            warn!(kind = e.kind(), "mutation failed; scheduling refresh");
            let aggregator = self.aggregator.clone();
            tokio::spawn(async move {
                if let Err(e) = aggregator.refresh().await {
                    warn!(kind = e.kind(), "background refresh failed");
                }
            });
        }
        result
    }

    fn owned_notification(&self, id: &str) -> PortResult<Notification> {
        let notification = self
            .snapshot()
            .notifications
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("notifications {}", id)))?;
        if notification.user_id != self.context.user_id {
            return Err(PortError::PermissionDenied(
                "notifications can only be changed by their owner".to_string(),
            ));
        }
        Ok(notification)
    }

    fn known_goal(&self, id: &str) -> PortResult<Goal> {
        self.snapshot()
            .goals
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("goals {}", id)))
    }

    fn known_rating(&self, id: &str) -> PortResult<Rating> {
        self.snapshot()
            .ratings
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("ratings {}", id)))
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn with_snapshot(current: &OrgSnapshot, change: impl FnOnce(&mut OrgSnapshot)) -> OrgSnapshot {
    let mut next = current.clone();
    change(&mut next);
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impersonation_keeps_the_operator_as_authorizer() {
        let operator = User::new("platform", Role::PlatformAdmin, "Op", "op@example.com");
        let mentee = User::new("org1", Role::Mentee, "Eve", "eve@example.com");

        let session = SessionContext::for_user(&operator)
            .impersonate(&mentee)
            .unwrap();

        assert_eq!(session.user_id, mentee.id);
        assert_eq!(session.organization_id, "org1");
        assert_eq!(session.display_role, Role::Mentee);
        assert!(session.is_impersonating());
        assert!(session.require_admin().is_ok());
    }

    #[test]
    fn only_platform_admins_impersonate() {
        let admin = User::new("org1", Role::Admin, "Ann", "ann@example.com");
        let mentor = User::new("org1", Role::Mentor, "Max", "max@example.com");
        let err = SessionContext::for_user(&admin)
            .impersonate(&mentor)
            .unwrap_err();
        assert!(matches!(err, PortError::PermissionDenied(_)));
    }

    #[test]
    fn mentees_cannot_administer() {
        let mentee = User::new("org1", Role::Mentee, "Eve", "eve@example.com");
        let context = SessionContext::for_user(&mentee);
        assert!(context.require_admin().is_err());
        assert!(context.require_self_or_admin(&mentee.id).is_ok());
        assert!(context.require_self_or_admin("someone-else").is_err());
    }
}
