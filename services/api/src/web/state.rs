//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the registry of open sync sessions.

use crate::config::Config;
use mentorship_core::ports::{AuthProvider, PortResult};
use mentorship_core::{Orchestrator, SessionContext, StoreClient, SyncSession};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: StoreClient,
    pub orchestrator: Orchestrator,
    pub auth: Arc<dyn AuthProvider>,
    pub sessions: SessionRegistry,
}

impl AppState {
    /// The caller's open session, opening one for `context` if none exists.
    pub async fn session_for(&self, context: &SessionContext) -> PortResult<Arc<SyncSession>> {
        self.sessions
            .get_or_open(context, || {
                SyncSession::open(
                    self.store.clone(),
                    context.clone(),
                    self.config.rollback_delay,
                )
            })
            .await
    }
}

//=========================================================================================
// SessionRegistry
//=========================================================================================

/// Open sessions keyed by the signed-in (authorizing) user's id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<SyncSession>>>>,
}

impl SessionRegistry {
    pub async fn get(&self, user_id: &str) -> Option<Arc<SyncSession>> {
        self.sessions.read().await.get(user_id).cloned()
    }

    /// Registers `session`, closing whatever session the same user had before.
    pub async fn replace(&self, session: Arc<SyncSession>) {
        let key = session.context().authorizer.user_id.clone();
        let previous = self.sessions.write().await.insert(key, session);
        if let Some(previous) = previous {
            previous.close();
        }
    }

    /// Closes and forgets the user's session. Returns whether one was open.
    pub async fn close(&self, user_id: &str) -> bool {
        match self.sessions.write().await.remove(user_id) {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    async fn get_or_open<F, Fut>(
        &self,
        context: &SessionContext,
        open: F,
    ) -> PortResult<Arc<SyncSession>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = PortResult<Arc<SyncSession>>>,
    {
        let key = context.authorizer.user_id.as_str();
        if let Some(session) = self.get(key).await {
            return Ok(session);
        }
        // Opening hydrates a whole snapshot, so the registry stays unlocked meanwhile.
        let opened = open().await?;
        let existing = match self.sessions.write().await.entry(key.to_string()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                slot.insert(opened.clone());
                info!(user_id = %key, "session opened implicitly");
                return Ok(opened);
            }
        };
        debug!(user_id = %key, "another request opened the session first");
        opened.close();
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentorship_core::domain::{Organization, Role, User};
    use mentorship_core::memory::InMemoryStore;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn seeded() -> (StoreClient, SessionContext) {
        let store = StoreClient::new(Arc::new(InMemoryStore::new()));
        let org = Organization::new("Acme", None);
        let org = store.create(&org.id.clone(), org).await.unwrap();
        let admin = User::new(&org.id, Role::Admin, "Ann", "ann@acme.example.com");
        let admin = store.create(&org.id, admin).await.unwrap();
        (store, SessionContext::for_user(&admin))
    }

    #[tokio::test]
    async fn registry_stays_usable_while_a_session_opens() {
        let (store, context) = seeded().await;
        let registry = SessionRegistry::default();
        let (entered, opening_started) = oneshot::channel();
        let (release, released) = oneshot::channel::<()>();

        let opening = {
            let registry = registry.clone();
            let context = context.clone();
            let open_context = context.clone();
            tokio::spawn(async move {
                registry
                    .get_or_open(&context, move || async move {
                        let _ = entered.send(());
                        let _ = released.await;
                        SyncSession::open(store, open_context, Duration::ZERO).await
                    })
                    .await
            })
        };

        opening_started.await.unwrap();
        let lookup = tokio::time::timeout(Duration::from_millis(200), registry.get("someone-else")).await;
        assert!(matches!(lookup, Ok(None)));
        let closed = tokio::time::timeout(Duration::from_millis(200), registry.close("someone-else")).await;
        assert!(matches!(closed, Ok(false)));

        release.send(()).unwrap();
        let session = opening.await.unwrap().unwrap();
        let registered = registry.get(&context.authorizer.user_id).await.unwrap();
        assert!(Arc::ptr_eq(&session, &registered));
    }

    #[tokio::test]
    async fn racing_opens_settle_on_one_session() {
        let (store, context) = seeded().await;
        let registry = SessionRegistry::default();
        let open = || async {
            tokio::task::yield_now().await;
            SyncSession::open(store.clone(), context.clone(), Duration::ZERO).await
        };

        let (first, second) = tokio::join!(
            registry.get_or_open(&context, open),
            registry.get_or_open(&context, open),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.is_closed());
    }
}
