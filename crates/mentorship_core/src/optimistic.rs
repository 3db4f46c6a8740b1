//! crates/mentorship_core/src/optimistic.rs
//!
//! Optimistic mutations: local state changes immediately, the remote write runs
//! afterwards, and a failed write puts back exactly the state captured before
//! the change.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

use crate::ports::PortResult;

/// Local state that can be read whole and replaced whole.
pub trait LocalState: Send + Sync {
    type State: Clone + Send + Sync + 'static;

    fn current(&self) -> Self::State;
    fn replace(&self, next: Self::State);
}

/// A plain shared cell implementing [`LocalState`].
#[derive(Debug, Default)]
pub struct LocalCell<S> {
    value: Mutex<S>,
}

impl<S> LocalCell<S> {
    pub fn new(value: S) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }
}

impl<S: Clone + Send + Sync + 'static> LocalState for LocalCell<S> {
    type State = S;

    fn current(&self) -> S {
        match self.value.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, next: S) {
        match self.value.lock() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

/// Restores the state captured before one `apply` call.
pub struct Rollback<L: LocalState> {
    target: Arc<L>,
    snapshot: L::State,
}

impl<L: LocalState> Rollback<L> {
    /// Re-applies the captured state. Safe to call more than once.
    pub fn restore(&self) {
        self.target.replace(self.snapshot.clone());
    }

    pub fn snapshot(&self) -> &L::State {
        &self.snapshot
    }
}

type SuccessHook = Box<dyn FnOnce() + Send>;
type ErrorHook<L> = Box<dyn FnOnce(&crate::ports::PortError, Rollback<L>) + Send>;

/// Callbacks for one optimistic mutation.
pub struct MutationHooks<L: LocalState> {
    on_success: Option<SuccessHook>,
    on_error: Option<ErrorHook<L>>,
}

impl<L: LocalState> Default for MutationHooks<L> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
        }
    }
}

impl<L: LocalState> MutationHooks<L> {
    pub fn on_success(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    /// Runs after the automatic rollback with the error and a manual rollback handle.
    pub fn on_error(
        mut self,
        hook: impl FnOnce(&crate::ports::PortError, Rollback<L>) + Send + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }
}

pub struct OptimisticCoordinator<L: LocalState> {
    target: Arc<L>,
    rollback_delay: Duration,
}

impl<L: LocalState> OptimisticCoordinator<L> {
    /// `rollback_delay` lets an error message settle before the old state returns.
    pub fn new(target: Arc<L>, rollback_delay: Duration) -> Self {
        Self {
            target,
            rollback_delay,
        }
    }

    pub fn target(&self) -> &Arc<L> {
        &self.target
    }

    pub async fn apply<F>(&self, next: L::State, remote_write: F) -> PortResult<()>
    where
        F: Future<Output = PortResult<()>>,
    {
        self.apply_with(next, remote_write, MutationHooks::default())
            .await
    }

    /// Builds the next state from the state it replaces, then writes remotely.
    ///
    /// The state handed to `change` is also the rollback point, so a mutation
    /// never restores a state it did not derive from.
    pub async fn apply_update<F>(
        &self,
        change: impl FnOnce(&L::State) -> L::State,
        remote_write: F,
    ) -> PortResult<()>
    where
        F: Future<Output = PortResult<()>>,
    {
        self.run(change, remote_write, MutationHooks::default())
            .await
    }

    pub async fn apply_with<F>(
        &self,
        next: L::State,
        remote_write: F,
        hooks: MutationHooks<L>,
    ) -> PortResult<()>
    where
        F: Future<Output = PortResult<()>>,
    {
        self.run(move |_| next, remote_write, hooks).await
    }

    async fn run<F>(
        &self,
        change: impl FnOnce(&L::State) -> L::State,
        remote_write: F,
        hooks: MutationHooks<L>,
    ) -> PortResult<()>
    where
        F: Future<Output = PortResult<()>>,
    {
        // Each call keeps its own rollback point; concurrent calls never share one.
        let rollback_point = self.target.current();
        self.target.replace(change(&rollback_point));

        match remote_write.await {
            Ok(()) => {
                drop(rollback_point);
                if let Some(hook) = hooks.on_success {
                    hook();
                }
                Ok(())
            }
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "optimistic write failed; rolling back");
                if !self.rollback_delay.is_zero() {
                    tokio::time::sleep(self.rollback_delay).await;
                }
                let rollback = Rollback {
                    target: self.target.clone(),
                    snapshot: rollback_point,
                };
                rollback.restore();
                if let Some(hook) = hooks.on_error {
                    hook(&err, rollback);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn success_keeps_the_optimistic_state() {
        let cell = Arc::new(LocalCell::new(vec![1, 2]));
        let coordinator = OptimisticCoordinator::new(cell.clone(), Duration::ZERO);
        let succeeded = Arc::new(AtomicBool::new(false));
        let flag = succeeded.clone();

        coordinator
            .apply_with(
                vec![1, 2, 3],
                async { Ok(()) },
                MutationHooks::default().on_success(move || flag.store(true, Ordering::SeqCst)),
            )
            .await
            .unwrap();

        assert_eq!(cell.current(), vec![1, 2, 3]);
        assert!(succeeded.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn state_is_visible_before_the_write_settles() {
        let cell = Arc::new(LocalCell::new(0));
        let coordinator = OptimisticCoordinator::new(cell.clone(), Duration::ZERO);
        let observer = cell.clone();

        coordinator
            .apply(1, async move {
                assert_eq!(observer.current(), 1);
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn error_hook_receives_a_working_rollback() {
        let cell = Arc::new(LocalCell::new("before".to_string()));
        let coordinator = OptimisticCoordinator::new(cell.clone(), Duration::from_millis(5));
        let reported = Arc::new(Mutex::new(None));
        let sink = reported.clone();

        let err = coordinator
            .apply_with(
                "after".to_string(),
                async { Err(PortError::PermissionDenied("nope".to_string())) },
                MutationHooks::default().on_error(move |e, rollback| {
                    assert_eq!(rollback.snapshot(), "before");
                    rollback.restore();
                    *sink.lock().unwrap() = Some(e.kind());
                }),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "permission_denied");
        assert_eq!(cell.current(), "before");
        assert_eq!(*reported.lock().unwrap(), Some("permission_denied"));
    }

    #[tokio::test]
    async fn overlapping_failure_restores_its_own_rollback_point() {
        let cell = Arc::new(LocalCell::new(vec!["a"]));
        let coordinator = OptimisticCoordinator::new(cell.clone(), Duration::ZERO);
        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let captured = Arc::new(Mutex::new(None));
        let sink = captured.clone();

        let (first, second, ()) = tokio::join!(
            coordinator.apply_with(
                vec!["a", "b"],
                async move {
                    let _ = released.await;
                    Err(PortError::Transient("timeout".to_string()))
                },
                MutationHooks::<LocalCell<Vec<&str>>>::default().on_error(move |_, rollback| {
                    *sink.lock().unwrap() = Some(rollback.snapshot().clone());
                }),
            ),
            coordinator.apply(vec!["a", "b", "c"], async { Ok(()) }),
            async move {
                let _ = release.send(());
            },
        );

        assert!(first.is_err());
        assert!(second.is_ok());
        assert_eq!(*captured.lock().unwrap(), Some(vec!["a"]));
        assert_eq!(cell.current(), vec!["a"]);
    }

    #[tokio::test]
    async fn updates_derive_from_the_state_they_replace() {
        let cell = Arc::new(LocalCell::new(vec![1]));
        let coordinator = OptimisticCoordinator::new(cell.clone(), Duration::ZERO);
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        let (first, second, ()) = tokio::join!(
            coordinator.apply_update(
                |current| {
                    let mut next = current.clone();
                    next.push(2);
                    next
                },
                async move {
                    let _ = released.await;
                    Ok(())
                },
            ),
            coordinator.apply_update(
                |current| {
                    let mut next = current.clone();
                    next.push(3);
                    next
                },
                async { Ok(()) },
            ),
            async move {
                let _ = release.send(());
            },
        );

        first.unwrap();
        second.unwrap();
        assert_eq!(cell.current(), vec![1, 2, 3]);
    }
}
