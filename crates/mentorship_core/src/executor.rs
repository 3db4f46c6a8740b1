//! crates/mentorship_core/src/executor.rs
//!
//! Runs the independent side effects of a workflow. Each step is spawned on its
//! own task; a failing step is logged and never affects its siblings or the
//! action that submitted it.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::ports::{PortError, PortResult};

/// Collects the best-effort steps of one workflow run.
pub struct BestEffort {
    workflow: &'static str,
    steps: Vec<(String, BoxFuture<'static, PortResult<()>>)>,
}

impl BestEffort {
    pub fn new(workflow: &'static str) -> Self {
        Self {
            workflow,
            steps: Vec::new(),
        }
    }

    pub fn push<F>(&mut self, step: impl Into<String>, task: F)
    where
        F: Future<Output = PortResult<()>> + Send + 'static,
    {
        self.steps.push((step.into(), task.boxed()));
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Spawns every step. The caller may drop the returned handle; steps keep running.
    pub fn submit(self) -> SideEffects {
        let workflow = self.workflow;
        let handles = self
            .steps
            .into_iter()
            .map(|(step, task)| {
                let name = step.clone();
                let handle = tokio::spawn(async move {
                    let result = task.await;
                    match &result {
                        Ok(()) => debug!(workflow, step = %name, "side effect completed"),
                        Err(e) => error!(
                            workflow,
                            step = %name,
                            kind = e.kind(),
                            error = %e,
                            "side effect failed; primary action unaffected"
                        ),
                    }
                    result
                });
                (step, handle)
            })
            .collect();
        SideEffects { handles }
    }
}

/// The result of one best-effort step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step: String,
    pub result: PortResult<()>,
}

/// Handles to the spawned side effects of a workflow run.
#[derive(Debug, Default)]
pub struct SideEffects {
    handles: Vec<(String, JoinHandle<PortResult<()>>)>,
}

impl SideEffects {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(|(step, _)| step.as_str())
    }

    /// Waits for every step and reports how each ended.
    pub async fn settled(self) -> Vec<StepOutcome> {
        let (steps, handles): (Vec<_>, Vec<_>) = self.handles.into_iter().unzip();
        join_all(handles)
            .await
            .into_iter()
            .zip(steps)
            .map(|(joined, step)| StepOutcome {
                step,
                result: joined.unwrap_or_else(|e| Err(PortError::Unexpected(e.to_string()))),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_failing_step_does_not_stop_its_siblings() {
        let mut effects = BestEffort::new("test");
        effects.push("fails", async { Err(PortError::Transient("down".to_string())) });
        effects.push("succeeds", async { Ok(()) });

        let outcomes = effects.submit().settled().await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].step, "fails");
        assert!(outcomes[0].result.is_err());
        assert_eq!(outcomes[1].result, Ok(()));
    }
}
