use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinSet;
use tracing::{error, warn};

/// How a single background unit ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TaskOutcome {
    Succeeded,
    Failed(String),
    Panicked(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }
}

/// A group of tasks that always runs every member to completion.
///
/// Unlike a plain `JoinSet` drained with `?`, an error or a panic in one
/// member never aborts its siblings: every outcome is collected.
pub struct ForgivingTaskGroup {
    set: JoinSet<(String, TaskOutcome)>,
}

impl ForgivingTaskGroup {
    pub fn new() -> Self {
        Self {
            set: JoinSet::new(),
        }
    }

    pub fn spawn(&mut self, name: String, task: BoxFuture<'static, Result<()>>) {
        self.set.spawn(async move {
            let outcome = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => TaskOutcome::Succeeded,
                Ok(Err(e)) => TaskOutcome::Failed(format!("{:#}", e)),
                Err(panic) => TaskOutcome::Panicked(panic_message(&*panic)),
            };
            (name, outcome)
        });
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Wait for every task and return the outcomes in completion order.
    pub async fn join_all(mut self) -> Vec<(String, TaskOutcome)> {
        let mut outcomes = Vec::with_capacity(self.set.len());
        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    match &outcome {
                        TaskOutcome::Succeeded => {}
                        TaskOutcome::Failed(msg) => {
                            error!("Background task {} failed: {}", name, msg)
                        }
                        TaskOutcome::Panicked(msg) => {
                            error!("Background task {} panicked: {}", name, msg)
                        }
                    }
                    outcomes.push((name, outcome));
                }
                Err(e) => {
                    warn!("Background task did not complete: {}", e);
                    outcomes.push(("<unknown>".to_string(), TaskOutcome::Panicked(e.to_string())));
                }
            }
        }
        outcomes
    }
}

impl Default for ForgivingTaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn explode() -> Result<()> {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn test_failures_do_not_cancel_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut group = ForgivingTaskGroup::new();

        group.spawn(
            "fails".to_string(),
            async { Err(anyhow::anyhow!("boom")) }.boxed(),
        );
        group.spawn("panics".to_string(), async { explode() }.boxed());
        for i in 0..3 {
            let finished = finished.clone();
            group.spawn(
                format!("slow-{}", i),
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed(),
            );
        }
        assert_eq!(group.len(), 5);

        let outcomes = group.join_all().await;
        assert_eq!(outcomes.len(), 5);
        assert_eq!(finished.load(Ordering::SeqCst), 3);

        let outcome_of = |name: &str| {
            outcomes
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, o)| o.clone())
                .unwrap()
        };
        assert_eq!(outcome_of("fails"), TaskOutcome::Failed("boom".to_string()));
        assert_eq!(outcome_of("panics"), TaskOutcome::Panicked("kaboom".to_string()));
        assert!(outcome_of("slow-2").is_success());
    }

    #[tokio::test]
    async fn test_empty_group_joins_immediately() {
        let group = ForgivingTaskGroup::default();
        assert!(group.is_empty());
        assert!(group.join_all().await.is_empty());
    }
}
