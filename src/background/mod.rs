//! Deferred work collected while serving a request.
//!
//! Engines queue follow-up work (task queue cleanup) into [`BackgroundTasks`];
//! the caller decides when and where the batch runs. Units run through a
//! [`ForgivingTaskGroup`], so one failing unit never stops the others.

mod task_group;

pub use task_group::{ForgivingTaskGroup, TaskOutcome};

use anyhow::Result;
use futures::future::BoxFuture;
use std::future::Future;

#[derive(Default)]
pub struct BackgroundTasks {
    tasks: Vec<(String, BoxFuture<'static, Result<()>>)>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.push((name.into(), Box::pin(task)));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|(name, _)| name.as_str())
    }

    /// Spawn every queued unit. Must be called from within a Tokio runtime.
    pub fn into_group(self) -> ForgivingTaskGroup {
        let mut group = ForgivingTaskGroup::new();
        for (name, task) in self.tasks {
            group.spawn(name, task);
        }
        group
    }

    /// Run every queued unit to completion and collect the outcomes.
    pub async fn run(self) -> Vec<(String, TaskOutcome)> {
        self.into_group().join_all().await
    }
}
