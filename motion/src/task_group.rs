use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinSet;
use tracing::debug;

/// How a member task of a [`TaskGroup`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    Finished(&'static str),
    Panicked(&'static str),
}

/// Named tasks that live and die together. Dropping the group aborts every
/// member.
#[derive(Default)]
pub struct TaskGroup {
    tasks: JoinSet<TaskExit>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "spawning");
        self.tasks.spawn(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(()) => TaskExit::Finished(name),
                Err(_) => TaskExit::Panicked(name),
            }
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the first member to end. Pending forever on an empty group.
    pub async fn next_exit(&mut self) -> TaskExit {
        loop {
            match self.tasks.join_next().await {
                Some(Ok(exit)) => return exit,
                Some(Err(_)) => continue,
                None => std::future::pending::<()>().await,
            }
        }
    }

    /// Abort every member and wait for all of them to unwind.
    pub async fn shutdown(mut self) {
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
    }
}
