//! Background services owned by the router (currently the settings watcher).

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a cancelled service gets to finish before it is reported stuck.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Named background services sharing one parent cancellation token.
pub struct TaskManager {
    tasks: HashMap<String, TaskInfo>,
    root_token: CancellationToken,
}

struct TaskInfo {
    handle: JoinHandle<Result<()>>,
    cancel_token: CancellationToken,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            root_token: CancellationToken::new(),
        }
    }

    /// Spawns a service under `name`.
    ///
    /// The closure receives a token cancelled by [`stop_task`](Self::stop_task)
    /// or [`shutdown_all`](Self::shutdown_all). A service already registered
    /// under the same name is cancelled and replaced.
    pub fn spawn_task<F, Fut>(&mut self, name: impl Into<String>, task_fn: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let cancel_token = self.root_token.child_token();
        let task_token = cancel_token.clone();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            debug!("Service '{task_name}' running");
            let result = task_fn(task_token).await;
            match &result {
                Ok(()) => info!("Service '{task_name}' finished"),
                Err(e) => error!("Service '{task_name}' failed: {e:#}"),
            }
            result
        });

        if let Some(previous) = self.tasks.insert(
            name.clone(),
            TaskInfo {
                handle,
                cancel_token,
            },
        ) {
            warn!("Service '{name}' was already running, replacing it");
            previous.cancel_token.cancel();
        }

        info!("Service '{name}' started");
    }

    /// Cancels one service and waits for it.
    pub async fn stop_task(&mut self, name: &str) -> Result<()> {
        let task = self
            .tasks
            .remove(name)
            .ok_or_else(|| anyhow!("No service named '{name}'"))?;
        task.cancel_token.cancel();
        join(name, task.handle).await
    }

    /// Cancels every service and waits for all of them.
    ///
    /// All services are awaited even if some fail; the first failure is
    /// returned.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        if self.tasks.is_empty() {
            return Ok(());
        }
        info!("Stopping {} background service(s)", self.tasks.len());

        self.root_token.cancel();

        let mut first_error = None;
        for (name, task) in self.tasks.drain() {
            if let Err(e) = join(&name, task.handle).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e).context("Background service failed during shutdown"),
            None => Ok(()),
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.root_token.cancel();
    }
}

async fn join(name: &str, handle: JoinHandle<Result<()>>) -> Result<()> {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
        Ok(Ok(result)) => result.with_context(|| format!("Service '{name}' failed")),
        Ok(Err(e)) => Err(anyhow!("Service '{name}' panicked: {e}")),
        Err(_) => Err(anyhow!(
            "Service '{name}' did not stop within {SHUTDOWN_TIMEOUT:?}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    async fn flag_on_cancel(token: CancellationToken, flag: Arc<AtomicBool>) -> Result<()> {
        token.cancelled().await;
        flag.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn spawn_flagged(tasks: &mut TaskManager, name: &str, flag: &Arc<AtomicBool>) {
        let flag = flag.clone();
        tasks.spawn_task(name, move |token| flag_on_cancel(token, flag));
    }

    #[tokio::test]
    async fn shutdown_cancels_every_service() {
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        let mut tasks = TaskManager::new();

        spawn_flagged(&mut tasks, "first", &first);
        spawn_flagged(&mut tasks, "second", &second);
        assert_eq!(tasks.active_count(), 2);

        tasks.shutdown_all().await.unwrap();

        assert_eq!(tasks.active_count(), 0);
        assert!(first.load(Ordering::SeqCst));
        assert!(second.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_task_leaves_others_running() {
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        let mut tasks = TaskManager::new();
        spawn_flagged(&mut tasks, "first", &first);
        spawn_flagged(&mut tasks, "second", &second);

        tasks.stop_task("first").await.unwrap();

        assert!(first.load(Ordering::SeqCst));
        assert!(!second.load(Ordering::SeqCst));
        assert!(!tasks.is_running("first"));
        assert!(tasks.is_running("second"));

        tasks.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn stopping_unknown_task_fails() {
        let mut tasks = TaskManager::new();
        assert!(tasks.stop_task("ghost").await.is_err());
        assert!(tasks.shutdown_all().await.is_ok());
    }

    #[tokio::test]
    async fn failures_are_reported_after_all_services_stop() {
        let survivor = Arc::new(AtomicBool::new(false));
        let mut tasks = TaskManager::new();
        tasks.spawn_task("broken", |_token| async { Err(anyhow!("watch failed")) });
        spawn_flagged(&mut tasks, "healthy", &survivor);

        let err = tasks.shutdown_all().await.unwrap_err();

        assert!(format!("{err:#}").contains("watch failed"));
        assert!(survivor.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn respawning_a_name_cancels_the_old_service() {
        let old = Arc::new(AtomicBool::new(false));
        let new = Arc::new(AtomicBool::new(false));
        let mut tasks = TaskManager::new();

        spawn_flagged(&mut tasks, "watcher", &old);
        spawn_flagged(&mut tasks, "watcher", &new);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(tasks.active_count(), 1);
        assert!(old.load(Ordering::SeqCst));
        assert!(!new.load(Ordering::SeqCst));

        tasks.shutdown_all().await.unwrap();
        assert!(new.load(Ordering::SeqCst));
    }
}
