//! Detached side-channel work (e.g. invitation notifications).
//!
//! A side task never affects the request that spawned it: it runs under its
//! own deadline, its failures are only logged, and it can be aborted or
//! drained when the process shuts down.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct SideTasks {
    tasks: Mutex<JoinSet<()>>,
    timeout: Duration,
}

impl SideTasks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            timeout,
        }
    }

    /// Spawn `fut` on the current runtime. Must be called from within tokio.
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let timeout = self.timeout;
        let task = async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(Ok(())) => debug!(task = name, "side task finished"),
                Ok(Err(err)) => warn!(task = name, error = %err, "side task failed"),
                Err(_) => warn!(task = name, timeout_ms = timeout.as_millis() as u64, "side task timed out"),
            }
        };

        match self.tasks.lock() {
            Ok(mut set) => {
                while set.try_join_next().is_some() {}
                set.spawn(task);
            }
            Err(_) => warn!(task = name, "side task registry poisoned; task dropped"),
        }
    }

    /// Wait for every task spawned so far.
    pub async fn drain(&self) {
        let mut set = match self.tasks.lock() {
            Ok(mut set) => std::mem::take(&mut *set),
            Err(_) => return,
        };
        while set.join_next().await.is_some() {}
    }

    /// Cancel everything still running.
    pub fn abort_all(&self) {
        if let Ok(mut set) = self.tasks.lock() {
            set.abort_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn drain_waits_for_spawned_tasks() {
        let tasks = SideTasks::new(Duration::from_secs(1));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let done = Arc::clone(&done);
            tasks.spawn("count", async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_task_is_cut_off_by_its_deadline() {
        let tasks = SideTasks::new(Duration::from_millis(10));
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);

        tasks.spawn("slow", async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_do_not_escape() {
        let tasks = SideTasks::new(Duration::from_secs(1));
        tasks.spawn("fails", async { anyhow::bail!("smtp down") });
        tasks.drain().await;
    }
}
