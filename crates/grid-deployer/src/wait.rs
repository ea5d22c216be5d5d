//! Polling a node until a deployment's workloads reach a final state.

use std::collections::HashMap;
use std::time::Duration;

use grid_node::NodeClient;
use grid_types::ResultState;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{DeployerError, DeployerResult};

/// Backoff and deadlines for [`wait_deployment`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    /// Hard cap on one wait.
    pub max_elapsed: Duration,
    /// Give up when no workload turned ok for this long.
    pub stall_timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(3),
            multiplier: 1.25,
            max_interval: Duration::from_secs(40),
            max_elapsed: Duration::from_secs(50 * 60),
            stall_timeout: Duration::from_secs(4 * 60),
        }
    }
}

impl WaitPolicy {
    /// Interval to sleep after `current`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_interval)
    }
}

/// Resolves once `shutdown` reads true. Never resolves if the sender is gone.
pub(crate) async fn cancelled(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Poll `deployment.changes` until every workload in `versions` reports
/// `ok` at its expected version.
///
/// A workload at its expected version in `error`, `deleted`, `paused` or
/// `unchanged` fails the wait immediately.
pub async fn wait_deployment(
    client: &NodeClient,
    contract_id: u64,
    versions: &HashMap<String, u32>,
    policy: &WaitPolicy,
    shutdown: watch::Receiver<bool>,
) -> DeployerResult<()> {
    let start = Instant::now();
    let mut last_progress = start;
    let mut best = 0usize;
    let mut interval = policy.initial_interval;

    loop {
        if *shutdown.borrow() {
            return Err(DeployerError::Cancelled);
        }

        let changes = client.deployment_changes(contract_id).await?;
        let mut ok = 0usize;
        for wl in &changes {
            if versions.get(&wl.name) != Some(&wl.version) {
                continue;
            }
            match wl.result.state {
                ResultState::Ok => ok += 1,
                ResultState::Init => {}
                state => {
                    return Err(DeployerError::Workload {
                        name: wl.name.clone(),
                        contract_id,
                        state,
                        message: wl.result.error.clone(),
                    });
                }
            }
        }
        if ok == versions.len() {
            debug!(contract_id, workloads = ok, "deployment ready");
            return Ok(());
        }

        let now = Instant::now();
        if ok > best {
            best = ok;
            last_progress = now;
        } else if now.duration_since(last_progress) > policy.stall_timeout {
            return Err(DeployerError::WaitTimeout(contract_id));
        }
        if now.duration_since(start) >= policy.max_elapsed {
            return Err(DeployerError::WaitTimeout(contract_id));
        }

        debug!(contract_id, ok, total = versions.len(), ?interval, "deployment not ready yet");
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancelled(shutdown.clone()) => return Err(DeployerError::Cancelled),
        }
        interval = policy.next_interval(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = WaitPolicy::default();
        let mut interval = policy.initial_interval;
        interval = policy.next_interval(interval);
        assert_eq!(interval, Duration::from_millis(3750));
        for _ in 0..30 {
            interval = policy.next_interval(interval);
        }
        assert_eq!(interval, Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_follows_sender() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(cancelled(rx));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());
        tx.send(true).unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_pends_without_sender() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let res = tokio::time::timeout(Duration::from_secs(5), cancelled(rx)).await;
        assert!(res.is_err());
    }
}
