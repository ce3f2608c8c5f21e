//! Periodic members reevaluation.
//!
//! The control node runs one task per community. The task wakes up every
//! `reevaluation_tick`, reevaluates members when an iteration is due and
//! rotates keys that outlived `rekey_interval`. Callers push on-demand or
//! forced iterations through a bounded channel.

use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use cohort_core::CommunityId;
use cohort_store::Store;
use cohort_sync::Transport;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::manager::{now_millis, Manager};

/// Why an iteration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExecutionType {
    /// Periodic, once `reevaluation_interval` elapsed.
    Regular,
    /// Requested, once `reevaluation_cooldown` elapsed.
    OnDemand,
    /// Requested, runs immediately.
    Forced,
}

/// Whether an iteration of `execution` is due, given the time since the last run.
pub fn due(execution: ExecutionType, since_last_run: Option<Duration>, config: &ManagerConfig) -> bool {
    let Some(elapsed) = since_last_run else {
        return true;
    };
    match execution {
        ExecutionType::Forced => true,
        ExecutionType::OnDemand => elapsed >= config.reevaluation_cooldown,
        ExecutionType::Regular => elapsed >= config.reevaluation_interval,
    }
}

const FORCE_CHANNEL_CAPACITY: usize = 8;

/// Handle of a running reevaluation task. Dropping it stops the task.
pub(crate) struct SchedulerHandle {
    requests: mpsc::Sender<ExecutionType>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Queue an iteration. A full queue already holds a pending request.
    fn request(&self, execution: ExecutionType) {
        if self.requests.try_send(execution).is_err() {
            debug!(?execution, "reevaluation request already queued");
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        self.task.abort();
    }
}

async fn run<S: Store + 'static, T: Transport + 'static>(
    manager: Weak<Manager<S, T>>,
    id: CommunityId,
    tick: Duration,
    mut requests: mpsc::Receiver<ExecutionType>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending = Some(ExecutionType::Forced);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {}
            request = requests.recv() => match request {
                Some(execution) => pending = pending.max(Some(execution)),
                None => break,
            },
        }
        let Some(manager) = manager.upgrade() else {
            break;
        };
        let execution = pending.take().unwrap_or(ExecutionType::Regular);
        match manager.scheduled_iteration(&id, execution).await {
            Ok(false) if execution == ExecutionType::OnDemand => pending = Some(execution),
            Ok(_) => {}
            Err(e) => error!(community = %id, ?execution, error = %e, "members reevaluation iteration failed"),
        }
    }
    debug!(community = %id, "members reevaluation stopped");
}

impl<S: Store + 'static, T: Transport + 'static> Manager<S, T> {
    /// Start the reevaluation task of a community.
    ///
    /// The first iteration is forced. Restarting replaces the running task.
    pub fn start_members_reevaluation(self: &Arc<Self>, id: CommunityId) -> Result<()> {
        self.state(&id)?;
        let (requests_tx, requests_rx) = mpsc::channel(FORCE_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(
            Arc::downgrade(self),
            id,
            self.config.reevaluation_tick,
            requests_rx,
            shutdown_rx,
        ));
        let handle = SchedulerHandle {
            requests: requests_tx,
            shutdown: shutdown_tx,
            task,
        };
        self.schedulers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        info!(community = %id, "members reevaluation started");
        Ok(())
    }

    /// Stop the reevaluation task of a community.
    pub fn stop_members_reevaluation(&self, id: &CommunityId) -> bool {
        self.schedulers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    /// Stop every background task.
    pub fn shutdown(&self) {
        let handles: Vec<_> = self
            .schedulers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        info!(tasks = handles.len(), "manager shutting down");
    }

    /// Queue an iteration if a task runs. Returns false when none does.
    fn request_iteration(&self, id: &CommunityId, execution: ExecutionType) -> bool {
        let schedulers = self.schedulers.lock().unwrap_or_else(PoisonError::into_inner);
        match schedulers.get(id) {
            Some(handle) => {
                handle.request(execution);
                true
            }
            None => false,
        }
    }

    /// Reevaluate members now, bypassing the cooldown.
    ///
    /// Without a running task the reevaluation runs inline.
    pub async fn force_members_reevaluation(&self, id: &CommunityId) -> Result<()> {
        if !self.request_iteration(id, ExecutionType::Forced) {
            self.reevaluate_members(id).await?;
        }
        Ok(())
    }

    /// Ask for a reevaluation once the cooldown has elapsed.
    pub async fn push_members_reevaluation(&self, id: &CommunityId) -> Result<()> {
        if !self.request_iteration(id, ExecutionType::OnDemand) {
            let since = self.since_last_reevaluation(id).await?;
            if due(ExecutionType::OnDemand, since, &self.config) {
                self.reevaluate_members(id).await?;
            }
        }
        Ok(())
    }

    async fn since_last_reevaluation(&self, id: &CommunityId) -> Result<Option<Duration>> {
        Ok(self
            .store
            .last_reevaluation(id)
            .await?
            .map(|at| Duration::from_millis(now_millis().saturating_sub(at).max(0) as u64)))
    }

    /// One task iteration. Returns whether members were reevaluated.
    pub(crate) async fn scheduled_iteration(&self, id: &CommunityId, execution: ExecutionType) -> Result<bool> {
        let community = self.community(id)?;
        if community.control_node() != self.public_key() {
            return Ok(false);
        }
        let since = self.since_last_reevaluation(id).await?;
        let ran = due(execution, since, &self.config);
        if ran {
            self.reevaluate_members(id).await?;
        }
        self.rekey_stale_keys(id).await?;
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_iteration_always_due() {
        let config = ManagerConfig::default();
        for execution in [ExecutionType::Regular, ExecutionType::OnDemand, ExecutionType::Forced] {
            assert!(due(execution, None, &config));
        }
    }

    #[test]
    fn test_cooldown_and_interval() {
        let config = ManagerConfig::default();
        let recent = Some(Duration::from_secs(60));
        assert!(due(ExecutionType::Forced, recent, &config));
        assert!(!due(ExecutionType::OnDemand, recent, &config));
        assert!(!due(ExecutionType::Regular, recent, &config));

        let later = Some(config.reevaluation_cooldown);
        assert!(due(ExecutionType::OnDemand, later, &config));
        assert!(!due(ExecutionType::Regular, later, &config));
        assert!(due(ExecutionType::Regular, Some(config.reevaluation_interval), &config));
    }

    #[test]
    fn test_forced_outranks_pending_demand() {
        let pending = Some(ExecutionType::OnDemand);
        assert_eq!(pending.max(Some(ExecutionType::Forced)), Some(ExecutionType::Forced));
        assert_eq!(None.max(Some(ExecutionType::Regular)), Some(ExecutionType::Regular));
    }
}
