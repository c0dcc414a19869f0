use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use orc_core::{AgentId, AgentRunState, AgentStatus};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A supervised agent's run loop: given a cancellation token it should honor
/// promptly, run until cancelled or until it gives up, returning `Err` with
/// a reason on abnormal exit (§4.4). Each of Coordinator/Executor/Tester/
/// Documenter/Structurer is modeled as one Rust async task rather than a
/// child OS process (§9: "there is no separate executable to fork").
pub type AgentTask =
    Arc<dyn Fn(CancellationToken) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// Tuning knobs for the Supervisor's respawn policy (§4.4): exponential
/// backoff between restarts, capped, with a restart budget per rolling
/// window before the agent is marked `failed` and left alone.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Restarts allowed within `window` before giving up.
    pub max_restarts: u32,
    /// The rolling window restart counts are measured against.
    pub window: Duration,
    /// First backoff delay.
    pub base_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// How long `stop` waits for a clean exit before force-cancelling.
    pub grace_period: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            window: Duration::from_secs(60),
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            grace_period: Duration::from_secs(5),
        }
    }
}

struct Slot {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Starts/stops/restarts each agent as an isolated, cancellable async task
/// and exposes its run-state (§4.4). Owns no ledger or queue state itself —
/// those live in `OrchestratorService`, which shares its `run_states` map
/// with this type so supervised tasks can update their own heartbeat/error
/// fields without reaching into the rest of the service.
pub struct Supervisor {
    config: SupervisorConfig,
    slots: RwLock<HashMap<AgentId, Slot>>,
}

impl Supervisor {
    /// A supervisor using the given respawn policy.
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Start `agent` running `task`, respawning on abnormal exit per
    /// `SupervisorConfig`. No-op if already running.
    pub async fn start(
        &self,
        agent: AgentId,
        run_states: Arc<RwLock<HashMap<AgentId, AgentRunState>>>,
        task: AgentTask,
    ) {
        if matches!(self.slots.read().await.get(&agent), Some(slot) if !slot.handle.is_finished()) {
            return;
        }
        let token = CancellationToken::new();
        let child = token.clone();
        let cfg = self.config.clone();

        {
            let mut states = run_states.write().await;
            states.entry(agent).or_insert_with(|| AgentRunState::new(agent)).heartbeat();
        }

        let handle = tokio::spawn(supervise_loop(agent, child, cfg, task, run_states));
        self.slots.write().await.insert(agent, Slot { token, handle });
    }

    /// Signal `agent`'s task to stop, wait up to the grace period, then
    /// force-abort (§4.4, §5 cancellation). No-op if not running.
    pub async fn stop(&self, agent: AgentId, run_states: &RwLock<HashMap<AgentId, AgentRunState>>) {
        let slot = self.slots.write().await.remove(&agent);
        if let Some(slot) = slot {
            slot.token.cancel();
            let grace = self.config.grace_period;
            if tokio::time::timeout(grace, slot.handle).await.is_err() {
                tracing::warn!(%agent, "agent did not exit within grace period, task aborted");
            }
        }
        if let Some(state) = run_states.write().await.get_mut(&agent) {
            state.mark_stopped();
        }
    }

    /// Whether `agent` currently has a running supervised task. Checks the
    /// join handle rather than mere slot presence: `supervise_loop` exits on
    /// its own (normal completion, or respawn budget exhausted) without
    /// anyone calling `stop`, and a stale slot would otherwise make this
    /// report `true` for an agent that has already given up.
    pub async fn is_running(&self, agent: AgentId) -> bool {
        match self.slots.read().await.get(&agent) {
            Some(slot) => !slot.handle.is_finished(),
            None => false,
        }
    }
}

async fn supervise_loop(
    agent: AgentId,
    token: CancellationToken,
    cfg: SupervisorConfig,
    task: AgentTask,
    run_states: Arc<RwLock<HashMap<AgentId, AgentRunState>>>,
) {
    let mut restart_count: u32 = 0;
    let mut window_start = Instant::now();

    loop {
        if token.is_cancelled() {
            break;
        }
        let result = (task)(token.clone()).await;
        if token.is_cancelled() {
            break;
        }
        match result {
            Ok(()) => break,
            Err(reason) => {
                if window_start.elapsed() > cfg.window {
                    window_start = Instant::now();
                    restart_count = 0;
                }
                restart_count += 1;

                if restart_count > cfg.max_restarts {
                    tracing::error!(%agent, restarts = restart_count, %reason, "respawn budget exceeded, marking agent failed");
                    if let Some(state) = run_states.write().await.get_mut(&agent) {
                        state.mark_failed(reason);
                    }
                    break;
                }

                tracing::warn!(%agent, restarts = restart_count, %reason, "agent exited abnormally, respawning");
                if let Some(state) = run_states.write().await.get_mut(&agent) {
                    state.record_restart(reason);
                }

                let backoff = cfg
                    .base_backoff
                    .saturating_mul(1u32 << restart_count.min(6))
                    .min(cfg.max_backoff);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn empty_run_states() -> Arc<RwLock<HashMap<AgentId, AgentRunState>>> {
        Arc::new(RwLock::new(HashMap::new()))
    }

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            max_restarts: 2,
            window: Duration::from_secs(60),
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            grace_period: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn stop_cancels_a_cooperating_task() {
        let supervisor = Supervisor::new(fast_config());
        let run_states = empty_run_states();

        let task: AgentTask = Arc::new(|token: CancellationToken| {
            Box::pin(async move {
                token.cancelled().await;
                Ok(())
            })
        });

        supervisor.start(AgentId::Executor, run_states.clone(), task).await;
        assert!(supervisor.is_running(AgentId::Executor).await);

        supervisor.stop(AgentId::Executor, &run_states).await;
        assert!(!supervisor.is_running(AgentId::Executor).await);

        let states = run_states.read().await;
        assert_eq!(states.get(&AgentId::Executor).unwrap().status, AgentStatus::Stopped);
    }

    #[tokio::test]
    async fn abnormal_exit_respawns_up_to_the_budget_then_fails() {
        let supervisor = Supervisor::new(fast_config());
        let run_states = empty_run_states();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let task: AgentTask = Arc::new(move |_token: CancellationToken| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Err("provider exhausted".to_string()) })
        });

        supervisor.start(AgentId::Tester, run_states.clone(), task).await;

        // Wait for the supervise loop to exhaust its restart budget.
        for _ in 0..200 {
            if !supervisor.is_running(AgentId::Tester).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let states = run_states.read().await;
        let state = states.get(&AgentId::Tester).unwrap();
        assert_eq!(state.status, AgentStatus::Failed);
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn starting_an_already_running_agent_is_a_no_op() {
        let supervisor = Supervisor::new(fast_config());
        let run_states = empty_run_states();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let task: AgentTask = Arc::new(move |token: CancellationToken| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                token.cancelled().await;
                Ok(())
            })
        });

        supervisor.start(AgentId::Documenter, run_states.clone(), task.clone()).await;
        supervisor.start(AgentId::Documenter, run_states.clone(), task).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        supervisor.stop(AgentId::Documenter, &run_states).await;
    }

    #[tokio::test]
    async fn is_running_reflects_a_self_exited_agent_without_an_explicit_stop() {
        let supervisor = Supervisor::new(fast_config());
        let run_states = empty_run_states();

        let task: AgentTask = Arc::new(|_token: CancellationToken| Box::pin(async move { Ok(()) }));

        supervisor.start(AgentId::Structurer, run_states.clone(), task).await;

        for _ in 0..200 {
            if !supervisor.is_running(AgentId::Structurer).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!supervisor.is_running(AgentId::Structurer).await);

        // Restarting after self-exit must not be a no-op.
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let restart_task: AgentTask = Arc::new(move |token: CancellationToken| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                token.cancelled().await;
                Ok(())
            })
        });
        supervisor.start(AgentId::Structurer, run_states.clone(), restart_task).await;
        assert!(supervisor.is_running(AgentId::Structurer).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        supervisor.stop(AgentId::Structurer, &run_states).await;
    }
}
