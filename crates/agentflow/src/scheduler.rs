//! Round-robin scheduler driving agents to quiescence
//!
//! One cursor walks the registered agents in order; each tick lets the
//! current agent perform a single step. The pipeline is quiescent when a
//! full pass produced only idle steps. Errors raised by an agent are
//! captured with the agent id, the step counter, and the envelope that
//! triggered them; the cursor advances past a failing agent either way,
//! so a retrying caller does not live-lock on the failure.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::{Activity, Agent, AgentId};
use crate::checkpoint::{self, SchedulerStateFile};
use crate::error::FlowError;
use crate::message::Envelope;

/// What to do after capturing an agent failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Return the wrapped error from `step` / `step_all`
    #[default]
    Propagate,
    /// Keep driving; the failure stays on the scheduler's failure list.
    /// Fatal classes (checkpoint load, malformed parent ids) propagate
    /// regardless.
    Collect,
}

/// Scheduler tuning: checkpoint cadence and error handling
#[derive(Clone, Default)]
pub struct SchedulerConfig {
    /// Snapshot destination; `None` disables checkpointing
    pub save_dir: Option<PathBuf>,
    /// Snapshot every N steps (minimum 1)
    pub save_step: u64,
    /// Where to snapshot state when an agent fails
    pub error_dir: Option<PathBuf>,
    /// Propagate or collect captured failures
    pub error_policy: ErrorPolicy,
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self {
            save_step: 1,
            ..Self::default()
        }
    }

    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    pub fn with_save_step(mut self, save_step: u64) -> Self {
        self.save_step = save_step.max(1);
        self
    }

    pub fn with_error_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.error_dir = Some(dir.into());
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }
}

/// A captured agent failure, also persisted as `error.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub agent: AgentId,
    pub step: u64,
    pub kind: String,
    pub message: String,
    pub offending: Option<Envelope>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
struct SchedulerState {
    agent_idx: usize,
    step_counter: u64,
    all_done_counter: usize,
}

/// Drives registered agents round-robin until nothing is left to do
pub struct Scheduler {
    config: SchedulerConfig,
    agents: Vec<Box<dyn Agent>>,
    state: SchedulerState,
    failures: Vec<ErrorReport>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::new())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            agents: Vec::new(),
            state: SchedulerState {
                agent_idx: 0,
                step_counter: 0,
                all_done_counter: 0,
            },
            failures: Vec::new(),
        }
    }

    /// Register an agent; registration order is round-robin order
    pub fn add_agent(&mut self, agent: Box<dyn Agent>) -> Result<(), FlowError> {
        let id = agent.harness().id().clone();
        if id.as_str().is_empty() || id.as_str().contains(['/', '\\']) {
            return Err(FlowError::wiring(format!(
                "agent id '{id}' is not usable as a snapshot directory name"
            )));
        }
        if self.agents.iter().any(|a| a.harness().id() == &id) {
            return Err(FlowError::wiring(format!(
                "agent id '{id}' is already registered"
            )));
        }
        self.agents.push(agent);
        Ok(())
    }

    /// Registered agents, in round-robin order
    pub fn agents(&self) -> impl Iterator<Item = &dyn Agent> + '_ {
        self.agents.iter().map(|a| a.as_ref())
    }

    /// Look up a registered agent by id
    pub fn agent(&self, id: &AgentId) -> Option<&dyn Agent> {
        self.agents
            .iter()
            .find(|a| a.harness().id() == id)
            .map(|a| a.as_ref())
    }

    /// Total single-step calls performed
    pub fn step_counter(&self) -> u64 {
        self.state.step_counter
    }

    /// True once a full pass produced no work
    pub fn is_quiescent(&self) -> bool {
        !self.agents.is_empty() && self.state.all_done_counter >= self.agents.len()
    }

    /// Failures captured so far, oldest first
    pub fn failures(&self) -> &[ErrorReport] {
        &self.failures
    }

    pub fn take_failures(&mut self) -> Vec<ErrorReport> {
        std::mem::take(&mut self.failures)
    }

    /// Drain undelivered outputs from every agent, in registration order
    pub fn pop_all_outputs(&self) -> Vec<Envelope> {
        let mut outputs = Vec::new();
        for agent in &self.agents {
            while let Some(envelope) = agent.pop_one_output() {
                outputs.push(envelope);
            }
        }
        outputs
    }

    /// Drop undelivered outputs on every agent
    pub fn clear_final_outputs(&self) {
        for agent in &self.agents {
            agent.clear_final_outputs();
        }
    }

    /// Run one scheduler tick: a single step of the cursor agent
    pub async fn step(&mut self) -> Result<Activity, FlowError> {
        if self.agents.is_empty() {
            return Ok(Activity::Idle);
        }

        let idx = self.state.agent_idx;
        // Advance before stepping so a failing agent is not revisited first.
        self.state.agent_idx = (idx + 1) % self.agents.len();
        self.state.step_counter += 1;
        let step = self.state.step_counter;
        let agent_id = self.agents[idx].harness().id().clone();
        debug!(agent = %agent_id, step, "stepping agent");

        match self.agents[idx].step().await {
            Ok(activity) => {
                if activity.is_productive() {
                    self.state.all_done_counter = 0;
                } else {
                    self.state.all_done_counter += 1;
                }
                self.maybe_checkpoint().await;
                Ok(activity)
            }
            Err(error) => {
                let offending = self.agents[idx].harness().take_last_input();
                warn!(agent = %agent_id, step, error = %error, "agent step failed");
                let report = ErrorReport {
                    agent: agent_id.clone(),
                    step,
                    kind: error.kind().to_string(),
                    message: error.to_string(),
                    offending,
                    at: Utc::now(),
                };
                if let Some(root) = self.config.error_dir.clone() {
                    if let Err(save_error) = self.save_error_snapshot(&root, &report).await {
                        warn!(error = %save_error, "error snapshot write failed");
                    }
                }
                self.failures.push(report);
                // The failing agent consumed its input, so the round was not
                // idle.
                self.state.all_done_counter = 0;

                if error.is_fatal() || self.config.error_policy == ErrorPolicy::Propagate {
                    Err(FlowError::Step {
                        agent: agent_id,
                        step,
                        source: Box::new(error),
                    })
                } else {
                    Ok(Activity::Productive)
                }
            }
        }
    }

    /// Drive until every agent was idle for one full pass
    ///
    /// Returns the step counter at quiescence.
    pub async fn step_all(&mut self) -> Result<u64, FlowError> {
        if self.agents.is_empty() {
            return Ok(self.state.step_counter);
        }
        info!(
            agents = self.agents.len(),
            step = self.state.step_counter,
            "driving pipeline"
        );
        self.state.all_done_counter = 0;
        while self.state.all_done_counter < self.agents.len() {
            self.step().await?;
        }
        info!(step = self.state.step_counter, "pipeline quiescent");
        Ok(self.state.step_counter)
    }

    /// Write a full snapshot of the scheduler and all agents into `dir`
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<(), FlowError> {
        checkpoint::write_snapshot(dir.as_ref(), &self.state_file(), &self.agents).await
    }

    /// Restore the scheduler counters from a snapshot directory
    ///
    /// The registered agents must match the snapshot's order exactly.
    pub async fn load_state(&mut self, dir: impl AsRef<Path>) -> Result<(), FlowError> {
        let file = checkpoint::read_scheduler(dir.as_ref()).await?;
        let ids = self.ids();
        if file.order != ids {
            return Err(FlowError::checkpoint(format!(
                "registered agents {ids:?} do not match snapshot order {:?}",
                file.order
            )));
        }
        if file.agent_idx >= self.agents.len() {
            return Err(FlowError::checkpoint(format!(
                "snapshot cursor {} out of range for {} agents",
                file.agent_idx,
                self.agents.len()
            )));
        }
        self.state = SchedulerState {
            agent_idx: file.agent_idx,
            step_counter: file.step_counter,
            all_done_counter: file.all_done_counter,
        };
        Ok(())
    }

    /// Restore every registered agent's state and ports from a snapshot
    pub async fn load_agents(&mut self, dir: impl AsRef<Path>) -> Result<(), FlowError> {
        let dir = dir.as_ref();
        for agent in &mut self.agents {
            checkpoint::load_agent(dir, agent.as_mut()).await?;
        }
        Ok(())
    }

    fn ids(&self) -> Vec<AgentId> {
        self.agents
            .iter()
            .map(|a| a.harness().id().clone())
            .collect()
    }

    fn state_file(&self) -> SchedulerStateFile {
        SchedulerStateFile {
            agent_idx: self.state.agent_idx,
            step_counter: self.state.step_counter,
            all_done_counter: self.state.all_done_counter,
            order: self.ids(),
        }
    }

    async fn maybe_checkpoint(&self) {
        let Some(root) = &self.config.save_dir else {
            return;
        };
        if self.state.step_counter % self.config.save_step.max(1) != 0 {
            return;
        }
        let dir = root.join(format!("step_{}", self.state.step_counter));
        // A failed periodic snapshot is logged, not raised: the in-memory
        // state is still good and the next cadence will try again.
        match checkpoint::write_snapshot(&dir, &self.state_file(), &self.agents).await {
            Ok(()) => debug!(path = %dir.display(), "checkpoint written"),
            Err(error) => warn!(path = %dir.display(), error = %error, "checkpoint write failed"),
        }
    }

    async fn save_error_snapshot(
        &self,
        root: &Path,
        report: &ErrorReport,
    ) -> Result<(), FlowError> {
        let dir = root.join(format!("step_{}", report.step));
        checkpoint::write_snapshot(&dir, &self.state_file(), &self.agents).await?;
        let data = serde_json::to_vec_pretty(report)
            .map_err(|e| FlowError::checkpoint(format!("error report serialization: {e}")))?;
        tokio::fs::write(dir.join("error.json"), data)
            .await
            .map_err(|e| FlowError::checkpoint(format!("error report write: {e}")))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
