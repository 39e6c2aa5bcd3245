//! On-disk snapshots of a scheduler and its agents
//!
//! Layout of one snapshot directory:
//!
//! ```text
//! <root>/
//!   step_<N>/
//!     scheduler.json        # {agent_idx, step_counter, all_done_counter, order}
//!     agents/
//!       <uuid>/
//!         state.json        # {version, state} — state schema defined by the agent
//!         ports/
//!           <port_name>.json  # {queue, unconnected}
//! ```
//!
//! Every file is written to a temp path and renamed into place, so a partial
//! write never shadows a good file. `scheduler.json` is written last: a
//! snapshot directory is valid if and only if it is present.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::agent::{Agent, AgentId};
use crate::error::FlowError;
use crate::message::Message;

/// File that marks a snapshot directory as complete
pub const SCHEDULER_FILE: &str = "scheduler.json";

/// Persisted scheduler counters and registration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStateFile {
    pub agent_idx: usize,
    pub step_counter: u64,
    pub all_done_counter: usize,
    pub order: Vec<AgentId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AgentStateFile {
    version: u32,
    state: Message,
}

/// Write a full snapshot of the scheduler and every agent into `dir`
pub(crate) async fn write_snapshot(
    dir: &Path,
    scheduler: &SchedulerStateFile,
    agents: &[Box<dyn Agent>],
) -> Result<(), FlowError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| FlowError::checkpoint(format!("failed to create {}: {e}", dir.display())))?;

    for agent in agents {
        let harness = agent.harness();
        let agent_dir = dir.join("agents").join(harness.id().as_str());
        let ports_dir = agent_dir.join("ports");
        fs::create_dir_all(&ports_dir).await.map_err(|e| {
            FlowError::checkpoint(format!(
                "failed to create {}: {e}",
                ports_dir.display()
            ))
        })?;

        let state = AgentStateFile {
            version: agent.state_version(),
            state: agent.state_value()?,
        };
        write_json_atomic(&agent_dir.join("state.json"), &state).await?;

        for (name, snapshot) in harness.port_snapshots() {
            write_json_atomic(&ports_dir.join(format!("{name}.json")), &snapshot).await?;
        }
    }

    // Last write marks the snapshot as valid.
    write_json_atomic(&dir.join(SCHEDULER_FILE), scheduler).await
}

/// Read the scheduler counters and order from a snapshot directory
pub(crate) async fn read_scheduler(dir: &Path) -> Result<SchedulerStateFile, FlowError> {
    read_json(&dir.join(SCHEDULER_FILE)).await
}

/// Restore one agent's state and port contents from a snapshot directory
pub(crate) async fn load_agent(dir: &Path, agent: &mut dyn Agent) -> Result<(), FlowError> {
    let agent_dir = dir.join("agents").join(agent.harness().id().as_str());

    let state: AgentStateFile = read_json(&agent_dir.join("state.json")).await?;
    if state.version != agent.state_version() {
        return Err(FlowError::checkpoint(format!(
            "agent '{}' state version {} does not match expected {}",
            agent.harness().id(),
            state.version,
            agent.state_version()
        )));
    }
    agent.restore_state(state.state)?;

    let ports_dir = agent_dir.join("ports");
    let names: Vec<String> = agent
        .harness()
        .port_snapshots()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    for name in names {
        let snapshot = read_json(&ports_dir.join(format!("{name}.json"))).await?;
        agent.harness().restore_port(&name, snapshot)?;
    }
    Ok(())
}

/// Step numbers of the valid snapshots under `root`, sorted ascending
///
/// A `step_<n>` directory without a `scheduler.json` (e.g. from an
/// interrupted save) is skipped.
pub async fn list_checkpoints(root: impl AsRef<Path>) -> Result<Vec<u64>, FlowError> {
    let root = root.as_ref();
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut entries = fs::read_dir(root).await.map_err(|e| {
        FlowError::checkpoint(format!("failed to read {}: {e}", root.display()))
    })?;

    let mut steps = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| {
        FlowError::checkpoint(format!("failed to read entry under {}: {e}", root.display()))
    })? {
        let path = entry.path();
        let Some(step) = parse_step(&path) else {
            continue;
        };
        if path.join(SCHEDULER_FILE).exists() {
            steps.push(step);
        }
    }
    steps.sort_unstable();
    Ok(steps)
}

/// Directory of the most recent valid snapshot under `root`
pub async fn latest_checkpoint(root: impl AsRef<Path>) -> Result<Option<PathBuf>, FlowError> {
    let root = root.as_ref();
    let steps = list_checkpoints(root).await?;
    Ok(steps.last().map(|step| root.join(format!("step_{step}"))))
}

fn parse_step(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix("step_")?
        .parse()
        .ok()
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), FlowError> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| FlowError::checkpoint(format!("serialization failed: {e}")))?;

    let mut temp = path.to_path_buf();
    temp.set_extension("tmp");

    let mut file = fs::File::create(&temp).await.map_err(|e| {
        FlowError::checkpoint(format!("failed to create {}: {e}", temp.display()))
    })?;
    file.write_all(&data).await.map_err(|e| {
        FlowError::checkpoint(format!("failed to write {}: {e}", temp.display()))
    })?;
    file.sync_all().await.map_err(|e| {
        FlowError::checkpoint(format!("failed to sync {}: {e}", temp.display()))
    })?;

    fs::rename(&temp, path).await.map_err(|e| {
        FlowError::checkpoint(format!("failed to rename into {}: {e}", path.display()))
    })
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, FlowError> {
    let data = fs::read(path).await.map_err(|e| {
        FlowError::checkpoint(format!("failed to read {}: {e}", path.display()))
    })?;
    serde_json::from_slice(&data).map_err(|e| {
        FlowError::checkpoint(format!("failed to parse {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("value.json");
        write_json_atomic(&path, &json!({"k": 1})).await.unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("value.tmp").exists());
        let back: Message = read_json(&path).await.unwrap();
        assert_eq!(back, json!({"k": 1}));
    }

    #[tokio::test]
    async fn list_skips_incomplete_snapshots() {
        let dir = tempdir().unwrap();
        let scheduler = SchedulerStateFile {
            agent_idx: 0,
            step_counter: 3,
            all_done_counter: 0,
            order: vec![AgentId::from("a")],
        };

        let good = dir.path().join("step_3");
        fs::create_dir_all(&good).await.unwrap();
        write_json_atomic(&good.join(SCHEDULER_FILE), &scheduler)
            .await
            .unwrap();

        // Incomplete: directory exists but the marker file does not.
        fs::create_dir_all(dir.path().join("step_7")).await.unwrap();
        fs::create_dir_all(dir.path().join("not_a_step")).await.unwrap();

        assert_eq!(list_checkpoints(dir.path()).await.unwrap(), vec![3]);
        assert_eq!(
            latest_checkpoint(dir.path()).await.unwrap(),
            Some(dir.path().join("step_3"))
        );
    }

    #[tokio::test]
    async fn list_on_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("never-created");
        assert!(list_checkpoints(&missing).await.unwrap().is_empty());
        assert_eq!(latest_checkpoint(&missing).await.unwrap(), None);
    }

    #[test]
    fn parse_step_names() {
        assert_eq!(parse_step(Path::new("/x/step_12")), Some(12));
        assert_eq!(parse_step(Path::new("/x/step_")), None);
        assert_eq!(parse_step(Path::new("/x/other")), None);
    }
}
