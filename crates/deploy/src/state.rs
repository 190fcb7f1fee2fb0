//! Persisted run state, used to resume a deployment without resubmitting confirmed nodes.
//!
//! The state file is written to `<plan>.state.json` after every node transition. Each record
//! carries a fingerprint of the node specification and its chain, so a changed node (and
//! everything downstream of it) is deployed again on the next run.

use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, B256, TxHash};
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ADDRESS_FIELD, ChainConfig, DependencyGraph, DeploymentPlan, NodeSpec, TX_HASH_FIELD};

/// Lifecycle of a node within a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeState {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

/// Outputs of a successfully confirmed node. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub node: String,
    pub contract: String,
    pub chain: String,
    pub address: Address,
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub block_hash: B256,
    /// Constructor arguments as they were resolved and submitted.
    #[serde(default)]
    pub args: Vec<String>,
    /// Auxiliary outputs collected from read methods.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl DeploymentResult {
    /// Value of an output field, in the form fed to downstream constructors.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            ADDRESS_FIELD => Some(self.address.to_checksum(None)),
            TX_HASH_FIELD => Some(self.tx_hash.to_string()),
            other => self.outputs.get(other).cloned(),
        }
    }
}

/// Persisted record of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub state: NodeState,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DeploymentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The transaction may still land (or already has): resume by awaiting it.
    #[serde(default)]
    pub resumable: bool,
    /// Unix timestamp of the last transition.
    pub updated_at: i64,
}

/// Contents of the state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    /// Version of the tool that last wrote the file.
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeRecord>,
}

impl DeploymentState {
    /// Record a transition of `node`.
    pub fn record(&mut self, node: &str, record: NodeRecord) {
        self.version = env!("CARGO_PKG_VERSION").to_string();
        self.nodes.insert(node.to_string(), record);
    }

    /// Work out which recorded nodes are still valid for `graph`.
    ///
    /// Confirmed records are reused and resumable submissions resumed only when the node's
    /// fingerprint is unchanged and every dependency is reused as well.
    pub fn reconcile(&self, plan: &DeploymentPlan, graph: &DependencyGraph) -> PriorRun {
        let mut prior = PriorRun::default();

        for (i, node) in graph.nodes().iter().enumerate() {
            let Some(record) = self.nodes.get(&node.id) else {
                continue;
            };
            let Some(chain) = plan.chain(&node.chain) else {
                continue;
            };

            if record.fingerprint != fingerprint(node, chain) {
                tracing::warn!(node = %node.id, "Node changed since last run, it will be redeployed");
                continue;
            }

            let deps_reused = graph
                .dependencies(i)
                .iter()
                .all(|&d| prior.confirmed.contains_key(&graph.nodes()[d].id));
            if !deps_reused {
                if matches!(record.state, NodeState::Confirmed | NodeState::Submitted) {
                    tracing::warn!(
                        node = %node.id,
                        "Dependency will be redeployed, discarding recorded deployment"
                    );
                }
                continue;
            }

            match (record.state, &record.result, record.tx_hash) {
                (NodeState::Confirmed, Some(result), _) => {
                    prior.confirmed.insert(node.id.clone(), result.clone());
                }
                (NodeState::Submitted, _, Some(tx_hash)) => {
                    prior.submitted.insert(node.id.clone(), tx_hash);
                }
                (NodeState::Failed, _, Some(tx_hash)) if record.resumable => {
                    prior.submitted.insert(node.id.clone(), tx_hash);
                }
                _ => {}
            }
        }

        prior
    }
}

/// What a previous run left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorRun {
    /// Nodes already confirmed, reused verbatim.
    pub confirmed: HashMap<String, DeploymentResult>,
    /// Nodes whose transaction was submitted but never confirmed, resumed by awaiting it.
    pub submitted: HashMap<String, TxHash>,
}

impl PriorRun {
    /// Mark a node as already confirmed with `result`.
    pub fn confirm(&mut self, result: DeploymentResult) {
        self.confirmed.insert(result.node.clone(), result);
    }

    /// Mark a node as submitted with `tx_hash`.
    pub fn submit(&mut self, node: impl Into<String>, tx_hash: TxHash) {
        self.submitted.insert(node.into(), tx_hash);
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.submitted.is_empty()
    }
}

/// Fingerprint of everything that determines a node's deployment.
pub fn fingerprint(node: &NodeSpec, chain: &ChainConfig) -> String {
    let payload = serde_json::json!({
        "node": node,
        "chain": chain.id,
        "chain_id": chain.chain_id,
        "rpc_url": chain.rpc_url,
    });

    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Default state file location for a plan: `<plan>.state.json` next to it.
pub fn default_state_path(plan_path: &Path) -> PathBuf {
    let mut name = plan_path
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "plan".into());
    name.push(".state.json");
    plan_path.with_file_name(name)
}

/// State file holder. Holds an exclusive lock so two runs cannot share one state file.
pub struct StateStore {
    path: PathBuf,
    lock: File,
}

impl StateStore {
    /// Open (and lock) the state file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        let lock = File::create(&lock_path)
            .with_context(|| format!("Failed to create lock file {}", lock_path.display()))?;
        lock.try_lock_exclusive().with_context(|| {
            format!(
                "State file {} is in use by another deployment run",
                path.display()
            )
        })?;

        Ok(Self { path, lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the recorded state. A missing file is an empty state.
    pub fn load(&self) -> Result<DeploymentState> {
        if !self.path.exists() {
            return Ok(DeploymentState::default());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state from {}", self.path.display()))?;
        let state: DeploymentState =
            serde_json::from_str(&content).context("Failed to parse deployment state JSON")?;

        tracing::info!(path = %self.path.display(), nodes = state.nodes.len(), "Deployment state loaded");
        Ok(state)
    }

    /// Write the state, replacing the previous file atomically.
    pub fn save(&self, state: &DeploymentState) -> Result<()> {
        let json =
            serde_json::to_string_pretty(state).context("Failed to serialize deployment state")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write state to {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl Drop for StateStore {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock);
        let _ = std::fs::remove_file(self.path.with_extension("lock"));
    }
}

/// Current unix timestamp.
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
