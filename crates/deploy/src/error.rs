//! Error taxonomy for deployment runs.
//!
//! Plan-level errors (`CyclicDependency`, `DuplicateNode`, `UnknownNode`, `UnknownChain`,
//! `UnknownField`, `Plan`) abort a run before any transaction is submitted. Node-level errors
//! carry the node and chain they happened on, and the underlying transport error when there
//! is one.

use alloy_core::primitives::TxHash;

/// Errors surfaced by the deployment orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// The plan file could not be read or parsed.
    #[error("invalid deployment plan: {0:#}")]
    Plan(anyhow::Error),

    /// Two plan entries share the same node id.
    #[error("duplicate node id `{0}` in deployment plan")]
    DuplicateNode(String),

    /// A node references a node id that is not part of the plan.
    #[error("node `{node}` references unknown node `{reference}`")]
    UnknownNode { node: String, reference: String },

    /// A node targets a chain that has no configuration.
    #[error("node `{node}` targets unknown chain `{chain}`")]
    UnknownChain { node: String, chain: String },

    /// A node references an output field its dependency never produces.
    #[error("node `{node}` references field `{field}` which node `{reference}` does not produce")]
    UnknownField {
        node: String,
        reference: String,
        field: String,
    },

    /// The argument references of the plan form a cycle.
    #[error("deployment plan contains a dependency cycle: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// The client for a chain could not be created.
    #[error("failed to initialise client for chain `{chain}`: {source:#}")]
    ClientInit {
        chain: String,
        #[source]
        source: anyhow::Error,
    },

    /// A reference could not be resolved against the results produced so far.
    #[error("node `{node}` could not resolve `{reference}` from recorded results")]
    UnresolvedReference { node: String, reference: String },

    /// A constructor argument could not be produced or encoded.
    #[error("node `{node}` has an invalid argument: {reason}")]
    InvalidArgument { node: String, reason: String },

    /// No usable artifact exists for a contract.
    #[error("artifact error for contract `{contract}`: {source:#}")]
    Artifact {
        contract: String,
        #[source]
        source: anyhow::Error,
    },

    /// The creation transaction was rejected, reverted, or produced no contract.
    #[error("deployment of node `{node}` on chain `{chain}` failed{}: {source:#}", fmt_tx(tx_hash))]
    DeploymentFailed {
        node: String,
        chain: String,
        tx_hash: Option<TxHash>,
        #[source]
        source: anyhow::Error,
    },

    /// The chain did not reach the required confirmation state within the bounded wait.
    #[error(
        "timed out after {waited_secs}s waiting for node `{node}` on chain `{chain}` (tx {tx_hash})"
    )]
    ConfirmationTimeout {
        node: String,
        chain: String,
        tx_hash: TxHash,
        waited_secs: u64,
    },

    /// A declared read method failed after the contract was deployed.
    #[error("read `{method}` on node `{node}` (chain `{chain}`) failed: {source:#}")]
    ReadFailed {
        node: String,
        chain: String,
        method: String,
        tx_hash: TxHash,
        #[source]
        source: anyhow::Error,
    },

    /// The persisted run state could not be loaded or written.
    #[error("deployment state error: {0:#}")]
    State(anyhow::Error),
}

impl DeployError {
    /// The node this error is attributed to, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::UnknownNode { node, .. }
            | Self::UnknownChain { node, .. }
            | Self::UnknownField { node, .. }
            | Self::UnresolvedReference { node, .. }
            | Self::InvalidArgument { node, .. }
            | Self::DeploymentFailed { node, .. }
            | Self::ConfirmationTimeout { node, .. }
            | Self::ReadFailed { node, .. } => Some(node),
            Self::DuplicateNode(node) => Some(node),
            _ => None,
        }
    }

    /// The transaction involved in the failure, if one was submitted.
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            Self::DeploymentFailed { tx_hash, .. } => *tx_hash,
            Self::ConfirmationTimeout { tx_hash, .. } | Self::ReadFailed { tx_hash, .. } => {
                Some(*tx_hash)
            }
            _ => None,
        }
    }

    /// Whether the submitted transaction may still produce (or has produced) the contract, so
    /// a later run should await it instead of submitting again.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::ConfirmationTimeout { .. } | Self::ReadFailed { .. }
        )
    }

    /// Whether the error was raised before any transaction could be submitted.
    pub fn is_plan_error(&self) -> bool {
        matches!(
            self,
            Self::Plan(_)
                | Self::DuplicateNode(_)
                | Self::UnknownNode { .. }
                | Self::UnknownChain { .. }
                | Self::UnknownField { .. }
                | Self::CyclicDependency { .. }
        )
    }
}

fn fmt_tx(tx_hash: &Option<TxHash>) -> String {
    match tx_hash {
        Some(hash) => format!(" (tx {hash})"),
        None => String::new(),
    }
}
