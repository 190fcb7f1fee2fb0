//! crossdeploy-core - Dependency-ordered contract deployment across several EVM chains.
//!
//! A deployment plan lists contracts, the chain each one goes to and constructor arguments
//! that may reference outputs (addresses, values read from deployed contracts) of other
//! contracts. The plan is turned into a [`DependencyGraph`] and executed by an [`Executor`]
//! that reuses one client per chain and waits for each chain's [`ConfirmationPolicy`] before
//! feeding outputs to dependent contracts.

mod artifacts;
pub use artifacts::{ArtifactStore, ContractArtifact};

mod chain;
pub use chain::{
    ChainConfig, ConfirmationPolicy, DEFAULT_CONFIRMATION_TIMEOUT_SECS, DEFAULT_CONFIRMATIONS,
    DEFAULT_GAS_MULTIPLIER_PERCENT, DEFAULT_POLL_INTERVAL_MS,
};

mod client;
pub use client::{ChainClient, ClientFactory, CreationReceipt, RpcChainClient, RpcClientFactory};

mod confirmation;
pub use confirmation::ConfirmationController;

mod error;
pub use error::DeployError;

mod executor;
pub use executor::{DeploymentRun, Executor, NodeOutcome};

mod graph;
pub use graph::DependencyGraph;

mod plan;
pub use plan::{
    ADDRESS_FIELD, ArgSpec, DeploymentPlan, NodeSpec, OutputRef, PLAN_ENV_PREFIX, ReadSpec,
    TX_HASH_FIELD,
};

mod pool;
pub use pool::ClientPool;

pub mod report;
pub use report::DeploymentSummary;

pub mod rpc;

mod state;
pub use state::{
    DeploymentResult, DeploymentState, NodeRecord, NodeState, PriorRun, StateStore,
    default_state_path, fingerprint,
};

pub mod tx;
