//! Deployment plan: the chains to deploy to and the contracts to publish on them.
//!
//! A plan is a TOML document:
//!
//! ```toml
//! [chains.sapphire_testnet]
//! rpc_url = "https://testnet.sapphire.oasis.io"
//! private_key_env = "PRIVATE_KEY_OASIS"
//! confirmation = { settle_delay_secs = 15 }
//!
//! [[contracts]]
//! id = "opinion_maker"
//! contract = "SimpleOpinionMaker"
//! chain = "sapphire_testnet"
//! args = [{ env = { var = "INITIAL_OWNER_ADDRESS", fallback = "deployer" } }]
//!
//! [[contracts]]
//! id = "token_authority"
//! contract = "SimpleTokenAuthority"
//! chain = "sapphire_testnet"
//! args = ["deployer", { output = "opinion_maker.address" }]
//! reads = [{ method = "getSigningKeypairPublicKey", outputs = ["public_key_hash", "public_key_address"] }]
//! ```
//!
//! Fields can be overridden from the environment with the `CROSSDEPLOY_PLAN_` prefix and
//! `__` as the key separator, e.g. `CROSSDEPLOY_PLAN_CHAINS__SEPOLIA__RPC_URL`. Keys are
//! lowercased and cannot contain `-`, so only chains whose id is lowercase letters, digits and
//! `_` can be addressed this way.

use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{ChainConfig, DeployError};

/// Prefix of environment variables overriding plan fields.
pub const PLAN_ENV_PREFIX: &str = "CROSSDEPLOY_PLAN_";

/// Output field every confirmed node exposes: the deployed contract address.
pub const ADDRESS_FIELD: &str = "address";

/// Output field every confirmed node exposes: the creation transaction hash.
pub const TX_HASH_FIELD: &str = "tx_hash";

/// A full deployment plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    /// Target chains keyed by identifier.
    #[serde(default)]
    pub chains: BTreeMap<String, ChainConfig>,
    /// Contract deployments, in specification order.
    #[serde(default)]
    pub contracts: Vec<NodeSpec>,
}

impl DeploymentPlan {
    /// Load a plan from a TOML file, applying `CROSSDEPLOY_PLAN_*` environment overrides.
    pub fn load_from_file(path: &Path) -> Result<Self, DeployError> {
        if !path.exists() {
            return Err(DeployError::Plan(anyhow::anyhow!(
                "Deployment plan not found: {}",
                path.display()
            )));
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(PLAN_ENV_PREFIX).split("__"));

        let plan = Self::extract(figment)
            .with_context(|| format!("Failed to load deployment plan from {}", path.display()))
            .map_err(DeployError::Plan)?;

        tracing::info!(
            path = %path.display(),
            chains = plan.chains.len(),
            contracts = plan.contracts.len(),
            "Deployment plan loaded"
        );
        Ok(plan)
    }

    /// Parse a plan from a TOML string without environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self, DeployError> {
        Self::extract(Figment::from(Toml::string(content))).map_err(DeployError::Plan)
    }

    fn extract(figment: Figment) -> anyhow::Result<Self> {
        let mut plan: Self = figment
            .extract()
            .context("Failed to parse deployment plan")?;
        for (id, chain) in plan.chains.iter_mut() {
            chain.id = id.clone();
        }
        Ok(plan)
    }

    /// Look up a chain configuration.
    pub fn chain(&self, id: &str) -> Option<&ChainConfig> {
        self.chains.get(id)
    }
}

/// One contract deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique node identifier, referenced by other nodes' arguments.
    pub id: String,
    /// Name of the compiled contract artifact.
    pub contract: String,
    /// Identifier of the target chain.
    pub chain: String,
    /// Constructor arguments, in ABI order.
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    /// View methods invoked after deployment to collect auxiliary outputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reads: Vec<ReadSpec>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, contract: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            contract: contract.into(),
            chain: chain.into(),
            args: Vec::new(),
            reads: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: ArgSpec) -> Self {
        self.args.push(arg);
        self
    }

    pub fn read(mut self, read: ReadSpec) -> Self {
        self.reads.push(read);
        self
    }

    /// Every output reference made by this node's constructor and read arguments.
    pub fn references(&self) -> Vec<&OutputRef> {
        let mut refs = Vec::new();
        let read_args = self.reads.iter().flat_map(|read| &read.args);
        for arg in self.args.iter().chain(read_args) {
            arg.collect_references(&mut refs);
        }
        refs
    }

    /// Whether this node produces `field`.
    ///
    /// Returns `None` when a read without explicit output names makes the answer depend on the
    /// contract ABI.
    pub fn produces(&self, field: &str) -> Option<bool> {
        if field == ADDRESS_FIELD || field == TX_HASH_FIELD {
            return Some(true);
        }
        if self.reads.iter().any(|read| read.outputs.is_empty()) {
            return None;
        }
        Some(
            self.reads
                .iter()
                .any(|read| read.outputs.iter().any(|name| name == field)),
        )
    }
}

/// A constructor argument template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgSpec {
    /// A literal value, coerced to the constructor parameter type.
    Literal(String),
    /// An output field of another node.
    Output(OutputRef),
    /// The address of the signer deploying this node.
    Deployer,
    /// An environment variable, with an optional fallback when it is unset.
    Env {
        var: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<Box<ArgSpec>>,
    },
}

impl ArgSpec {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn output(node: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Output(OutputRef::new(node, field))
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a OutputRef>) {
        match self {
            Self::Output(reference) => refs.push(reference),
            Self::Env {
                fallback: Some(fallback),
                ..
            } => fallback.collect_references(refs),
            _ => {}
        }
    }
}

/// A typed reference to another node's output field, written `node.field`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OutputRef {
    pub node: String,
    pub field: String,
}

impl OutputRef {
    pub fn new(node: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.field)
    }
}

impl FromStr for OutputRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((node, field)) if !node.is_empty() && !field.is_empty() => {
                Ok(Self::new(node, field))
            }
            _ => Err(format!(
                "invalid output reference `{s}`, expected `<node>.<field>`"
            )),
        }
    }
}

impl TryFrom<String> for OutputRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OutputRef> for String {
    fn from(value: OutputRef) -> Self {
        value.to_string()
    }
}

/// A view method called once the contract is safe to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadSpec {
    /// ABI method name.
    pub method: String,
    /// Call arguments, resolved like constructor arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ArgSpec>,
    /// Names given to the returned values, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
}

impl ReadSpec {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: ArgSpec) -> Self {
        self.args.push(arg);
        self
    }

    pub fn outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }
}
