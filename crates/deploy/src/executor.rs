//! Deployment executor: walks the dependency graph and deploys each node.
//!
//! Nodes whose dependencies are all confirmed are started in topological order. A chain has
//! at most one node in flight at a time, so its nonces stay ordered, while nodes on different
//! chains run concurrently. Once a node fails none of its descendants start; independent
//! nodes still run to completion and the run resolves to the first failure.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use alloy_core::primitives::{Address, TxHash};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    ArgSpec, ArtifactStore, ChainClient, ChainConfig, ClientFactory, ClientPool,
    ConfirmationController, DependencyGraph, DeployError, DeploymentPlan, NodeSpec,
    artifacts::{check_args, decode_read, read_calldata},
    state::{
        DeploymentResult, DeploymentState, NodeRecord, NodeState, PriorRun, StateStore,
        fingerprint, now,
    },
};

/// Outcome of one node at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeOutcome {
    pub node: String,
    pub contract: String,
    pub chain: String,
    pub state: NodeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DeploymentResult>,
    /// The result was recorded by an earlier run and reused as is.
    pub reused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeOutcome {
    fn pending(node: &NodeSpec) -> Self {
        Self {
            node: node.id.clone(),
            contract: node.contract.clone(),
            chain: node.chain.clone(),
            state: NodeState::Pending,
            tx_hash: None,
            result: None,
            reused: false,
            error: None,
        }
    }

    fn confirm(&mut self, result: DeploymentResult, reused: bool) {
        self.state = NodeState::Confirmed;
        self.tx_hash = Some(result.tx_hash);
        self.result = Some(result);
        self.reused = reused;
    }
}

/// Everything a run produced, in topological order.
#[derive(Debug)]
pub struct DeploymentRun {
    pub nodes: Vec<NodeOutcome>,
    /// First node failure, if any.
    pub failure: Option<DeployError>,
}

impl DeploymentRun {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Results of confirmed nodes, in topological order.
    pub fn results(&self) -> impl Iterator<Item = &DeploymentResult> {
        self.nodes.iter().filter_map(|n| n.result.as_ref())
    }

    pub fn result(&self, node: &str) -> Option<&DeploymentResult> {
        self.nodes
            .iter()
            .find(|n| n.node == node)
            .and_then(|n| n.result.as_ref())
    }

    pub fn failed(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.nodes.iter().filter(|n| n.state == NodeState::Failed)
    }

    /// Nodes that never started.
    pub fn not_started(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.nodes.iter().filter(|n| n.state == NodeState::Pending)
    }

    /// The ordered results of a fully successful run, or its first failure.
    pub fn into_result(self) -> Result<Vec<DeploymentResult>, DeployError> {
        match self.failure {
            Some(error) => Err(error),
            None => Ok(self.nodes.into_iter().filter_map(|n| n.result).collect()),
        }
    }
}

/// Executes deployment plans against the chains produced by a [`ClientFactory`].
pub struct Executor<F: ClientFactory> {
    pool: ClientPool<F>,
    artifacts: ArtifactStore,
    controller: ConfirmationController,
    store: Option<StateStore>,
    prior: Option<PriorRun>,
}

impl<F: ClientFactory> Executor<F> {
    pub fn new(factory: F, artifacts: ArtifactStore) -> Self {
        Self {
            pool: ClientPool::new(factory),
            artifacts,
            controller: ConfirmationController,
            store: None,
            prior: None,
        }
    }

    /// Persist every transition to `store`, and resume from what it recorded.
    pub fn with_state_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Resume from `prior` instead of the state store's records.
    ///
    /// An empty [`PriorRun`] deploys every node again.
    pub fn with_prior_run(mut self, prior: PriorRun) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn pool(&self) -> &ClientPool<F> {
        &self.pool
    }

    /// Build the dependency graph of `plan` and execute it.
    ///
    /// Plan errors are returned before any chain is contacted. Node failures are reported in
    /// the returned [`DeploymentRun`].
    pub async fn run(&self, plan: &DeploymentPlan) -> Result<DeploymentRun, DeployError> {
        let graph = DependencyGraph::build(plan)?;
        self.execute(plan, &graph).await
    }

    /// Execute an already validated graph.
    pub async fn execute(
        &self,
        plan: &DeploymentPlan,
        graph: &DependencyGraph,
    ) -> Result<DeploymentRun, DeployError> {
        let chains = graph
            .nodes()
            .iter()
            .map(|node| {
                plan.chain(&node.chain)
                    .ok_or_else(|| DeployError::UnknownChain {
                        node: node.id.clone(),
                        chain: node.chain.clone(),
                    })
            })
            .collect::<Result<Vec<&ChainConfig>, _>>()?;
        self.check_artifacts(graph)?;

        let prior = match (&self.prior, &self.store) {
            (Some(prior), _) => prior.clone(),
            (None, Some(store)) => store
                .load()
                .map_err(DeployError::State)?
                .reconcile(plan, graph),
            (None, None) => PriorRun::default(),
        };

        let fingerprints: Vec<String> = graph
            .nodes()
            .iter()
            .zip(&chains)
            .map(|(node, chain)| fingerprint(node, chain))
            .collect();

        let mut outcomes: Vec<NodeOutcome> =
            graph.nodes().iter().map(NodeOutcome::pending).collect();
        let mut state = DeploymentState::default();
        let mut resume = HashMap::new();

        for (i, node) in graph.nodes().iter().enumerate() {
            if let Some(result) = prior.confirmed.get(&node.id) {
                tracing::info!(
                    node = %node.id,
                    address = %result.address,
                    "Reusing confirmed deployment"
                );
                outcomes[i].confirm(result.clone(), true);
                state.record(&node.id, confirmed_record(&fingerprints[i], result));
            } else if let Some(&tx_hash) = prior.submitted.get(&node.id) {
                resume.insert(i, tx_hash);
                state.record(&node.id, submitted_record(&fingerprints[i], tx_hash));
            }
        }
        self.persist(&state)?;

        tracing::info!(
            nodes = graph.len(),
            reused = outcomes.iter().filter(|o| o.reused).count(),
            resumed = resume.len(),
            "Starting deployment run"
        );

        let (events, mut submissions) = mpsc::unbounded_channel::<(usize, TxHash)>();
        let mut in_flight = FuturesUnordered::new();
        let mut started = vec![false; graph.len()];
        let mut busy_chains: HashSet<&str> = HashSet::new();
        let mut blocked: BTreeSet<usize> = BTreeSet::new();
        let mut failure: Option<DeployError> = None;

        loop {
            for (i, node) in graph.nodes().iter().enumerate() {
                let ready = !started[i]
                    && outcomes[i].state == NodeState::Pending
                    && !blocked.contains(&i)
                    && !busy_chains.contains(node.chain.as_str())
                    && graph
                        .dependencies(i)
                        .iter()
                        .all(|&d| outcomes[d].state == NodeState::Confirmed);
                if !ready {
                    continue;
                }

                let inputs: HashMap<String, DeploymentResult> = graph
                    .dependencies(i)
                    .iter()
                    .filter_map(|&d| outcomes[d].result.clone())
                    .map(|result| (result.node.clone(), result))
                    .collect();

                started[i] = true;
                busy_chains.insert(node.chain.as_str());
                in_flight.push(self.execute_node(
                    i,
                    node,
                    chains[i],
                    inputs,
                    resume.get(&i).copied(),
                    events.clone(),
                ));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some((i, tx_hash)) = submissions.recv() => {
                    if outcomes[i].state == NodeState::Pending {
                        outcomes[i].state = NodeState::Submitted;
                        outcomes[i].tx_hash = Some(tx_hash);
                        state.record(&graph.nodes()[i].id, submitted_record(&fingerprints[i], tx_hash));
                        self.persist_or_log(&state);
                    }
                }

                Some((i, outcome)) = in_flight.next() => {
                    let node = &graph.nodes()[i];
                    busy_chains.remove(node.chain.as_str());

                    match outcome {
                        Ok(result) => {
                            tracing::info!(
                                node = %node.id,
                                chain = %node.chain,
                                address = %result.address,
                                block = result.block_number,
                                "Node confirmed"
                            );
                            state.record(&node.id, confirmed_record(&fingerprints[i], &result));
                            outcomes[i].confirm(result, false);
                        }
                        Err(error) => {
                            tracing::error!(node = %node.id, chain = %node.chain, "{error:#}");

                            let mut skipped = graph.descendants(i);
                            if matches!(error, DeployError::ClientInit { .. }) {
                                for (j, other) in graph.nodes().iter().enumerate() {
                                    if other.chain == node.chain && !started[j] {
                                        skipped.insert(j);
                                        skipped.extend(graph.descendants(j));
                                    }
                                }
                            }
                            if !skipped.is_empty() {
                                tracing::warn!(
                                    node = %node.id,
                                    skipped = ?skipped.iter().map(|&j| graph.nodes()[j].id.as_str()).collect::<Vec<_>>(),
                                    "Nodes depending on the failure will not start"
                                );
                            }
                            blocked.extend(skipped);

                            let tx_hash = error.tx_hash().or(outcomes[i].tx_hash);
                            state.record(
                                &node.id,
                                NodeRecord {
                                    state: NodeState::Failed,
                                    fingerprint: fingerprints[i].clone(),
                                    tx_hash,
                                    result: None,
                                    error: Some(format!("{error:#}")),
                                    resumable: error.is_resumable(),
                                    updated_at: now(),
                                },
                            );
                            outcomes[i].state = NodeState::Failed;
                            outcomes[i].tx_hash = tx_hash;
                            outcomes[i].error = Some(format!("{error:#}"));
                            failure.get_or_insert(error);
                        }
                    }
                    self.persist_or_log(&state);
                }
            }
        }

        match &failure {
            None => tracing::info!(nodes = graph.len(), "Deployment run complete"),
            Some(error) => tracing::error!(
                confirmed = outcomes.iter().filter(|o| o.state == NodeState::Confirmed).count(),
                failed = outcomes.iter().filter(|o| o.state == NodeState::Failed).count(),
                "Deployment run failed: {error}"
            ),
        }

        Ok(DeploymentRun {
            nodes: outcomes,
            failure,
        })
    }

    async fn execute_node(
        &self,
        position: usize,
        node: &NodeSpec,
        chain: &ChainConfig,
        inputs: HashMap<String, DeploymentResult>,
        resume: Option<TxHash>,
        events: mpsc::UnboundedSender<(usize, TxHash)>,
    ) -> (usize, Result<DeploymentResult, DeployError>) {
        let outcome = self
            .deploy_node(position, node, chain, &inputs, resume, &events)
            .await;
        (position, outcome)
    }

    async fn deploy_node(
        &self,
        position: usize,
        node: &NodeSpec,
        chain: &ChainConfig,
        inputs: &HashMap<String, DeploymentResult>,
        resume: Option<TxHash>,
        events: &mpsc::UnboundedSender<(usize, TxHash)>,
    ) -> Result<DeploymentResult, DeployError> {
        let client = self.pool.get(chain).await?;
        let artifact = self.artifact(&node.contract)?;

        let args = node
            .args
            .iter()
            .map(|arg| resolve_arg(node, arg, inputs, client.deployer()))
            .collect::<Result<Vec<_>, _>>()?;

        let resume = match resume {
            Some(tx_hash) => match client.transaction_known(tx_hash).await {
                Ok(true) => Some(tx_hash),
                Ok(false) => {
                    tracing::warn!(
                        node = %node.id,
                        chain = %chain.id,
                        tx_hash = %tx_hash,
                        "Recorded transaction is unknown to the chain, deploying again"
                    );
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        node = %node.id,
                        tx_hash = %tx_hash,
                        error = %e,
                        "Could not look up recorded transaction, awaiting it anyway"
                    );
                    Some(tx_hash)
                }
            },
            None => None,
        };

        let tx_hash = match resume {
            Some(tx_hash) => {
                tracing::info!(
                    node = %node.id,
                    chain = %chain.id,
                    tx_hash = %tx_hash,
                    "Resuming submitted deployment"
                );
                tx_hash
            }
            None => {
                let init_code =
                    artifact
                        .init_code(&args)
                        .map_err(|e| DeployError::InvalidArgument {
                            node: node.id.clone(),
                            reason: format!("{e:#}"),
                        })?;

                tracing::info!(
                    node = %node.id,
                    contract = %node.contract,
                    chain = %chain.id,
                    args = ?args,
                    "Deploying contract"
                );

                let tx_hash = client.send_creation(init_code).await.map_err(|source| {
                    DeployError::DeploymentFailed {
                        node: node.id.clone(),
                        chain: chain.id.clone(),
                        tx_hash: None,
                        source,
                    }
                })?;

                tracing::info!(node = %node.id, tx_hash = %tx_hash, "Deployment transaction submitted");
                tx_hash
            }
        };
        let _ = events.send((position, tx_hash));

        let receipt = self
            .controller
            .wait_until_safe_to_read(client.as_ref(), chain, &node.id, tx_hash)
            .await?;

        let address = receipt
            .contract_address
            .ok_or_else(|| DeployError::DeploymentFailed {
                node: node.id.clone(),
                chain: chain.id.clone(),
                tx_hash: Some(tx_hash),
                source: anyhow::anyhow!("receipt carries no contract address"),
            })?;

        let mut outputs = BTreeMap::new();
        for read in &node.reads {
            let read_failed = |source: anyhow::Error| DeployError::ReadFailed {
                node: node.id.clone(),
                chain: chain.id.clone(),
                method: read.method.clone(),
                tx_hash,
                source,
            };

            let read_args = read
                .args
                .iter()
                .map(|arg| resolve_arg(node, arg, inputs, client.deployer()))
                .collect::<Result<Vec<_>, _>>()?;
            let function = artifact
                .read_method(&read.method, read_args.len())
                .map_err(&read_failed)?;
            let calldata = read_calldata(function, &read_args).map_err(&read_failed)?;
            let data = client.call(address, calldata).await.map_err(&read_failed)?;

            for (name, value) in decode_read(function, &data, &read.outputs).map_err(&read_failed)? {
                tracing::debug!(node = %node.id, output = %name, value = %value, "Read output");
                outputs.insert(name, value);
            }
        }

        Ok(DeploymentResult {
            node: node.id.clone(),
            contract: node.contract.clone(),
            chain: chain.id.clone(),
            address,
            tx_hash,
            block_number: receipt.block_number,
            block_hash: receipt.block_hash,
            args,
            outputs,
        })
    }

    fn artifact(&self, contract: &str) -> Result<&crate::ContractArtifact, DeployError> {
        self.artifacts
            .get(contract)
            .ok_or_else(|| DeployError::Artifact {
                contract: contract.to_string(),
                source: anyhow::anyhow!("no compiled artifact named `{contract}`"),
            })
    }

    /// Every node needs an artifact whose constructor accepts its arguments, and every
    /// declared read a method accepting the read's arguments.
    fn check_artifacts(&self, graph: &DependencyGraph) -> Result<(), DeployError> {
        for node in graph.nodes() {
            let artifact = self.artifact(&node.contract)?;
            let invalid = |e: anyhow::Error| DeployError::InvalidArgument {
                node: node.id.clone(),
                reason: format!("{e:#}"),
            };

            artifact.check_constructor_args(&node.args).map_err(invalid)?;
            for read in &node.reads {
                let function = artifact
                    .read_method(&read.method, read.args.len())
                    .map_err(|source| DeployError::Artifact {
                        contract: node.contract.clone(),
                        source,
                    })?;
                check_args(&function.inputs, &read.args).map_err(|e| {
                    invalid(e.context(format!("Invalid arguments for `{}`", read.method)))
                })?;
            }
        }
        Ok(())
    }

    fn persist(&self, state: &DeploymentState) -> Result<(), DeployError> {
        if let Some(store) = &self.store {
            store.save(state).map_err(DeployError::State)?;
        }
        Ok(())
    }

    fn persist_or_log(&self, state: &DeploymentState) {
        if let Err(e) = self.persist(state) {
            tracing::error!(error = %e, "Failed to persist deployment state");
        }
    }
}

fn confirmed_record(fingerprint: &str, result: &DeploymentResult) -> NodeRecord {
    NodeRecord {
        state: NodeState::Confirmed,
        fingerprint: fingerprint.to_string(),
        tx_hash: Some(result.tx_hash),
        result: Some(result.clone()),
        error: None,
        resumable: false,
        updated_at: now(),
    }
}

fn submitted_record(fingerprint: &str, tx_hash: TxHash) -> NodeRecord {
    NodeRecord {
        state: NodeState::Submitted,
        fingerprint: fingerprint.to_string(),
        tx_hash: Some(tx_hash),
        result: None,
        error: None,
        resumable: true,
        updated_at: now(),
    }
}

/// Resolve one argument template to its string form.
pub(crate) fn resolve_arg(
    node: &NodeSpec,
    arg: &ArgSpec,
    inputs: &HashMap<String, DeploymentResult>,
    deployer: Address,
) -> Result<String, DeployError> {
    match arg {
        ArgSpec::Literal(value) => Ok(value.clone()),
        ArgSpec::Deployer => Ok(deployer.to_checksum(None)),
        ArgSpec::Output(reference) => inputs
            .get(&reference.node)
            .and_then(|result| result.field(&reference.field))
            .ok_or_else(|| DeployError::UnresolvedReference {
                node: node.id.clone(),
                reference: reference.to_string(),
            }),
        ArgSpec::Env { var, fallback } => match std::env::var(var) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => match fallback {
                Some(fallback) => resolve_arg(node, fallback, inputs, deployer),
                None => Err(DeployError::InvalidArgument {
                    node: node.id.clone(),
                    reason: format!("environment variable `{var}` is not set"),
                }),
            },
        },
    }
}
