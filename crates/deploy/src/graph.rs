//! Dependency graph builder.
//!
//! Turns the plan's nodes into a topological order where every node comes after the nodes its
//! arguments reference. Among nodes that are ready at the same time, specification order wins,
//! so an already-ordered plan keeps its order.

use std::collections::{BTreeSet, HashMap};

use crate::{DeployError, DeploymentPlan, NodeSpec};

/// A validated, acyclic set of deployment nodes in topological order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<NodeSpec>,
    /// For each node (by position in `nodes`), the positions of the nodes it depends on.
    dependencies: Vec<Vec<usize>>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Validate the plan and order its nodes.
    ///
    /// Fails on duplicate ids, references to unknown nodes, chains or fields, and cycles.
    pub fn build(plan: &DeploymentPlan) -> Result<Self, DeployError> {
        let specs = &plan.contracts;

        let mut position = HashMap::with_capacity(specs.len());
        for (i, node) in specs.iter().enumerate() {
            if position.insert(node.id.as_str(), i).is_some() {
                return Err(DeployError::DuplicateNode(node.id.clone()));
            }
        }

        // Edges in specification positions: deps[i] holds what node i waits on.
        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); specs.len()];
        for (i, node) in specs.iter().enumerate() {
            if plan.chain(&node.chain).is_none() {
                return Err(DeployError::UnknownChain {
                    node: node.id.clone(),
                    chain: node.chain.clone(),
                });
            }

            for reference in node.references() {
                let &target = position.get(reference.node.as_str()).ok_or_else(|| {
                    DeployError::UnknownNode {
                        node: node.id.clone(),
                        reference: reference.node.clone(),
                    }
                })?;

                if specs[target].produces(&reference.field) == Some(false) {
                    return Err(DeployError::UnknownField {
                        node: node.id.clone(),
                        reference: reference.node.clone(),
                        field: reference.field.clone(),
                    });
                }

                deps[i].insert(target);
            }
        }

        let order = topological_order(&deps).map_err(|cycle| DeployError::CyclicDependency {
            cycle: cycle.into_iter().map(|i| specs[i].id.clone()).collect(),
        })?;

        let mut new_position = vec![0; specs.len()];
        for (new, &old) in order.iter().enumerate() {
            new_position[old] = new;
        }

        let nodes: Vec<NodeSpec> = order.iter().map(|&old| specs[old].clone()).collect();
        let dependencies = order
            .iter()
            .map(|&old| deps[old].iter().map(|&d| new_position[d]).collect())
            .collect();
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), i))
            .collect();

        tracing::debug!(
            order = ?nodes.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
            "Deployment order resolved"
        );

        Ok(Self {
            nodes,
            dependencies,
            index,
        })
    }

    /// Nodes in execution order.
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Position of a node in execution order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Positions of the direct dependencies of the node at `position`.
    pub fn dependencies(&self, position: usize) -> &[usize] {
        &self.dependencies[position]
    }

    /// Positions of every node that transitively depends on the node at `position`.
    pub fn descendants(&self, position: usize) -> BTreeSet<usize> {
        let mut found = BTreeSet::new();
        // Dependents always sit later in topological order, so one forward sweep suffices.
        for i in position + 1..self.nodes.len() {
            if self.dependencies[i]
                .iter()
                .any(|d| *d == position || found.contains(d))
            {
                found.insert(i);
            }
        }
        found
    }
}

/// Kahn's algorithm, always taking the ready node with the lowest specification position.
///
/// On failure returns one cycle as a closed path of positions.
fn topological_order(deps: &[BTreeSet<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let n = deps.len();
    let mut remaining: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut dependents = vec![Vec::new(); n];
    for (i, node_deps) in deps.iter().enumerate() {
        for &d in node_deps {
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    Err(find_cycle(deps, &remaining))
}

/// Walk dependency edges among unsorted nodes until one repeats.
fn find_cycle(deps: &[BTreeSet<usize>], remaining: &[usize]) -> Vec<usize> {
    let Some(start) = remaining.iter().position(|&r| r > 0) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut seen_at = HashMap::from([(start, 0)]);
    let mut current = start;

    loop {
        // Every unsorted node has at least one unsorted dependency.
        let Some(&next) = deps[current].iter().find(|&&d| remaining[d] > 0) else {
            return path;
        };
        if let Some(&at) = seen_at.get(&next) {
            let mut cycle: Vec<usize> = path[at..].to_vec();
            cycle.reverse();
            cycle.push(cycle[0]);
            return cycle;
        }
        seen_at.insert(next, path.len());
        path.push(next);
        current = next;
    }
}
