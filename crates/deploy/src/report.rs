//! Result reporter: renders run results as a table and persists a JSON summary.

use std::path::Path;

use alloy_core::primitives::TxHash;
use anyhow::{Context, Result};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use serde::Serialize;

use crate::{DeploymentResult, DeploymentRun};

/// Status line of a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

/// A node that failed, with what is known about its transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedNode {
    pub node: String,
    pub chain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    pub error: String,
}

/// Persisted summary of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentSummary {
    pub status: RunStatus,
    pub generated_at: String,
    /// Confirmed results in topological order.
    pub results: Vec<DeploymentResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FailedNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_started: Vec<String>,
}

impl DeploymentSummary {
    /// Summary of a fully successful run.
    pub fn success(results: &[DeploymentResult]) -> Self {
        Self {
            status: RunStatus::Success,
            generated_at: chrono::Utc::now().to_rfc3339(),
            results: results.to_vec(),
            failed: Vec::new(),
            not_started: Vec::new(),
        }
    }

    pub fn from_run(run: &DeploymentRun) -> Self {
        Self {
            status: if run.is_success() {
                RunStatus::Success
            } else {
                RunStatus::Failed
            },
            generated_at: chrono::Utc::now().to_rfc3339(),
            results: run.results().cloned().collect(),
            failed: run
                .failed()
                .map(|n| FailedNode {
                    node: n.node.clone(),
                    chain: n.chain.clone(),
                    tx_hash: n.tx_hash,
                    error: n.error.clone().unwrap_or_default(),
                })
                .collect(),
            not_started: run.not_started().map(|n| n.node.clone()).collect(),
        }
    }

    /// Write the summary as pretty JSON.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize summary")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Deployment summary written");
        Ok(())
    }
}

/// Table of confirmed results: node, contract, chain, address and auxiliary outputs.
pub fn results_table(results: &[DeploymentResult]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Node", "Contract", "Chain", "Address", "Outputs"]);

    for result in results {
        let outputs = result
            .outputs
            .iter()
            .map(|(name, value)| format!("{name} = {value}"))
            .collect::<Vec<_>>()
            .join("\n");
        table.add_row(vec![
            result.node.clone(),
            result.contract.clone(),
            result.chain.clone(),
            result.address.to_checksum(None),
            outputs,
        ]);
    }
    table
}

/// Render a run: the results table, then failures and nodes that never started.
pub fn render(run: &DeploymentRun) -> String {
    let results: Vec<DeploymentResult> = run.results().cloned().collect();
    let mut out = results_table(&results).to_string();

    if run.is_success() {
        return out;
    }

    let mut failures = Table::new();
    failures
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Failed node", "Chain", "Transaction", "Error"]);
    for node in run.failed() {
        failures.add_row(vec![
            node.node.clone(),
            node.chain.clone(),
            node.tx_hash.map(|h| h.to_string()).unwrap_or_else(|| "-".into()),
            node.error.clone().unwrap_or_default(),
        ]);
    }
    out.push('\n');
    out.push_str(&failures.to_string());

    let not_started: Vec<&str> = run.not_started().map(|n| n.node.as_str()).collect();
    if !not_started.is_empty() {
        out.push_str(&format!("\nNot started: {}", not_started.join(", ")));
    }
    out
}
