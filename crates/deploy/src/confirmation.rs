//! Confirmation controller: decides when a deployed contract is safe to read.

use tokio::time::{Instant, sleep, sleep_until, timeout};

use crate::{ChainClient, ChainConfig, CreationReceipt, DeployError};

/// Applies a chain's [`ConfirmationPolicy`](crate::ConfirmationPolicy) to a submitted transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfirmationController;

impl ConfirmationController {
    /// Wait until the transaction of `node` is mined, confirmed, and settled.
    ///
    /// 1. Poll for the receipt, then for `confirmations - 1` further blocks, bounded by the
    ///    policy timeout.
    /// 2. Sleep until the settle delay has elapsed since the receipt was first observed.
    ///
    /// A reverted transaction fails immediately with [`DeployError::DeploymentFailed`]; an
    /// exhausted wait fails with [`DeployError::ConfirmationTimeout`].
    pub async fn wait_until_safe_to_read<C: ChainClient>(
        &self,
        client: &C,
        chain: &ChainConfig,
        node: &str,
        tx_hash: alloy_core::primitives::TxHash,
    ) -> Result<CreationReceipt, DeployError> {
        let policy = &chain.confirmation;
        let node_error = |source: anyhow::Error| DeployError::DeploymentFailed {
            node: node.to_string(),
            chain: chain.id.clone(),
            tx_hash: Some(tx_hash),
            source,
        };

        let confirmed = timeout(policy.timeout(), async {
            let (receipt, mined_at) = loop {
                match client.transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => break (receipt, Instant::now()),
                    Ok(None) => {
                        tracing::trace!(node, tx_hash = %tx_hash, "Transaction pending");
                    }
                    Err(e) => {
                        tracing::debug!(node, tx_hash = %tx_hash, error = %e, "Receipt poll failed");
                    }
                }
                sleep(policy.poll_interval()).await;
            };

            if !receipt.success {
                return Err(node_error(anyhow::anyhow!(
                    "constructor reverted in block {}",
                    receipt.block_number
                )));
            }

            tracing::info!(
                node,
                chain = %chain.id,
                block = receipt.block_number,
                "Deployment transaction mined"
            );

            let target = receipt
                .block_number
                .saturating_add(policy.confirmations.saturating_sub(1));
            while policy.confirmations > 1 {
                match client.block_number().await {
                    Ok(head) if head >= target => break,
                    Ok(head) => {
                        tracing::trace!(node, head, target, "Waiting for confirmations");
                    }
                    Err(e) => {
                        tracing::debug!(node, error = %e, "Block number poll failed");
                    }
                }
                sleep(policy.poll_interval()).await;
            }

            Ok((receipt, mined_at))
        })
        .await;

        let (receipt, mined_at) = match confirmed {
            Ok(result) => result?,
            Err(_) => {
                return Err(DeployError::ConfirmationTimeout {
                    node: node.to_string(),
                    chain: chain.id.clone(),
                    tx_hash,
                    waited_secs: policy.timeout_secs,
                });
            }
        };

        let settle_until = mined_at + policy.settle_delay();
        if settle_until > Instant::now() {
            tracing::debug!(
                node,
                delay_secs = policy.settle_delay_secs,
                "Waiting for contract state to settle"
            );
            sleep_until(settle_until).await;
        }

        Ok(receipt)
    }
}
