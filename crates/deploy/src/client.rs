//! Chain clients: the seam between the executor and a chain's JSON-RPC endpoint.

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes, TxHash, U64, U128, hex};
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
    ChainConfig, rpc,
    tx::{creation_transaction, sign_transaction},
};

/// Receipt of a mined contract-creation transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub block_hash: B256,
    /// `false` when the constructor reverted.
    pub success: bool,
    pub contract_address: Option<Address>,
}

/// Operations the executor needs from one chain.
///
/// One client is bound to one RPC endpoint and one signing key for the lifetime of a run.
pub trait ChainClient: Send + Sync + 'static {
    /// Address of the signer submitting transactions.
    fn deployer(&self) -> Address;

    /// Sign and submit a contract-creation transaction, returning its hash.
    fn send_creation(&self, init_code: Bytes) -> impl Future<Output = Result<TxHash>> + Send;

    /// Fetch the receipt of a transaction, `None` while it is pending.
    fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<Option<CreationReceipt>>> + Send;

    /// Whether the chain still knows a transaction, pending or mined.
    ///
    /// `false` means it was dropped and will never be mined.
    fn transaction_known(&self, tx_hash: TxHash) -> impl Future<Output = Result<bool>> + Send;

    /// Latest block number.
    fn block_number(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Execute a read-only call against the latest state.
    fn call(&self, to: Address, data: Bytes) -> impl Future<Output = Result<Bytes>> + Send;
}

/// Creates chain clients from chain configurations.
pub trait ClientFactory: Send + Sync {
    type Client: ChainClient;

    /// Build a client for `chain`. Fails when the credential is missing or the endpoint is
    /// unreachable.
    fn connect(&self, chain: &ChainConfig) -> impl Future<Output = Result<Self::Client>> + Send;
}

/// Client speaking Ethereum JSON-RPC over HTTP, signing with a local key.
pub struct RpcChainClient {
    chain: String,
    url: String,
    http: reqwest::Client,
    signer: PrivateKeySigner,
    chain_id: u64,
    gas_limit: Option<u64>,
    gas_multiplier_percent: u64,
}

impl RpcChainClient {
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn gas_limit(&self, init_code: &Bytes) -> Result<u64> {
        if let Some(limit) = self.gas_limit {
            return Ok(limit);
        }
        let estimate: U64 = rpc::json_rpc_call(
            &self.http,
            &self.url,
            "eth_estimateGas",
            vec![serde_json::json!({
                "from": self.signer.address(),
                "data": init_code,
            })],
        )
        .await
        .context("Failed to estimate deployment gas")?;

        Ok(estimate.to::<u64>().saturating_mul(self.gas_multiplier_percent) / 100)
    }
}

/// Receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: TxHash,
    block_number: Option<U64>,
    block_hash: Option<B256>,
    status: Option<U64>,
    contract_address: Option<Address>,
}

impl ChainClient for RpcChainClient {
    fn deployer(&self) -> Address {
        self.signer.address()
    }

    async fn send_creation(&self, init_code: Bytes) -> Result<TxHash> {
        let from = self.signer.address();

        let nonce: U64 = rpc::json_rpc_call_with_retry(
            &self.http,
            &self.url,
            "eth_getTransactionCount",
            vec![serde_json::json!(from), serde_json::json!("pending")],
        )
        .await
        .context("Failed to fetch deployer nonce")?;

        let gas_price: U128 =
            rpc::json_rpc_call_with_retry(&self.http, &self.url, "eth_gasPrice", vec![])
                .await
                .context("Failed to fetch gas price")?;

        let gas_limit = self.gas_limit(&init_code).await?;

        let nonce = nonce.to::<u64>();
        let gas_price = gas_price.to::<u128>();
        let tx = creation_transaction(self.chain_id, nonce, gas_price, gas_limit, init_code);
        let signed = sign_transaction(tx, &self.signer)?;

        tracing::debug!(
            chain = %self.chain,
            from = %from,
            nonce,
            gas_limit,
            gas_price,
            tx_hash = %signed.hash,
            "Submitting creation transaction"
        );

        let returned: TxHash = rpc::json_rpc_call(
            &self.http,
            &self.url,
            "eth_sendRawTransaction",
            vec![serde_json::json!(hex::encode_prefixed(&signed.raw))],
        )
        .await
        .context("Failed to submit creation transaction")?;

        if returned != signed.hash {
            tracing::warn!(
                chain = %self.chain,
                expected = %signed.hash,
                returned = %returned,
                "Node returned an unexpected transaction hash"
            );
        }

        Ok(returned)
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<CreationReceipt>> {
        let receipt: Option<RpcReceipt> = rpc::json_rpc_call_with_retry(
            &self.http,
            &self.url,
            "eth_getTransactionReceipt",
            vec![serde_json::json!(tx_hash)],
        )
        .await?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };
        // Some nodes return receipts for pending transactions without a block.
        let (Some(block_number), Some(block_hash)) = (receipt.block_number, receipt.block_hash)
        else {
            return Ok(None);
        };

        Ok(Some(CreationReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: block_number.to::<u64>(),
            block_hash,
            success: receipt.status.is_none_or(|s| s.to::<u64>() == 1),
            contract_address: receipt.contract_address,
        }))
    }

    async fn transaction_known(&self, tx_hash: TxHash) -> Result<bool> {
        let transaction: Option<serde_json::Value> = rpc::json_rpc_call_with_retry(
            &self.http,
            &self.url,
            "eth_getTransactionByHash",
            vec![serde_json::json!(tx_hash)],
        )
        .await?;
        Ok(transaction.is_some())
    }

    async fn block_number(&self) -> Result<u64> {
        let number: U64 =
            rpc::json_rpc_call_with_retry(&self.http, &self.url, "eth_blockNumber", vec![])
                .await?;
        Ok(number.to::<u64>())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        rpc::json_rpc_call_with_retry(
            &self.http,
            &self.url,
            "eth_call",
            vec![
                serde_json::json!({ "to": to, "data": data }),
                serde_json::json!("latest"),
            ],
        )
        .await
    }
}

/// Factory producing [`RpcChainClient`]s from the environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcClientFactory;

impl ClientFactory for RpcClientFactory {
    type Client = RpcChainClient;

    async fn connect(&self, chain: &ChainConfig) -> Result<RpcChainClient> {
        let signer: PrivateKeySigner = chain
            .private_key()?
            .parse()
            .with_context(|| format!("Invalid signing key in `{}`", chain.private_key_env))?;
        let url = chain.resolve_rpc_url()?.to_string();
        let http = rpc::create_client()?;

        let chain_id: U64 = rpc::json_rpc_call_with_retry(&http, &url, "eth_chainId", vec![])
            .await
            .with_context(|| format!("Chain `{}` is unreachable", chain.id))?;
        let chain_id = chain_id.to::<u64>();

        if let Some(expected) = chain.chain_id {
            if expected != chain_id {
                anyhow::bail!(
                    "Chain `{}` reports chain id {} but {} is configured",
                    chain.id,
                    chain_id,
                    expected
                );
            }
        }

        tracing::info!(
            chain = %chain.id,
            chain_id,
            deployer = %signer.address(),
            "Chain client ready"
        );

        Ok(RpcChainClient {
            chain: chain.id.clone(),
            url,
            http,
            signer,
            chain_id,
            gas_limit: chain.gas_limit,
            gas_multiplier_percent: chain.gas_multiplier_percent,
        })
    }
}
