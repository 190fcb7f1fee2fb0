//! In-memory chains for driving the executor without a node.
//!
//! Time is tokio time, so tests run under `start_paused = true` advance the clock instantly.
//! Each chain produces one block per second from its creation.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes, TxHash, U256, keccak256},
};
use anyhow::Result;
use crossdeploy_core::{
    ChainClient, ChainConfig, ClientFactory, ConfirmationPolicy, ContractArtifact,
    CreationReceipt,
};
use tokio::time::Instant;

/// First block number of every mock chain.
pub const GENESIS_BLOCK: u64 = 100;

/// Balance every mock contract reports through `viewBalance(address)`.
pub const BALANCE: u64 = 1_000;

/// A contract-creation transaction seen by a mock chain.
#[derive(Debug, Clone)]
pub struct Submission {
    pub init_code: Bytes,
    pub tx_hash: TxHash,
    pub address: Address,
    pub submitted_at: Instant,
    pub mined_at: Instant,
    /// Evicted from the mempool before it was mined.
    pub dropped: bool,
}

/// A read call seen by a mock chain.
#[derive(Debug, Clone)]
pub struct Call {
    pub to: Address,
    pub data: Bytes,
    pub at: Instant,
}

#[derive(Default)]
struct ChainState {
    mine_delay: Duration,
    never_mine: bool,
    rejected: Vec<Bytes>,
    reverted: Vec<Bytes>,
    submissions: Vec<Submission>,
    calls: Vec<Call>,
}

/// One in-memory chain.
pub struct MockChain {
    epoch: Instant,
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(mine_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            epoch: Instant::now(),
            state: Mutex::new(ChainState {
                mine_delay,
                ..Default::default()
            }),
        })
    }

    /// Transactions are accepted but never mined.
    pub fn never_mine(&self) {
        self.state.lock().unwrap().never_mine = true;
    }

    /// Start mining transactions again, including the ones already accepted.
    pub fn resume_mining(&self) {
        self.state.lock().unwrap().never_mine = false;
    }

    /// Forget every transaction not mined yet, as a node evicting its mempool would.
    pub fn drop_pending(&self) {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let never_mine = state.never_mine;
        for submission in state.submissions.iter_mut() {
            if never_mine || now < submission.mined_at {
                submission.dropped = true;
            }
        }
    }

    /// Reject submissions whose init code starts with `code`.
    pub fn reject(&self, code: &Bytes) {
        self.state.lock().unwrap().rejected.push(code.clone());
    }

    /// Mine submissions whose init code starts with `code` as reverted.
    pub fn revert(&self, code: &Bytes) {
        self.state.lock().unwrap().reverted.push(code.clone());
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Submissions carrying the creation code of a contract.
    pub fn submissions_of(&self, code: &Bytes) -> Vec<Submission> {
        self.submissions()
            .into_iter()
            .filter(|s| s.init_code.starts_with(code))
            .collect()
    }

    fn known(state: &ChainState, tx_hash: TxHash) -> Option<&Submission> {
        state
            .submissions
            .iter()
            .find(|s| s.tx_hash == tx_hash && !s.dropped)
    }

    fn block_at(&self, at: Instant) -> u64 {
        GENESIS_BLOCK + at.duration_since(self.epoch).as_secs()
    }
}

/// Public key a mock contract at `address` exposes through `getSigningKeypairPublicKey`.
pub fn public_key_of(address: Address) -> (B256, Address) {
    let hash = keccak256(address);
    (hash, Address::from_slice(&hash[12..]))
}

/// Client bound to one [`MockChain`].
pub struct MockClient {
    chain: Arc<MockChain>,
    deployer: Address,
}

impl ChainClient for MockClient {
    fn deployer(&self) -> Address {
        self.deployer
    }

    async fn send_creation(&self, init_code: Bytes) -> Result<TxHash> {
        let mut state = self.chain.state.lock().unwrap();
        if state.rejected.iter().any(|code| init_code.starts_with(code)) {
            anyhow::bail!("insufficient funds for gas * price + value");
        }

        let nonce = state.submissions.len() as u64;
        let tx_hash = keccak256([init_code.as_ref(), &nonce.to_be_bytes()].concat());
        let address = Address::from_slice(&keccak256(tx_hash)[12..]);
        let now = Instant::now();
        let mined_at = now + state.mine_delay;
        state.submissions.push(Submission {
            init_code,
            tx_hash,
            address,
            submitted_at: now,
            mined_at,
            dropped: false,
        });
        Ok(tx_hash)
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<CreationReceipt>> {
        let state = self.chain.state.lock().unwrap();
        let Some(submission) = MockChain::known(&state, tx_hash) else {
            return Ok(None);
        };
        if state.never_mine || Instant::now() < submission.mined_at {
            return Ok(None);
        }

        let success = !state
            .reverted
            .iter()
            .any(|code| submission.init_code.starts_with(code));
        Ok(Some(CreationReceipt {
            tx_hash,
            block_number: self.chain.block_at(submission.mined_at),
            block_hash: keccak256(tx_hash),
            success,
            contract_address: success.then_some(submission.address),
        }))
    }

    async fn transaction_known(&self, tx_hash: TxHash) -> Result<bool> {
        let state = self.chain.state.lock().unwrap();
        Ok(MockChain::known(&state, tx_hash).is_some())
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.chain.block_at(Instant::now()))
    }

    /// Calls carrying an argument answer `viewBalance(address)`, the rest
    /// `getSigningKeypairPublicKey()`.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        self.chain.state.lock().unwrap().calls.push(Call {
            to,
            data: data.clone(),
            at: Instant::now(),
        });

        if data.len() > 4 {
            return Ok(DynSolValue::Uint(U256::from(BALANCE), 256)
                .abi_encode()
                .into());
        }

        let (hash, key) = public_key_of(to);
        Ok(DynSolValue::Tuple(vec![
            DynSolValue::FixedBytes(hash, 32),
            DynSolValue::Address(key),
        ])
        .abi_encode_params()
        .into())
    }
}

/// Factory handing out clients for registered mock chains, counting creations.
pub struct MockFactory {
    chains: HashMap<String, Arc<MockChain>>,
    connects: AtomicUsize,
    connect_delay: Duration,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            chains: HashMap::new(),
            connects: AtomicUsize::new(0),
            connect_delay: Duration::from_millis(50),
        }
    }

    pub fn with_chain(mut self, id: &str, chain: Arc<MockChain>) -> Self {
        self.chains.insert(id.to_string(), chain);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl ClientFactory for MockFactory {
    type Client = MockClient;

    async fn connect(&self, config: &ChainConfig) -> Result<MockClient> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.connect_delay).await;

        let chain = self
            .chains
            .get(&config.id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("connection refused: {}", config.rpc_url))?;
        let deployer = Address::from_slice(&keccak256(config.id.as_bytes())[12..]);
        Ok(MockClient { chain, deployer })
    }
}

/// Creation code unique to `name`.
pub fn code(name: &str) -> Bytes {
    let tag = keccak256(name.as_bytes());
    Bytes::from(vec![0x60, tag[0], 0x60, tag[1], 0x52])
}

/// Artifact for `name` whose constructor takes `inputs` (Solidity types) and which exposes
/// `getSigningKeypairPublicKey() returns (bytes32, address)` and
/// `viewBalance(address) returns (uint256)`.
pub fn artifact(name: &str, inputs: &[&str]) -> ContractArtifact {
    let inputs: Vec<serde_json::Value> = inputs
        .iter()
        .enumerate()
        .map(|(i, ty)| serde_json::json!({ "name": format!("arg{i}"), "type": ty, "internalType": ty }))
        .collect();

    let json = serde_json::json!({
        "contractName": name,
        "abi": [
            {
                "type": "constructor",
                "stateMutability": "nonpayable",
                "inputs": inputs,
            },
            {
                "type": "function",
                "name": "getSigningKeypairPublicKey",
                "stateMutability": "view",
                "inputs": [],
                "outputs": [
                    { "name": "", "type": "bytes32", "internalType": "bytes32" },
                    { "name": "", "type": "address", "internalType": "address" }
                ]
            },
            {
                "type": "function",
                "name": "viewBalance",
                "stateMutability": "view",
                "inputs": [
                    { "name": "account", "type": "address", "internalType": "address" }
                ],
                "outputs": [
                    { "name": "", "type": "uint256", "internalType": "uint256" }
                ]
            }
        ],
        "bytecode": code(name),
    });

    ContractArtifact::from_json(&json.to_string()).unwrap()
}

/// Chain config with fast polling, suitable for the mock chains.
pub fn chain_config(id: &str, settle_delay_secs: u64, timeout_secs: u64) -> ChainConfig {
    ChainConfig::new(id, format!("http://{id}.invalid"), "UNUSED_KEY").with_confirmation(
        ConfirmationPolicy {
            confirmations: 1,
            settle_delay_secs,
            timeout_secs,
            poll_interval_ms: 500,
        },
    )
}
