//! Chain client pool: at most one client per chain for the lifetime of a run.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::OnceCell;

use crate::{ChainConfig, ClientFactory, DeployError};

/// Lazily creates and caches one client per chain.
///
/// Concurrent first use of the same chain is serialised by a per-chain initialisation guard,
/// so the factory runs once per chain even when nodes on it start at the same time. A failed
/// creation leaves the slot empty.
pub struct ClientPool<F: ClientFactory> {
    factory: F,
    clients: Mutex<HashMap<String, Arc<OnceCell<Arc<F::Client>>>>>,
}

impl<F: ClientFactory> ClientPool<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Return the client for `chain`, creating it on first use.
    pub async fn get(&self, chain: &ChainConfig) -> Result<Arc<F::Client>, DeployError> {
        let cell = {
            let mut clients = self
                .clients
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            clients.entry(chain.id.clone()).or_default().clone()
        };

        cell.get_or_try_init(|| async {
            tracing::debug!(chain = %chain.id, "Creating chain client");
            self.factory
                .connect(chain)
                .await
                .map(Arc::new)
                .map_err(|source| DeployError::ClientInit {
                    chain: chain.id.clone(),
                    source,
                })
        })
        .await
        .cloned()
    }

    /// Number of clients created so far.
    pub fn len(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}
