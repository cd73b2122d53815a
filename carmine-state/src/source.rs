//! Traits and types for the blockchain source that feeds the indexer,
//! commonly a full-node connection.

use async_trait::async_trait;
use carmine_fetch::{
    chain::{FullBlock, FullTransaction},
    jsonrpc::{BitcoindConnector, RpcRequestError},
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{BlockHash, ChainTip, Height, Txid};

/// Poll cadence of the connector-backed event listener.
const EVENT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// An event pushed by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// An unconfirmed transaction was announced.
    Tx(Txid),
    /// The node's best chain changed.
    Block,
}

/// An error originating from a blockchain source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Transient error; retrying the surrounding operation may succeed.
    #[error("transient error in backing block source: {0}")]
    Transient(String),

    /// Unrecoverable error.
    #[error("critical error in backing block source: {0}")]
    Unrecoverable(String),

    /// The node rejected a submitted transaction.
    #[error("node rejected transaction (code {code}): {message}")]
    Rejected {
        /// JSON-RPC error code.
        code: i64,
        /// Node error message.
        message: String,
    },
}

impl From<RpcRequestError> for SourceError {
    fn from(value: RpcRequestError) -> Self {
        match value {
            RpcRequestError::Transport(e) => SourceError::Transient(e.to_string()),
            RpcRequestError::NodeBusy => {
                SourceError::Transient("node work queue saturated".to_string())
            }
            RpcRequestError::Rpc(e) => SourceError::Unrecoverable(e.to_string()),
        }
    }
}

/// A trait for accessing blockchain data from different backends.
#[async_trait]
pub trait BlockchainSource: Clone + Send + Sync + 'static {
    /// Returns the node's best chain tip.
    async fn get_latest(&self) -> Result<ChainTip, SourceError>;

    /// Returns the block at `height` on the node's best chain, or None
    /// beyond the tip.
    async fn get_block(&self, height: Height) -> Result<Option<FullBlock>, SourceError>;

    /// Returns the transaction by txid, or None if the node does not know
    /// it.
    async fn get_tx(&self, txid: &Txid) -> Result<Option<FullTransaction>, SourceError>;

    /// Returns the complete list of txids currently in the mempool.
    async fn get_mempool_txids(&self) -> Result<Vec<Txid>, SourceError>;

    /// Submits a raw transaction to the node, returning its txid.
    async fn send_tx(&self, raw_hex: &str) -> Result<Txid, SourceError>;

    /// Get a listener for node `tx`/`block` events, if supported. Callers
    /// fall back to polling when None.
    async fn event_listener(&self)
        -> Result<Option<mpsc::Receiver<NodeEvent>>, SourceError>;
}

#[async_trait]
impl BlockchainSource for BitcoindConnector {
    async fn get_latest(&self) -> Result<ChainTip, SourceError> {
        let count = self.get_block_count().await.map_err(SourceError::from)?.0;
        let hash_hex = self
            .get_block_hash(count)
            .await
            .map_err(SourceError::from)?
            .0;
        let hash = BlockHash::from_hex(&hash_hex)
            .map_err(|e| SourceError::Unrecoverable(format!("invalid block hash from node: {e}")))?;
        let height = Height::try_from(count)
            .map_err(|e| SourceError::Unrecoverable(format!("invalid node height {count}: {e}")))?;
        Ok(ChainTip { hash, height })
    }

    async fn get_block(&self, height: Height) -> Result<Option<FullBlock>, SourceError> {
        let hash_hex = match self.get_block_hash(height.value()).await {
            Ok(response) => response.0,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let raw_hex = match self.get_block_raw(&hash_hex).await {
            Ok(response) => response.0,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let raw = hex::decode(&raw_hex)
            .map_err(|e| SourceError::Unrecoverable(format!("invalid block hex from node: {e}")))?;
        let block = FullBlock::from_raw(&raw).map_err(|e| {
            SourceError::Unrecoverable(format!("could not deserialize block {hash_hex}: {e}"))
        })?;
        Ok(Some(block))
    }

    async fn get_tx(&self, txid: &Txid) -> Result<Option<FullTransaction>, SourceError> {
        let raw_hex = match self.get_raw_transaction(&txid.to_string()).await {
            Ok(response) => response.0,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let raw = hex::decode(&raw_hex).map_err(|e| {
            SourceError::Unrecoverable(format!("invalid transaction hex from node: {e}"))
        })?;
        let tx = FullTransaction::from_raw(&raw).map_err(|e| {
            SourceError::Unrecoverable(format!("could not deserialize transaction {txid}: {e}"))
        })?;
        Ok(Some(tx))
    }

    async fn get_mempool_txids(&self) -> Result<Vec<Txid>, SourceError> {
        let txid_strings = self
            .get_raw_mempool()
            .await
            .map_err(|e| SourceError::Transient(format!("could not fetch mempool data: {e}")))?
            .transactions;

        txid_strings
            .into_iter()
            .map(|txid_str| {
                Txid::from_hex(&txid_str).map_err(|e| {
                    SourceError::Unrecoverable(format!("invalid transaction id '{txid_str}': {e}"))
                })
            })
            .collect()
    }

    async fn send_tx(&self, raw_hex: &str) -> Result<Txid, SourceError> {
        match self.send_raw_transaction(raw_hex).await {
            Ok(response) => Txid::from_hex(&response.0).map_err(|e| {
                SourceError::Unrecoverable(format!("invalid txid from node: {e}"))
            }),
            Err(RpcRequestError::Rpc(e)) => Err(SourceError::Rejected {
                code: e.code,
                message: e.message,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Bitcoind pushes no events over JSON-RPC, so the listener is a
    /// polling task watching the best block hash and the mempool txid set.
    async fn event_listener(
        &self,
    ) -> Result<Option<mpsc::Receiver<NodeEvent>>, SourceError> {
        let (sender, receiver) = mpsc::channel(1024);
        let connector = self.clone();

        tokio::spawn(async move {
            let mut best_hash: Option<String> = None;
            let mut seen_txids: std::collections::HashSet<String> =
                std::collections::HashSet::new();
            let mut ticker = tokio::time::interval(EVENT_POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match connector.get_best_block_hash().await {
                    Ok(response) => {
                        let changed = best_hash.as_ref() != Some(&response.0);
                        if changed {
                            best_hash = Some(response.0);
                            if sender.send(NodeEvent::Block).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        debug!("event listener: best block hash poll failed: {e}");
                        continue;
                    }
                }

                match connector.get_raw_mempool().await {
                    Ok(response) => {
                        let current: std::collections::HashSet<String> =
                            response.transactions.into_iter().collect();
                        for txid_str in current.difference(&seen_txids) {
                            if let Ok(txid) = Txid::from_hex(txid_str) {
                                if sender.send(NodeEvent::Tx(txid)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        seen_txids = current;
                    }
                    Err(e) => {
                        debug!("event listener: mempool poll failed: {e}");
                    }
                }
            }
        });

        Ok(Some(receiver))
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct MockState {
        chain: Vec<FullBlock>,
        mempool: Vec<FullTransaction>,
    }

    /// A test-only deterministic implementation of [`BlockchainSource`]
    /// holding an ordered chain by height. The active chain can be
    /// switched wholesale to exercise reorg paths.
    #[derive(Clone)]
    pub(crate) struct MockchainSource {
        state: Arc<Mutex<MockState>>,
    }

    impl MockchainSource {
        /// Creates a source serving `chain`, ordered by ascending height
        /// starting from 0.
        pub(crate) fn new(chain: Vec<FullBlock>) -> Self {
            Self {
                state: Arc::new(Mutex::new(MockState {
                    chain,
                    mempool: Vec::new(),
                })),
            }
        }

        /// Replaces the active chain, simulating a node-side reorg.
        pub(crate) fn switch_chain(&self, chain: Vec<FullBlock>) {
            self.state.lock().unwrap().chain = chain;
        }

        /// Appends a block to the active chain.
        pub(crate) fn mine_block(&self, block: FullBlock) {
            self.state.lock().unwrap().chain.push(block);
        }

        /// Replaces the mempool contents.
        pub(crate) fn set_mempool(&self, mempool: Vec<FullTransaction>) {
            self.state.lock().unwrap().mempool = mempool;
        }

        /// Adds a transaction to the mempool.
        pub(crate) fn push_mempool(&self, tx: FullTransaction) {
            self.state.lock().unwrap().mempool.push(tx);
        }
    }

    #[async_trait]
    impl BlockchainSource for MockchainSource {
        async fn get_latest(&self) -> Result<ChainTip, SourceError> {
            let state = self.state.lock().unwrap();
            let tip = state
                .chain
                .last()
                .ok_or_else(|| SourceError::Unrecoverable("mock chain is empty".to_string()))?;
            let height = Height::try_from((state.chain.len() - 1) as u32)
                .map_err(|e| SourceError::Unrecoverable(e.to_string()))?;
            Ok(ChainTip {
                hash: BlockHash::from(tip.hash()),
                height,
            })
        }

        async fn get_block(&self, height: Height) -> Result<Option<FullBlock>, SourceError> {
            let state = self.state.lock().unwrap();
            Ok(state.chain.get(height.value() as usize).cloned())
        }

        async fn get_tx(&self, txid: &Txid) -> Result<Option<FullTransaction>, SourceError> {
            let target: [u8; 32] = (*txid).into();
            let state = self.state.lock().unwrap();
            let found = state
                .mempool
                .iter()
                .chain(state.chain.iter().flat_map(|block| block.transactions()))
                .find(|tx| *tx.txid() == target)
                .cloned();
            Ok(found)
        }

        async fn get_mempool_txids(&self) -> Result<Vec<Txid>, SourceError> {
            let state = self.state.lock().unwrap();
            Ok(state
                .mempool
                .iter()
                .map(|tx| Txid::from(*tx.txid()))
                .collect())
        }

        async fn send_tx(&self, raw_hex: &str) -> Result<Txid, SourceError> {
            let raw = hex::decode(raw_hex)
                .map_err(|e| SourceError::Rejected {
                    code: -22,
                    message: format!("TX decode failed: {e}"),
                })?;
            let tx = FullTransaction::from_raw(&raw).map_err(|e| SourceError::Rejected {
                code: -22,
                message: format!("TX decode failed: {e}"),
            })?;
            let txid = Txid::from(*tx.txid());
            self.push_mempool(tx);
            Ok(txid)
        }

        async fn event_listener(
            &self,
        ) -> Result<Option<mpsc::Receiver<NodeEvent>>, SourceError> {
            Ok(None)
        }
    }
}
