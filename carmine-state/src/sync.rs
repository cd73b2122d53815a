//! The chain synchronizer: advances the stored tip toward the node's tip,
//! detects and rolls back reorgs, imports unconfirmed transactions through
//! the orphan pool, and reconciles the stored mempool against the node's.

pub mod block_import;
pub mod lock;
pub mod orphans;
pub mod tx_import;


use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    config::SyncConfig,
    error::SyncError,
    events::{normalize_message, Event, EventPublisher, SendTxStatus},
    source::{BlockchainSource, NodeEvent, SourceError},
    status::{AtomicStatus, StatusType},
    store::{IndexStore, StoreTransaction},
    sync::{
        block_import::BlockImporter,
        lock::KeyedLock,
        orphans::OrphanPool,
        tx_import::{TxImport, TxImporter},
    },
    types::{BlockHash, ChainTip, Height, Txid},
};

use carmine_common::Network;
use carmine_fetch::chain::FullBlock;

/// The top-level synchronizer state machine.
///
/// Cheap to clone; clones share one sync state. The block-import pass is
/// serialized at concurrency one: concurrent invocations of
/// [`ChainSync::run_block_import`] fold into the in-flight pass and
/// complete when it completes.
pub struct ChainSync<S: IndexStore, N: BlockchainSource> {
    inner: Arc<SyncInner<S, N>>,
}

impl<S: IndexStore, N: BlockchainSource> Clone for ChainSync<S, N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SyncInner<S, N> {
    source: N,
    store: S,
    publisher: EventPublisher,
    lock: KeyedLock,
    orphans: Mutex<OrphanPool>,
    /// The chain cursor. Written only by the serialized import pass.
    latest: Mutex<Option<ChainTip>>,
    import_flight: std::sync::Mutex<Option<Shared<BoxFuture<'static, ()>>>>,
    status: AtomicStatus,
    config: SyncConfig,
    network: Network,
}

impl<S: IndexStore, N: BlockchainSource> ChainSync<S, N> {
    /// Creates a synchronizer over the given source, store and publisher.
    pub fn new(
        source: N,
        store: S,
        publisher: EventPublisher,
        network: Network,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                source,
                store,
                publisher,
                lock: KeyedLock::new(),
                orphans: Mutex::new(OrphanPool::new()),
                latest: Mutex::new(None),
                import_flight: std::sync::Mutex::new(None),
                status: AtomicStatus::new(StatusType::Spawning),
                config,
                network,
            }),
        }
    }

    /// The synchronizer's current status.
    pub fn status(&self) -> StatusType {
        self.inner.status.load()
    }

    /// The stored chain tip as last seen by the import pass.
    pub async fn stored_tip(&self) -> Option<ChainTip> {
        *self.inner.latest.lock().await
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    #[cfg(test)]
    pub(crate) fn orphans(&self) -> &Mutex<OrphanPool> {
        &self.inner.orphans
    }

    /// Spawns the long-running event loop.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.serve().await })
    }

    /// Consumes node events, driving imports; falls back to polling when
    /// the source pushes no events.
    pub async fn serve(&self) {
        let mut listener = match self.inner.source.event_listener().await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("node event listener unavailable, polling only: {e}");
                None
            }
        };
        let mut ticker = tokio::time::interval(self.inner.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        self.run_block_import().await;

        loop {
            let mut listener_closed = false;
            if let Some(receiver) = listener.as_mut() {
                tokio::select! {
                    event = receiver.recv() => match event {
                        Some(NodeEvent::Tx(txid)) => {
                            let this = self.clone();
                            tokio::spawn(async move { this.run_tx_import(txid).await });
                        }
                        Some(NodeEvent::Block) => {
                            let this = self.clone();
                            tokio::spawn(async move { this.run_block_import().await });
                        }
                        None => listener_closed = true,
                    },
                    _ = ticker.tick() => {
                        self.run_block_import().await;
                    }
                }
            } else {
                ticker.tick().await;
                self.run_block_import().await;
            }
            if listener_closed {
                warn!("node event listener closed, falling back to polling");
                listener = None;
            }
        }
    }

    /// Runs one full block-import pass: chain advance, then mempool
    /// reconciliation. Concurrent invocations share the in-flight pass.
    pub async fn run_block_import(&self) {
        let pass = {
            let mut flight = self
                .inner
                .import_flight
                .lock()
                .expect("import flight state poisoned");
            match flight.as_ref() {
                Some(shared) if shared.peek().is_none() => shared.clone(),
                _ => {
                    let this = self.clone();
                    let shared = async move { this.block_import_pass().await }.boxed().shared();
                    *flight = Some(shared.clone());
                    shared
                }
            }
        };
        pass.await
    }

    async fn block_import_pass(&self) {
        self.inner.status.store(StatusType::Syncing);

        loop {
            match self.advance_chain().await {
                Ok(()) => break,
                Err(e) => {
                    warn!("chain advance failed, refreshing stored tip: {e}");
                    self.inner.status.store(StatusType::RecoverableError);
                    self.refresh_tip_with_backoff().await;
                    self.inner.status.store(StatusType::Syncing);
                }
            }
        }

        loop {
            match self.reconcile_mempool().await {
                Ok(()) => break,
                Err(e) => {
                    warn!("mempool reconciliation failed, retrying: {e}");
                    tokio::time::sleep(self.inner.config.mempool_retry_delay).await;
                }
            }
        }

        self.inner.status.store(StatusType::Ready);

        let tip = *self.inner.latest.lock().await;
        let status = match tip {
            Some(tip) => json!({
                "blockhash": tip.hash.to_string(),
                "height": tip.height.value(),
            }),
            None => json!({ "blockhash": null, "height": null }),
        };
        if let Err(e) = self.inner.publisher.publish(Event::Status(status)).await {
            warn!("failed to publish status: {e}");
        }
    }

    /// Advances the stored chain until its tip hash matches the node's,
    /// rolling back past any fork encountered on the way.
    async fn advance_chain(&self) -> Result<(), SyncError> {
        let mut stored = self.inner.store.chain_tip().await?;
        *self.inner.latest.lock().await = stored;
        let mut node_latest = self.inner.source.get_latest().await?;

        while stored.map(|tip| tip.hash) != Some(node_latest.hash) {
            // Find the fork point: walk the stored chain back while
            // downloading the node's candidate for the next height.
            let mut local = stored;
            let candidate = loop {
                let next_height = match local {
                    Some(tip) => tip.height + 1,
                    None => Height::ZERO,
                };
                let candidate = self.inner.source.get_block(next_height).await?;

                if let Some(candidate) = &candidate {
                    let extends = match local {
                        Some(tip) => BlockHash::from(*candidate.header().prev_hash()) == tip.hash,
                        None => true,
                    };
                    if extends {
                        break candidate.clone();
                    }
                }

                local = match local {
                    Some(tip) => match tip.height.prev() {
                        Some(prev_height) => {
                            let row = self
                                .inner
                                .store
                                .block_at(prev_height)
                                .await?
                                .ok_or_else(|| {
                                    SyncError::Inconsistent(format!(
                                        "stored chain has no block at height {prev_height}"
                                    ))
                                })?;
                            Some(ChainTip {
                                hash: row.hash,
                                height: row.height,
                            })
                        }
                        None => None,
                    },
                    None => {
                        return Err(SyncError::Inconsistent(
                            "node serves no genesis block for its advertised chain".to_string(),
                        ))
                    }
                };
            };

            let fork = local.map(|tip| tip.height);
            let import_height = match fork {
                Some(height) => height + 1,
                None => Height::ZERO,
            };

            if local.map(|tip| tip.hash) != stored.map(|tip| tip.hash) {
                info!(
                    "reorg detected, rolling back to height {}",
                    fork.map(|h| h.to_string()).unwrap_or_else(|| "-1".to_string())
                );
                self.rollback_above(fork).await?;
                stored = self.inner.store.chain_tip().await?;
                *self.inner.latest.lock().await = stored;
            }

            let candidate_hash = BlockHash::from(candidate.hash());
            self.import_block(&candidate, import_height).await?;
            stored = Some(ChainTip {
                hash: candidate_hash,
                height: import_height,
            });
            *self.inner.latest.lock().await = stored;

            for txid in candidate.txids() {
                self.resolve_and_schedule(Txid::from(txid)).await;
            }

            if node_latest.height == import_height {
                node_latest = self.inner.source.get_latest().await?;
            }
        }

        Ok(())
    }

    /// Imports one block that extends the stored tip, in a single storage
    /// transaction under the keyed lock on its txids and parent txids.
    async fn import_block(&self, block: &FullBlock, height: Height) -> Result<(), SyncError> {
        let mut keys: BTreeSet<Txid> = block.txids().into_iter().map(Txid::from).collect();
        for ftx in block.transactions() {
            keys.extend(ftx.parent_txids().into_iter().map(Txid::from));
        }
        let _guard = self.inner.lock.lock_keys(keys).await;

        let mut tx = self.inner.store.begin().await?;
        BlockImporter {
            network: self.inner.network,
        }
        .import(&mut tx, block, height)
        .await?;
        self.inner.publisher.commit_and_publish(tx).await?;
        Ok(())
    }

    /// Rolls back every row above the fork height in one storage
    /// transaction, under the global-exclusive lock. A `None` fork rolls
    /// back to the empty chain.
    async fn rollback_above(&self, fork: Option<Height>) -> Result<(), SyncError> {
        let _guard = self.inner.lock.lock_exclusive().await;

        let mut tx = self.inner.store.begin().await?;
        let removed = tx.blocks_above(fork).await?;
        for row in removed.iter().rev() {
            tx.queue_event(Event::RemoveBlock { hash: row.hash });
        }
        tx.delete_blocks_above(fork).await?;
        tx.unconfirm_txs_above(fork).await?;
        tx.unconfirm_history_above(fork).await?;
        tx.unconfirm_inputs_above(fork).await?;
        self.inner.publisher.commit_and_publish(tx).await?;
        Ok(())
    }

    /// Re-reads the stored tip, retrying until storage answers.
    async fn refresh_tip_with_backoff(&self) {
        loop {
            match self.inner.store.chain_tip().await {
                Ok(tip) => {
                    *self.inner.latest.lock().await = tip;
                    return;
                }
                Err(e) => {
                    warn!("could not refresh stored tip: {e}");
                    tokio::time::sleep(self.inner.config.tip_refresh_backoff).await;
                }
            }
        }
    }

    /// Reconciles the stored unconfirmed set against the node's mempool:
    /// transactions the node dropped are deleted in one transaction, new
    /// mempool txids are scheduled for import without blocking the pass.
    async fn reconcile_mempool(&self) -> Result<(), SyncError> {
        let node_mempool: HashSet<Txid> =
            self.inner.source.get_mempool_txids().await?.into_iter().collect();
        let stored_unconfirmed = self.inner.store.unconfirmed_txids().await?;

        let to_remove: BTreeSet<Txid> = stored_unconfirmed
            .difference(&node_mempool)
            .copied()
            .collect();
        if !to_remove.is_empty() {
            let _guard = self.inner.lock.lock_keys(to_remove.clone()).await;
            let mut tx = self.inner.store.begin().await?;
            for txid in &to_remove {
                tx.delete_unconfirmed_history_of(txid).await?;
                tx.clear_inputs_of(txid).await?;
                tx.delete_tx(txid).await?;
                tx.queue_event(Event::RemoveTx {
                    txid: *txid,
                    unconfirmed: true,
                });
            }
            self.inner.publisher.commit_and_publish(tx).await?;
        }

        for txid in node_mempool.difference(&stored_unconfirmed) {
            let this = self.clone();
            let txid = *txid;
            tokio::spawn(async move { this.run_tx_import(txid).await });
        }

        Ok(())
    }

    /// Fetches and imports one unconfirmed transaction, then walks the
    /// orphan pool importing every child the new row resolved. Per-item
    /// failures are logged so sibling imports continue.
    pub async fn run_tx_import(&self, txid: Txid) {
        let mut pending = VecDeque::from([txid]);
        while let Some(next) = pending.pop_front() {
            match self.import_one_tx(next).await {
                Ok(TxImport::Imported) => {
                    let resolved = self.inner.orphans.lock().await.resolve(&next);
                    pending.extend(resolved);
                }
                Ok(TxImport::AlreadyPresent) => {}
                Ok(TxImport::Deferred(missing)) => {
                    info!(
                        "transaction {next} deferred on {} missing parent(s)",
                        missing.len()
                    );
                }
                Err(e) => warn!("import of transaction {next} failed: {e}"),
            }
        }
    }

    async fn import_one_tx(&self, txid: Txid) -> Result<TxImport, SyncError> {
        let ftx = self
            .inner
            .source
            .get_tx(&txid)
            .await?
            .ok_or(SyncError::TxNotFound(txid))?;
        let importer = TxImporter {
            store: &self.inner.store,
            lock: &self.inner.lock,
            publisher: &self.inner.publisher,
            orphans: &self.inner.orphans,
            network: self.inner.network,
        };
        importer.import(&ftx).await
    }

    /// Resolves orphans waiting on `txid` and schedules their imports
    /// without blocking the caller.
    async fn resolve_and_schedule(&self, txid: Txid) {
        let resolved = self.inner.orphans.lock().await.resolve(&txid);
        for child in resolved {
            let this = self.clone();
            tokio::spawn(async move { this.run_tx_import(child).await });
        }
    }

    /// Forwards a raw transaction to the node and publishes the outcome as
    /// a `sendtxresponse` event.
    pub async fn submit_transaction(&self, id: impl Into<String>, raw_hex: &str) {
        let id = id.into();
        let event = match self.inner.source.send_tx(raw_hex).await {
            Ok(_) => Event::SendTxResponse {
                id,
                status: SendTxStatus::Success,
                code: None,
                message: None,
            },
            Err(SourceError::Rejected { code, message }) => Event::SendTxResponse {
                id,
                status: SendTxStatus::Fail,
                code: Some(code),
                message: Some(normalize_message(&message)),
            },
            Err(e) => Event::SendTxResponse {
                id,
                status: SendTxStatus::Fail,
                code: None,
                message: Some(normalize_message(&e.to_string())),
            },
        };
        if let Err(e) = self.inner.publisher.publish(event).await {
            warn!("failed to publish sendtxresponse: {e}");
        }
    }
}
