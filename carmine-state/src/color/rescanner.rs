//! The colored-coin rescanner.
//!
//! Subscribes to the core indexer's change events and keeps the
//! color-scan table in step with it: newly seen transactions are run
//! through every registered definition class, removed transactions have
//! their definitions or color values dropped, and the block frontier is
//! advanced with the same walk-back discipline the core synchronizer uses
//! for reorgs.

use std::sync::Arc;

use carmine_fetch::chain::FullTransaction;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::{
    color::{ColorDefinition, ColorStore},
    error::RescanError,
    events::MessageBus,
    status::{AtomicStatus, StatusType},
    store::{ColorScanRow, IndexStore, StoreTransaction},
    types::{Height, Txid},
};

/// Outcome of scanning one transaction into the color-scan table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddOutcome {
    /// The transaction was scanned and recorded.
    Added,
    /// A color-scan row for this txid already exists.
    AlreadyPresent,
}

/// Maintains the color-scan table against the core index.
///
/// `add_txs`, `remove_txs` and the block-frontier update share one mutex:
/// at most one of them runs at a time. Frontier updates additionally fold
/// concurrent invocations into the in-flight pass.
pub struct ColorRescanner<S: IndexStore> {
    inner: Arc<RescanInner<S>>,
}

impl<S: IndexStore> Clone for ColorRescanner<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RescanInner<S> {
    store: S,
    colors: Arc<dyn ColorStore>,
    definitions: Vec<Arc<dyn ColorDefinition>>,
    gate: Mutex<()>,
    update_flight: std::sync::Mutex<Option<Shared<BoxFuture<'static, ()>>>>,
    status: AtomicStatus,
}

impl<S: IndexStore> ColorRescanner<S> {
    /// Creates a rescanner over the given core store, color storage and
    /// definition classes.
    pub fn new(
        store: S,
        colors: Arc<dyn ColorStore>,
        definitions: Vec<Arc<dyn ColorDefinition>>,
    ) -> Self {
        Self {
            inner: Arc::new(RescanInner {
                store,
                colors,
                definitions,
                gate: Mutex::new(()),
                update_flight: std::sync::Mutex::new(None),
                status: AtomicStatus::new(StatusType::Spawning),
            }),
        }
    }

    /// The rescanner's current status.
    pub fn status(&self) -> StatusType {
        self.inner.status.load()
    }

    /// Spawns the bus listener driving this rescanner off the core
    /// indexer's events.
    pub fn start_listener(&self, bus: &Arc<dyn MessageBus>) -> tokio::task::JoinHandle<()> {
        let mut addtx = bus.listen("addtx");
        let mut removetx = bus.listen("removetx");
        let mut addblock = bus.listen("addblock");
        let mut removeblock = bus.listen("removeblock");
        let this = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    payload = addtx.recv() => match payload {
                        Some(payload) => this.on_tx_event(payload, true).await,
                        None => break,
                    },
                    payload = removetx.recv() => match payload {
                        Some(payload) => this.on_tx_event(payload, false).await,
                        None => break,
                    },
                    payload = addblock.recv() => match payload {
                        Some(_) => this.update_blocks().await,
                        None => break,
                    },
                    payload = removeblock.recv() => match payload {
                        Some(_) => this.update_blocks().await,
                        None => break,
                    },
                }
            }
        })
    }

    async fn on_tx_event(&self, payload: serde_json::Value, added: bool) {
        let unconfirmed = payload["unconfirmed"].as_bool().unwrap_or(false);
        let txid = payload["txid"]
            .as_str()
            .and_then(|hex_str| Txid::from_hex(hex_str).ok());
        let Some(txid) = txid else {
            warn!("malformed tx event payload: {payload}");
            return;
        };

        if !unconfirmed {
            // Confirmed changes are handled through the block frontier.
            self.update_blocks().await;
        } else if added {
            self.add_txs(vec![txid]).await;
        } else {
            self.remove_txs(vec![txid]).await;
        }
    }

    /// Scans the given transactions as unconfirmed. Per-tx errors are
    /// logged and do not abort sibling work.
    pub async fn add_txs(&self, txids: Vec<Txid>) {
        let _gate = self.inner.gate.lock().await;
        for txid in txids {
            if let Err(e) = self.add_tx_inner(&txid).await {
                error!("color scan of transaction {txid} failed: {e}");
            }
        }
    }

    /// Removes the given transactions from the color-scan table along
    /// with their definitions or color values. Per-tx errors are logged
    /// and do not abort sibling work.
    pub async fn remove_txs(&self, txids: Vec<Txid>) {
        let _gate = self.inner.gate.lock().await;
        for txid in txids {
            if let Err(e) = self.remove_tx_inner(&txid).await {
                error!("color unscan of transaction {txid} failed: {e}");
            }
        }
    }

    /// Advances the rescanner's block frontier to the core indexer's tip,
    /// unwinding scanned blocks the core chain no longer contains.
    /// Concurrent invocations share the in-flight pass.
    pub async fn update_blocks(&self) {
        let pass = {
            let mut flight = self
                .inner
                .update_flight
                .lock()
                .expect("update flight state poisoned");
            match flight.as_ref() {
                Some(shared) if shared.peek().is_none() => shared.clone(),
                _ => {
                    let this = self.clone();
                    let shared = async move { this.update_pass().await }.boxed().shared();
                    *flight = Some(shared.clone());
                    shared
                }
            }
        };
        pass.await
    }

    async fn update_pass(&self) {
        let _gate = self.inner.gate.lock().await;
        self.inner.status.store(StatusType::Syncing);

        loop {
            match self.update_step().await {
                Ok(true) => break,
                Ok(false) => continue,
                Err(e) => {
                    error!("color frontier update failed: {e}");
                    self.inner.status.store(StatusType::RecoverableError);
                    return;
                }
            }
        }

        if let Err(e) = self.reconcile_unconfirmed().await {
            error!("color unconfirmed reconciliation failed: {e}");
            self.inner.status.store(StatusType::RecoverableError);
            return;
        }

        self.inner.status.store(StatusType::Ready);
    }

    /// One frontier step. Returns true when the rescanner is caught up.
    async fn update_step(&self) -> Result<bool, RescanError> {
        let scanned = self.inner.store.color_scan_tip().await?;
        let core = self.inner.store.chain_tip().await?;

        match (scanned, core) {
            (None, None) => return Ok(true),
            (Some(scanned_tip), Some(core_tip)) if scanned_tip == core_tip => return Ok(true),
            _ => {}
        }

        // Establish the rollback point: the highest scanned height whose
        // recorded block hash still lies on the core chain.
        let mut rollback: Option<Height> = None;
        if let Some(scanned_tip) = scanned {
            let diverged = match core {
                None => true,
                Some(core_tip) => {
                    scanned_tip.height >= core_tip.height
                        || self
                            .inner
                            .store
                            .block_at(scanned_tip.height)
                            .await?
                            .map(|row| row.hash)
                            != Some(scanned_tip.hash)
                }
            };

            if !diverged {
                rollback = Some(scanned_tip.height);
            } else {
                let mut walk = Some(scanned_tip.height);
                while let Some(height) = walk {
                    let recorded = self.inner.store.color_block_hash(height).await?;
                    let on_chain = self
                        .inner
                        .store
                        .block_at(height)
                        .await?
                        .map(|row| row.hash);
                    if recorded.is_some() && recorded == on_chain {
                        rollback = Some(height);
                        break;
                    }
                    walk = height.prev();
                }

                if rollback.map_or(true, |height| height < scanned_tip.height) {
                    let mut tx = self.inner.store.begin().await?;
                    tx.unconfirm_color_above(rollback).await?;
                    tx.commit().await?;
                }
            }
        }

        // Advance one block past the rollback point.
        let Some(core_tip) = core else {
            return Ok(true);
        };
        let next = match rollback {
            Some(height) => height + 1,
            None => Height::ZERO,
        };
        if next > core_tip.height {
            return Ok(true);
        }
        let block = self
            .inner
            .store
            .block_at(next)
            .await?
            .ok_or_else(|| RescanError::MissingData(format!("core block at height {next}")))?;

        let mut scanned_txids = Vec::new();
        for txid in &block.txids {
            match self.add_tx_inner(txid).await {
                Ok(AddOutcome::Added | AddOutcome::AlreadyPresent) => scanned_txids.push(*txid),
                Err(e) => error!("color scan of block transaction {txid} failed: {e}"),
            }
        }

        let mut tx = self.inner.store.begin().await?;
        tx.confirm_color_scans(&scanned_txids, block.hash, next)
            .await?;
        tx.commit().await?;

        Ok(false)
    }

    /// Aligns the unconfirmed side of the color-scan table with the core
    /// unconfirmed transaction set.
    async fn reconcile_unconfirmed(&self) -> Result<(), RescanError> {
        let color_unconfirmed = self.inner.store.color_unconfirmed_txids().await?;
        let core_unconfirmed = self.inner.store.unconfirmed_txids().await?;

        for txid in color_unconfirmed.difference(&core_unconfirmed) {
            if let Err(e) = self.remove_tx_inner(txid).await {
                error!("color unscan of transaction {txid} failed: {e}");
            }
        }
        for txid in core_unconfirmed.difference(&color_unconfirmed) {
            if let Err(e) = self.add_tx_inner(txid).await {
                error!("color scan of transaction {txid} failed: {e}");
            }
        }
        Ok(())
    }

    async fn add_tx_inner(&self, txid: &Txid) -> Result<AddOutcome, RescanError> {
        if self.inner.store.color_scan_row(txid).await?.is_some() {
            return Ok(AddOutcome::AlreadyPresent);
        }

        let row = self
            .inner
            .store
            .tx_row(txid)
            .await?
            .ok_or_else(|| RescanError::MissingData(format!("transaction row {txid}")))?;
        let ftx = FullTransaction::from_raw(&row.raw)?;

        for definition in &self.inner.definitions {
            if let Err(e) = definition
                .full_scan_tx(&ftx, self.inner.colors.as_ref(), &self.inner.store)
                .await
            {
                error!(
                    "color definition {} failed on transaction {txid}: {e}",
                    definition.code()
                );
            }
        }

        let mut tx = self.inner.store.begin().await?;
        tx.insert_color_scan(ColorScanRow {
            txid: *txid,
            blockhash: None,
            height: None,
        })
        .await?;
        tx.commit().await?;
        Ok(AddOutcome::Added)
    }

    async fn remove_tx_inner(&self, txid: &Txid) -> Result<(), RescanError> {
        if self.inner.store.color_scan_row(txid).await?.is_none() {
            return Ok(());
        }

        for definition in &self.inner.definitions {
            let registered = self.inner.colors.definitions(definition.code()).await?;
            match registered
                .iter()
                .find(|(_, descriptor)| definition.genesis_id_matches(descriptor, txid))
            {
                Some((id, _)) => self.inner.colors.drop_definition(*id).await?,
                None => {
                    self.inner
                        .colors
                        .remove_color_values(txid, definition.code())
                        .await?
                }
            }
        }

        let mut tx = self.inner.store.begin().await?;
        tx.delete_color_scan(txid).await?;
        tx.commit().await?;
        Ok(())
    }
}
