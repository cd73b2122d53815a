//! Storage interface for the indexer.
//!
//! The relational backend is an external collaborator; the indexer drives
//! it through these traits. Every mutation happens inside a
//! [`StoreTransaction`], which commits-or-rolls-back on all exit paths:
//! committing returns the queued events for post-commit delivery, and
//! dropping the transaction without committing discards writes and events
//! together.
//!
//! [`mem::MemStore`] is the bundled engine used by the daemon and tests.

pub mod mem;

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;

use crate::{
    error::StoreError,
    events::Event,
    types::{Address, BlockHash, ChainTip, Height, Txid},
};

pub use mem::MemStore;

/// One confirmed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRow {
    /// Height of the block; strictly increasing without gaps.
    pub height: Height,
    /// Hash of the block.
    pub hash: BlockHash,
    /// The 80-byte serialized header.
    pub header: [u8; 80],
    /// Txids of the block's transactions, in block order.
    pub txids: Vec<Txid>,
}

/// One known transaction, confirmed or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRow {
    /// The transaction id.
    pub txid: Txid,
    /// The complete raw transaction.
    pub raw: Vec<u8>,
    /// Containing block height; None while unconfirmed.
    pub height: Option<Height>,
}

/// One per-address ledger entry for a transaction output.
///
/// The row is keyed by `(address, txid, output_index)` and mutated in
/// place when the output is spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRow {
    /// Address the output pays to.
    pub address: Address,
    /// Txid of the transaction holding the output.
    pub txid: Txid,
    /// Index of the output within its transaction.
    pub output_index: u32,
    /// Output value in satoshis.
    pub value: u64,
    /// The locking script.
    pub script: Vec<u8>,
    /// Height of the producing transaction; None while unconfirmed.
    pub height: Option<Height>,
    /// Txid of the spending transaction, once spent.
    pub input_txid: Option<Txid>,
    /// Height of the spending transaction; None while the spender is
    /// unconfirmed or the output unspent.
    pub input_height: Option<Height>,
}

/// Colored-coin scan bookkeeping for one transaction.
///
/// `blockhash` and `height` are either both set (scanned as confirmed) or
/// both None (scanned as unconfirmed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorScanRow {
    /// The scanned transaction.
    pub txid: Txid,
    /// Hash of the block the tx was scanned under, if confirmed.
    pub blockhash: Option<BlockHash>,
    /// Height of that block, if confirmed.
    pub height: Option<Height>,
}

/// Read access to the index outside a transaction.
#[async_trait]
pub trait IndexStore: Send + Sync + 'static {
    /// The transaction type of this backend.
    type Tx: StoreTransaction;

    /// Opens a transaction. Writers are serialized; the transaction sees a
    /// stable snapshot.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// The stored chain tip, derived from the max-height block row.
    async fn chain_tip(&self) -> Result<Option<ChainTip>, StoreError>;

    /// The block row at a height.
    async fn block_at(&self, height: Height) -> Result<Option<BlockRow>, StoreError>;

    /// The transaction row for a txid.
    async fn tx_row(&self, txid: &Txid) -> Result<Option<TxRow>, StoreError>;

    /// All unconfirmed txids.
    async fn unconfirmed_txids(&self) -> Result<HashSet<Txid>, StoreError>;

    /// All history rows for an address, for lookups and tests.
    async fn history_for_address(&self, address: &Address) -> Result<Vec<HistoryRow>, StoreError>;

    /// The color-scan row for a txid.
    async fn color_scan_row(&self, txid: &Txid) -> Result<Option<ColorScanRow>, StoreError>;

    /// The rescanner's frontier: the max-height confirmed color-scan row.
    async fn color_scan_tip(&self) -> Result<Option<ChainTip>, StoreError>;

    /// The block hash the rescanner recorded at a height, if any.
    async fn color_block_hash(&self, height: Height) -> Result<Option<BlockHash>, StoreError>;

    /// All txids scanned as unconfirmed.
    async fn color_unconfirmed_txids(&self) -> Result<HashSet<Txid>, StoreError>;
}

/// An open storage transaction: reads see the snapshot plus this
/// transaction's own writes.
#[async_trait]
pub trait StoreTransaction: Send {
    // ── chain ────────────────────────────────────────────────────────────

    /// The chain tip as seen by this transaction.
    async fn chain_tip(&mut self) -> Result<Option<ChainTip>, StoreError>;

    /// The block row at a height.
    async fn block_at(&mut self, height: Height) -> Result<Option<BlockRow>, StoreError>;

    /// Inserts (or replaces) a block row.
    async fn insert_block(&mut self, row: BlockRow) -> Result<(), StoreError>;

    /// All block rows with height strictly above `height` (all rows when
    /// None), ascending.
    async fn blocks_above(&mut self, height: Option<Height>) -> Result<Vec<BlockRow>, StoreError>;

    /// Deletes all block rows with height strictly above `height` (all
    /// rows when None).
    async fn delete_blocks_above(&mut self, height: Option<Height>) -> Result<(), StoreError>;

    // ── transactions ─────────────────────────────────────────────────────

    /// The transaction row for a txid.
    async fn tx_row(&mut self, txid: &Txid) -> Result<Option<TxRow>, StoreError>;

    /// The subset of `txids` that exist as transaction rows.
    async fn filter_existing(&mut self, txids: &BTreeSet<Txid>)
        -> Result<HashSet<Txid>, StoreError>;

    /// Inserts a transaction row. Fails if the txid already exists.
    async fn insert_tx(&mut self, row: TxRow) -> Result<(), StoreError>;

    /// Sets the height of an existing transaction row.
    async fn confirm_tx(&mut self, txid: &Txid, height: Height) -> Result<(), StoreError>;

    /// Sets `height = NULL` on all transaction rows with height strictly
    /// above `height` (all confirmed rows when None).
    async fn unconfirm_txs_above(&mut self, height: Option<Height>) -> Result<(), StoreError>;

    /// Deletes a transaction row.
    async fn delete_tx(&mut self, txid: &Txid) -> Result<(), StoreError>;

    // ── history ──────────────────────────────────────────────────────────

    /// Inserts (or replaces) a history row.
    async fn insert_history(&mut self, row: HistoryRow) -> Result<(), StoreError>;

    /// Sets `height` on every history row produced by `producer`,
    /// returning the addresses of the touched rows.
    async fn confirm_history_of(
        &mut self,
        producer: &Txid,
        height: Height,
    ) -> Result<Vec<Address>, StoreError>;

    /// Records `spender` (at `height`, None while unconfirmed) on the
    /// history rows of output `(prev_txid, prev_index)`, returning the
    /// addresses of the touched rows. An output with no history rows
    /// yields an empty set.
    async fn mark_spent(
        &mut self,
        prev_txid: &Txid,
        prev_index: u32,
        spender: &Txid,
        height: Option<Height>,
    ) -> Result<Vec<Address>, StoreError>;

    /// Upgrades `input_height` on every history row spent by `spender`,
    /// returning the addresses of the touched rows.
    async fn confirm_inputs_of(
        &mut self,
        spender: &Txid,
        height: Height,
    ) -> Result<Vec<Address>, StoreError>;

    /// Sets `height = NULL` on all history rows with producer height
    /// strictly above `height` (all confirmed rows when None).
    async fn unconfirm_history_above(&mut self, height: Option<Height>) -> Result<(), StoreError>;

    /// Sets `input_height = NULL` on all history rows with input height
    /// strictly above `height` (all rows with an input height when None).
    async fn unconfirm_inputs_above(&mut self, height: Option<Height>) -> Result<(), StoreError>;

    /// Deletes the unconfirmed history rows produced by `producer`.
    async fn delete_unconfirmed_history_of(&mut self, producer: &Txid) -> Result<(), StoreError>;

    /// Clears `input_txid` and `input_height` on every history row spent
    /// by `spender`.
    async fn clear_inputs_of(&mut self, spender: &Txid) -> Result<(), StoreError>;

    // ── colored-coin scan table ──────────────────────────────────────────

    /// The color-scan row for a txid.
    async fn color_scan_row(&mut self, txid: &Txid) -> Result<Option<ColorScanRow>, StoreError>;

    /// Inserts (or replaces) a color-scan row.
    async fn insert_color_scan(&mut self, row: ColorScanRow) -> Result<(), StoreError>;

    /// Marks the given txids as scanned under `(hash, height)` in one
    /// statement.
    async fn confirm_color_scans(
        &mut self,
        txids: &[Txid],
        hash: BlockHash,
        height: Height,
    ) -> Result<(), StoreError>;

    /// Sets `blockhash = NULL, height = NULL` on all color-scan rows with
    /// height strictly above `height`.
    async fn unconfirm_color_above(&mut self, height: Option<Height>) -> Result<(), StoreError>;

    /// Deletes a color-scan row.
    async fn delete_color_scan(&mut self, txid: &Txid) -> Result<(), StoreError>;

    // ── outbox ───────────────────────────────────────────────────────────

    /// Queues an event for delivery iff this transaction commits.
    fn queue_event(&mut self, event: Event);

    /// Commits the transaction, returning the queued events.
    async fn commit(self) -> Result<Vec<Event>, StoreError>;
}
