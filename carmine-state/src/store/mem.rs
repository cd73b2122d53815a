//! In-memory storage engine.
//!
//! Transactions take the writer lock for their whole lifetime and work on
//! a copy of the tables, which replaces the shared state on commit. That
//! gives the serializable commit-or-rollback semantics the importers rely
//! on without a relational backend in the process.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::StoreError,
    events::Event,
    store::{BlockRow, ColorScanRow, HistoryRow, IndexStore, StoreTransaction, TxRow},
    types::{Address, BlockHash, ChainTip, Height, Txid},
};

/// True when `value` is a height strictly above `bound`, treating a None
/// bound as "below everything" and a None value as "no height".
fn above(value: Option<Height>, bound: Option<Height>) -> bool {
    match (value, bound) {
        (Some(v), Some(b)) => v > b,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Tables {
    pub(crate) blocks: BTreeMap<Height, BlockRow>,
    pub(crate) txs: HashMap<Txid, TxRow>,
    pub(crate) history: BTreeMap<(Address, Txid, u32), HistoryRow>,
    pub(crate) color: HashMap<Txid, ColorScanRow>,
}

impl Tables {
    fn chain_tip(&self) -> Option<ChainTip> {
        self.blocks.last_key_value().map(|(height, row)| ChainTip {
            hash: row.hash,
            height: *height,
        })
    }

    fn unconfirmed_txids(&self) -> HashSet<Txid> {
        self.txs
            .values()
            .filter(|row| row.height.is_none())
            .map(|row| row.txid)
            .collect()
    }

    fn color_scan_tip(&self) -> Option<ChainTip> {
        self.color
            .values()
            .filter_map(|row| match (row.blockhash, row.height) {
                (Some(hash), Some(height)) => Some(ChainTip { hash, height }),
                _ => None,
            })
            .max_by_key(|tip| tip.height)
    }

    fn color_block_hash(&self, height: Height) -> Option<BlockHash> {
        self.color
            .values()
            .find(|row| row.height == Some(height))
            .and_then(|row| row.blockhash)
    }

    fn color_unconfirmed_txids(&self) -> HashSet<Txid> {
        self.color
            .values()
            .filter(|row| row.height.is_none())
            .map(|row| row.txid)
            .collect()
    }
}

/// In-memory implementation of [`IndexStore`].
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn tables_snapshot(&self) -> Tables {
        self.inner.lock().await.clone()
    }
}

#[async_trait]
impl IndexStore for MemStore {
    type Tx = MemTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        let work = guard.clone();
        Ok(MemTransaction {
            guard,
            work,
            events: Vec::new(),
        })
    }

    async fn chain_tip(&self) -> Result<Option<ChainTip>, StoreError> {
        Ok(self.inner.lock().await.chain_tip())
    }

    async fn block_at(&self, height: Height) -> Result<Option<BlockRow>, StoreError> {
        Ok(self.inner.lock().await.blocks.get(&height).cloned())
    }

    async fn tx_row(&self, txid: &Txid) -> Result<Option<TxRow>, StoreError> {
        Ok(self.inner.lock().await.txs.get(txid).cloned())
    }

    async fn unconfirmed_txids(&self) -> Result<HashSet<Txid>, StoreError> {
        Ok(self.inner.lock().await.unconfirmed_txids())
    }

    async fn history_for_address(&self, address: &Address) -> Result<Vec<HistoryRow>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .history
            .values()
            .filter(|row| &row.address == address)
            .cloned()
            .collect())
    }

    async fn color_scan_row(&self, txid: &Txid) -> Result<Option<ColorScanRow>, StoreError> {
        Ok(self.inner.lock().await.color.get(txid).cloned())
    }

    async fn color_scan_tip(&self) -> Result<Option<ChainTip>, StoreError> {
        Ok(self.inner.lock().await.color_scan_tip())
    }

    async fn color_block_hash(&self, height: Height) -> Result<Option<BlockHash>, StoreError> {
        Ok(self.inner.lock().await.color_block_hash(height))
    }

    async fn color_unconfirmed_txids(&self) -> Result<HashSet<Txid>, StoreError> {
        Ok(self.inner.lock().await.color_unconfirmed_txids())
    }
}

/// An open [`MemStore`] transaction.
pub struct MemTransaction {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
    events: Vec<Event>,
}

#[async_trait]
impl StoreTransaction for MemTransaction {
    async fn chain_tip(&mut self) -> Result<Option<ChainTip>, StoreError> {
        Ok(self.work.chain_tip())
    }

    async fn block_at(&mut self, height: Height) -> Result<Option<BlockRow>, StoreError> {
        Ok(self.work.blocks.get(&height).cloned())
    }

    async fn insert_block(&mut self, row: BlockRow) -> Result<(), StoreError> {
        self.work.blocks.insert(row.height, row);
        Ok(())
    }

    async fn blocks_above(&mut self, height: Option<Height>) -> Result<Vec<BlockRow>, StoreError> {
        Ok(self
            .work
            .blocks
            .values()
            .filter(|row| above(Some(row.height), height))
            .cloned()
            .collect())
    }

    async fn delete_blocks_above(&mut self, height: Option<Height>) -> Result<(), StoreError> {
        self.work
            .blocks
            .retain(|row_height, _| !above(Some(*row_height), height));
        Ok(())
    }

    async fn tx_row(&mut self, txid: &Txid) -> Result<Option<TxRow>, StoreError> {
        Ok(self.work.txs.get(txid).cloned())
    }

    async fn filter_existing(
        &mut self,
        txids: &BTreeSet<Txid>,
    ) -> Result<HashSet<Txid>, StoreError> {
        Ok(txids
            .iter()
            .filter(|txid| self.work.txs.contains_key(txid))
            .copied()
            .collect())
    }

    async fn insert_tx(&mut self, row: TxRow) -> Result<(), StoreError> {
        if self.work.txs.contains_key(&row.txid) {
            return Err(StoreError::Constraint(format!(
                "transaction row {} already exists",
                row.txid
            )));
        }
        self.work.txs.insert(row.txid, row);
        Ok(())
    }

    async fn confirm_tx(&mut self, txid: &Txid, height: Height) -> Result<(), StoreError> {
        let row = self
            .work
            .txs
            .get_mut(txid)
            .ok_or_else(|| StoreError::MissingData(format!("transaction row {txid}")))?;
        row.height = Some(height);
        Ok(())
    }

    async fn unconfirm_txs_above(&mut self, height: Option<Height>) -> Result<(), StoreError> {
        for row in self.work.txs.values_mut() {
            if above(row.height, height) {
                row.height = None;
            }
        }
        Ok(())
    }

    async fn delete_tx(&mut self, txid: &Txid) -> Result<(), StoreError> {
        self.work.txs.remove(txid);
        Ok(())
    }

    async fn insert_history(&mut self, row: HistoryRow) -> Result<(), StoreError> {
        let key = (row.address.clone(), row.txid, row.output_index);
        self.work.history.insert(key, row);
        Ok(())
    }

    async fn confirm_history_of(
        &mut self,
        producer: &Txid,
        height: Height,
    ) -> Result<Vec<Address>, StoreError> {
        let mut touched = Vec::new();
        for row in self.work.history.values_mut() {
            if &row.txid == producer {
                row.height = Some(height);
                touched.push(row.address.clone());
            }
        }
        Ok(touched)
    }

    async fn mark_spent(
        &mut self,
        prev_txid: &Txid,
        prev_index: u32,
        spender: &Txid,
        height: Option<Height>,
    ) -> Result<Vec<Address>, StoreError> {
        let mut touched = Vec::new();
        for row in self.work.history.values_mut() {
            if &row.txid == prev_txid && row.output_index == prev_index {
                row.input_txid = Some(*spender);
                row.input_height = height;
                touched.push(row.address.clone());
            }
        }
        Ok(touched)
    }

    async fn confirm_inputs_of(
        &mut self,
        spender: &Txid,
        height: Height,
    ) -> Result<Vec<Address>, StoreError> {
        let mut touched = Vec::new();
        for row in self.work.history.values_mut() {
            if row.input_txid.as_ref() == Some(spender) {
                row.input_height = Some(height);
                touched.push(row.address.clone());
            }
        }
        Ok(touched)
    }

    async fn unconfirm_history_above(&mut self, height: Option<Height>) -> Result<(), StoreError> {
        for row in self.work.history.values_mut() {
            if above(row.height, height) {
                row.height = None;
            }
        }
        Ok(())
    }

    async fn unconfirm_inputs_above(&mut self, height: Option<Height>) -> Result<(), StoreError> {
        for row in self.work.history.values_mut() {
            if above(row.input_height, height) {
                row.input_height = None;
            }
        }
        Ok(())
    }

    async fn delete_unconfirmed_history_of(&mut self, producer: &Txid) -> Result<(), StoreError> {
        self.work
            .history
            .retain(|_, row| !(&row.txid == producer && row.height.is_none()));
        Ok(())
    }

    async fn clear_inputs_of(&mut self, spender: &Txid) -> Result<(), StoreError> {
        for row in self.work.history.values_mut() {
            if row.input_txid.as_ref() == Some(spender) {
                row.input_txid = None;
                row.input_height = None;
            }
        }
        Ok(())
    }

    async fn color_scan_row(&mut self, txid: &Txid) -> Result<Option<ColorScanRow>, StoreError> {
        Ok(self.work.color.get(txid).cloned())
    }

    async fn insert_color_scan(&mut self, row: ColorScanRow) -> Result<(), StoreError> {
        self.work.color.insert(row.txid, row);
        Ok(())
    }

    async fn confirm_color_scans(
        &mut self,
        txids: &[Txid],
        hash: BlockHash,
        height: Height,
    ) -> Result<(), StoreError> {
        for txid in txids {
            let row = self.work.color.entry(*txid).or_insert(ColorScanRow {
                txid: *txid,
                blockhash: None,
                height: None,
            });
            row.blockhash = Some(hash);
            row.height = Some(height);
        }
        Ok(())
    }

    async fn unconfirm_color_above(&mut self, height: Option<Height>) -> Result<(), StoreError> {
        for row in self.work.color.values_mut() {
            if above(row.height, height) {
                row.blockhash = None;
                row.height = None;
            }
        }
        Ok(())
    }

    async fn delete_color_scan(&mut self, txid: &Txid) -> Result<(), StoreError> {
        self.work.color.remove(txid);
        Ok(())
    }

    fn queue_event(&mut self, event: Event) {
        self.events.push(event);
    }

    async fn commit(mut self) -> Result<Vec<Event>, StoreError> {
        *self.guard = self.work;
        Ok(self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(byte: u8) -> Txid {
        Txid::from([byte; 32])
    }

    fn history_row(address: &str, producer: Txid, index: u32) -> HistoryRow {
        HistoryRow {
            address: Address::from(address.to_string()),
            txid: producer,
            output_index: index,
            value: 5000,
            script: vec![0x51],
            height: None,
            input_txid: None,
            input_height: None,
        }
    }

    #[tokio::test]
    async fn commit_makes_writes_visible() {
        let store = MemStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_tx(TxRow {
            txid: txid(1),
            raw: vec![1, 2, 3],
            height: None,
        })
        .await
        .unwrap();
        tx.queue_event(Event::AddTx {
            txid: txid(1),
            unconfirmed: true,
        });
        let events = tx.commit().await.unwrap();

        assert_eq!(events.len(), 1);
        assert!(store.tx_row(&txid(1)).await.unwrap().is_some());
        assert_eq!(store.unconfirmed_txids().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dropping_a_transaction_rolls_back_writes_and_events() {
        let store = MemStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_tx(TxRow {
                txid: txid(1),
                raw: vec![1],
                height: None,
            })
            .await
            .unwrap();
            tx.queue_event(Event::AddTx {
                txid: txid(1),
                unconfirmed: true,
            });
            // Dropped without commit.
        }
        assert!(store.tx_row(&txid(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_tx_insert_is_a_constraint_error() {
        let store = MemStore::new();
        let mut tx = store.begin().await.unwrap();
        let row = TxRow {
            txid: txid(1),
            raw: vec![1],
            height: None,
        };
        tx.insert_tx(row.clone()).await.unwrap();
        assert!(matches!(
            tx.insert_tx(row).await,
            Err(StoreError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn mark_spent_touches_every_address_row_of_the_output() {
        let store = MemStore::new();
        let mut tx = store.begin().await.unwrap();
        // A bare-multisig output indexes one row per address.
        tx.insert_history(history_row("addr-a", txid(1), 0))
            .await
            .unwrap();
        tx.insert_history(history_row("addr-b", txid(1), 0))
            .await
            .unwrap();
        tx.insert_history(history_row("addr-a", txid(1), 1))
            .await
            .unwrap();

        let touched = tx.mark_spent(&txid(1), 0, &txid(2), None).await.unwrap();
        assert_eq!(touched.len(), 2);

        tx.commit().await.unwrap();
        let rows = store
            .history_for_address(&Address::from("addr-a".to_string()))
            .await
            .unwrap();
        let spent = rows.iter().find(|r| r.output_index == 0).unwrap();
        let unspent = rows.iter().find(|r| r.output_index == 1).unwrap();
        assert_eq!(spent.input_txid, Some(txid(2)));
        assert_eq!(unspent.input_txid, None);
    }

    #[tokio::test]
    async fn unconfirm_above_respects_the_bound() {
        let store = MemStore::new();
        let mut tx = store.begin().await.unwrap();
        for (byte, height) in [(1u8, 0u32), (2, 1), (3, 2)] {
            tx.insert_tx(TxRow {
                txid: txid(byte),
                raw: vec![byte],
                height: Some(Height::try_from(height).unwrap()),
            })
            .await
            .unwrap();
        }
        tx.unconfirm_txs_above(Some(Height::ZERO)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            store.tx_row(&txid(1)).await.unwrap().unwrap().height,
            Some(Height::ZERO)
        );
        assert_eq!(store.tx_row(&txid(2)).await.unwrap().unwrap().height, None);
        assert_eq!(store.tx_row(&txid(3)).await.unwrap().unwrap().height, None);
    }

    #[tokio::test]
    async fn color_scan_tip_tracks_max_confirmed_height() {
        let store = MemStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_color_scan(ColorScanRow {
            txid: txid(1),
            blockhash: None,
            height: None,
        })
        .await
        .unwrap();
        tx.confirm_color_scans(&[txid(1)], BlockHash::from([9u8; 32]), Height::ZERO + 4)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let tip = store.color_scan_tip().await.unwrap().unwrap();
        assert_eq!(tip.height, Height::ZERO + 4);
        assert_eq!(tip.hash, BlockHash::from([9u8; 32]));
        assert!(store.color_unconfirmed_txids().await.unwrap().is_empty());
    }
}
