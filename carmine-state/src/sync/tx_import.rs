//! Import of a single unconfirmed transaction.

use std::collections::{BTreeSet, HashSet};

use carmine_common::Network;
use carmine_fetch::chain::{extract_addresses, FullTransaction};
use tokio::sync::Mutex;

use crate::{
    error::SyncError,
    events::{Event, EventPublisher},
    store::{HistoryRow, IndexStore, StoreTransaction, TxRow},
    sync::{lock::KeyedLock, orphans::OrphanPool},
    types::{Address, Txid},
};

/// Outcome of an unconfirmed-transaction import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxImport {
    /// The transaction was recorded as unconfirmed.
    Imported,
    /// A row for this txid already exists.
    AlreadyPresent,
    /// The transaction waits on the listed missing parents and was
    /// registered with the orphan pool.
    Deferred(Vec<Txid>),
}

/// Imports one unconfirmed transaction into storage.
pub(crate) struct TxImporter<'a, S: IndexStore> {
    pub store: &'a S,
    pub lock: &'a KeyedLock,
    pub publisher: &'a EventPublisher,
    pub orphans: &'a Mutex<OrphanPool>,
    pub network: Network,
}

impl<S: IndexStore> TxImporter<'_, S> {
    /// Attempts to record `ftx` as unconfirmed.
    ///
    /// Runs under the keyed lock on the txid plus its parent set, so two
    /// imports whose dependency sets intersect are serialized. All row
    /// writes and event publications share one storage transaction.
    pub async fn import(&self, ftx: &FullTransaction) -> Result<TxImport, SyncError> {
        let txid = Txid::from(*ftx.txid());
        let parents: BTreeSet<Txid> = ftx
            .parent_txids()
            .into_iter()
            .map(Txid::from)
            .collect();

        let mut keys = parents.clone();
        keys.insert(txid);
        let _guard = self.lock.lock_keys(keys).await;

        let mut tx = self.store.begin().await?;

        if tx.tx_row(&txid).await?.is_some() {
            return Ok(TxImport::AlreadyPresent);
        }

        let existing = tx.filter_existing(&parents).await?;
        let missing: Vec<Txid> = parents
            .iter()
            .filter(|parent| !existing.contains(parent))
            .copied()
            .collect();
        if !missing.is_empty() {
            // The transaction itself is not recorded; the dropped storage
            // transaction discards nothing but the existence checks.
            self.orphans.lock().await.mark(txid, missing.iter().copied());
            return Ok(TxImport::Deferred(missing));
        }

        tx.insert_tx(TxRow {
            txid,
            raw: ftx.raw().to_vec(),
            height: None,
        })
        .await?;

        for txin in ftx.inputs() {
            if txin.is_coinbase() {
                continue;
            }
            let prev_txid = Txid::from(*txin.prev_txid());
            let touched = tx
                .mark_spent(&prev_txid, txin.prev_index(), &txid, None)
                .await?;
            for address in touched {
                tx.queue_event(Event::AddressTouched {
                    address,
                    txid,
                    blockhash: None,
                    blockheight: None,
                });
            }
        }

        for (index, txout) in ftx.outputs().iter().enumerate() {
            let addresses: HashSet<String> =
                extract_addresses(txout.script_pubkey(), self.network)
                    .into_iter()
                    .collect();
            for address in addresses {
                let address = Address::from(address);
                tx.insert_history(HistoryRow {
                    address: address.clone(),
                    txid,
                    output_index: index as u32,
                    value: txout.value(),
                    script: txout.script_pubkey().to_vec(),
                    height: None,
                    input_txid: None,
                    input_height: None,
                })
                .await?;
                tx.queue_event(Event::AddressTouched {
                    address,
                    txid,
                    blockhash: None,
                    blockheight: None,
                });
            }
        }

        tx.queue_event(Event::Tx {
            txid,
            blockhash: None,
            blockheight: None,
        });
        tx.queue_event(Event::AddTx {
            txid,
            unconfirmed: true,
        });

        self.publisher.commit_and_publish(tx).await?;
        Ok(TxImport::Imported)
    }
}
