//! Import of a single confirmed block.

use std::collections::HashSet;

use carmine_common::Network;
use carmine_fetch::chain::{extract_addresses, FullBlock};

use crate::{
    error::SyncError,
    events::Event,
    store::{BlockRow, HistoryRow, StoreTransaction, TxRow},
    types::{Address, BlockHash, Height, Txid},
};

/// Imports one confirmed block into an open storage transaction.
///
/// The caller holds the keyed lock on the block's txids plus their parent
/// txids, has verified that the block extends the stored tip, and commits
/// the transaction afterwards; every row write and event publication
/// below is atomic with that commit.
pub(crate) struct BlockImporter {
    pub network: Network,
}

impl BlockImporter {
    pub async fn import<T: StoreTransaction>(
        &self,
        tx: &mut T,
        block: &FullBlock,
        height: Height,
    ) -> Result<(), SyncError> {
        let hash = BlockHash::from(block.hash());
        let txids: Vec<Txid> = block.txids().into_iter().map(Txid::from).collect();

        tx.insert_block(BlockRow {
            height,
            hash,
            header: *block.header().raw(),
            txids: txids.clone(),
        })
        .await?;

        // Transactions and their outputs. Rows that already exist were
        // imported unconfirmed from the mempool and are upgraded in place.
        let mut pre_existing: HashSet<Txid> = HashSet::new();
        for ftx in block.transactions() {
            let txid = Txid::from(*ftx.txid());

            if tx.tx_row(&txid).await?.is_some() {
                pre_existing.insert(txid);
                tx.confirm_tx(&txid, height).await?;
                for address in tx.confirm_history_of(&txid, height).await? {
                    tx.queue_event(Event::AddressTouched {
                        address,
                        txid,
                        blockhash: Some(hash),
                        blockheight: Some(height),
                    });
                }
            } else {
                tx.insert_tx(TxRow {
                    txid,
                    raw: ftx.raw().to_vec(),
                    height: Some(height),
                })
                .await?;
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
                            height: Some(height),
                            input_txid: None,
                            input_height: None,
                        })
                        .await?;
                        tx.queue_event(Event::AddressTouched {
                            address,
                            txid,
                            blockhash: Some(hash),
                            blockheight: Some(height),
                        });
                    }
                }
            }

            tx.queue_event(Event::Tx {
                txid,
                blockhash: Some(hash),
                blockheight: Some(height),
            });
            tx.queue_event(Event::AddTx {
                txid,
                unconfirmed: false,
            });
        }

        // Inputs across all transactions. For a pre-existing transaction
        // the spent rows already carry its txid and only the input height
        // is upgraded; otherwise the spend is recorded outright.
        for ftx in block.transactions() {
            let spender = Txid::from(*ftx.txid());

            if pre_existing.contains(&spender) {
                for address in tx.confirm_inputs_of(&spender, height).await? {
                    tx.queue_event(Event::AddressTouched {
                        address,
                        txid: spender,
                        blockhash: Some(hash),
                        blockheight: Some(height),
                    });
                }
                continue;
            }

            for txin in ftx.inputs() {
                if txin.is_coinbase() {
                    continue;
                }
                let prev_txid = Txid::from(*txin.prev_txid());
                let touched = tx
                    .mark_spent(&prev_txid, txin.prev_index(), &spender, Some(height))
                    .await?;
                for address in touched {
                    tx.queue_event(Event::AddressTouched {
                        address,
                        txid: spender,
                        blockhash: Some(hash),
                        blockheight: Some(height),
                    });
                }
            }
        }

        tx.queue_event(Event::Block { hash, height });
        tx.queue_event(Event::AddBlock { hash });
        Ok(())
    }
}
