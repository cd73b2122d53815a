//! The EPOBC colored-coin definition class.
//!
//! EPOBC tags a transaction through the low bits of its first input's
//! sequence number: the low 6 bits distinguish genesis from transfer
//! transactions, and the next 6 bits carry the padding order. Color value
//! of an output is its satoshi value minus the padding.

use async_trait::async_trait;
use carmine_fetch::chain::FullTransaction;

use crate::{
    color::{ColorDefinition, ColorStore, TxFetcher},
    error::RescanError,
    types::Txid,
};

/// Tag mask over the first input's sequence number.
const TAG_MASK: u32 = 0x3f;
/// Genesis tag, `0b100101`.
const GENESIS_TAG: u32 = 0x25;
/// Transfer tag, `0b110011`.
const TRANSFER_TAG: u32 = 0x33;

/// The EPOBC definition class.
#[derive(Debug, Clone, Copy, Default)]
pub struct Epobc;

impl Epobc {
    fn padding(sequence: u32) -> u64 {
        let order = (sequence >> 6) & 0x3f;
        if order == 0 {
            0
        } else {
            1u64 << order.min(63)
        }
    }

    fn padding_order(sequence: u32) -> u32 {
        (sequence >> 6) & 0x3f
    }

    /// The descriptor registered for a genesis transaction:
    /// `epobc:{txid}:{padding order}:0`.
    fn genesis_descriptor(txid: &Txid, sequence: u32) -> String {
        format!("epobc:{txid}:{}:0", Self::padding_order(sequence))
    }
}

#[async_trait]
impl ColorDefinition for Epobc {
    fn code(&self) -> &'static str {
        "epobc"
    }

    async fn full_scan_tx(
        &self,
        tx: &FullTransaction,
        colors: &dyn ColorStore,
        get_tx: &dyn TxFetcher,
    ) -> Result<(), RescanError> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let Some(first_input) = tx.inputs().first() else {
            return Ok(());
        };
        let sequence = first_input.sequence();
        let txid = Txid::from(*tx.txid());

        match sequence & TAG_MASK {
            GENESIS_TAG => {
                colors
                    .register_definition(self.code(), &Self::genesis_descriptor(&txid, sequence))
                    .await?;
                let padding = Self::padding(sequence);
                if let Some(genesis_out) = tx.outputs().first() {
                    if genesis_out.value() > padding {
                        colors
                            .set_color_values(
                                &txid,
                                self.code(),
                                vec![(0, genesis_out.value() - padding)],
                            )
                            .await?;
                    }
                }
                Ok(())
            }
            TRANSFER_TAG => {
                // A transfer is only meaningful with its parents indexed.
                let parent = Txid::from(*first_input.prev_txid());
                if get_tx.raw_tx(&parent).await?.is_none() {
                    return Err(RescanError::MissingData(format!(
                        "transfer {txid} references unknown parent {parent}"
                    )));
                }
                let padding = Self::padding(sequence);
                let values: Vec<(u32, u64)> = tx
                    .outputs()
                    .iter()
                    .enumerate()
                    .filter(|(_, txout)| txout.value() > padding)
                    .map(|(index, txout)| (index as u32, txout.value() - padding))
                    .collect();
                if !values.is_empty() {
                    colors.set_color_values(&txid, self.code(), values).await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn genesis_id_matches(&self, descriptor: &str, txid: &Txid) -> bool {
        let mut parts = descriptor.split(':');
        matches!(
            (
                parts.next(),
                parts.next(),
                parts.next().map(str::parse::<u64>),
                parts.next(),
                parts.next(),
            ),
            (Some("epobc"), Some(id_txid), Some(Ok(_)), Some("0"), None)
                if id_txid == txid.to_string()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_descriptor_matches_its_own_txid() {
        let txid = Txid::from([7u8; 32]);
        let descriptor = Epobc::genesis_descriptor(&txid, GENESIS_TAG | (3 << 6));
        assert!(Epobc.genesis_id_matches(&descriptor, &txid));
        assert!(!Epobc.genesis_id_matches(&descriptor, &Txid::from([8u8; 32])));
    }

    #[test]
    fn malformed_descriptors_do_not_match() {
        let txid = Txid::from([7u8; 32]);
        assert!(!Epobc.genesis_id_matches("epobc", &txid));
        assert!(!Epobc.genesis_id_matches(&format!("epobc:{txid}:x:0"), &txid));
        assert!(!Epobc.genesis_id_matches(&format!("epobc:{txid}:3:1"), &txid));
        assert!(!Epobc.genesis_id_matches(&format!("other:{txid}:3:0"), &txid));
    }

    #[test]
    fn padding_is_two_to_the_order() {
        assert_eq!(Epobc::padding(GENESIS_TAG), 0);
        assert_eq!(Epobc::padding(GENESIS_TAG | (1 << 6)), 2);
        assert_eq!(Epobc::padding(GENESIS_TAG | (10 << 6)), 1024);
    }
}
