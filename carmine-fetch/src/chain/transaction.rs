//! Transaction fetching and deserialization functionality.

use crate::chain::{
    error::ParseError,
    utils::{
        double_sha256, read_array32, read_i32, read_u32, read_u64, skip_bytes, CompactSize,
        ParseFromSlice,
    },
};
use std::io::Cursor;

/// Previous-output index used by coinbase inputs.
const COINBASE_PREV_INDEX: u32 = 0xffff_ffff;

/// Txin format as described in <https://en.bitcoin.it/wiki/Transaction>
#[derive(Debug, Clone)]
pub struct TxIn {
    /// Txid of the transaction holding the output being spent, in internal
    /// byte order.
    prev_txid: [u8; 32],
    /// Index of the output being spent within its transaction.
    prev_index: u32,
    /// Unlocking script (or arbitrary data for coinbase inputs).
    script_sig: Vec<u8>,
    /// Sequence number. Colored-coin protocols overload the low bits of the
    /// first input's sequence as a tag.
    sequence: u32,
}

impl TxIn {
    /// Txid of the transaction being spent, internal byte order.
    pub fn prev_txid(&self) -> &[u8; 32] {
        &self.prev_txid
    }

    /// Output index being spent.
    pub fn prev_index(&self) -> u32 {
        self.prev_index
    }

    /// The unlocking script bytes.
    pub fn script_sig(&self) -> &[u8] {
        &self.script_sig
    }

    /// The sequence number.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// True for the null outpoint used by coinbase inputs (prev hash all
    /// zeros, prev index 0xFFFFFFFF).
    pub fn is_coinbase(&self) -> bool {
        self.prev_index == COINBASE_PREV_INDEX && self.prev_txid == [0u8; 32]
    }
}

impl ParseFromSlice for TxIn {
    fn parse_from_slice(data: &[u8]) -> Result<(&[u8], Self), ParseError> {
        let mut cursor = Cursor::new(data);

        let prev_txid = read_array32(&mut cursor, "Error reading TxIn::PrevTxHash")?;
        let prev_index = read_u32(&mut cursor, "Error reading TxIn::PrevTxOutIndex")?;
        let script_sig = {
            let compact_length = CompactSize::read(&mut cursor)?;
            crate::chain::utils::read_bytes(
                &mut cursor,
                compact_length as usize,
                "Error reading TxIn::ScriptSig",
            )?
        };
        let sequence = read_u32(&mut cursor, "Error reading TxIn::SequenceNumber")?;

        Ok((
            &data[cursor.position() as usize..],
            TxIn {
                prev_txid,
                prev_index,
                script_sig,
                sequence,
            },
        ))
    }
}

/// Txout format as described in <https://en.bitcoin.it/wiki/Transaction>
#[derive(Debug, Clone)]
pub struct TxOut {
    /// Non-negative int giving the number of satoshis to be transferred.
    value: u64,
    /// Locking script.
    script_pubkey: Vec<u8>,
}

impl TxOut {
    /// Output value in satoshis.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// The locking script bytes.
    pub fn script_pubkey(&self) -> &[u8] {
        &self.script_pubkey
    }
}

impl ParseFromSlice for TxOut {
    fn parse_from_slice(data: &[u8]) -> Result<(&[u8], Self), ParseError> {
        let mut cursor = Cursor::new(data);

        let value = read_u64(&mut cursor, "Error reading TxOut::Value")?;
        let script_pubkey = {
            let compact_length = CompactSize::read(&mut cursor)?;
            crate::chain::utils::read_bytes(
                &mut cursor,
                compact_length as usize,
                "Error reading TxOut::ScriptPubKey",
            )?
        };

        Ok((
            &data[cursor.position() as usize..],
            TxOut {
                value,
                script_pubkey,
            },
        ))
    }
}

/// Full Bitcoin transaction data.
///
/// Witness data is parsed past but not retained; the txid is computed over
/// the legacy (witness-stripped) serialization as consensus requires.
#[derive(Debug, Clone)]
pub struct FullTransaction {
    /// The transaction format version.
    version: i32,
    /// Transparent inputs.
    inputs: Vec<TxIn>,
    /// Transparent outputs.
    outputs: Vec<TxOut>,
    /// Block height or time after which the transaction is final.
    lock_time: u32,
    /// SHA256d of the legacy serialization, internal byte order.
    txid: [u8; 32],
    /// The complete raw transaction as fetched from the node.
    raw: Vec<u8>,
}

impl FullTransaction {
    /// The transaction format version.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// The transaction inputs.
    pub fn inputs(&self) -> &[TxIn] {
        &self.inputs
    }

    /// The transaction outputs.
    pub fn outputs(&self) -> &[TxOut] {
        &self.outputs
    }

    /// The lock time field.
    pub fn lock_time(&self) -> u32 {
        self.lock_time
    }

    /// Transaction id in internal byte order.
    pub fn txid(&self) -> &[u8; 32] {
        &self.txid
    }

    /// The complete raw transaction bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// True if this is the coinbase transaction of a block.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Txids of the transactions this one spends, internal byte order,
    /// deduplicated. Coinbase inputs contribute nothing.
    pub fn parent_txids(&self) -> Vec<[u8; 32]> {
        let mut parents: Vec<[u8; 32]> = self
            .inputs
            .iter()
            .filter(|txin| !txin.is_coinbase())
            .map(|txin| *txin.prev_txid())
            .collect();
        parents.sort_unstable();
        parents.dedup();
        parents
    }

    /// Parses a complete raw transaction, requiring the whole input to be
    /// consumed.
    pub fn from_raw(data: &[u8]) -> Result<Self, ParseError> {
        let (remaining, tx) = Self::parse_from_slice(data)?;
        if !remaining.is_empty() {
            return Err(ParseError::TrailingData(remaining.len(), "transaction"));
        }
        Ok(tx)
    }

    /// The legacy serialization: version, inputs, outputs, lock time, with
    /// no segwit marker or witness data. This is the txid preimage.
    fn legacy_serialization(
        version: i32,
        inputs: &[TxIn],
        outputs: &[TxOut],
        lock_time: u32,
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&version.to_le_bytes());
        CompactSize::write(&mut buf, inputs.len() as u64);
        for txin in inputs {
            buf.extend_from_slice(&txin.prev_txid);
            buf.extend_from_slice(&txin.prev_index.to_le_bytes());
            CompactSize::write(&mut buf, txin.script_sig.len() as u64);
            buf.extend_from_slice(&txin.script_sig);
            buf.extend_from_slice(&txin.sequence.to_le_bytes());
        }
        CompactSize::write(&mut buf, outputs.len() as u64);
        for txout in outputs {
            buf.extend_from_slice(&txout.value.to_le_bytes());
            CompactSize::write(&mut buf, txout.script_pubkey.len() as u64);
            buf.extend_from_slice(&txout.script_pubkey);
        }
        buf.extend_from_slice(&lock_time.to_le_bytes());
        buf
    }
}

impl ParseFromSlice for FullTransaction {
    fn parse_from_slice(data: &[u8]) -> Result<(&[u8], Self), ParseError> {
        let mut cursor = Cursor::new(data);

        let version = read_i32(&mut cursor, "Error reading Transaction::Version")?;

        // BIP-144: a zero byte where the input count belongs marks a segwit
        // serialization (a legacy transaction cannot have zero inputs).
        let position = cursor.position() as usize;
        let segwit = matches!(data.get(position..position + 2), Some([0x00, 0x01]));
        if segwit {
            skip_bytes(&mut cursor, 2, "Error skipping segwit marker")?;
        }

        let input_count = CompactSize::read(&mut cursor)?;
        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            let (remaining_data, txin) =
                TxIn::parse_from_slice(&data[cursor.position() as usize..])?;
            inputs.push(txin);
            cursor.set_position(data.len() as u64 - remaining_data.len() as u64);
        }

        let output_count = CompactSize::read(&mut cursor)?;
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            let (remaining_data, txout) =
                TxOut::parse_from_slice(&data[cursor.position() as usize..])?;
            outputs.push(txout);
            cursor.set_position(data.len() as u64 - remaining_data.len() as u64);
        }

        if segwit {
            for _ in 0..inputs.len() {
                let item_count = CompactSize::read(&mut cursor)?;
                for _ in 0..item_count {
                    let item_length = CompactSize::read(&mut cursor)?;
                    skip_bytes(
                        &mut cursor,
                        item_length as usize,
                        "Error skipping witness item",
                    )?;
                }
            }
        }

        let lock_time = read_u32(&mut cursor, "Error reading Transaction::LockTime")?;

        let consumed = cursor.position() as usize;
        let txid = double_sha256(&Self::legacy_serialization(
            version, &inputs, &outputs, lock_time,
        ));

        Ok((
            &data[consumed..],
            FullTransaction {
                version,
                inputs,
                outputs,
                lock_time,
                txid,
                raw: data[..consumed].to_vec(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The genesis coinbase transaction.
    const GENESIS_COINBASE: &str = "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";

    /// The first peer-to-peer transfer (block 170, tx
    /// f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16).
    const BLOCK_170_TX: &str = "0100000001c997a5e56e104102fa209c6a852dd90660a20b2d9c352423edce25857fcd3704000000004847304402204e45e16932b8af514961a1d3a1a25fdf3f4f7732e9d624c6c61548ab5fb8cd410220181522ec8eca07de4860a4acdd12909d831cc56cbbac4622082221a8768d1d0901ffffffff0200ca9a3b00000000434104ae1a62fe09c5f51b13905f07f06b99a2f7159b2225f374cd378d71302fa28414e7aab37397f554a7df5f142c21c1b7303b8a0626f1baded5c72a704f7e6cd84cac00286bee0000000043410411db93e1dcdb8a016b49840f8c53bc1eb68a382e97b1482ecad7b148a6909a5cb2e0eaddfb84ccf9744464f82e160bfa9b8b64f9d4c03f999b8643f656b412a3ac00000000";

    fn txid_hex(tx: &FullTransaction) -> String {
        let mut display_order = *tx.txid();
        display_order.reverse();
        hex::encode(display_order)
    }

    #[test]
    fn parses_genesis_coinbase() {
        let raw = hex::decode(GENESIS_COINBASE).unwrap();
        let tx = FullTransaction::from_raw(&raw).unwrap();

        assert!(tx.is_coinbase());
        assert!(tx.parent_txids().is_empty());
        assert_eq!(tx.inputs().len(), 1);
        assert_eq!(tx.outputs().len(), 1);
        assert_eq!(tx.outputs()[0].value(), 50_0000_0000);
        assert_eq!(
            txid_hex(&tx),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
        assert_eq!(tx.raw(), raw.as_slice());
    }

    #[test]
    fn parses_first_transfer() {
        let raw = hex::decode(BLOCK_170_TX).unwrap();
        let tx = FullTransaction::from_raw(&raw).unwrap();

        assert!(!tx.is_coinbase());
        assert_eq!(tx.inputs().len(), 1);
        assert_eq!(tx.outputs().len(), 2);
        assert_eq!(tx.outputs()[0].value(), 10_0000_0000);
        assert_eq!(tx.outputs()[1].value(), 40_0000_0000);
        assert_eq!(
            txid_hex(&tx),
            "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16"
        );

        // The spent output belongs to the block 9 coinbase.
        let parents = tx.parent_txids();
        assert_eq!(parents.len(), 1);
        let mut parent_display = parents[0];
        parent_display.reverse();
        assert_eq!(
            hex::encode(parent_display),
            "0437cd7f8525ceed2324359c2d0ba26006d92d856a9c20fa0241106ee5a597c9"
        );
    }

    #[test]
    fn segwit_txid_excludes_witness() {
        // Build a segwit transaction around the legacy fields of the block
        // 170 transaction and one dummy witness item.
        let legacy = hex::decode(BLOCK_170_TX).unwrap();
        let parsed_legacy = FullTransaction::from_raw(&legacy).unwrap();

        let mut segwit = Vec::new();
        segwit.extend_from_slice(&legacy[0..4]);
        segwit.extend_from_slice(&[0x00, 0x01]);
        segwit.extend_from_slice(&legacy[4..legacy.len() - 4]);
        // One witness stack with a single 3-byte item.
        segwit.extend_from_slice(&[0x01, 0x03, 0xaa, 0xbb, 0xcc]);
        segwit.extend_from_slice(&legacy[legacy.len() - 4..]);

        let parsed_segwit = FullTransaction::from_raw(&segwit).unwrap();
        assert_eq!(parsed_segwit.txid(), parsed_legacy.txid());
        assert_eq!(parsed_segwit.inputs().len(), 1);
        assert_eq!(parsed_segwit.outputs().len(), 2);
        assert_eq!(parsed_segwit.raw(), segwit.as_slice());
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut raw = hex::decode(GENESIS_COINBASE).unwrap();
        raw.push(0x00);
        assert!(matches!(
            FullTransaction::from_raw(&raw),
            Err(ParseError::TrailingData(1, _))
        ));
    }
}
