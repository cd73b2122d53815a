//! Block fetching and deserialization functionality.

use crate::chain::{
    error::ParseError,
    transaction::FullTransaction,
    utils::{double_sha256, read_array32, read_i32, read_u32, CompactSize, ParseFromSlice},
};
use std::io::Cursor;

/// Size of a serialized block header.
pub const HEADER_SIZE: usize = 80;

/// A Bitcoin block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// The complete 80-byte serialized header.
    raw: [u8; HEADER_SIZE],
    /// Block format version.
    version: i32,
    /// Hash of the previous block in the chain, internal byte order.
    prev_hash: [u8; 32],
    /// Merkle root of the block's transaction ids.
    merkle_root: [u8; 32],
    /// Block timestamp.
    time: u32,
    /// Difficulty target in compact form.
    bits: u32,
    /// Proof-of-work nonce.
    nonce: u32,
}

impl BlockHeader {
    /// The complete serialized header bytes.
    pub fn raw(&self) -> &[u8; HEADER_SIZE] {
        &self.raw
    }

    /// The block format version.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Hash of the parent block, internal byte order.
    pub fn prev_hash(&self) -> &[u8; 32] {
        &self.prev_hash
    }

    /// Merkle root of the block's transaction ids.
    pub fn merkle_root(&self) -> &[u8; 32] {
        &self.merkle_root
    }

    /// Block timestamp.
    pub fn time(&self) -> u32 {
        self.time
    }

    /// SHA256d of the serialized header, internal byte order.
    pub fn hash(&self) -> [u8; 32] {
        double_sha256(&self.raw)
    }
}

impl ParseFromSlice for BlockHeader {
    fn parse_from_slice(data: &[u8]) -> Result<(&[u8], Self), ParseError> {
        if data.len() < HEADER_SIZE {
            return Err(ParseError::InvalidData(format!(
                "block header requires {HEADER_SIZE} bytes, found {}",
                data.len()
            )));
        }
        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&data[..HEADER_SIZE]);

        let mut cursor = Cursor::new(data);
        let version = read_i32(&mut cursor, "Error reading BlockHeader::Version")?;
        let prev_hash = read_array32(&mut cursor, "Error reading BlockHeader::PrevHash")?;
        let merkle_root = read_array32(&mut cursor, "Error reading BlockHeader::MerkleRoot")?;
        let time = read_u32(&mut cursor, "Error reading BlockHeader::Time")?;
        let bits = read_u32(&mut cursor, "Error reading BlockHeader::Bits")?;
        let nonce = read_u32(&mut cursor, "Error reading BlockHeader::Nonce")?;

        Ok((
            &data[HEADER_SIZE..],
            BlockHeader {
                raw,
                version,
                prev_hash,
                merkle_root,
                time,
                bits,
                nonce,
            },
        ))
    }
}

/// A complete Bitcoin block: header plus all transactions.
#[derive(Debug, Clone)]
pub struct FullBlock {
    header: BlockHeader,
    transactions: Vec<FullTransaction>,
}

impl FullBlock {
    /// The block header.
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// The block's transactions in block order. The first is the coinbase.
    pub fn transactions(&self) -> &[FullTransaction] {
        &self.transactions
    }

    /// SHA256d of the header, internal byte order.
    pub fn hash(&self) -> [u8; 32] {
        self.header.hash()
    }

    /// Transaction ids in block order, internal byte order.
    pub fn txids(&self) -> Vec<[u8; 32]> {
        self.transactions.iter().map(|tx| *tx.txid()).collect()
    }

    /// Parses a complete raw block, requiring the whole input to be
    /// consumed.
    pub fn from_raw(data: &[u8]) -> Result<Self, ParseError> {
        let (remaining, block) = Self::parse_from_slice(data)?;
        if !remaining.is_empty() {
            return Err(ParseError::TrailingData(remaining.len(), "block"));
        }
        Ok(block)
    }
}

impl ParseFromSlice for FullBlock {
    fn parse_from_slice(data: &[u8]) -> Result<(&[u8], Self), ParseError> {
        let (mut remaining, header) = BlockHeader::parse_from_slice(data)?;

        let tx_count = {
            let mut cursor = Cursor::new(remaining);
            let count = CompactSize::read(&mut cursor)?;
            remaining = &remaining[cursor.position() as usize..];
            count
        };

        let mut transactions = Vec::with_capacity(tx_count as usize);
        for _ in 0..tx_count {
            let (rest, tx) = FullTransaction::parse_from_slice(remaining)?;
            transactions.push(tx);
            remaining = rest;
        }

        Ok((
            remaining,
            FullBlock {
                header,
                transactions,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The mainnet genesis block.
    const GENESIS_BLOCK: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c0101000000010000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";

    #[test]
    fn parses_genesis_block() {
        let raw = hex::decode(GENESIS_BLOCK).unwrap();
        let block = FullBlock::from_raw(&raw).unwrap();

        let mut hash = block.hash();
        hash.reverse();
        assert_eq!(
            hex::encode(hash),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );

        assert_eq!(block.header().prev_hash(), &[0u8; 32]);
        assert_eq!(block.transactions().len(), 1);
        assert!(block.transactions()[0].is_coinbase());

        // The merkle root of a single-transaction block is its txid.
        assert_eq!(block.header().merkle_root(), block.transactions()[0].txid());
    }

    #[test]
    fn rejects_truncated_header() {
        let raw = hex::decode(GENESIS_BLOCK).unwrap();
        assert!(BlockHeader::parse_from_slice(&raw[..40]).is_err());
    }
}
