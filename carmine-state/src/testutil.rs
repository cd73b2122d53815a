//! Test fixtures: deterministic raw blocks and transactions.
//!
//! Builders emit real wire-format bytes and re-parse them through the
//! production parsers, so txids and block hashes are genuine.

use carmine_fetch::chain::{
    utils::{double_sha256, CompactSize},
    FullBlock, FullTransaction,
};

use crate::{
    events::BusSubscription,
    store::mem::MemStore,
    types::{BlockHash, Txid},
};

const COINBASE_PREV_INDEX: u32 = 0xffff_ffff;
const FINAL_SEQUENCE: u32 = 0xffff_ffff;

/// A standard pay-to-pubkey-hash script over a synthetic 20-byte hash.
pub(crate) fn p2pkh_script(seed: u8) -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&[seed; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

/// An OP_RETURN data carrier; pays to no address.
pub(crate) fn op_return_script() -> Vec<u8> {
    vec![0x6a, 0x04, 0xde, 0xad, 0xbe, 0xef]
}

pub(crate) struct TxInSpec {
    pub prev: [u8; 32],
    pub index: u32,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

/// Serializes and re-parses a transaction from input and output specs.
pub(crate) fn build_tx_raw(inputs: &[TxInSpec], outputs: &[(u64, Vec<u8>)]) -> FullTransaction {
    let mut raw = Vec::new();
    raw.extend_from_slice(&1i32.to_le_bytes());
    CompactSize::write(&mut raw, inputs.len() as u64);
    for input in inputs {
        raw.extend_from_slice(&input.prev);
        raw.extend_from_slice(&input.index.to_le_bytes());
        CompactSize::write(&mut raw, input.script_sig.len() as u64);
        raw.extend_from_slice(&input.script_sig);
        raw.extend_from_slice(&input.sequence.to_le_bytes());
    }
    CompactSize::write(&mut raw, outputs.len() as u64);
    for (value, script) in outputs {
        raw.extend_from_slice(&value.to_le_bytes());
        CompactSize::write(&mut raw, script.len() as u64);
        raw.extend_from_slice(script);
    }
    raw.extend_from_slice(&0u32.to_le_bytes());
    FullTransaction::from_raw(&raw).expect("built transaction parses")
}

/// A spending transaction with empty unlock scripts and final sequences.
pub(crate) fn build_tx(
    inputs: &[(Txid, u32)],
    outputs: &[(u64, Vec<u8>)],
) -> FullTransaction {
    build_tx_with_sequence(inputs, outputs, FINAL_SEQUENCE)
}

/// Like [`build_tx`] with an explicit sequence number on every input
/// (colored-coin tags live there).
pub(crate) fn build_tx_with_sequence(
    inputs: &[(Txid, u32)],
    outputs: &[(u64, Vec<u8>)],
    sequence: u32,
) -> FullTransaction {
    let specs: Vec<TxInSpec> = inputs
        .iter()
        .map(|(txid, index)| TxInSpec {
            prev: (*txid).into(),
            index: *index,
            script_sig: Vec::new(),
            sequence,
        })
        .collect();
    build_tx_raw(&specs, outputs)
}

/// A coinbase whose unlock script carries the height and a salt, so every
/// block's coinbase txid is unique.
pub(crate) fn build_coinbase(height: u32, salt: u8, outputs: &[(u64, Vec<u8>)]) -> FullTransaction {
    let mut script_sig = height.to_le_bytes().to_vec();
    script_sig.push(salt);
    build_tx_raw(
        &[TxInSpec {
            prev: [0u8; 32],
            index: COINBASE_PREV_INDEX,
            script_sig,
            sequence: FINAL_SEQUENCE,
        }],
        outputs,
    )
}

/// Serializes and re-parses a block from its parent hash and
/// transactions. The merkle-root field is a digest of the txids, so
/// blocks with different contents hash differently.
pub(crate) fn build_block(prev: BlockHash, txs: Vec<FullTransaction>) -> FullBlock {
    let mut txid_concat = Vec::new();
    for tx in &txs {
        txid_concat.extend_from_slice(tx.txid());
    }

    let mut raw = Vec::new();
    raw.extend_from_slice(&2i32.to_le_bytes());
    raw.extend_from_slice(&<[u8; 32]>::from(prev));
    raw.extend_from_slice(&double_sha256(&txid_concat));
    raw.extend_from_slice(&0u32.to_le_bytes());
    raw.extend_from_slice(&0x1d00_ffffu32.to_le_bytes());
    raw.extend_from_slice(&0u32.to_le_bytes());
    CompactSize::write(&mut raw, txs.len() as u64);
    for tx in &txs {
        raw.extend_from_slice(tx.raw());
    }
    FullBlock::from_raw(&raw).expect("built block parses")
}

/// A linear chain of `length` blocks from genesis, each holding one
/// coinbase paying 50 coins to a per-height script.
pub(crate) fn build_chain(length: u32) -> Vec<FullBlock> {
    let mut chain: Vec<FullBlock> = Vec::with_capacity(length as usize);
    let mut prev = BlockHash::ZERO;
    for height in 0..length {
        let coinbase = build_coinbase(
            height,
            0,
            &[(50_0000_0000, p2pkh_script(height as u8 + 1))],
        );
        let block = build_block(prev, vec![coinbase]);
        prev = BlockHash::from(block.hash());
        chain.push(block);
    }
    chain
}

/// The txid of a block's transaction at `index`.
pub(crate) fn txid_of(block: &FullBlock, index: usize) -> Txid {
    Txid::from(*block.transactions()[index].txid())
}

/// Receives the next payload on a subscription, failing the test on a
/// stall.
pub(crate) async fn next_payload(sub: &mut BusSubscription) -> serde_json::Value {
    tokio::time::timeout(std::time::Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for bus event")
        .expect("bus closed")
}

/// Drains every payload already buffered on a subscription.
pub(crate) async fn drain_payloads(sub: &mut BusSubscription) -> Vec<serde_json::Value> {
    let mut payloads = Vec::new();
    while let Ok(Some(payload)) =
        tokio::time::timeout(std::time::Duration::from_millis(100), sub.recv()).await
    {
        payloads.push(payload);
    }
    payloads
}

/// Polls `condition` until it holds, failing the test after 5 seconds.
pub(crate) async fn wait_until<F, Fut>(condition: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if condition().await {
            return;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for condition"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

/// Checks the cross-table consistency every committed state must satisfy.
pub(crate) async fn assert_store_invariants(store: &MemStore) {
    let tables = store.tables_snapshot().await;

    // Block heights are contiguous from zero.
    let heights: Vec<u32> = tables.blocks.keys().map(|h| h.value()).collect();
    let expected: Vec<u32> = (0..heights.len() as u32).collect();
    assert_eq!(heights, expected, "block heights must be contiguous");

    // A confirmed transaction is listed by the block row at its height.
    for row in tables.txs.values() {
        if let Some(height) = row.height {
            let block = tables
                .blocks
                .get(&height)
                .unwrap_or_else(|| panic!("no block row at height {height} for {}", row.txid));
            assert!(
                block.txids.contains(&row.txid),
                "block at {height} does not list confirmed tx {}",
                row.txid
            );
        }
    }

    // A history row is confirmed exactly when its producer is.
    for history in tables.history.values() {
        let producer = tables
            .txs
            .get(&history.txid)
            .unwrap_or_else(|| panic!("history row references unknown tx {}", history.txid));
        assert_eq!(
            history.height.is_none(),
            producer.height.is_none(),
            "history height out of step with producer {}",
            history.txid
        );

        match history.input_txid {
            None => assert!(
                history.input_height.is_none(),
                "input height set without a spender on {}",
                history.txid
            ),
            Some(spender) => {
                let spender_row = tables
                    .txs
                    .get(&spender)
                    .unwrap_or_else(|| panic!("history row references unknown spender {spender}"));
                assert_eq!(
                    history.input_height.is_none(),
                    spender_row.height.is_none(),
                    "input height out of step with spender {spender}"
                );
            }
        }
    }

    // Color-scan rows are confirmed with both fields or neither.
    for color in tables.color.values() {
        assert_eq!(
            color.blockhash.is_some(),
            color.height.is_some(),
            "color-scan row {} half-confirmed",
            color.txid
        );
    }
}
