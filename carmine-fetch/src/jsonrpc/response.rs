//! Response types for the JsonRPC client.

/// Response to a `getblockchaininfo` RPC request, reduced to the fields
/// the indexer consumes.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct GetBlockchainInfoResponse {
    /// Current network name as defined in BIP70 (main, test, regtest).
    pub chain: String,

    /// The current number of blocks processed in the server, numeric.
    pub blocks: u32,

    /// The hash of the currently best block, in big-endian order,
    /// hex-encoded.
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: String,

    /// Whether the node is still in initial block download.
    #[serde(default)]
    #[serde(rename = "initialblockdownload")]
    pub initial_block_download: bool,
}

/// Response to a `getblockcount` RPC request.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct GetBlockCountResponse(pub u32);

/// Response to a `getblockhash` / `getbestblockhash` RPC request: a block
/// hash in big-endian order, hex-encoded.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct GetBlockHashResponse(pub String);

/// Response to a `getblock`/`getrawtransaction` request at verbosity 0:
/// the raw object, hex-encoded.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct RawHexResponse(pub String);

/// Response to a `getrawmempool` RPC request.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct TxidsResponse {
    /// Mempool transaction ids in big-endian order, hex-encoded.
    pub transactions: Vec<String>,
}

/// Response to a `sendrawtransaction` RPC request: the txid of the
/// accepted transaction.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct SendTransactionResponse(pub String);
