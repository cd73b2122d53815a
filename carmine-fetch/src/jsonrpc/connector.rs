//! JsonRPC client implementation for bitcoind-compatible nodes.

use base64::{engine::general_purpose, Engine};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::{
    any::type_name,
    fmt, fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::warn;

use crate::jsonrpc::{
    error::TransportError,
    response::{
        GetBlockCountResponse, GetBlockHashResponse, GetBlockchainInfoResponse, RawHexResponse,
        SendTransactionResponse, TxidsResponse,
    },
};

/// JSON-RPC error code bitcoind returns for a block or transaction that is
/// not found (`RPC_INVALID_ADDRESS_OR_KEY`).
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
/// JSON-RPC error code for a block height out of range
/// (`RPC_INVALID_PARAMETER`).
const RPC_INVALID_PARAMETER: i64 = -8;

/// TCP connect deadline for every request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Attempts against a node that is shedding RPCs before the call fails.
const BUSY_RETRY_LIMIT: u32 = 4;
/// Base delay between busy retries; scales linearly with the attempt.
const BUSY_BACKOFF: Duration = Duration::from_millis(250);
/// Body fragment bitcoind sends alongside HTTP 503 when its RPC work
/// queue is saturated.
const BUSY_NODE_MARKER: &str = "Work queue depth exceeded";
/// Startup probes before a node is declared unreachable.
const PROBE_ATTEMPTS: u32 = 5;
/// Delay between startup probes.
const PROBE_DELAY: Duration = Duration::from_secs(2);

/// The envelope every JSON-RPC response arrives in. Exactly one of
/// `result` and `error` is populated.
#[derive(Debug, serde::Deserialize)]
struct RpcEnvelope<R> {
    result: Option<R>,
    error: Option<RpcError>,
}

/// Error object returned by the node inside a JSON-RPC response.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct RpcError {
    /// Error Code.
    pub code: i64,
    /// Error Message.
    pub message: String,
    /// Error Data.
    pub data: Option<Value>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Error type for JSON-RPC requests.
#[derive(Debug, thiserror::Error)]
pub enum RpcRequestError {
    /// Error variant for errors related to the transport layer.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The node returned an error object for this method call.
    #[error("{0}")]
    Rpc(RpcError),

    /// The node is shedding RPCs and stayed saturated through retries.
    #[error("node RPC work queue saturated")]
    NodeBusy,
}

impl RpcRequestError {
    /// True if the node reported the requested object as unknown rather
    /// than failing the call itself.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RpcRequestError::Rpc(RpcError { code, .. })
                if *code == RPC_INVALID_ADDRESS_OR_KEY || *code == RPC_INVALID_PARAMETER
        )
    }
}

/// The `Authorization` header value for HTTP basic auth.
fn basic_auth_header(username: &str, password: &str) -> String {
    let credentials = general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {credentials}")
}

/// Extracts the auth token from an RPC cookie file.
///
/// bitcoind writes its cookie as `__cookie__:<token>`; a bare token is
/// accepted for other cookie sources.
fn cookie_token(cookie_path: &Path) -> Result<String, TransportError> {
    let raw = fs::read_to_string(cookie_path)
        .map_err(|e| TransportError::CookieReadError(e, cookie_path.to_path_buf()))?;
    let trimmed = raw.trim();
    let token = match trimmed.split_once(':') {
        Some(("__cookie__", secret)) => secret,
        _ => trimmed,
    };
    Ok(token.to_string())
}

/// JsonRPC client for a bitcoind-compatible full node.
///
/// Authentication is resolved once at construction into an
/// `Authorization` header value; every request carries it.
#[derive(Debug, Clone)]
pub struct BitcoindConnector {
    url: Url,
    client: Client,
    auth_header: String,
    request_id: Arc<AtomicU64>,
}

impl BitcoindConnector {
    fn build(url: Url, auth_header: String, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            url,
            client,
            auth_header,
            request_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Creates a new BitcoindConnector with Basic Authentication.
    pub fn new_with_basic_auth(
        url: Url,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        Self::build(url, basic_auth_header(username, password), timeout)
    }

    /// Creates a new BitcoindConnector with Cookie Authentication.
    pub fn new_with_cookie_auth(
        url: Url,
        cookie_path: &Path,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let token = cookie_token(cookie_path)?;
        Self::build(url, basic_auth_header("__cookie__", &token), timeout)
    }

    /// Returns the url the connector is configured to send requests to.
    pub fn url(&self) -> Url {
        self.url.clone()
    }

    /// Sends one JsonRPC call and decodes the response envelope.
    ///
    /// A saturated node (HTTP 503 or the work-queue body marker) is
    /// retried with a linearly growing backoff before the call fails.
    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, RpcRequestError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let mut attempt = 0;
        loop {
            attempt += 1;

            let response = self
                .client
                .post(self.url.clone())
                .header(reqwest::header::AUTHORIZATION, self.auth_header.as_str())
                .json(&body)
                .send()
                .await
                .map_err(TransportError::from)?;
            let status = response.status();
            let bytes = response.bytes().await.map_err(TransportError::from)?;

            if status == StatusCode::SERVICE_UNAVAILABLE
                || String::from_utf8_lossy(&bytes).contains(BUSY_NODE_MARKER)
            {
                if attempt >= BUSY_RETRY_LIMIT {
                    return Err(RpcRequestError::NodeBusy);
                }
                tokio::time::sleep(BUSY_BACKOFF * attempt).await;
                continue;
            }

            if status.is_informational() || status.is_redirection() {
                return Err(TransportError::UnexpectedStatusCode(status.as_u16()).into());
            }

            // Success and error statuses both carry a JSON-RPC envelope
            // (bitcoind answers method errors with HTTP 500).
            let envelope: RpcEnvelope<R> = match serde_json::from_slice(&bytes) {
                Ok(envelope) => envelope,
                Err(e) if status.is_success() => {
                    return Err(
                        TransportError::BadNodeData(Box::new(e), type_name::<R>()).into()
                    )
                }
                Err(_) => return Err(TransportError::ErrorStatusCode(status.as_u16()).into()),
            };

            return match (envelope.error, envelope.result) {
                (Some(error), _) => Err(RpcRequestError::Rpc(error)),
                (None, Some(result)) => Ok(result),
                (None, None) => Err(TransportError::EmptyResponseBody.into()),
            };
        }
    }

    /// Returns chain information from the node.
    ///
    /// bitcoind reference: [`getblockchaininfo`](https://developer.bitcoin.org/reference/rpc/getblockchaininfo.html)
    /// method: post
    /// tags: blockchain
    pub async fn get_blockchain_info(
        &self,
    ) -> Result<GetBlockchainInfoResponse, RpcRequestError> {
        self.call("getblockchaininfo", json!([])).await
    }

    /// Returns the height of the most recent block in the best valid block
    /// chain.
    ///
    /// bitcoind reference: [`getblockcount`](https://developer.bitcoin.org/reference/rpc/getblockcount.html)
    /// method: post
    /// tags: blockchain
    pub async fn get_block_count(&self) -> Result<GetBlockCountResponse, RpcRequestError> {
        self.call("getblockcount", json!([])).await
    }

    /// Returns the hash of the best block (tip) of the longest chain.
    ///
    /// bitcoind reference: [`getbestblockhash`](https://developer.bitcoin.org/reference/rpc/getbestblockhash.html)
    /// method: post
    /// tags: blockchain
    pub async fn get_best_block_hash(&self) -> Result<GetBlockHashResponse, RpcRequestError> {
        self.call("getbestblockhash", json!([])).await
    }

    /// Returns the hash of the block at `height` in the best chain.
    ///
    /// bitcoind reference: [`getblockhash`](https://developer.bitcoin.org/reference/rpc/getblockhash.html)
    /// method: post
    /// tags: blockchain
    pub async fn get_block_hash(
        &self,
        height: u32,
    ) -> Result<GetBlockHashResponse, RpcRequestError> {
        self.call("getblockhash", json!([height])).await
    }

    /// Returns the requested block as raw hex (verbosity 0).
    ///
    /// bitcoind reference: [`getblock`](https://developer.bitcoin.org/reference/rpc/getblock.html)
    /// method: post
    /// tags: blockchain
    pub async fn get_block_raw(&self, hash_hex: &str) -> Result<RawHexResponse, RpcRequestError> {
        self.call("getblock", json!([hash_hex, 0])).await
    }

    /// Returns the raw transaction data as hex.
    ///
    /// bitcoind reference: [`getrawtransaction`](https://developer.bitcoin.org/reference/rpc/getrawtransaction.html)
    /// method: post
    /// tags: transaction
    pub async fn get_raw_transaction(
        &self,
        txid_hex: &str,
    ) -> Result<RawHexResponse, RpcRequestError> {
        self.call("getrawtransaction", json!([txid_hex, false])).await
    }

    /// Returns all transaction ids in the memory pool.
    ///
    /// bitcoind reference: [`getrawmempool`](https://developer.bitcoin.org/reference/rpc/getrawmempool.html)
    /// method: post
    /// tags: blockchain
    pub async fn get_raw_mempool(&self) -> Result<TxidsResponse, RpcRequestError> {
        self.call("getrawmempool", json!([])).await
    }

    /// Sends the raw bytes of a signed transaction to the node's mempool,
    /// if the transaction is valid.
    ///
    /// bitcoind reference: [`sendrawtransaction`](https://developer.bitcoin.org/reference/rpc/sendrawtransaction.html)
    /// method: post
    /// tags: transaction
    pub async fn send_raw_transaction(
        &self,
        raw_transaction_hex: &str,
    ) -> Result<SendTransactionResponse, RpcRequestError> {
        self.call("sendrawtransaction", json!([raw_transaction_hex]))
            .await
    }
}

/// Builds a connector for the node at `addr` and verifies it answers,
/// retrying while the node finishes starting up.
pub async fn connect_to_node(
    addr: SocketAddr,
    cookie_path: Option<PathBuf>,
    user: Option<String>,
    password: Option<String>,
    timeout: Duration,
) -> Result<BitcoindConnector, TransportError> {
    let host = match addr.ip() {
        IpAddr::V6(ip) => format!("[{ip}]"),
        ip => ip.to_string(),
    };
    let url: Url = format!("http://{host}:{}/", addr.port()).parse()?;

    let connector = match cookie_path {
        Some(path) => BitcoindConnector::new_with_cookie_auth(url, &path, timeout)?,
        None => BitcoindConnector::new_with_basic_auth(
            url,
            user.as_deref().unwrap_or("xxxxxx"),
            password.as_deref().unwrap_or("xxxxxx"),
            timeout,
        )?,
    };

    for attempt in 1..=PROBE_ATTEMPTS {
        match connector.get_block_count().await {
            Ok(_) => return Ok(connector),
            Err(e) => warn!("node probe {attempt}/{PROBE_ATTEMPTS} failed: {e}"),
        }
        if attempt < PROBE_ATTEMPTS {
            tokio::time::sleep(PROBE_DELAY).await;
        }
    }
    Err(TransportError::NodeUnreachable(connector.url().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_token_strips_the_bitcoind_prefix() {
        let dir = std::env::temp_dir();
        let path = dir.join("carmine-connector-cookie-test");
        fs::write(&path, "__cookie__:s3cr3t-token\n").unwrap();
        assert_eq!(cookie_token(&path).unwrap(), "s3cr3t-token");

        fs::write(&path, "bare-token\n").unwrap();
        assert_eq!(cookie_token(&path).unwrap(), "bare-token");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_cookie_is_a_read_error() {
        let result = cookie_token(Path::new("/definitely/not/a.cookie"));
        assert!(matches!(result, Err(TransportError::CookieReadError(_, _))));
    }

    #[test]
    fn not_found_classifier_matches_bitcoind_codes() {
        let not_found = RpcRequestError::Rpc(RpcError {
            code: RPC_INVALID_ADDRESS_OR_KEY,
            message: "Block not found".to_string(),
            data: None,
        });
        assert!(not_found.is_not_found());

        let misc = RpcRequestError::Rpc(RpcError {
            code: -32600,
            message: "Invalid Request".to_string(),
            data: None,
        });
        assert!(!misc.is_not_found());
        assert!(!RpcRequestError::NodeBusy.is_not_found());
    }

    #[test]
    fn envelope_decodes_result_and_error_sides() {
        let ok: RpcEnvelope<GetBlockCountResponse> =
            serde_json::from_str(r#"{"result":812345,"error":null,"id":1}"#).unwrap();
        assert_eq!(ok.result, Some(GetBlockCountResponse(812345)));
        assert!(ok.error.is_none());

        let err: RpcEnvelope<GetBlockCountResponse> = serde_json::from_str(
            r#"{"result":null,"error":{"code":-5,"message":"Block not found"},"id":2}"#,
        )
        .unwrap();
        assert!(err.result.is_none());
        assert_eq!(err.error.unwrap().code, -5);
    }
}
