//! Domain events and their publication.
//!
//! Events are published to an external message bus, one channel per event
//! kind. A publish can be tied to an open storage transaction by queueing
//! the event on the transaction instead; queued events are delivered by
//! [`EventPublisher::commit_and_publish`] only after the transaction
//! commits, and are discarded with a rollback.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

use crate::{
    error::{BusError, StoreError},
    store::StoreTransaction,
    types::{Address, BlockHash, Height, Txid},
};

/// Outcome reported in a `sendtxresponse` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendTxStatus {
    /// The node accepted the transaction.
    Success,
    /// The node rejected the transaction.
    Fail,
}

/// A domain event, one variant per bus channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Response to a transaction submission.
    SendTxResponse {
        /// Correlation id supplied by the submitter.
        id: String,
        /// Whether the node accepted the transaction.
        status: SendTxStatus,
        /// Error code from the node on failure.
        code: Option<i64>,
        /// Normalized error message from the node on failure.
        message: Option<String>,
    },
    /// A block joined the best chain.
    Block {
        /// Hash of the block.
        hash: BlockHash,
        /// Height of the block.
        height: Height,
    },
    /// A transaction was recorded or confirmed.
    Tx {
        /// The transaction id.
        txid: Txid,
        /// Containing block hash, if confirmed.
        blockhash: Option<BlockHash>,
        /// Containing block height, if confirmed.
        blockheight: Option<Height>,
    },
    /// An address's history changed.
    AddressTouched {
        /// The affected address.
        address: Address,
        /// The transaction touching it.
        txid: Txid,
        /// Containing block hash, if confirmed.
        blockhash: Option<BlockHash>,
        /// Containing block height, if confirmed.
        blockheight: Option<Height>,
    },
    /// Free-form status for adjacent services.
    Status(serde_json::Value),
    /// A transaction row was created.
    AddTx {
        /// The transaction id.
        txid: Txid,
        /// Whether the row was created unconfirmed.
        unconfirmed: bool,
    },
    /// A transaction row was removed.
    RemoveTx {
        /// The transaction id.
        txid: Txid,
        /// Whether the row was unconfirmed when removed.
        unconfirmed: bool,
    },
    /// A block row was created.
    AddBlock {
        /// Hash of the block.
        hash: BlockHash,
    },
    /// A block row was removed.
    RemoveBlock {
        /// Hash of the block.
        hash: BlockHash,
    },
}

impl Event {
    /// The bus channel this event is delivered on.
    pub fn channel(&self) -> &'static str {
        match self {
            Event::SendTxResponse { .. } => "sendtxresponse",
            Event::Block { .. } => "broadcastblock",
            Event::Tx { .. } => "broadcasttx",
            Event::AddressTouched { .. } => "broadcastaddress",
            Event::Status(_) => "broadcaststatus",
            Event::AddTx { .. } => "addtx",
            Event::RemoveTx { .. } => "removetx",
            Event::AddBlock { .. } => "addblock",
            Event::RemoveBlock { .. } => "removeblock",
        }
    }

    /// The wire payload delivered on the bus.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Event::SendTxResponse {
                id,
                status,
                code,
                message,
            } => json!({
                "id": id,
                "status": status,
                "code": code,
                "message": message,
            }),
            Event::Block { hash, height } => json!({
                "hash": hash.to_string(),
                "height": height.value(),
            }),
            Event::Tx {
                txid,
                blockhash,
                blockheight,
            } => json!({
                "txid": txid.to_string(),
                "blockhash": blockhash.map(|h| h.to_string()),
                "blockheight": blockheight.map(|h| h.value()),
            }),
            Event::AddressTouched {
                address,
                txid,
                blockhash,
                blockheight,
            } => json!({
                "address": address.as_str(),
                "txid": txid.to_string(),
                "blockhash": blockhash.map(|h| h.to_string()),
                "blockheight": blockheight.map(|h| h.value()),
            }),
            Event::Status(status) => status.clone(),
            Event::AddTx { txid, unconfirmed } => json!({
                "txid": txid.to_string(),
                "unconfirmed": unconfirmed,
            }),
            Event::RemoveTx { txid, unconfirmed } => json!({
                "txid": txid.to_string(),
                "unconfirmed": unconfirmed,
            }),
            Event::AddBlock { hash } => json!({ "hash": hash.to_string() }),
            Event::RemoveBlock { hash } => json!({ "hash": hash.to_string() }),
        }
    }
}

/// Strips control characters from a node error message before it goes on
/// the wire.
pub fn normalize_message(message: &str) -> String {
    message.chars().filter(|c| !c.is_control()).collect()
}

/// A message as carried on the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The channel the message was published on.
    pub channel: Arc<str>,
    /// The JSON payload.
    pub payload: serde_json::Value,
}

/// The external notification bus.
///
/// `notify` delivers immediately; transactional delivery is layered on top
/// via the storage outbox (see module docs).
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publishes a payload on a channel.
    async fn notify(&self, channel: &str, payload: serde_json::Value) -> Result<(), BusError>;

    /// Subscribes to a channel.
    fn listen(&self, channel: &str) -> BusSubscription;
}

/// A subscription to a single bus channel.
pub struct BusSubscription {
    channel: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl BusSubscription {
    /// Receives the next payload on the subscribed channel, or None when
    /// the bus is gone.
    pub async fn recv(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if message.channel.as_ref() == self.channel => {
                    return Some(message.payload)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(
                        channel = %self.channel,
                        missed, "bus subscription lagged, messages dropped"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-process message bus over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<BusMessage>,
}

impl MemoryBus {
    /// Creates a bus retaining up to `capacity` undelivered messages per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn notify(&self, channel: &str, payload: serde_json::Value) -> Result<(), BusError> {
        // A send with no subscribers is not an error for a notification
        // bus.
        let _ = self.sender.send(BusMessage {
            channel: channel.into(),
            payload,
        });
        Ok(())
    }

    fn listen(&self, channel: &str) -> BusSubscription {
        BusSubscription {
            channel: channel.to_string(),
            receiver: self.sender.subscribe(),
        }
    }
}

/// Typed notification facade over the external message bus.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn MessageBus>,
}

impl EventPublisher {
    /// Creates a publisher over the given bus.
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// The underlying bus.
    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// Publishes an event immediately.
    pub async fn publish(&self, event: Event) -> Result<(), BusError> {
        self.bus.notify(event.channel(), event.payload()).await
    }

    /// Publishes a batch of events, logging failures without aborting the
    /// batch.
    pub async fn publish_all(&self, events: Vec<Event>) {
        for event in events {
            if let Err(e) = self.publish(event).await {
                warn!("failed to publish event: {e}");
            }
        }
    }

    /// Commits the transaction and delivers its queued events.
    ///
    /// On commit failure the events are discarded along with the writes,
    /// so subscribers never observe a rolled back transaction.
    pub async fn commit_and_publish<T: StoreTransaction>(&self, tx: T) -> Result<(), StoreError> {
        let events = tx.commit().await?;
        self.publish_all(events).await;
        Ok(())
    }
}
