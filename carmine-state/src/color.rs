//! Colored-coin scanning on top of the core transaction store.
//!
//! Color definition classes are plug-ins implementing
//! [`ColorDefinition`]; their definition and value storage is an external
//! component reached through [`ColorStore`]. The rescanner
//! ([`rescanner::ColorRescanner`]) maintains the scan frontier and drives
//! the definitions off the core indexer's event stream.

pub mod epobc;
pub mod rescanner;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use carmine_fetch::chain::FullTransaction;

use crate::{
    error::RescanError,
    store::IndexStore,
    types::Txid,
};

pub use epobc::Epobc;
pub use rescanner::ColorRescanner;

/// Read access to raw transactions for scan routines that need to walk
/// parents.
#[async_trait]
pub trait TxFetcher: Send + Sync {
    /// The raw transaction for a txid, if known to the core index.
    async fn raw_tx(&self, txid: &Txid) -> Result<Option<Vec<u8>>, RescanError>;
}

#[async_trait]
impl<S: IndexStore> TxFetcher for S {
    async fn raw_tx(&self, txid: &Txid) -> Result<Option<Vec<u8>>, RescanError> {
        Ok(self.tx_row(txid).await?.map(|row| row.raw))
    }
}

/// The external colored-coin definition and data storage.
#[async_trait]
pub trait ColorStore: Send + Sync + 'static {
    /// All registered definitions for a definition class:
    /// `(id, descriptor)` pairs.
    async fn definitions(&self, code: &str) -> Result<Vec<(u32, String)>, RescanError>;

    /// Registers a definition, returning its id.
    async fn register_definition(&self, code: &str, descriptor: &str)
        -> Result<u32, RescanError>;

    /// Drops a definition by id.
    async fn drop_definition(&self, id: u32) -> Result<(), RescanError>;

    /// Stores per-output color values for `(txid, code)`.
    async fn set_color_values(
        &self,
        txid: &Txid,
        code: &str,
        values: Vec<(u32, u64)>,
    ) -> Result<(), RescanError>;

    /// Removes the color values associated with `(txid, code)`.
    async fn remove_color_values(&self, txid: &Txid, code: &str) -> Result<(), RescanError>;
}

/// A colored-coin definition class.
#[async_trait]
pub trait ColorDefinition: Send + Sync + 'static {
    /// The class code, e.g. `"epobc"`.
    fn code(&self) -> &'static str;

    /// Scans one transaction, writing any definitions or color values it
    /// yields to `colors`.
    async fn full_scan_tx(
        &self,
        tx: &FullTransaction,
        colors: &dyn ColorStore,
        get_tx: &dyn TxFetcher,
    ) -> Result<(), RescanError>;

    /// True if `descriptor` identifies the definition whose genesis is
    /// `txid` under this class.
    fn genesis_id_matches(&self, descriptor: &str, txid: &Txid) -> bool;
}

#[derive(Debug, Default)]
struct ColorTables {
    next_id: u32,
    /// (id, code, descriptor)
    definitions: Vec<(u32, String, String)>,
    values: HashMap<(Txid, String), Vec<(u32, u64)>>,
}

/// In-memory [`ColorStore`] implementation.
#[derive(Debug, Clone, Default)]
pub struct MemColorStore {
    inner: Arc<Mutex<ColorTables>>,
}

impl MemColorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The color values recorded for `(txid, code)`, for lookups and
    /// tests.
    pub fn color_values(&self, txid: &Txid, code: &str) -> Option<Vec<(u32, u64)>> {
        self.inner
            .lock()
            .expect("color tables poisoned")
            .values
            .get(&(*txid, code.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ColorStore for MemColorStore {
    async fn definitions(&self, code: &str) -> Result<Vec<(u32, String)>, RescanError> {
        Ok(self
            .inner
            .lock()
            .expect("color tables poisoned")
            .definitions
            .iter()
            .filter(|(_, row_code, _)| row_code == code)
            .map(|(id, _, descriptor)| (*id, descriptor.clone()))
            .collect())
    }

    async fn register_definition(
        &self,
        code: &str,
        descriptor: &str,
    ) -> Result<u32, RescanError> {
        let mut tables = self.inner.lock().expect("color tables poisoned");
        if let Some((id, _, _)) = tables
            .definitions
            .iter()
            .find(|(_, row_code, row_descriptor)| row_code == code && row_descriptor == descriptor)
        {
            return Ok(*id);
        }
        let id = tables.next_id;
        tables.next_id += 1;
        tables
            .definitions
            .push((id, code.to_string(), descriptor.to_string()));
        Ok(id)
    }

    async fn drop_definition(&self, id: u32) -> Result<(), RescanError> {
        self.inner
            .lock()
            .expect("color tables poisoned")
            .definitions
            .retain(|(row_id, _, _)| *row_id != id);
        Ok(())
    }

    async fn set_color_values(
        &self,
        txid: &Txid,
        code: &str,
        values: Vec<(u32, u64)>,
    ) -> Result<(), RescanError> {
        self.inner
            .lock()
            .expect("color tables poisoned")
            .values
            .insert((*txid, code.to_string()), values);
        Ok(())
    }

    async fn remove_color_values(&self, txid: &Txid, code: &str) -> Result<(), RescanError> {
        self.inner
            .lock()
            .expect("color tables poisoned")
            .values
            .remove(&(*txid, code.to_string()));
        Ok(())
    }
}
