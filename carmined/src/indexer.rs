//! Carmine: indexer service wiring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use carmine_fetch::jsonrpc::{connect_to_node, BitcoindConnector};
use carmine_state::{
    ChainSync, ColorDefinition, ColorRescanner, Epobc, EventPublisher, MemColorStore, MemStore,
    MemoryBus, MessageBus, SyncConfig,
};

use crate::{config::CarminedConfig, error::IndexerError};

/// The running indexer: chain synchronizer plus colored-coin rescanner.
pub struct Indexer {
    sync: ChainSync<MemStore, BitcoindConnector>,
    rescanner: ColorRescanner<MemStore>,
    sync_task: tokio::task::JoinHandle<()>,
    rescan_task: tokio::task::JoinHandle<()>,
}

/// Starts the indexer service.
pub async fn start_indexer(
    config: CarminedConfig,
) -> Result<tokio::task::JoinHandle<Result<(), IndexerError>>, IndexerError> {
    startup_message();
    info!("Starting Carmine..");
    spawn_indexer(config).await
}

/// Spawns a new Indexer service.
pub async fn spawn_indexer(
    config: CarminedConfig,
) -> Result<tokio::task::JoinHandle<Result<(), IndexerError>>, IndexerError> {
    config.check_config()?;
    let node = config.node_config();

    info!("Checking connection with node..");
    let connector = connect_to_node(
        node.node_rpc_listen_address,
        node.node_cookie_path,
        node.node_user,
        node.node_password,
        Duration::from_secs(config.rpc_timeout_secs),
    )
    .await?;
    info!(
        " - Connected to node using JsonRPC at address {}.",
        connector.url()
    );

    let store = MemStore::new();
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new(config.bus_capacity));
    let publisher = EventPublisher::new(Arc::clone(&bus));

    let sync_config = SyncConfig {
        poll_interval: Duration::from_millis(config.poll_interval_ms),
        ..SyncConfig::default()
    };
    let sync = ChainSync::new(
        connector,
        store.clone(),
        publisher,
        config.network,
        sync_config,
    );
    let rescanner = ColorRescanner::new(
        store,
        Arc::new(MemColorStore::new()),
        vec![Arc::new(Epobc) as Arc<dyn ColorDefinition>],
    );

    let indexer = Indexer {
        sync_task: sync.start(),
        rescan_task: rescanner.start_listener(&bus),
        sync,
        rescanner,
    };

    let status_interval = Duration::from_secs(config.status_interval_secs.max(1));
    let serve_task = tokio::task::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        let mut last_log_time = Instant::now();

        loop {
            // Log the service statuses.
            if last_log_time.elapsed() >= status_interval {
                indexer.log_status().await;
                last_log_time = Instant::now();
            }

            // A finished driver task means the service can no longer make
            // progress; surface a restart.
            if indexer.sync_task.is_finished() || indexer.rescan_task.is_finished() {
                return Err(IndexerError::Restart);
            }

            ticker.tick().await;
        }
    });

    Ok(serve_task)
}

impl Indexer {
    /// Logs the indexer's status.
    pub async fn log_status(&self) {
        let sync_status = self.sync.status();
        let rescan_status = self.rescanner.status();
        let tip = self.sync.stored_tip().await;

        info!(
            "Carmine status check - ChainSync:{}{} ColorRescanner:{}{} tip:{}",
            sync_status.status_symbol(),
            sync_status,
            rescan_status.status_symbol(),
            rescan_status,
            tip.map(|t| format!("{}@{}", t.hash, t.height))
                .unwrap_or_else(|| "empty".to_string()),
        );
    }
}

/// Prints Carmine's startup message.
fn startup_message() {
    let welcome_message = r#"
   ██████╗ █████╗ ██████╗ ███╗   ███╗██╗███╗   ██╗███████╗
  ██╔════╝██╔══██╗██╔══██╗████╗ ████║██║████╗  ██║██╔════╝
  ██║     ███████║██████╔╝██╔████╔██║██║██╔██╗ ██║█████╗
  ██║     ██╔══██║██╔══██╗██║╚██╔╝██║██║██║╚██╗██║██╔══╝
  ╚██████╗██║  ██║██║  ██║██║ ╚═╝ ██║██║██║ ╚████║███████╗
   ╚═════╝╚═╝  ╚═╝╚═╝  ╚═╝╚═╝     ╚═╝╚═╝╚═╝  ╚═══╝╚══════╝
        Bitcoin chain indexer and mempool synchronizer
    "#;
    println!("{welcome_message}");
}
