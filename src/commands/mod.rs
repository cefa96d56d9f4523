// ABOUTME: Command implementations for the CLI
// ABOUTME: Exports sync, fill and write-abin, plus the shared setup they build on

pub mod fill;
pub mod sync;
pub mod write_abin;

pub use fill::fill;
pub use sync::sync;
pub use write_abin::write_abin;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, EndpointConfig};
use crate::scan_index::{ScanIndexCache, ScanIndexDir, ScanIndexSource};
use crate::schema::SchemaCatalog;
use crate::store::{self, Store};
use crate::sync::{ChunkPlanner, SyncOptions, Synchronizer};

/// Build a synchronizer over the configured source.
pub(crate) async fn build_synchronizer(
    config: &Config,
    dry_run: bool,
    cancel: CancellationToken,
) -> Result<Synchronizer> {
    let catalog = SchemaCatalog::load(&config.schema_file).await?;
    let source = store::connect(&config.source)
        .await
        .context("Failed to open source")?;

    let scan_index = config.scan_index_dir.as_ref().map(|dir| {
        let dir: Arc<dyn ScanIndexSource> = Arc::new(ScanIndexDir::new(dir));
        Arc::new(ScanIndexCache::new(dir)) as Arc<dyn ScanIndexSource>
    });
    if scan_index.is_none() {
        tracing::debug!("No scan_index_dir configured; daily tables will skip every day");
    }

    Ok(Synchronizer::new(
        source,
        Arc::new(catalog),
        ChunkPlanner::new(scan_index),
        config.timeouts(),
        config.batch_size,
    )
    .with_options(SyncOptions {
        dry_run,
        parallel_destinations: config.parallel_destinations,
    })
    .with_cancellation(cancel))
}

/// Open each destination. One that cannot be opened still takes part and
/// fails its own pairs as unavailable.
pub(crate) async fn connect_destinations(endpoints: &[&EndpointConfig]) -> Vec<Arc<dyn Store>> {
    let mut stores = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        stores.push(store::connect_or_unreachable(endpoint).await);
    }
    stores
}
