// ABOUTME: Library root for archive-replicator
// ABOUTME: Exports the replication core, store adapters and CLI command implementations

pub mod commands;
pub mod config;
pub mod error;
pub mod scan_index;
pub mod schema;
pub mod store;
pub mod sync;
pub mod table;
pub mod time;
pub mod triple;
pub mod utils;

pub use error::{StoreError, SyncError};
pub use table::{TableClass, TableDescriptor, TransferRange};
pub use time::Timestamp;
