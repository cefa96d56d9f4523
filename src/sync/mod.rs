// ABOUTME: Incremental replication from the authoritative store to secondary stores
// ABOUTME: Watermark probes, chunk planning, chunk transfer and the per-pair orchestrator

pub mod engine;
pub mod planner;
pub mod synchronizer;
pub mod watermark;

pub use engine::{TransferEngine, TransferOutcome};
pub use planner::{ChunkCursor, ChunkPlanner, Plan, PlanStep, MONTHLY_WINDOW_DAYS};
pub use synchronizer::{SkippedDay, SyncOptions, SyncReport, SyncSummary, Synchronizer};
pub use watermark::Watermark;
