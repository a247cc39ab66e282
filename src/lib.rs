//! # chunkdown - reconciliation-and-apply engine
//!
//! chunkdown converges a local directory toward the already-resolved winning
//! state of a chunk-deduplicated, encrypted remote repository. One cycle
//! diffs the local database state against the winning snapshot, downloads
//! and decrypts only the multichunk containers whose data is not already
//! available locally, and executes the resulting filesystem actions in
//! dependency order with per-action failure isolation.
//!
//! Remote storage, the conflict-winner election, the crypto primitives and
//! the persistent local index are external collaborators reached through
//! the traits in [`transfer`] and [`database`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chunkdown::{apply_changes, ApplyConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ApplyConfig::new("/data/sync".as_ref(), "/data/cache".as_ref());
//!     let result =
//!         apply_changes(&config, &local_db, &winners, &transfer, &transformer).await?;
//!     println!("applied {} actions", result.applied.total());
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod apply;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod order;
pub mod reconcile;
pub mod resolve;
pub mod transfer;

// Re-export commonly used types and functions
pub use action::{ActionCounts, FileSystemAction};
pub use config::ApplyConfig;
pub use database::{DatabaseSnapshot, LocalDatabase, MemoryLocalDatabase};
pub use error::{ActionError, ApplyError, FetchError, ReconcileError, ResolveError, TransferError};
pub use model::{
	ChunkChecksum, ChunkEntry, FileChecksum, FileContent, FileHistoryId, FileStatus, FileType,
	FileVersion, MultiChunkEntry, MultiChunkId, PartialFileHistory,
};
pub use reconcile::ChangeSet;
pub use transfer::{IdentityTransformer, TransferManager, Transformer};

use std::path::PathBuf;

use crate::action::ApplyContext;
use crate::cache::Cache;
use crate::logging::*;

/// How far one cycle got toward the winning state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
	/// Every action applied cleanly
	FullyConverged,
	/// The tree converged, but local data drifted on the way: conflict
	/// copies were created and/or actions were skipped as inconsistent
	ConvergedWithConflicts(usize),
}

/// Structured result of one completed apply cycle.
///
/// Aborted cycles surface as [`ApplyError`] instead; there is no silent
/// partial success indistinguishable from full success.
#[derive(Debug)]
pub struct ApplyChangesResult {
	/// Multichunks downloaded and decrypted during the fetch stage
	pub downloaded_multichunks: usize,
	/// Successfully applied actions, by kind
	pub applied: ActionCounts,
	/// Conflict copies created to preserve drifted local files
	pub conflicts_created: Vec<PathBuf>,
	/// Paths skipped with an inconsistent-filesystem condition
	pub inconsistent_paths: Vec<PathBuf>,
	/// Paths whose action failed with a recorded I/O error
	pub failed_paths: Vec<PathBuf>,
	/// Path-level summary from reconciliation, for reporting
	pub change_set: ChangeSet,
}

impl ApplyChangesResult {
	pub fn convergence(&self) -> Convergence {
		let drifted =
			self.conflicts_created.len() + self.inconsistent_paths.len() + self.failed_paths.len();
		if drifted == 0 {
			Convergence::FullyConverged
		} else {
			Convergence::ConvergedWithConflicts(drifted)
		}
	}
}

/// Run one full reconciliation-and-apply cycle.
///
/// Stages run strictly in sequence: reconcile, resolve, fetch (awaited to
/// completion before any action executes), order, apply. The local database
/// is never mutated here; callers persist the winning snapshot as the new
/// local state only after this returns `Ok`, so an aborted cycle simply
/// re-reconciles from the true disk state next time.
pub async fn apply_changes(
	config: &ApplyConfig,
	local: &dyn LocalDatabase,
	winners: &DatabaseSnapshot,
	transfer: &dyn TransferManager,
	transformer: &dyn Transformer,
) -> Result<ApplyChangesResult, ApplyError> {
	info!("determining file system actions");
	let local_tree = local.current_file_tree();
	let reconciliation = reconcile::reconcile(&local_tree, winners)?;

	let required = resolve::resolve_required_multichunks(&reconciliation.actions, local, winners)?;

	let cache = Cache::open(&config.cache_dir)
		.map_err(|e| ApplyError::Cache { path: config.cache_dir.clone(), source: e })?;
	let download_report = fetch::fetch_multichunks(&required, transfer, transformer, &cache).await?;

	let sorted = order::sort_actions(reconciliation.actions);
	let ctx = ApplyContext::new(config, &cache, local, winners, &local_tree);
	let apply_report = apply::apply_actions(&sorted, &ctx)?;

	Ok(ApplyChangesResult {
		downloaded_multichunks: download_report.downloaded.len(),
		applied: apply_report.counts,
		conflicts_created: apply_report.conflicts,
		inconsistent_paths: apply_report.inconsistent,
		failed_paths: apply_report.failed,
		change_set: reconciliation.change_set,
	})
}

// vim: ts=4
