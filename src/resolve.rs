//! Multichunk resolution: which containers must be downloaded
//!
//! Inspects only the actions that materialize file content and computes the
//! minimal set of multichunk ids whose bytes are not already obtainable from
//! data the local database knows about. Whole-file matches (an unrelated
//! local file with identical content) and chunk-level overlaps with local
//! files both suppress downloads; byte-range reuse from partially
//! overlapping files is not attempted.

use std::collections::BTreeSet;

use crate::action::FileSystemAction;
use crate::database::{DatabaseSnapshot, LocalDatabase};
use crate::error::ResolveError;
use crate::logging::*;
use crate::model::{FileVersion, MultiChunkId};

/// Compute the deduplicated set of multichunks required to execute `actions`.
///
/// Fails with [`ResolveError::UnresolvableChunk`] when a referenced chunk
/// maps to no multichunk in either database; that indicates a broken winning
/// snapshot and must abort the whole cycle.
pub fn resolve_required_multichunks(
	actions: &[FileSystemAction],
	local: &dyn LocalDatabase,
	winners: &DatabaseSnapshot,
) -> Result<BTreeSet<MultiChunkId>, ResolveError> {
	let mut required = BTreeSet::new();

	for action in actions {
		if !action.materializes_content() {
			continue;
		}
		if let Some(to) = action.to_version() {
			resolve_for_version(to, local, winners, &mut required)?;
		}
	}

	info!(multichunks = required.len(), "resolved multichunks to download");
	Ok(required)
}

fn resolve_for_version(
	version: &FileVersion,
	local: &dyn LocalDatabase,
	winners: &DatabaseSnapshot,
	required: &mut BTreeSet<MultiChunkId>,
) -> Result<(), ResolveError> {
	let checksum = match version.checksum {
		Some(checksum) => checksum,
		None => return Ok(()), // File can be empty
	};

	// Whole-file dedup: an unrelated local file already holds identical
	// content, so the apply stage copies it instead of downloading anything.
	if !local.multichunks_for_file(&checksum).is_empty() {
		debug!(path = %version.path.display(), "content known locally, no download needed");
		return Ok(());
	}

	let content = match winners.get_content(&checksum) {
		Some(content) => content,
		None => return Ok(()), // Validated during reconciliation
	};

	let local_chunks = local.multichunks_for_chunks(&content.chunks);

	for chunk in &content.chunks {
		// Chunk overlaps with a file this client already has, even partially
		if local_chunks.contains_key(chunk) {
			continue;
		}

		let id = winners
			.get_multichunk_for_chunk(chunk)
			.ok_or(ResolveError::UnresolvableChunk { chunk: *chunk })?;

		if required.insert(id) {
			debug!(multichunk = %id, "adding multichunk to download list");
		}
	}

	Ok(())
}


// vim: ts=4
