//! Error types for the reconciliation-and-apply cycle
//!
//! Errors are partitioned the way the pipeline treats them: everything in
//! [`ApplyError`] aborts the whole cycle and leaves the local database
//! untouched, while [`ActionError`] values are raised per filesystem action
//! and (except for space exhaustion) recorded without stopping the cycle.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::model::{ChunkChecksum, FileChecksum, MultiChunkId};

/// Fatal errors aborting an entire apply cycle
#[derive(Debug)]
pub enum ApplyError {
	/// Reconciliation failed (broken winning snapshot)
	Reconcile(ReconcileError),

	/// Multichunk resolution failed (broken winning snapshot)
	Resolve(ResolveError),

	/// Download or decrypt failure during the fetch stage
	Fetch(FetchError),

	/// Local cache directory could not be prepared
	Cache { path: PathBuf, source: io::Error },

	/// Apply stage aborted early (systemic failure such as a full disk)
	Aborted { reason: String },
}

impl fmt::Display for ApplyError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ApplyError::Reconcile(e) => write!(f, "Reconciliation failed: {}", e),
			ApplyError::Resolve(e) => write!(f, "Multichunk resolution failed: {}", e),
			ApplyError::Fetch(e) => write!(f, "Fetch failed: {}", e),
			ApplyError::Cache { path, source } => {
				write!(f, "Cache directory {} unusable: {}", path.display(), source)
			}
			ApplyError::Aborted { reason } => write!(f, "Apply cycle aborted: {}", reason),
		}
	}
}

impl Error for ApplyError {}

impl From<ReconcileError> for ApplyError {
	fn from(e: ReconcileError) -> Self {
		ApplyError::Reconcile(e)
	}
}

impl From<ResolveError> for ApplyError {
	fn from(e: ResolveError) -> Self {
		ApplyError::Resolve(e)
	}
}

impl From<FetchError> for ApplyError {
	fn from(e: FetchError) -> Self {
		ApplyError::Fetch(e)
	}
}

/// Errors detected while diffing the local tree against the winning snapshot
#[derive(Debug)]
pub enum ReconcileError {
	/// A winning file version references a content checksum with no content record
	MissingContent { path: PathBuf, checksum: FileChecksum },
}

impl fmt::Display for ReconcileError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ReconcileError::MissingContent { path, checksum } => {
				write!(f, "No content record for {} (checksum {})", path.display(), checksum)
			}
		}
	}
}

impl Error for ReconcileError {}

/// Errors detected while resolving required multichunks
#[derive(Debug)]
pub enum ResolveError {
	/// A chunk maps to no multichunk in either the local or the winning database
	UnresolvableChunk { chunk: ChunkChecksum },
}

impl fmt::Display for ResolveError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ResolveError::UnresolvableChunk { chunk } => {
				write!(f, "Cannot find multichunk for chunk {}", chunk)
			}
		}
	}
}

impl Error for ResolveError {}

/// Errors from the remote transport
#[derive(Debug)]
pub enum TransferError {
	/// Remote object does not exist
	NotFound { name: String },

	/// Transport-level failure
	Storage { message: String },

	/// I/O failure writing the downloaded object
	Io(io::Error),
}

impl fmt::Display for TransferError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransferError::NotFound { name } => write!(f, "Remote file not found: {}", name),
			TransferError::Storage { message } => write!(f, "Storage error: {}", message),
			TransferError::Io(e) => write!(f, "Transfer I/O error: {}", e),
		}
	}
}

impl Error for TransferError {}

impl From<io::Error> for TransferError {
	fn from(e: io::Error) -> Self {
		TransferError::Io(e)
	}
}

/// Errors from the fetch-and-decrypt stage
#[derive(Debug)]
pub enum FetchError {
	/// Download of one multichunk failed
	Download { id: MultiChunkId, source: TransferError },

	/// Decrypt/decompress of one multichunk failed
	Decrypt { id: MultiChunkId, source: io::Error },

	/// Local cache I/O failure
	Cache { source: io::Error },
}

impl fmt::Display for FetchError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FetchError::Download { id, source } => {
				write!(f, "Failed to download multichunk {}: {}", id, source)
			}
			FetchError::Decrypt { id, source } => {
				write!(f, "Failed to decrypt multichunk {}: {}", id, source)
			}
			FetchError::Cache { source } => write!(f, "Cache I/O error: {}", source),
		}
	}
}

impl Error for FetchError {}

impl From<io::Error> for FetchError {
	fn from(e: io::Error) -> Self {
		FetchError::Cache { source: e }
	}
}

/// Per-action errors raised while executing filesystem actions
#[derive(Debug)]
pub enum ActionError {
	/// The live filesystem no longer matches the precondition the action
	/// was computed against; the action is skipped, the cycle continues.
	InconsistentFilesystem { path: PathBuf, reason: String },

	/// Disk or quota exhaustion; aborts the remaining actions
	NoSpace { path: PathBuf },

	/// Any other I/O failure; recorded per action
	Io { path: PathBuf, source: io::Error },
}

impl ActionError {
	/// Wrap an I/O error for `path`, classifying space exhaustion
	pub fn from_io(path: PathBuf, source: io::Error) -> Self {
		if is_no_space(&source) {
			ActionError::NoSpace { path }
		} else {
			ActionError::Io { path, source }
		}
	}
}

impl fmt::Display for ActionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ActionError::InconsistentFilesystem { path, reason } => {
				write!(f, "Inconsistent filesystem at {}: {}", path.display(), reason)
			}
			ActionError::NoSpace { path } => {
				write!(f, "No space left on device while writing {}", path.display())
			}
			ActionError::Io { path, source } => {
				write!(f, "I/O error at {}: {}", path.display(), source)
			}
		}
	}
}

impl Error for ActionError {}

/// Whether an I/O error indicates disk or quota exhaustion
fn is_no_space(e: &io::Error) -> bool {
	// ENOSPC = 28, EDQUOT = 122 on Linux
	matches!(e.raw_os_error(), Some(28) | Some(122))
}


// vim: ts=4
