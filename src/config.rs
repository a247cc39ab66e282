//! Apply-cycle configuration
//!
//! All directories and policy knobs are resolved once by the caller and
//! threaded through the pipeline explicitly; the engine never consults
//! ambient state such as home-directory or app-data paths.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for one reconciliation-and-apply cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyConfig {
	/// Root of the synchronized local directory
	pub local_root: PathBuf,

	/// Directory holding downloaded and decrypted multichunks.
	///
	/// Scoped to one repository; callers must serialize sync cycles per
	/// repository so two cycles never mutate the same cache concurrently.
	pub cache_dir: PathBuf,

	/// Marker inserted into conflict-copy filenames
	pub conflict_suffix: String,

	/// Abort the apply stage after this many consecutive action failures
	/// that are neither inconsistencies nor space exhaustion
	pub max_systemic_failures: usize,
}

impl ApplyConfig {
	pub fn new(local_root: &Path, cache_dir: &Path) -> Self {
		ApplyConfig {
			local_root: local_root.to_path_buf(),
			cache_dir: cache_dir.to_path_buf(),
			conflict_suffix: "conflicted copy".to_string(),
			max_systemic_failures: 5,
		}
	}
}


// vim: ts=4
