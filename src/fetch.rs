//! Fetch-and-decrypt pipeline
//!
//! Retrieves each required multichunk from remote storage, decrypts and
//! decompresses it into the local cache, verifies the decrypted container's
//! chunk checksums, and deletes the transient encrypted copy. Multichunks
//! are independent units with no required ordering; this
//! implementation processes them sequentially, but callers must not rely on
//! a traversal order. Any failure aborts the cycle, and the transport
//! connection is released on both success and failure paths.

use std::collections::BTreeSet;
use std::fs;
use std::io;

use crate::cache::{verify_multichunk, Cache};
use crate::error::FetchError;
use crate::logging::*;
use crate::model::MultiChunkId;
use crate::transfer::{TransferManager, Transformer};

/// What one fetch stage downloaded
#[derive(Debug, Default)]
pub struct DownloadReport {
	/// Multichunks downloaded and decrypted in this stage
	pub downloaded: Vec<MultiChunkId>,
	/// Multichunks already present in the cache from earlier cycles
	pub already_cached: usize,
}

/// Download and decrypt every multichunk in `required` into the cache.
///
/// The transport is disconnected before returning, regardless of outcome.
pub async fn fetch_multichunks(
	required: &BTreeSet<MultiChunkId>,
	transfer: &dyn TransferManager,
	transformer: &dyn Transformer,
	cache: &Cache,
) -> Result<DownloadReport, FetchError> {
	let result = fetch_all(required, transfer, transformer, cache).await;

	// Scoped release: the connection is never leaked past the fetch stage
	if let Err(e) = transfer.disconnect().await {
		warn!(error = %e, "failed to disconnect transport");
	}

	result
}

async fn fetch_all(
	required: &BTreeSet<MultiChunkId>,
	transfer: &dyn TransferManager,
	transformer: &dyn Transformer,
	cache: &Cache,
) -> Result<DownloadReport, FetchError> {
	let mut report = DownloadReport::default();
	info!(multichunks = required.len(), "downloading and extracting multichunks");

	// Encrypted leftovers from an aborted earlier fetch are never reusable
	cache.cleanup_encrypted().map_err(|e| FetchError::Cache { source: e })?;

	for id in required {
		if cache.has_multichunk(id) {
			debug!(multichunk = %id, "already in cache, skipping download");
			report.already_cached += 1;
			continue;
		}

		let encrypted = cache.encrypted_multichunk_path(id);
		let decrypted = cache.decrypted_multichunk_path(id);

		debug!(multichunk = %id, "downloading");
		transfer
			.download(id, &encrypted)
			.await
			.map_err(|e| FetchError::Download { id: *id, source: e })?;

		debug!(multichunk = %id, "decrypting");
		decrypt_to_cache(transformer, &encrypted, &decrypted)
			.map_err(|e| FetchError::Decrypt { id: *id, source: e })?;

		// A container that fails its chunk checksums must never be cached
		if !verify_multichunk(&decrypted).map_err(|e| FetchError::Decrypt { id: *id, source: e })? {
			let _ = fs::remove_file(&decrypted);
			return Err(FetchError::Decrypt {
				id: *id,
				source: io::Error::new(
					io::ErrorKind::InvalidData,
					"chunk checksum mismatch in decrypted multichunk",
				),
			});
		}

		// The encrypted copy is transient; only the decrypted form is cached
		fs::remove_file(&encrypted).map_err(|e| FetchError::Cache { source: e })?;

		report.downloaded.push(*id);
	}

	info!(
		downloaded = report.downloaded.len(),
		cached = report.already_cached,
		"fetch stage complete"
	);
	Ok(report)
}

fn decrypt_to_cache(
	transformer: &dyn Transformer,
	encrypted: &std::path::Path,
	decrypted: &std::path::Path,
) -> io::Result<()> {
	let input = fs::File::open(encrypted)?;
	let mut plain = transformer.transform(Box::new(input))?;
	let mut output = fs::File::create(decrypted)?;
	io::copy(&mut plain, &mut output)?;
	Ok(())
}


// vim: ts=4
