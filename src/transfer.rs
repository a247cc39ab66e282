//! Remote transport and decrypt-transform seams
//!
//! The engine never talks to remote storage or the crypto layer directly; it
//! downloads opaque blobs through [`TransferManager`] and turns encrypted
//! bytes into plaintext through [`Transformer`]. Production implementations
//! live in storage/crypto plugins; this module also ships in-memory versions
//! for tests and local-only setups.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::TransferError;
use crate::model::MultiChunkId;

/// Remote storage access for multichunk objects.
///
/// The connection is acquired for the duration of one fetch stage and must
/// be released through `disconnect` on both success and failure paths.
#[async_trait]
pub trait TransferManager: Send + Sync {
	/// Download the remote object for `id` into `destination`
	async fn download(&self, id: &MultiChunkId, destination: &Path) -> Result<(), TransferError>;

	/// Release the transport connection
	async fn disconnect(&self) -> Result<(), TransferError>;
}

/// Decrypt/decompress stream transform, provided by the crypto layer.
///
/// Wraps the raw remote byte stream and exposes the transformed plaintext
/// stream the multichunk cache stores.
pub trait Transformer: Send + Sync {
	fn transform<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>>;
}

/// Pass-through transformer for unencrypted repositories and tests
#[derive(Debug, Default)]
pub struct IdentityTransformer;

impl Transformer for IdentityTransformer {
	fn transform<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
		Ok(input)
	}
}

/// In-memory transfer manager serving objects from a map.
///
/// Records downloads and disconnects so tests can assert transport usage;
/// objects can be poisoned to simulate download failures.
#[derive(Default)]
pub struct MemoryTransferManager {
	objects: Mutex<BTreeMap<MultiChunkId, Vec<u8>>>,
	failing: Mutex<Vec<MultiChunkId>>,
	downloads: Mutex<Vec<MultiChunkId>>,
	disconnected: AtomicBool,
}

impl MemoryTransferManager {
	pub fn new() -> Self {
		Self::default()
	}

	/// Store an object to be served for `id`
	pub fn put(&self, id: MultiChunkId, bytes: Vec<u8>) {
		self.objects.lock().unwrap().insert(id, bytes);
	}

	/// Make downloads of `id` fail with a storage error
	pub fn fail_on(&self, id: MultiChunkId) {
		self.failing.lock().unwrap().push(id);
	}

	/// Ids downloaded so far, in request order
	pub fn downloaded(&self) -> Vec<MultiChunkId> {
		self.downloads.lock().unwrap().clone()
	}

	pub fn is_disconnected(&self) -> bool {
		self.disconnected.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl TransferManager for MemoryTransferManager {
	async fn download(&self, id: &MultiChunkId, destination: &Path) -> Result<(), TransferError> {
		if self.failing.lock().unwrap().contains(id) {
			return Err(TransferError::Storage { message: format!("simulated failure for {}", id) });
		}

		let bytes = {
			let objects = self.objects.lock().unwrap();
			objects.get(id).cloned().ok_or(TransferError::NotFound { name: id.to_string() })?
		};

		tokio::fs::write(destination, bytes).await?;
		self.downloads.lock().unwrap().push(*id);
		Ok(())
	}

	async fn disconnect(&self) -> Result<(), TransferError> {
		self.disconnected.store(true, Ordering::SeqCst);
		Ok(())
	}
}


// vim: ts=4
