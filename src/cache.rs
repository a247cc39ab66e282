//! Local multichunk cache
//!
//! Holds decrypted multichunk containers between the fetch and apply stages
//! (and across cycles: a container downloaded once stays usable for later
//! cycles). Paths are a deterministic function of the multichunk id, so the
//! fetch pipeline and the apply stage always agree on where a container
//! lives. Encrypted downloads are transient files removed after decryption.
//!
//! Decrypted containers use a minimal record layout readable without the
//! crypto layer: repeated `[checksum][u32-le length][bytes]` records.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::logging::*;
use crate::model::{ChunkChecksum, MultiChunkId, CHECKSUM_LEN};

const ENCRYPTED_SUFFIX: &str = ".enc";

/// One cycle's view of the local cache directory
#[derive(Debug, Clone)]
pub struct Cache {
	root: PathBuf,
}

impl Cache {
	/// Open the cache at `root`, creating the directory if needed
	pub fn open(root: &Path) -> io::Result<Self> {
		fs::create_dir_all(root)?;
		Ok(Cache { root: root.to_path_buf() })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Deterministic path of the transient encrypted download for `id`
	pub fn encrypted_multichunk_path(&self, id: &MultiChunkId) -> PathBuf {
		self.root.join(format!("multichunk-{}{}", id, ENCRYPTED_SUFFIX))
	}

	/// Deterministic path of the decrypted container for `id`
	pub fn decrypted_multichunk_path(&self, id: &MultiChunkId) -> PathBuf {
		self.root.join(format!("multichunk-{}", id))
	}

	/// Whether the decrypted container for `id` is already cached
	pub fn has_multichunk(&self, id: &MultiChunkId) -> bool {
		self.decrypted_multichunk_path(id).is_file()
	}

	/// Remove transient encrypted files left behind by an aborted fetch.
	///
	/// Returns the number of files removed.
	pub fn cleanup_encrypted(&self) -> io::Result<usize> {
		let mut removed = 0;
		for entry in fs::read_dir(&self.root)? {
			let entry = entry?;
			let name = entry.file_name();
			if name.to_string_lossy().ends_with(ENCRYPTED_SUFFIX) {
				fs::remove_file(entry.path())?;
				removed += 1;
			}
		}
		if removed > 0 {
			debug!(removed, "removed stale encrypted multichunk files");
		}
		Ok(removed)
	}
}

/// Read one chunk's bytes from a decrypted multichunk container.
///
/// Scans the container's records; returns `Ok(None)` when the chunk is not
/// in this container.
pub fn read_chunk_from_multichunk(
	path: &Path,
	chunk: &ChunkChecksum,
) -> io::Result<Option<Vec<u8>>> {
	let mut reader = io::BufReader::new(fs::File::open(path)?);

	loop {
		let mut checksum = [0u8; CHECKSUM_LEN];
		match reader.read_exact(&mut checksum) {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
			Err(e) => return Err(e),
		}

		let mut len_bytes = [0u8; 4];
		reader.read_exact(&mut len_bytes)?;
		let len = u32::from_le_bytes(len_bytes) as u64;

		if &checksum == chunk.as_bytes() {
			let mut bytes = Vec::with_capacity(len as usize);
			reader.by_ref().take(len).read_to_end(&mut bytes)?;
			if bytes.len() as u64 != len {
				return Err(io::Error::new(
					io::ErrorKind::UnexpectedEof,
					format!("truncated chunk record in {}", path.display()),
				));
			}
			return Ok(Some(bytes));
		}

		// Skip this record's payload
		io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
	}
}

/// Write a decrypted multichunk container holding the given chunks.
///
/// Used by packagers and test fixtures; the fetch pipeline itself only ever
/// produces containers by decrypting remote objects.
pub fn write_multichunk(path: &Path, chunks: &[(ChunkChecksum, Vec<u8>)]) -> io::Result<()> {
	let mut file = io::BufWriter::new(fs::File::create(path)?);
	for (checksum, bytes) in chunks {
		file.write_all(checksum.as_bytes())?;
		file.write_all(&(bytes.len() as u32).to_le_bytes())?;
		file.write_all(bytes)?;
	}
	file.flush()
}

/// Verify that every chunk in a container hashes to its recorded checksum
pub fn verify_multichunk(path: &Path) -> io::Result<bool> {
	let mut reader = io::BufReader::new(fs::File::open(path)?);

	loop {
		let mut checksum = [0u8; CHECKSUM_LEN];
		match reader.read_exact(&mut checksum) {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(true),
			Err(e) => return Err(e),
		}

		let mut len_bytes = [0u8; 4];
		reader.read_exact(&mut len_bytes)?;
		let len = u32::from_le_bytes(len_bytes) as u64;

		let mut bytes = Vec::with_capacity(len as usize);
		reader.by_ref().take(len).read_to_end(&mut bytes)?;
		if bytes.len() as u64 != len {
			return Ok(false);
		}
		if ChunkChecksum::of(&bytes).as_bytes() != &checksum {
			return Ok(false);
		}
	}
}


// vim: ts=4
