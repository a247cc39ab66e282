//! Data model for the chunk-deduplicated repository
//!
//! A file body is split into content-addressed [`Chunk`]s; chunks are bundled
//! into encrypted [`MultiChunk`] containers for remote storage. A distinct
//! file body is described by a [`FileContent`] (ordered chunk list), and each
//! path carries an append-only sequence of [`FileVersion`] records.
//!
//! [`Chunk`]: ChunkEntry
//! [`MultiChunk`]: MultiChunkEntry

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Byte length of all checksum values in this crate
pub const CHECKSUM_LEN: usize = 20;

macro_rules! checksum_type {
	($(#[$doc:meta])* $name:ident) => {
		$(#[$doc])*
		#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		pub struct $name(pub [u8; CHECKSUM_LEN]);

		impl $name {
			/// Construct from raw bytes
			pub fn from_bytes(bytes: [u8; CHECKSUM_LEN]) -> Self {
				$name(bytes)
			}

			/// Derive a checksum from arbitrary data (BLAKE3, truncated)
			pub fn of(data: &[u8]) -> Self {
				let hash = blake3::hash(data);
				let mut bytes = [0u8; CHECKSUM_LEN];
				bytes.copy_from_slice(&hash.as_bytes()[..CHECKSUM_LEN]);
				$name(bytes)
			}

			/// Raw checksum bytes
			pub fn as_bytes(&self) -> &[u8; CHECKSUM_LEN] {
				&self.0
			}

			/// Parse from a lowercase hex string
			pub fn from_hex(s: &str) -> Option<Self> {
				let bytes = hex::decode(s).ok()?;
				let bytes: [u8; CHECKSUM_LEN] = bytes.try_into().ok()?;
				Some($name(bytes))
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", hex::encode(self.0))
			}
		}

		impl fmt::Debug for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}({})", stringify!($name), hex::encode(self.0))
			}
		}
	};
}

checksum_type! {
	/// Checksum over one chunk's bytes; the deduplication unit identifier
	ChunkChecksum
}

checksum_type! {
	/// Checksum over a whole file body
	FileChecksum
}

checksum_type! {
	/// Identifier of a multichunk container, derived from its chunk set
	MultiChunkId
}

impl MultiChunkId {
	/// Derive the container id from the checksums of its chunks.
	///
	/// The derivation is deterministic: re-deriving the same chunk set in the
	/// same order yields the same id, so semantically duplicate containers
	/// are never fetched twice.
	pub fn derive(chunks: &[ChunkChecksum]) -> Self {
		let mut hasher = blake3::Hasher::new();
		for chunk in chunks {
			hasher.update(chunk.as_bytes());
		}
		let mut bytes = [0u8; CHECKSUM_LEN];
		bytes.copy_from_slice(&hasher.finalize().as_bytes()[..CHECKSUM_LEN]);
		MultiChunkId(bytes)
	}
}

/// One content-addressed chunk known to a database snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
	pub checksum: ChunkChecksum,
	pub size: u32,
}

/// One multichunk container and the chunks it holds.
///
/// Within one database version a chunk belongs to exactly one multichunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiChunkEntry {
	pub id: MultiChunkId,
	pub chunks: Vec<ChunkChecksum>,
}

/// The ordered chunk list composing one distinct file body.
///
/// Identified by its own checksum, so identical bodies across different
/// paths or versions share one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
	pub checksum: FileChecksum,
	pub size: u64,
	pub chunks: Vec<ChunkChecksum>,
}

/// Filesystem entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
	File,
	Folder,
	Symlink,
}

/// How a version relates to its predecessor in the path's history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
	New,
	Changed,
	Renamed,
	Deleted,
}

/// One historical metadata record for a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
	/// Position in the path's linear history, starting at 1
	pub version: u64,
	/// Path relative to the synchronized root
	pub path: PathBuf,
	pub file_type: FileType,
	pub status: FileStatus,
	pub size: u64,
	/// Modification time, Unix seconds
	pub mtime: i64,
	/// Unix permission bits
	pub permissions: u32,
	/// Symlink target, only meaningful for `FileType::Symlink`
	pub link_target: Option<PathBuf>,
	/// Content checksum; `None` for folders, deletions and empty files
	pub checksum: Option<FileChecksum>,
}

impl FileVersion {
	/// Whether this version describes a file body with actual content
	pub fn has_content(&self) -> bool {
		self.file_type == FileType::File && self.checksum.is_some() && self.size > 0
	}
}

/// Stable identifier of one path's version history
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileHistoryId(pub u64);

/// Append-only sequence of versions for one path.
///
/// Modeled as an ordered sequence rather than a graph; the last entry is
/// the path's current state in the snapshot the history belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFileHistory {
	pub id: FileHistoryId,
	versions: Vec<FileVersion>,
}

impl PartialFileHistory {
	pub fn new(id: FileHistoryId) -> Self {
		PartialFileHistory { id, versions: Vec::new() }
	}

	/// Append a version; versions must arrive in increasing version order
	pub fn add_version(&mut self, version: FileVersion) {
		debug_assert!(
			self.versions.last().map(|v| v.version < version.version).unwrap_or(true),
			"version numbers must be increasing"
		);
		self.versions.push(version);
	}

	/// The most recent version, if any
	pub fn last_version(&self) -> Option<&FileVersion> {
		self.versions.last()
	}

	pub fn versions(&self) -> &[FileVersion] {
		&self.versions
	}
}


// vim: ts=4
