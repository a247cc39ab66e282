//! Database snapshots and query surfaces
//!
//! A [`DatabaseSnapshot`] aggregates file histories, contents, chunks and
//! multichunk entries at one point of the merge history. The engine compares
//! two of them: the local state (what this client has applied to disk,
//! reachable through the [`LocalDatabase`] trait) and the winning state (the
//! already-resolved target, an in-memory snapshot).

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::model::{
	ChunkChecksum, ChunkEntry, FileChecksum, FileContent, FileHistoryId, FileStatus, FileVersion,
	MultiChunkEntry, MultiChunkId, PartialFileHistory,
};

/// In-memory aggregate of repository state at one point of the merge history
#[derive(Debug, Clone, Default)]
pub struct DatabaseSnapshot {
	histories: BTreeMap<FileHistoryId, PartialFileHistory>,
	contents: BTreeMap<FileChecksum, FileContent>,
	chunks: BTreeMap<ChunkChecksum, ChunkEntry>,
	multichunks: BTreeMap<MultiChunkId, MultiChunkEntry>,
	chunk_to_multichunk: BTreeMap<ChunkChecksum, MultiChunkId>,
}

impl DatabaseSnapshot {
	pub fn new() -> Self {
		Self::default()
	}

	/// Add a file history; replaces any previous history with the same id
	pub fn add_file_history(&mut self, history: PartialFileHistory) {
		self.histories.insert(history.id, history);
	}

	/// Convenience: add a single-version history for `version`
	pub fn add_file_version(&mut self, id: FileHistoryId, version: FileVersion) {
		let history = self.histories.entry(id).or_insert_with(|| PartialFileHistory::new(id));
		history.add_version(version);
	}

	pub fn add_content(&mut self, content: FileContent) {
		self.contents.insert(content.checksum, content);
	}

	pub fn add_chunk(&mut self, chunk: ChunkEntry) {
		self.chunks.insert(chunk.checksum, chunk);
	}

	/// Add a multichunk entry and index its chunk containment mapping
	pub fn add_multichunk(&mut self, multichunk: MultiChunkEntry) {
		for chunk in &multichunk.chunks {
			self.chunk_to_multichunk.insert(*chunk, multichunk.id);
		}
		self.multichunks.insert(multichunk.id, multichunk);
	}

	/// Look up the content record for a file checksum
	pub fn get_content(&self, checksum: &FileChecksum) -> Option<&FileContent> {
		self.contents.get(checksum)
	}

	pub fn get_chunk(&self, checksum: &ChunkChecksum) -> Option<&ChunkEntry> {
		self.chunks.get(checksum)
	}

	pub fn get_multichunk(&self, id: &MultiChunkId) -> Option<&MultiChunkEntry> {
		self.multichunks.get(id)
	}

	/// The multichunk holding a chunk in this snapshot, if known
	pub fn get_multichunk_for_chunk(&self, chunk: &ChunkChecksum) -> Option<MultiChunkId> {
		self.chunk_to_multichunk.get(chunk).copied()
	}

	pub fn file_histories(&self) -> impl Iterator<Item = &PartialFileHistory> {
		self.histories.values()
	}

	/// The current file tree of this snapshot: the last version of every
	/// history, keyed by path, with deleted paths excluded.
	pub fn current_file_tree(&self) -> BTreeMap<PathBuf, FileVersion> {
		let mut tree = BTreeMap::new();
		for history in self.histories.values() {
			if let Some(version) = history.last_version() {
				if version.status != FileStatus::Deleted {
					tree.insert(version.path.clone(), version.clone());
				}
			}
		}
		tree
	}
}

/// Query surface of the persistent local index.
///
/// The relational index itself is an external collaborator; the engine only
/// needs these three lookups from it.
pub trait LocalDatabase {
	/// Multichunks known to hold the body of a file with this checksum.
	/// Non-empty means an unrelated local file already has identical content.
	fn multichunks_for_file(&self, checksum: &FileChecksum) -> Vec<MultiChunkId>;

	/// Chunk-to-multichunk mappings for the given chunks, restricted to
	/// chunks the local database knows about.
	fn multichunks_for_chunks(
		&self,
		chunks: &[ChunkChecksum],
	) -> BTreeMap<ChunkChecksum, MultiChunkId>;

	/// The file tree this client has currently applied to disk
	fn current_file_tree(&self) -> BTreeMap<PathBuf, FileVersion>;
}

/// A [`LocalDatabase`] backed by an in-memory snapshot.
///
/// Used by tests and by embedders that keep their index in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLocalDatabase {
	snapshot: DatabaseSnapshot,
	file_to_multichunks: BTreeMap<FileChecksum, Vec<MultiChunkId>>,
}

impl MemoryLocalDatabase {
	pub fn new(snapshot: DatabaseSnapshot) -> Self {
		let mut file_to_multichunks: BTreeMap<FileChecksum, Vec<MultiChunkId>> = BTreeMap::new();
		for (checksum, content) in &snapshot.contents {
			let mut ids = Vec::new();
			for chunk in &content.chunks {
				if let Some(id) = snapshot.get_multichunk_for_chunk(chunk) {
					if !ids.contains(&id) {
						ids.push(id);
					}
				}
			}
			file_to_multichunks.insert(*checksum, ids);
		}
		MemoryLocalDatabase { snapshot, file_to_multichunks }
	}

	pub fn snapshot(&self) -> &DatabaseSnapshot {
		&self.snapshot
	}
}

impl LocalDatabase for MemoryLocalDatabase {
	fn multichunks_for_file(&self, checksum: &FileChecksum) -> Vec<MultiChunkId> {
		self.file_to_multichunks.get(checksum).cloned().unwrap_or_default()
	}

	fn multichunks_for_chunks(
		&self,
		chunks: &[ChunkChecksum],
	) -> BTreeMap<ChunkChecksum, MultiChunkId> {
		let mut map = BTreeMap::new();
		for chunk in chunks {
			if let Some(id) = self.snapshot.get_multichunk_for_chunk(chunk) {
				map.insert(*chunk, id);
			}
		}
		map
	}

	fn current_file_tree(&self) -> BTreeMap<PathBuf, FileVersion> {
		self.snapshot.current_file_tree()
	}
}


// vim: ts=4
