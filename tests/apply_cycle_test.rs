//! End-to-end apply-cycle tests
//!
//! Runs full reconcile -> resolve -> fetch -> order -> apply cycles against
//! real temp directories, with an in-memory transport and pass-through
//! transformer standing in for remote storage and the crypto layer.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use chunkdown::cache::write_multichunk;
use chunkdown::transfer::MemoryTransferManager;
use chunkdown::{
	apply_changes, ApplyConfig, ApplyError, ChunkChecksum, Convergence, DatabaseSnapshot,
	FileChecksum, FileContent, FileHistoryId, FileStatus, FileType, FileVersion,
	IdentityTransformer, MemoryLocalDatabase, MultiChunkEntry, MultiChunkId,
};

const MTIME: i64 = 1_600_000_000;

/// Scenario harness: a local root, a cache dir, a winning snapshot and an
/// in-memory remote
struct Repo {
	root: TempDir,
	_cache: TempDir,
	config: ApplyConfig,
	winners: DatabaseSnapshot,
	transfer: MemoryTransferManager,
}

impl Repo {
	fn new() -> Self {
		let root = TempDir::new().unwrap();
		let cache = TempDir::new().unwrap();
		let config = ApplyConfig::new(root.path(), cache.path());
		Repo {
			config,
			winners: DatabaseSnapshot::new(),
			transfer: MemoryTransferManager::new(),
			root,
			_cache: cache,
		}
	}

	async fn run(&self, local: &MemoryLocalDatabase) -> Result<chunkdown::ApplyChangesResult, ApplyError> {
		apply_changes(&self.config, local, &self.winners, &self.transfer, &IdentityTransformer)
			.await
	}

	fn read(&self, path: &str) -> Vec<u8> {
		fs::read(self.root.path().join(path)).unwrap()
	}

	fn exists(&self, path: &str) -> bool {
		self.root.path().join(path).exists()
	}
}

fn file_version(path: &str, body: &[u8]) -> FileVersion {
	FileVersion {
		version: 1,
		path: PathBuf::from(path),
		file_type: FileType::File,
		status: FileStatus::New,
		size: body.len() as u64,
		mtime: MTIME,
		permissions: 0o644,
		link_target: None,
		checksum: if body.is_empty() { None } else { Some(FileChecksum::of(body)) },
	}
}

fn folder_version(path: &str) -> FileVersion {
	FileVersion {
		version: 1,
		path: PathBuf::from(path),
		file_type: FileType::Folder,
		status: FileStatus::New,
		size: 0,
		mtime: MTIME,
		permissions: 0o755,
		link_target: None,
		checksum: None,
	}
}

/// Split a body into equal chunks, returning (checksum, bytes) pairs
fn chunk_body(body: &[u8], pieces: usize) -> Vec<(ChunkChecksum, Vec<u8>)> {
	let size = body.len().div_ceil(pieces);
	body.chunks(size.max(1)).map(|c| (ChunkChecksum::of(c), c.to_vec())).collect()
}

/// Register a file with chunked content in a snapshot
fn add_file(
	snapshot: &mut DatabaseSnapshot,
	history: u64,
	path: &str,
	body: &[u8],
	pieces: usize,
) -> Vec<(ChunkChecksum, Vec<u8>)> {
	let chunks = chunk_body(body, pieces);
	snapshot.add_file_version(FileHistoryId(history), file_version(path, body));
	snapshot.add_content(FileContent {
		checksum: FileChecksum::of(body),
		size: body.len() as u64,
		chunks: chunks.iter().map(|(c, _)| *c).collect(),
	});
	chunks
}

/// Register a multichunk holding `chunks` in a snapshot
fn add_multichunk(snapshot: &mut DatabaseSnapshot, chunks: &[(ChunkChecksum, Vec<u8>)]) -> MultiChunkId {
	let checksums: Vec<ChunkChecksum> = chunks.iter().map(|(c, _)| *c).collect();
	let id = MultiChunkId::derive(&checksums);
	snapshot.add_multichunk(MultiChunkEntry { id, chunks: checksums });
	id
}

/// Serialize chunks into the container layout the cache reads
fn container_bytes(chunks: &[(ChunkChecksum, Vec<u8>)]) -> Vec<u8> {
	let dir = TempDir::new().unwrap();
	let path = dir.path().join("mc");
	write_multichunk(&path, chunks).unwrap();
	fs::read(&path).unwrap()
}

fn empty_local() -> MemoryLocalDatabase {
	MemoryLocalDatabase::new(DatabaseSnapshot::new())
}

// ===================================================================
// THE BASE SCENARIO: ONE NEW FILE, ONE MULTICHUNK
// ===================================================================

#[tokio::test]
async fn test_new_file_is_downloaded_and_created() {
	let mut repo = Repo::new();

	// Winning snapshot adds docs/report.txt from two chunks in one multichunk
	let body = b"quarterly report: everything is fine";
	repo.winners.add_file_version(FileHistoryId(1), folder_version("docs"));
	let chunks = add_file(&mut repo.winners, 2, "docs/report.txt", body, 2);
	assert_eq!(chunks.len(), 2);
	let m1 = add_multichunk(&mut repo.winners, &chunks);
	repo.transfer.put(m1, container_bytes(&chunks));

	let result = repo.run(&empty_local()).await.unwrap();

	assert_eq!(result.downloaded_multichunks, 1);
	assert_eq!(result.applied.created_files, 1);
	assert_eq!(result.applied.created_folders, 1);
	assert_eq!(result.convergence(), Convergence::FullyConverged);
	// Bytes reconstructed from the chunks, in order
	assert_eq!(repo.read("docs/report.txt"), body);
	// Exactly one container requested, connection released
	assert_eq!(repo.transfer.downloaded(), vec![m1]);
	assert!(repo.transfer.is_disconnected());
}

#[tokio::test]
async fn test_applied_file_carries_winning_metadata() {
	let mut repo = Repo::new();
	let chunks = add_file(&mut repo.winners, 1, "a.txt", b"body", 1);
	let m = add_multichunk(&mut repo.winners, &chunks);
	repo.transfer.put(m, container_bytes(&chunks));

	repo.run(&empty_local()).await.unwrap();

	let meta = fs::metadata(repo.root.path().join("a.txt")).unwrap();
	let mtime = filetime_of(&meta);
	assert_eq!(mtime, MTIME);
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		assert_eq!(meta.permissions().mode() & 0o777, 0o644);
	}
}

fn filetime_of(meta: &fs::Metadata) -> i64 {
	meta.modified()
		.unwrap()
		.duration_since(std::time::SystemTime::UNIX_EPOCH)
		.unwrap()
		.as_secs() as i64
}

// ===================================================================
// IDEMPOTENCE
// ===================================================================

#[tokio::test]
async fn test_second_cycle_is_a_no_op() {
	let mut repo = Repo::new();
	let chunks = add_file(&mut repo.winners, 1, "a.txt", b"stable body", 2);
	let m = add_multichunk(&mut repo.winners, &chunks);
	repo.transfer.put(m, container_bytes(&chunks));

	let first = repo.run(&empty_local()).await.unwrap();
	assert_eq!(first.applied.total(), 1);

	// The caller persists the winning snapshot as the new local state
	let local = MemoryLocalDatabase::new(repo.winners.clone());
	let second = repo.run(&local).await.unwrap();

	assert_eq!(second.applied.total(), 0);
	assert_eq!(second.downloaded_multichunks, 0);
	assert!(second.change_set.is_empty());
	assert_eq!(second.convergence(), Convergence::FullyConverged);
}

// ===================================================================
// DEDUPLICATION
// ===================================================================

#[tokio::test]
async fn test_identical_content_is_copied_not_downloaded() {
	let mut repo = Repo::new();
	let body = b"shared body, stored once";

	// Local state: original.txt with this content, already on disk
	let mut local_snapshot = DatabaseSnapshot::new();
	let chunks = add_file(&mut local_snapshot, 1, "original.txt", body, 2);
	add_multichunk(&mut local_snapshot, &chunks);
	fs::write(repo.root.path().join("original.txt"), body).unwrap();

	// Winning state: original.txt unchanged plus a second path with the
	// exact same content checksum
	let chunks = add_file(&mut repo.winners, 1, "original.txt", body, 2);
	add_multichunk(&mut repo.winners, &chunks);
	repo.winners.add_file_version(FileHistoryId(2), file_version("copy.txt", body));

	// Note: no objects were put into the transport at all
	let local = MemoryLocalDatabase::new(local_snapshot);
	let result = repo.run(&local).await.unwrap();

	assert_eq!(result.downloaded_multichunks, 0);
	assert!(repo.transfer.downloaded().is_empty());
	assert_eq!(result.applied.created_files, 1);
	assert_eq!(repo.read("copy.txt"), body);
}

// ===================================================================
// RENAMES
// ===================================================================

#[tokio::test]
async fn test_moved_file_is_renamed_without_downloads() {
	let mut repo = Repo::new();
	let body = b"moving body";

	let mut local_snapshot = DatabaseSnapshot::new();
	let chunks = add_file(&mut local_snapshot, 1, "old-name.txt", body, 1);
	add_multichunk(&mut local_snapshot, &chunks);
	write_with_mtime(repo.root.path().join("old-name.txt"), body);

	let chunks = add_file(&mut repo.winners, 1, "new-name.txt", body, 1);
	add_multichunk(&mut repo.winners, &chunks);

	let local = MemoryLocalDatabase::new(local_snapshot);
	let result = repo.run(&local).await.unwrap();

	assert_eq!(result.downloaded_multichunks, 0);
	assert_eq!(result.applied.renamed, 1);
	assert_eq!(result.applied.deleted, 0);
	assert!(!repo.exists("old-name.txt"));
	assert_eq!(repo.read("new-name.txt"), body);
}

// ===================================================================
// FATAL CONDITIONS ABORT THE WHOLE CYCLE
// ===================================================================

#[tokio::test]
async fn test_unresolvable_chunk_aborts_cycle() {
	let mut repo = Repo::new();
	// Content record exists, but its chunk is in no multichunk anywhere
	add_file(&mut repo.winners, 1, "broken.bin", b"unreachable", 1);

	let err = repo.run(&empty_local()).await.unwrap_err();
	assert!(matches!(err, ApplyError::Resolve(_)));
	assert!(!repo.exists("broken.bin"));
}

#[tokio::test]
async fn test_missing_content_record_aborts_cycle() {
	let mut repo = Repo::new();
	// Version references content, but no content record was merged
	repo.winners.add_file_version(FileHistoryId(1), file_version("broken.bin", b"body"));

	let err = repo.run(&empty_local()).await.unwrap_err();
	assert!(matches!(err, ApplyError::Reconcile(_)));
}

#[tokio::test]
async fn test_download_failure_aborts_cycle_and_disconnects() {
	let mut repo = Repo::new();
	let chunks = add_file(&mut repo.winners, 1, "a.txt", b"body", 1);
	let m = add_multichunk(&mut repo.winners, &chunks);
	repo.transfer.fail_on(m);

	let err = repo.run(&empty_local()).await.unwrap_err();
	assert!(matches!(err, ApplyError::Fetch(_)));
	// No partial content was applied, and the transport was released
	assert!(!repo.exists("a.txt"));
	assert!(repo.transfer.is_disconnected());
}

// ===================================================================
// DELETES AND TYPE CHANGES
// ===================================================================

#[tokio::test]
async fn test_deleted_tree_is_removed_bottom_up() {
	let mut repo = Repo::new();

	// Local state: dir/ with one file; winning state: nothing
	let mut local_snapshot = DatabaseSnapshot::new();
	local_snapshot.add_file_version(FileHistoryId(1), folder_version("dir"));
	let body = b"going away";
	let chunks = add_file(&mut local_snapshot, 2, "dir/leaf.txt", body, 1);
	add_multichunk(&mut local_snapshot, &chunks);
	fs::create_dir(repo.root.path().join("dir")).unwrap();
	write_with_mtime(repo.root.path().join("dir/leaf.txt"), body);

	let local = MemoryLocalDatabase::new(local_snapshot);
	let result = repo.run(&local).await.unwrap();

	assert_eq!(result.applied.deleted, 2);
	assert!(!repo.exists("dir"));
	assert_eq!(result.convergence(), Convergence::FullyConverged);
}

#[tokio::test]
async fn test_file_replaced_by_folder() {
	let mut repo = Repo::new();

	let mut local_snapshot = DatabaseSnapshot::new();
	let body = b"i used to be a file";
	let chunks = add_file(&mut local_snapshot, 1, "entry", body, 1);
	add_multichunk(&mut local_snapshot, &chunks);
	write_with_mtime(repo.root.path().join("entry"), body);

	repo.winners.add_file_version(FileHistoryId(1), folder_version("entry"));
	let chunks = add_file(&mut repo.winners, 2, "entry/child.txt", b"child", 1);
	let m = add_multichunk(&mut repo.winners, &chunks);
	repo.transfer.put(m, container_bytes(&chunks));

	let local = MemoryLocalDatabase::new(local_snapshot);
	let result = repo.run(&local).await.unwrap();

	assert_eq!(result.applied.deleted, 1);
	assert_eq!(result.applied.created_folders, 1);
	assert_eq!(result.applied.created_files, 1);
	assert!(repo.root.path().join("entry").is_dir());
	assert_eq!(repo.read("entry/child.txt"), b"child");
}

fn write_with_mtime(path: PathBuf, body: &[u8]) {
	fs::write(&path, body).unwrap();
	set_mtime(&path);
}

fn set_mtime(path: &Path) {
	filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(MTIME, 0)).unwrap();
}
