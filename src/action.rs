//! Filesystem actions and their execution
//!
//! A [`FileSystemAction`] is a derived, immutable intent to mutate the local
//! tree; actions exist only within one reconcile-and-apply cycle and are
//! never persisted. Variants share "from" (local, possibly absent) and "to"
//! (winning) version fields and are dispatched on the variant tag.
//!
//! Execution validates the live filesystem against the precondition each
//! action was computed from. A mismatch never destroys data: the local entry
//! is preserved under a conflict-marked name, or the action is skipped with
//! an inconsistent-filesystem condition.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::cache::{read_chunk_from_multichunk, Cache};
use crate::config::ApplyConfig;
use crate::database::{DatabaseSnapshot, LocalDatabase};
use crate::error::ActionError;
use crate::logging::*;
use crate::model::{ChunkChecksum, FileChecksum, FileType, FileVersion, MultiChunkId};

/// A typed intent to mutate the local filesystem
#[derive(Debug, Clone, PartialEq)]
pub enum FileSystemAction {
	/// Create a new file from the winning version's content
	CreateFile { to: FileVersion },

	/// Create a new folder
	CreateFolder { to: FileVersion },

	/// Change an existing entry's content and/or metadata in place
	ChangeFile { from: FileVersion, to: FileVersion },

	/// Move an entry to a new path (same content)
	Rename { from: FileVersion, to: FileVersion },

	/// Remove an entry deleted in the winning state
	Delete { from: FileVersion },

	/// Create or repoint a symlink
	SetSymlink { from: Option<FileVersion>, to: FileVersion },
}

/// Action variant tag, used for counting and ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
	CreateFile,
	CreateFolder,
	ChangeFile,
	Rename,
	Delete,
	SetSymlink,
}

impl FileSystemAction {
	pub fn kind(&self) -> ActionKind {
		match self {
			FileSystemAction::CreateFile { .. } => ActionKind::CreateFile,
			FileSystemAction::CreateFolder { .. } => ActionKind::CreateFolder,
			FileSystemAction::ChangeFile { .. } => ActionKind::ChangeFile,
			FileSystemAction::Rename { .. } => ActionKind::Rename,
			FileSystemAction::Delete { .. } => ActionKind::Delete,
			FileSystemAction::SetSymlink { .. } => ActionKind::SetSymlink,
		}
	}

	/// The path this action leaves behind (the deleted path for deletes)
	pub fn target_path(&self) -> &Path {
		match self {
			FileSystemAction::CreateFile { to }
			| FileSystemAction::CreateFolder { to }
			| FileSystemAction::ChangeFile { to, .. }
			| FileSystemAction::Rename { to, .. }
			| FileSystemAction::SetSymlink { to, .. } => &to.path,
			FileSystemAction::Delete { from } => &from.path,
		}
	}

	/// The local version this action expects on disk, if any
	pub fn from_version(&self) -> Option<&FileVersion> {
		match self {
			FileSystemAction::CreateFile { .. } | FileSystemAction::CreateFolder { .. } => None,
			FileSystemAction::ChangeFile { from, .. }
			| FileSystemAction::Rename { from, .. }
			| FileSystemAction::Delete { from } => Some(from),
			FileSystemAction::SetSymlink { from, .. } => from.as_ref(),
		}
	}

	/// The winning version this action establishes, if any
	pub fn to_version(&self) -> Option<&FileVersion> {
		match self {
			FileSystemAction::CreateFile { to }
			| FileSystemAction::CreateFolder { to }
			| FileSystemAction::ChangeFile { to, .. }
			| FileSystemAction::Rename { to, .. }
			| FileSystemAction::SetSymlink { to, .. } => Some(to),
			FileSystemAction::Delete { .. } => None,
		}
	}

	/// Whether executing this action requires chunk data to be available.
	///
	/// Metadata-only changes (same content checksum) and renames reuse bytes
	/// already on disk and need no downloads.
	pub fn materializes_content(&self) -> bool {
		match self {
			FileSystemAction::CreateFile { to } => to.has_content(),
			FileSystemAction::ChangeFile { from, to } => {
				to.has_content() && from.checksum != to.checksum
			}
			_ => false,
		}
	}
}

/// Per-kind counters for the cycle result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionCounts {
	pub created_files: usize,
	pub created_folders: usize,
	pub changed_files: usize,
	pub renamed: usize,
	pub deleted: usize,
	pub symlinks: usize,
}

impl ActionCounts {
	pub fn record(&mut self, kind: ActionKind) {
		match kind {
			ActionKind::CreateFile => self.created_files += 1,
			ActionKind::CreateFolder => self.created_folders += 1,
			ActionKind::ChangeFile => self.changed_files += 1,
			ActionKind::Rename => self.renamed += 1,
			ActionKind::Delete => self.deleted += 1,
			ActionKind::SetSymlink => self.symlinks += 1,
		}
	}

	pub fn total(&self) -> usize {
		self.created_files
			+ self.created_folders
			+ self.changed_files
			+ self.renamed
			+ self.deleted
			+ self.symlinks
	}
}

/// Everything action execution needs from the rest of the cycle
pub struct ApplyContext<'a> {
	pub config: &'a ApplyConfig,
	pub cache: &'a Cache,
	pub local: &'a dyn LocalDatabase,
	pub winners: &'a DatabaseSnapshot,
	/// Local paths by content checksum, for whole-file dedup copies
	content_paths: BTreeMap<FileChecksum, PathBuf>,
}

impl<'a> ApplyContext<'a> {
	pub fn new(
		config: &'a ApplyConfig,
		cache: &'a Cache,
		local: &'a dyn LocalDatabase,
		winners: &'a DatabaseSnapshot,
		local_tree: &BTreeMap<PathBuf, FileVersion>,
	) -> Self {
		let mut content_paths = BTreeMap::new();
		for (path, version) in local_tree {
			if let Some(checksum) = version.checksum {
				content_paths.entry(checksum).or_insert_with(|| path.clone());
			}
		}
		ApplyContext { config, cache, local, winners, content_paths }
	}

	fn abs(&self, version: &FileVersion) -> PathBuf {
		self.config.local_root.join(&version.path)
	}

	/// Express an absolute path relative to the local root, for reporting
	pub(crate) fn rel(&self, path: &Path) -> PathBuf {
		path.strip_prefix(&self.config.local_root).unwrap_or(path).to_path_buf()
	}
}

/// What executing one action produced besides the mutation itself
#[derive(Debug, Default)]
pub struct ActionOutcome {
	/// Conflict copy created to preserve an unexpected local entry
	pub conflict: Option<PathBuf>,
}

/// How the live filesystem compares to an expected version
enum LiveState {
	Missing,
	Matches,
	Differs(String),
}

impl FileSystemAction {
	/// Execute this action against the live filesystem.
	///
	/// `outcome` is filled in as side effects happen, so a conflict copy made
	/// before a later failure is still reported to the caller.
	pub fn execute(
		&self,
		ctx: &ApplyContext<'_>,
		outcome: &mut ActionOutcome,
	) -> Result<(), ActionError> {
		match self {
			FileSystemAction::CreateFile { to } => execute_create_file(ctx, to, outcome),
			FileSystemAction::CreateFolder { to } => execute_create_folder(ctx, to, outcome),
			FileSystemAction::ChangeFile { from, to } => execute_change(ctx, from, to, outcome),
			FileSystemAction::Rename { from, to } => execute_rename(ctx, from, to, outcome),
			FileSystemAction::Delete { from } => execute_delete(ctx, from, outcome),
			FileSystemAction::SetSymlink { from, to } => {
				execute_set_symlink(ctx, from.as_ref(), to, outcome)
			}
		}
	}
}

fn execute_create_file(
	ctx: &ApplyContext<'_>,
	to: &FileVersion,
	outcome: &mut ActionOutcome,
) -> Result<(), ActionError> {
	let target = ctx.abs(to);

	// An entry we did not expect occupies the path; preserve it first
	if fs::symlink_metadata(&target).is_ok() {
		outcome.conflict = Some(create_conflict_copy(ctx, &target)?);
	}

	ensure_parent(&target)?;
	materialize_file(ctx, to, &target)?;
	apply_metadata(to, &target)?;

	debug!(path = %to.path.display(), "created file");
	Ok(())
}

fn execute_create_folder(
	ctx: &ApplyContext<'_>,
	to: &FileVersion,
	outcome: &mut ActionOutcome,
) -> Result<(), ActionError> {
	let target = ctx.abs(to);

	if let Ok(meta) = fs::symlink_metadata(&target) {
		if meta.is_dir() {
			// Folder already exists; converged, only metadata left to set
			apply_metadata(to, &target)?;
			return Ok(());
		}
		outcome.conflict = Some(create_conflict_copy(ctx, &target)?);
	}

	fs::create_dir_all(&target).map_err(|e| ActionError::from_io(target.clone(), e))?;
	apply_metadata(to, &target)?;

	debug!(path = %to.path.display(), "created folder");
	Ok(())
}

fn execute_change(
	ctx: &ApplyContext<'_>,
	from: &FileVersion,
	to: &FileVersion,
	outcome: &mut ActionOutcome,
) -> Result<(), ActionError> {
	let target = ctx.abs(to);

	match check_live(from, &target)? {
		LiveState::Missing => {
			return Err(ActionError::InconsistentFilesystem {
				path: to.path.clone(),
				reason: "expected local file disappeared before apply".to_string(),
			});
		}
		LiveState::Differs(reason) => {
			// A metadata-only change has no fetched content; a drifted file
			// has no pre-image to rebuild from, so skip it untouched
			if from.checksum == to.checksum {
				return Err(ActionError::InconsistentFilesystem {
					path: to.path.clone(),
					reason: format!("local file differs from expected version: {}", reason),
				});
			}
			// Local entry drifted from the expected pre-image; keep its bytes
			warn!(path = %to.path.display(), %reason, "local file differs from expected version, creating conflict copy");
			outcome.conflict = Some(create_conflict_copy(ctx, &target)?);
		}
		LiveState::Matches => {}
	}

	if to.file_type == FileType::File && from.checksum != to.checksum {
		ensure_parent(&target)?;
		materialize_file(ctx, to, &target)?;
	}
	apply_metadata(to, &target)?;

	debug!(path = %to.path.display(), "changed file");
	Ok(())
}

fn execute_rename(
	ctx: &ApplyContext<'_>,
	from: &FileVersion,
	to: &FileVersion,
	outcome: &mut ActionOutcome,
) -> Result<(), ActionError> {
	let source = ctx.abs(from);
	let target = ctx.abs(to);

	match check_live(from, &source)? {
		LiveState::Missing => {
			return Err(ActionError::InconsistentFilesystem {
				path: from.path.clone(),
				reason: "rename source disappeared before apply".to_string(),
			});
		}
		LiveState::Differs(reason) => {
			return Err(ActionError::InconsistentFilesystem {
				path: from.path.clone(),
				reason: format!("rename source differs from expected version: {}", reason),
			});
		}
		LiveState::Matches => {}
	}

	if fs::symlink_metadata(&target).is_ok() {
		outcome.conflict = Some(create_conflict_copy(ctx, &target)?);
	}

	ensure_parent(&target)?;
	fs::rename(&source, &target).map_err(|e| ActionError::from_io(target.clone(), e))?;
	apply_metadata(to, &target)?;

	debug!(from = %from.path.display(), to = %to.path.display(), "renamed");
	Ok(())
}

fn execute_delete(
	ctx: &ApplyContext<'_>,
	from: &FileVersion,
	outcome: &mut ActionOutcome,
) -> Result<(), ActionError> {
	let target = ctx.abs(from);

	match check_live(from, &target)? {
		LiveState::Missing => {
			// Nothing to delete; the tree already converged here
			return Ok(());
		}
		LiveState::Differs(reason) => {
			// The local entry is not the one reconciliation saw; rename it
			// aside instead of destroying it. The path still ends up free.
			// For an expected folder this only fires on a type change, so
			// the live entry is always renameable.
			warn!(path = %from.path.display(), %reason, "local entry differs from version to delete, preserving as conflict copy");
			outcome.conflict = Some(create_conflict_copy(ctx, &target)?);
			return Ok(());
		}
		LiveState::Matches => {}
	}

	match from.file_type {
		FileType::Folder => {
			fs::remove_dir(&target).map_err(|e| {
				if e.kind() == io::ErrorKind::DirectoryNotEmpty {
					ActionError::InconsistentFilesystem {
						path: from.path.clone(),
						reason: "folder to delete is not empty".to_string(),
					}
				} else {
					ActionError::from_io(target.clone(), e)
				}
			})?;
		}
		FileType::File | FileType::Symlink => {
			fs::remove_file(&target).map_err(|e| ActionError::from_io(target.clone(), e))?;
		}
	}

	debug!(path = %from.path.display(), "deleted");
	Ok(())
}

fn execute_set_symlink(
	ctx: &ApplyContext<'_>,
	from: Option<&FileVersion>,
	to: &FileVersion,
	outcome: &mut ActionOutcome,
) -> Result<(), ActionError> {
	let target = ctx.abs(to);

	let link_target = to.link_target.as_ref().ok_or_else(|| ActionError::InconsistentFilesystem {
		path: to.path.clone(),
		reason: "symlink version carries no link target".to_string(),
	})?;

	if fs::symlink_metadata(&target).is_ok() {
		let expected = match from {
			Some(from) => matches!(check_live(from, &target)?, LiveState::Matches),
			None => false,
		};
		if expected {
			fs::remove_file(&target).map_err(|e| ActionError::from_io(target.clone(), e))?;
		} else {
			outcome.conflict = Some(create_conflict_copy(ctx, &target)?);
		}
	}

	ensure_parent(&target)?;
	make_symlink(link_target, &target).map_err(|e| ActionError::from_io(target.clone(), e))?;

	debug!(path = %to.path.display(), target = %link_target.display(), "created symlink");
	Ok(())
}

#[cfg(unix)]
fn make_symlink(link_target: &Path, at: &Path) -> io::Result<()> {
	std::os::unix::fs::symlink(link_target, at)
}

#[cfg(not(unix))]
fn make_symlink(_link_target: &Path, at: &Path) -> io::Result<()> {
	Err(io::Error::new(
		io::ErrorKind::Unsupported,
		format!("symlinks are not supported on this platform: {}", at.display()),
	))
}

/// Compare the live filesystem entry at `path` to `expected`
fn check_live(expected: &FileVersion, path: &Path) -> Result<LiveState, ActionError> {
	let meta = match fs::symlink_metadata(path) {
		Ok(meta) => meta,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LiveState::Missing),
		Err(e) => return Err(ActionError::from_io(path.to_path_buf(), e)),
	};

	let live_type = if meta.file_type().is_symlink() {
		FileType::Symlink
	} else if meta.is_dir() {
		FileType::Folder
	} else {
		FileType::File
	};

	if live_type != expected.file_type {
		return Ok(LiveState::Differs(format!(
			"type changed: expected {:?}, found {:?}",
			expected.file_type, live_type
		)));
	}

	match expected.file_type {
		FileType::File => {
			if meta.len() != expected.size {
				return Ok(LiveState::Differs(format!(
					"size changed: expected {}, found {}",
					expected.size,
					meta.len()
				)));
			}
			let live_mtime = mtime_secs(&meta);
			if live_mtime != expected.mtime {
				return Ok(LiveState::Differs(format!(
					"mtime changed: expected {}, found {}",
					expected.mtime, live_mtime
				)));
			}
		}
		FileType::Symlink => {
			let live_target = fs::read_link(path)
				.map_err(|e| ActionError::from_io(path.to_path_buf(), e))?;
			if Some(&live_target) != expected.link_target.as_ref() {
				return Ok(LiveState::Differs("symlink target changed".to_string()));
			}
		}
		// Folder mtimes drift whenever contents change; type match is enough
		FileType::Folder => {}
	}

	Ok(LiveState::Matches)
}

fn mtime_secs(meta: &fs::Metadata) -> i64 {
	filetime::FileTime::from_last_modification_time(meta).unix_seconds()
}

fn ensure_parent(path: &Path) -> Result<(), ActionError> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).map_err(|e| ActionError::from_io(parent.to_path_buf(), e))?;
	}
	Ok(())
}

/// Write the winning file body to `target`.
///
/// The body is assembled in a staging file next to the target and renamed
/// into place only when complete, so a failure mid-assembly never leaves a
/// truncated file where good bytes stood.
fn materialize_file(
	ctx: &ApplyContext<'_>,
	to: &FileVersion,
	target: &Path,
) -> Result<(), ActionError> {
	let staged = staging_path(target);
	match write_file_body(ctx, to, &staged) {
		Ok(()) => fs::rename(&staged, target)
			.map_err(|e| ActionError::from_io(target.to_path_buf(), e)),
		Err(e) => {
			let _ = fs::remove_file(&staged);
			// Attribute assembly failures to the target, not the staging file
			Err(match e {
				ActionError::Io { source, .. } => {
					ActionError::Io { path: target.to_path_buf(), source }
				}
				ActionError::NoSpace { .. } => ActionError::NoSpace { path: target.to_path_buf() },
				other => other,
			})
		}
	}
}

fn staging_path(target: &Path) -> PathBuf {
	let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
	name.push(".part");
	target.with_file_name(name)
}

/// Assemble the winning body at `staged`.
///
/// Dedup order: a local file with the identical content checksum is copied
/// whole; otherwise the body is reassembled chunk by chunk from decrypted
/// multichunks in the cache.
fn write_file_body(
	ctx: &ApplyContext<'_>,
	to: &FileVersion,
	staged: &Path,
) -> Result<(), ActionError> {
	let checksum = match to.checksum {
		Some(checksum) if to.size > 0 => checksum,
		_ => {
			// Empty file
			fs::write(staged, b"").map_err(|e| ActionError::from_io(staged.to_path_buf(), e))?;
			return Ok(());
		}
	};

	// Whole-file dedup: identical content already on disk somewhere else
	if let Some(source_rel) = ctx.content_paths.get(&checksum) {
		let source = ctx.config.local_root.join(source_rel);
		if source.as_path() != staged {
			if let Ok(meta) = fs::metadata(&source) {
				if meta.len() == to.size {
					fs::copy(&source, staged)
						.map_err(|e| ActionError::from_io(staged.to_path_buf(), e))?;
					debug!(path = %to.path.display(), source = %source_rel.display(), "materialized from local copy");
					return Ok(());
				}
			}
			// Local copy vanished or drifted; fall through to chunk assembly
		}
	}

	let content = ctx.winners.get_content(&checksum).ok_or_else(|| {
		// Reconciliation validates content records, so this only fires if the
		// snapshot was mutated mid-cycle
		ActionError::InconsistentFilesystem {
			path: to.path.clone(),
			reason: format!("content record {} vanished from winning snapshot", checksum),
		}
	})?;

	let local_map = ctx.local.multichunks_for_chunks(&content.chunks);
	let mut file = fs::File::create(staged)
		.map_err(|e| ActionError::from_io(staged.to_path_buf(), e))?;

	for chunk in &content.chunks {
		let bytes = load_chunk(ctx, chunk, &local_map)
			.map_err(|e| ActionError::from_io(staged.to_path_buf(), e))?;
		io::Write::write_all(&mut file, &bytes)
			.map_err(|e| ActionError::from_io(staged.to_path_buf(), e))?;
	}

	Ok(())
}

/// Read one chunk's bytes from the decrypted multichunk cache
fn load_chunk(
	ctx: &ApplyContext<'_>,
	chunk: &ChunkChecksum,
	local_map: &BTreeMap<ChunkChecksum, MultiChunkId>,
) -> io::Result<Vec<u8>> {
	let mut candidates: Vec<MultiChunkId> = Vec::new();
	if let Some(id) = local_map.get(chunk) {
		candidates.push(*id);
	}
	if let Some(id) = ctx.winners.get_multichunk_for_chunk(chunk) {
		if !candidates.contains(&id) {
			candidates.push(id);
		}
	}

	for id in &candidates {
		if ctx.cache.has_multichunk(id) {
			let path = ctx.cache.decrypted_multichunk_path(id);
			if let Some(bytes) = read_chunk_from_multichunk(&path, chunk)? {
				return Ok(bytes);
			}
		}
	}

	Err(io::Error::new(
		io::ErrorKind::NotFound,
		format!("chunk {} not available in multichunk cache", chunk),
	))
}

/// Rename `target` to a conflict-marked sibling, preserving its bytes.
///
/// Returns the conflict path relative to the local root.
fn create_conflict_copy(ctx: &ApplyContext<'_>, target: &Path) -> Result<PathBuf, ActionError> {
	let stem = target.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
	let ext = target.extension().and_then(|s| s.to_str());
	let label = timestamp_label(now_secs());

	let mut conflict = PathBuf::new();
	for attempt in 0..u32::MAX {
		let counter = if attempt == 0 { String::new() } else { format!(" {}", attempt + 1) };
		let name = match ext {
			Some(ext) => format!(
				"{} ({} {}{}).{}",
				stem, ctx.config.conflict_suffix, label, counter, ext
			),
			None => format!("{} ({} {}{})", stem, ctx.config.conflict_suffix, label, counter),
		};
		conflict = target.with_file_name(name);
		// symlink_metadata so a dangling symlink still counts as occupied
		if fs::symlink_metadata(&conflict).is_err() {
			break;
		}
	}

	fs::rename(target, &conflict).map_err(|e| ActionError::from_io(target.to_path_buf(), e))?;
	info!(original = %ctx.rel(target).display(), conflict = %ctx.rel(&conflict).display(), "preserved local file as conflict copy");

	Ok(ctx.rel(&conflict))
}

/// Set permissions and mtime from the winning version
fn apply_metadata(to: &FileVersion, target: &Path) -> Result<(), ActionError> {
	if to.file_type == FileType::Symlink {
		// Symlink metadata follows the link on most platforms; skip it
		return Ok(());
	}

	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		fs::set_permissions(target, fs::Permissions::from_mode(to.permissions))
			.map_err(|e| ActionError::from_io(target.to_path_buf(), e))?;
	}

	filetime::set_file_mtime(target, filetime::FileTime::from_unix_time(to.mtime, 0))
		.map_err(|e| ActionError::from_io(target.to_path_buf(), e))?;

	Ok(())
}

fn now_secs() -> i64 {
	use std::time::{SystemTime, UNIX_EPOCH};
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Format Unix seconds as "YYYY-MM-DD hhmmss" without pulling in a date crate
fn timestamp_label(secs: i64) -> String {
	let days = secs.div_euclid(86400);
	let rem = secs.rem_euclid(86400);
	let (y, m, d) = civil_from_days(days);
	format!("{:04}-{:02}-{:02} {:02}{:02}{:02}", y, m, d, rem / 3600, (rem % 3600) / 60, rem % 60)
}

/// Gregorian date from days since the Unix epoch (Howard Hinnant's algorithm)
fn civil_from_days(z: i64) -> (i64, u32, u32) {
	let z = z + 719468;
	let era = z.div_euclid(146097);
	let doe = z.rem_euclid(146097);
	let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 4;
	let y = yoe + era * 400;
	let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
	let mp = (5 * doy + 2) / 153;
	let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
	let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
	(if m <= 2 { y + 1 } else { y }, m, d)
}


// vim: ts=4
