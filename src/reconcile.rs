//! Action reconciliation: diff the local tree against the winning snapshot
//!
//! A pure function over two snapshots. It reads the local file tree and the
//! winning database's file tree and emits the unordered set of
//! [`FileSystemAction`]s needed to converge, plus a [`ChangeSet`] summary
//! for reporting. It performs no I/O and never touches the filesystem;
//! physical ordering is left to the topological sort in the apply stage.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::action::FileSystemAction;
use crate::database::DatabaseSnapshot;
use crate::error::ReconcileError;
use crate::logging::*;
use crate::model::{FileChecksum, FileType, FileVersion};

/// Path-level summary of one reconciliation, for reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
	pub new_files: Vec<PathBuf>,
	pub changed_files: Vec<PathBuf>,
	pub renamed_files: Vec<(PathBuf, PathBuf)>,
	pub deleted_files: Vec<PathBuf>,
}

impl ChangeSet {
	pub fn is_empty(&self) -> bool {
		self.new_files.is_empty()
			&& self.changed_files.is_empty()
			&& self.renamed_files.is_empty()
			&& self.deleted_files.is_empty()
	}
}

/// Output of the reconciliator: actions plus the reporting summary
#[derive(Debug, Default)]
pub struct Reconciliation {
	pub actions: Vec<FileSystemAction>,
	pub change_set: ChangeSet,
}

/// Diff the local tree against the winning snapshot.
///
/// Classification per winning path: absent locally and matching a vanished
/// local file by checksum is a rename; absent otherwise is a create; present
/// with a different type is delete-then-create (never in-place mutation);
/// present with differing content or metadata is a change. Local paths gone
/// from the winning tree become deletes.
///
/// Fails with [`ReconcileError::MissingContent`] when a winning file version
/// references a content checksum the snapshot has no record for.
pub fn reconcile(
	local_tree: &BTreeMap<PathBuf, FileVersion>,
	winners: &DatabaseSnapshot,
) -> Result<Reconciliation, ReconcileError> {
	let winning_tree = winners.current_file_tree();
	let mut out = Reconciliation::default();

	// Local paths absent from the winning tree, indexed by content checksum
	// for rename detection. Only unambiguous matches become renames.
	let mut vanished_by_checksum: BTreeMap<FileChecksum, Vec<&FileVersion>> = BTreeMap::new();
	for (path, version) in local_tree {
		if !winning_tree.contains_key(path) {
			if let Some(checksum) = version.checksum {
				if version.file_type == FileType::File {
					vanished_by_checksum.entry(checksum).or_default().push(version);
				}
			}
		}
	}
	let mut consumed_by_rename: BTreeSet<PathBuf> = BTreeSet::new();

	for (path, winning) in &winning_tree {
		match local_tree.get(path) {
			None => {
				// Rename heuristic: same content at exactly one vanished path
				let rename_source = winning.checksum.and_then(|checksum| {
					match vanished_by_checksum.get(&checksum).map(Vec::as_slice) {
						Some([single]) if winning.file_type == FileType::File => Some(*single),
						_ => None,
					}
				});

				match rename_source {
					Some(source) if !consumed_by_rename.contains(&source.path) => {
						consumed_by_rename.insert(source.path.clone());
						out.change_set.renamed_files.push((source.path.clone(), path.clone()));
						out.actions.push(FileSystemAction::Rename {
							from: source.clone(),
							to: winning.clone(),
						});
					}
					_ => {
						check_content(winning, winners)?;
						out.change_set.new_files.push(path.clone());
						out.actions.push(create_action(winning));
					}
				}
			}
			Some(local) => {
				if local.file_type != winning.file_type {
					// Type changed; evaluate as delete-then-create so a
					// partially-applied state never mixes the two entries
					check_content(winning, winners)?;
					out.change_set.deleted_files.push(path.clone());
					out.change_set.new_files.push(path.clone());
					out.actions.push(FileSystemAction::Delete { from: local.clone() });
					out.actions.push(create_action(winning));
				} else if differs(local, winning) {
					check_content(winning, winners)?;
					out.change_set.changed_files.push(path.clone());
					out.actions.push(change_action(local, winning));
				}
			}
		}
	}

	// Local paths deleted in the winning state
	for (path, local) in local_tree {
		if !winning_tree.contains_key(path) && !consumed_by_rename.contains(path) {
			out.change_set.deleted_files.push(path.clone());
			out.actions.push(FileSystemAction::Delete { from: local.clone() });
		}
	}

	info!(
		new = out.change_set.new_files.len(),
		changed = out.change_set.changed_files.len(),
		renamed = out.change_set.renamed_files.len(),
		deleted = out.change_set.deleted_files.len(),
		"determined filesystem actions"
	);

	Ok(out)
}

/// Whether two same-type versions of one path require an action
fn differs(local: &FileVersion, winning: &FileVersion) -> bool {
	match winning.file_type {
		FileType::File => {
			local.checksum != winning.checksum
				|| local.size != winning.size
				|| local.mtime != winning.mtime
				|| local.permissions != winning.permissions
		}
		FileType::Folder => local.permissions != winning.permissions,
		FileType::Symlink => local.link_target != winning.link_target,
	}
}

fn create_action(winning: &FileVersion) -> FileSystemAction {
	match winning.file_type {
		FileType::File => FileSystemAction::CreateFile { to: winning.clone() },
		FileType::Folder => FileSystemAction::CreateFolder { to: winning.clone() },
		FileType::Symlink => FileSystemAction::SetSymlink { from: None, to: winning.clone() },
	}
}

fn change_action(local: &FileVersion, winning: &FileVersion) -> FileSystemAction {
	match winning.file_type {
		FileType::Symlink => {
			FileSystemAction::SetSymlink { from: Some(local.clone()), to: winning.clone() }
		}
		_ => FileSystemAction::ChangeFile { from: local.clone(), to: winning.clone() },
	}
}

/// A winning file version with content must have a content record
fn check_content(winning: &FileVersion, winners: &DatabaseSnapshot) -> Result<(), ReconcileError> {
	if winning.has_content() {
		if let Some(checksum) = winning.checksum {
			if winners.get_content(&checksum).is_none() {
				return Err(ReconcileError::MissingContent { path: winning.path.clone(), checksum });
			}
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{FileContent, FileHistoryId, FileStatus};
	use std::path::Path;

	fn version(path: &str, body: &[u8]) -> FileVersion {
		FileVersion {
			version: 1,
			path: PathBuf::from(path),
			file_type: FileType::File,
			status: FileStatus::New,
			size: body.len() as u64,
			mtime: 1000,
			permissions: 0o644,
			link_target: None,
			checksum: if body.is_empty() { None } else { Some(FileChecksum::of(body)) },
		}
	}

	fn folder(path: &str) -> FileVersion {
		FileVersion {
			version: 1,
			path: PathBuf::from(path),
			file_type: FileType::Folder,
			status: FileStatus::New,
			size: 0,
			mtime: 1000,
			permissions: 0o755,
			link_target: None,
			checksum: None,
		}
	}

	fn winners_with(versions: Vec<FileVersion>, bodies: Vec<&[u8]>) -> DatabaseSnapshot {
		let mut snapshot = DatabaseSnapshot::new();
		for (i, v) in versions.into_iter().enumerate() {
			snapshot.add_file_version(FileHistoryId(i as u64 + 1), v);
		}
		for body in bodies {
			snapshot.add_content(FileContent {
				checksum: FileChecksum::of(body),
				size: body.len() as u64,
				chunks: vec![crate::model::ChunkChecksum::of(body)],
			});
		}
		snapshot
	}

	#[test]
	fn test_new_file_becomes_create() {
		let local = BTreeMap::new();
		let winners = winners_with(vec![version("a.txt", b"body")], vec![b"body"]);

		let recon = reconcile(&local, &winners).unwrap();
		assert_eq!(recon.actions.len(), 1);
		assert!(matches!(recon.actions[0], FileSystemAction::CreateFile { .. }));
		assert_eq!(recon.change_set.new_files, vec![PathBuf::from("a.txt")]);
	}

	#[test]
	fn test_identical_trees_yield_no_actions() {
		let v = version("a.txt", b"body");
		let mut local = BTreeMap::new();
		local.insert(v.path.clone(), v.clone());
		let winners = winners_with(vec![v], vec![b"body"]);

		let recon = reconcile(&local, &winners).unwrap();
		assert!(recon.actions.is_empty());
		assert!(recon.change_set.is_empty());
	}

	#[test]
	fn test_changed_content_becomes_change() {
		let old = version("a.txt", b"old!");
		let new = version("a.txt", b"new!");
		let mut local = BTreeMap::new();
		local.insert(old.path.clone(), old);
		let winners = winners_with(vec![new], vec![b"new!"]);

		let recon = reconcile(&local, &winners).unwrap();
		assert_eq!(recon.actions.len(), 1);
		assert!(matches!(recon.actions[0], FileSystemAction::ChangeFile { .. }));
	}

	#[test]
	fn test_metadata_only_change() {
		let old = version("a.txt", b"body");
		let mut new = old.clone();
		new.permissions = 0o600;
		let mut local = BTreeMap::new();
		local.insert(old.path.clone(), old);
		let winners = winners_with(vec![new], vec![b"body"]);

		let recon = reconcile(&local, &winners).unwrap();
		assert_eq!(recon.actions.len(), 1);
		// Same checksum: the change needs no chunk downloads
		assert!(!recon.actions[0].materializes_content());
	}

	#[test]
	fn test_deleted_path_becomes_delete() {
		let v = version("gone.txt", b"body");
		let mut local = BTreeMap::new();
		local.insert(v.path.clone(), v);
		let winners = DatabaseSnapshot::new();

		let recon = reconcile(&local, &winners).unwrap();
		assert_eq!(recon.actions.len(), 1);
		assert!(matches!(recon.actions[0], FileSystemAction::Delete { .. }));
		assert_eq!(recon.change_set.deleted_files, vec![PathBuf::from("gone.txt")]);
	}

	#[test]
	fn test_moved_file_becomes_rename() {
		let old = version("old/name.txt", b"body");
		let mut new = version("new/name.txt", b"body");
		new.mtime = old.mtime;
		let mut local = BTreeMap::new();
		local.insert(old.path.clone(), old);
		let winners = winners_with(vec![new], vec![b"body"]);

		let recon = reconcile(&local, &winners).unwrap();
		assert_eq!(recon.actions.len(), 1);
		match &recon.actions[0] {
			FileSystemAction::Rename { from, to } => {
				assert_eq!(from.path, Path::new("old/name.txt"));
				assert_eq!(to.path, Path::new("new/name.txt"));
			}
			other => panic!("expected rename, got {:?}", other),
		}
		assert_eq!(recon.change_set.renamed_files.len(), 1);
		// The source path must not also be deleted
		assert!(recon.change_set.deleted_files.is_empty());
	}

	#[test]
	fn test_ambiguous_rename_falls_back_to_delete_create() {
		// Two vanished local files with the same content: no safe rename
		let a = version("a.txt", b"body");
		let b = version("b.txt", b"body");
		let c = version("c.txt", b"body");
		let mut local = BTreeMap::new();
		local.insert(a.path.clone(), a);
		local.insert(b.path.clone(), b);
		let winners = winners_with(vec![c], vec![b"body"]);

		let recon = reconcile(&local, &winners).unwrap();
		let creates = recon
			.actions
			.iter()
			.filter(|a| matches!(a, FileSystemAction::CreateFile { .. }))
			.count();
		let deletes =
			recon.actions.iter().filter(|a| matches!(a, FileSystemAction::Delete { .. })).count();
		assert_eq!(creates, 1);
		assert_eq!(deletes, 2);
	}

	#[test]
	fn test_type_change_becomes_delete_then_create() {
		let file = version("entry", b"body");
		let dir = folder("entry");
		let mut local = BTreeMap::new();
		local.insert(file.path.clone(), file);
		let winners = winners_with(vec![dir], vec![]);

		let recon = reconcile(&local, &winners).unwrap();
		assert_eq!(recon.actions.len(), 2);
		assert!(matches!(recon.actions[0], FileSystemAction::Delete { .. }));
		assert!(matches!(recon.actions[1], FileSystemAction::CreateFolder { .. }));
	}

	#[test]
	fn test_missing_content_record_is_fatal() {
		let local = BTreeMap::new();
		// Winning version references content, but no record was added
		let winners = winners_with(vec![version("a.txt", b"body")], vec![]);

		let err = reconcile(&local, &winners).unwrap_err();
		assert!(matches!(err, ReconcileError::MissingContent { .. }));
	}

	#[test]
	fn test_empty_file_needs_no_content_record() {
		let local = BTreeMap::new();
		let winners = winners_with(vec![version("empty.txt", b"")], vec![]);

		let recon = reconcile(&local, &winners).unwrap();
		assert_eq!(recon.actions.len(), 1);
	}

	#[test]
	fn test_new_symlink_becomes_set_symlink() {
		let mut link = version("link", b"");
		link.file_type = FileType::Symlink;
		link.link_target = Some(PathBuf::from("target.txt"));
		let local = BTreeMap::new();
		let winners = winners_with(vec![link], vec![]);

		let recon = reconcile(&local, &winners).unwrap();
		assert_eq!(recon.actions.len(), 1);
		assert!(matches!(recon.actions[0], FileSystemAction::SetSymlink { from: None, .. }));
	}
}

// vim: ts=4
