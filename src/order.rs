//! Dependency-ordered sorting of filesystem actions
//!
//! Builds an explicit dependency graph over the action list and runs a
//! stable topological sort, rather than chaining pairwise comparators. The
//! constraints mirror what the filesystem itself requires: parents exist
//! before children, paths are freed before they are reused, folder contents
//! are removed before the folder, and a rename runs while its source still
//! exists. Actions with no constraint between them keep their input order,
//! so the result is deterministic for a given input.

use std::collections::BTreeSet;

use crate::action::{ActionKind, FileSystemAction};

/// Sort `actions` into an execution order respecting filesystem dependencies
pub fn sort_actions(actions: Vec<FileSystemAction>) -> Vec<FileSystemAction> {
	let n = actions.len();
	let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
	let mut indegree = vec![0usize; n];

	for i in 0..n {
		for j in 0..n {
			if i != j && must_precede(&actions[i], &actions[j]) {
				edges[i].push(j);
				indegree[j] += 1;
			}
		}
	}

	// Kahn's algorithm; the ready set iterates in original index order,
	// which keeps unconstrained actions in their input order.
	let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
	let mut order: Vec<usize> = Vec::with_capacity(n);

	while let Some(&i) = ready.iter().next() {
		ready.remove(&i);
		order.push(i);
		for &j in &edges[i] {
			indegree[j] -= 1;
			if indegree[j] == 0 {
				ready.insert(j);
			}
		}
	}

	// A reconciled action set is acyclic; if a cycle ever slips through,
	// still execute every action once, in input order.
	if order.len() < n {
		let placed: BTreeSet<usize> = order.iter().copied().collect();
		order.extend((0..n).filter(|i| !placed.contains(i)));
	}

	let mut rank = vec![0usize; n];
	for (r, i) in order.iter().enumerate() {
		rank[*i] = r;
	}
	let mut indexed: Vec<(usize, FileSystemAction)> = actions.into_iter().enumerate().collect();
	indexed.sort_by_key(|(i, _)| rank[*i]);
	indexed.into_iter().map(|(_, action)| action).collect()
}

/// Whether `a` must execute before `b`
fn must_precede(a: &FileSystemAction, b: &FileSystemAction) -> bool {
	// A folder exists before anything is created or changed inside it
	if a.kind() == ActionKind::CreateFolder
		&& establishes_entry(b)
		&& strictly_inside(b.target_path(), a.target_path())
	{
		return true;
	}

	match (a, b) {
		// A path is freed before an incompatible entry reuses it
		(FileSystemAction::Delete { from }, _)
			if establishes_entry(b) && from.path == b.target_path() =>
		{
			true
		}
		// Deletes among themselves: child before ancestor folder
		(FileSystemAction::Delete { from: a_from }, FileSystemAction::Delete { from: b_from }) => {
			strictly_inside(&a_from.path, &b_from.path)
		}
		// A rename runs while its source still exists, so it precedes the
		// deletion of any folder the source lives in
		(FileSystemAction::Rename { from, .. }, FileSystemAction::Delete { from: deleted }) => {
			strictly_inside(&from.path, &deleted.path)
		}
		_ => false,
	}
}

/// Actions that establish an entry at their target path
fn establishes_entry(action: &FileSystemAction) -> bool {
	matches!(
		action.kind(),
		ActionKind::CreateFile
			| ActionKind::CreateFolder
			| ActionKind::ChangeFile
			| ActionKind::SetSymlink
			| ActionKind::Rename
	)
}

fn strictly_inside(path: &std::path::Path, ancestor: &std::path::Path) -> bool {
	path != ancestor && path.starts_with(ancestor)
}


// vim: ts=4
