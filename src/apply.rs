//! Sequential action execution with per-action failure isolation
//!
//! Actions run strictly one after another in the order produced by the
//! topological sort; filesystem mutations are not safely reorderable, so no
//! concurrency is attempted here. An inconsistent-filesystem condition on
//! one action is recorded and the cycle continues: one broken file must not
//! block convergence of the rest of the tree. Space exhaustion aborts the
//! remaining actions, and a run of repeated unexplained failures does too.

use std::path::PathBuf;

use crate::action::{ActionCounts, ActionOutcome, ApplyContext, FileSystemAction};
use crate::error::{ActionError, ApplyError};
use crate::logging::*;

/// Result of the apply stage
#[derive(Debug, Default)]
pub struct ApplyReport {
	/// Successfully executed actions, by kind
	pub counts: ActionCounts,
	/// Conflict copies created to preserve drifted local files
	pub conflicts: Vec<PathBuf>,
	/// Paths skipped because the live filesystem no longer matched the
	/// action's precondition
	pub inconsistent: Vec<PathBuf>,
	/// Paths whose action failed with a recorded I/O error
	pub failed: Vec<PathBuf>,
}

/// Execute `actions` in order, isolating recoverable failures per action.
///
/// `actions` must already be dependency-sorted (see [`crate::order`]).
pub fn apply_actions(
	actions: &[FileSystemAction],
	ctx: &ApplyContext<'_>,
) -> Result<ApplyReport, ApplyError> {
	let mut report = ApplyReport::default();
	let mut consecutive_failures = 0usize;

	debug!(actions = actions.len(), "applying filesystem actions");

	for action in actions {
		let mut outcome = ActionOutcome::default();
		let result = action.execute(ctx, &mut outcome);

		// A conflict copy exists on disk even when the action then failed
		if let Some(conflict) = outcome.conflict {
			report.conflicts.push(conflict);
		}

		match result {
			Ok(()) => {
				report.counts.record(action.kind());
				consecutive_failures = 0;
			}
			Err(ActionError::InconsistentFilesystem { path, reason }) => {
				// Recoverable: skip just this file, keep converging the rest
				warn!(path = %path.display(), %reason, "inconsistent filesystem, skipping action");
				report.inconsistent.push(path);
				consecutive_failures = 0;
			}
			Err(ActionError::NoSpace { path }) => {
				// Iterating further would fail the same way for every action
				error!(path = %path.display(), "no space left on device, aborting apply stage");
				return Err(ApplyError::Aborted {
					reason: format!("no space left on device while writing {}", path.display()),
				});
			}
			Err(ActionError::Io { path, source }) => {
				warn!(path = %path.display(), error = %source, "action failed");
				report.failed.push(ctx.rel(&path));
				consecutive_failures += 1;
				if consecutive_failures >= ctx.config.max_systemic_failures {
					return Err(ApplyError::Aborted {
						reason: format!(
							"{} consecutive action failures, assuming systemic problem",
							consecutive_failures
						),
					});
				}
			}
		}
	}

	info!(
		applied = report.counts.total(),
		conflicts = report.conflicts.len(),
		inconsistent = report.inconsistent.len(),
		failed = report.failed.len(),
		"apply stage complete"
	);

	Ok(report)
}


// vim: ts=4
