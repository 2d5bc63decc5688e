//! Local pull request diffs.
//!
//! Computes the patch a pull request would show: the changes on the source
//! branch since it forked from the target branch.

use anyhow::{Context, Result};
use git2::{Commit, DiffFormat, DiffOptions, Repository};
use std::path::Path;
use tracing::{debug, info};

/// Patch text and size of a branch comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchDiff {
    pub patch: String,
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

impl BranchDiff {
    pub fn is_empty(&self) -> bool {
        self.files_changed == 0
    }
}

/// Resolve a branch name locally, then as a remote-tracking branch.
fn resolve<'r>(repo: &'r Repository, name: &str) -> Result<Commit<'r>> {
    let object = repo
        .revparse_single(name)
        .or_else(|_| repo.revparse_single(&format!("origin/{}", name)))
        .with_context(|| format!("Unknown branch or revision: {}", name))?;

    object
        .peel_to_commit()
        .with_context(|| format!("{} does not point to a commit", name))
}

/// Diff `source` against its merge base with `target` in the repository at `path`.
pub fn branch_diff(path: &Path, target: &str, source: &str) -> Result<BranchDiff> {
    let repo = Repository::open(path)
        .with_context(|| format!("Failed to open git repository: {}", path.display()))?;

    let target_commit = resolve(&repo, target)?;
    let source_commit = resolve(&repo, source)?;

    let base = match repo.merge_base(target_commit.id(), source_commit.id()) {
        Ok(oid) => repo.find_commit(oid)?,
        Err(_) => {
            debug!("No merge base between {} and {}, diffing tips", target, source);
            target_commit
        }
    };
    debug!("Diffing {}..{}", base.id(), source_commit.id());

    let mut options = DiffOptions::new();
    options.context_lines(3);
    let diff = repo
        .diff_tree_to_tree(
            Some(&base.tree()?),
            Some(&source_commit.tree()?),
            Some(&mut options),
        )
        .context("Failed to compute diff")?;

    let mut patch = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if matches!(line.origin(), '+' | '-' | ' ') {
            patch.push(line.origin());
        }
        patch.push_str(&String::from_utf8_lossy(line.content()));
        true
    })
    .context("Failed to render diff")?;

    let stats = diff.stats().context("Failed to compute diff stats")?;
    let diff = BranchDiff {
        patch,
        files_changed: stats.files_changed(),
        insertions: stats.insertions(),
        deletions: stats.deletions(),
    };

    info!(
        "{}..{}: {} files changed, +{} -{}",
        target, source, diff.files_changed, diff.insertions, diff.deletions
    );
    Ok(diff)
}
