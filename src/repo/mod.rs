//! Git repository access.

pub mod diff;

pub use diff::{branch_diff, BranchDiff};
