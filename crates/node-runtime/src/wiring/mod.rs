//! Cross-subsystem event wiring.

pub mod commit_feedback;

pub use commit_feedback::{apply_commit, forward_local_commits, forward_rpc_commits};
