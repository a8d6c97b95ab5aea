//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use chrono::{DateTime, Utc};
use conifer_datastore::{DataDiff, DataTree, Store};
use derive_new::new;
use serde::{Deserialize, Serialize};

/// Transaction phase. Phases advance monotonically; `Revert` is entered
/// only from `Commit`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Phase {
    #[default]
    Init,
    Validate,
    Commit,
    CommitDone,
    Revert,
    End,
}

/// Transaction outcome.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Outcome {
    #[default]
    Pending,
    Ok,
    Invalid,
    Failed,
}

/// Why a transaction is being reverted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RevertReason {
    /// A commit callback failed and the already-applied part is being
    /// unwound.
    Abort,
}

/// A single commit attempt: the source tree being promoted into the target
/// datastore, the snapshot to restore on failure, and the frozen set of
/// changes in between. Unique in the process at any given time.
#[derive(Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct Transaction {
    // Unique identifier, assigned when the transaction is recorded.
    #[new(default)]
    pub id: u32,

    // Date and time for when the transaction occurred.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,

    // Optional comment describing the change.
    pub comment: String,

    pub source: Store,
    pub target: Store,

    // Tree being committed.
    #[serde(with = "conifer_datastore::serde::data_tree")]
    pub candidate: DataTree,

    // Snapshot of the target before the commit, restored on revert.
    #[serde(with = "conifer_datastore::serde::data_tree")]
    pub original: DataTree,

    // Changes between original and candidate. Recomputed after the validate
    // phase, then frozen: commit and revert both walk this set even if a
    // callback mutates the candidate mid-commit.
    #[new(default)]
    #[serde(skip)]
    pub diff: DataDiff,

    #[new(default)]
    pub phase: Phase,

    #[new(default)]
    pub outcome: Outcome,
}

// ===== impl Phase =====

impl Phase {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Validate => "validate",
            Phase::Commit => "commit",
            Phase::CommitDone => "commit-done",
            Phase::Revert => "revert",
            Phase::End => "end",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl RevertReason =====

impl RevertReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RevertReason::Abort => "abort",
        }
    }
}

impl std::fmt::Display for RevertReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl Transaction =====

impl Transaction {
    /// Recomputes and freezes the change set.
    pub fn freeze_diff(&mut self) {
        self.diff = self.original.diff(&self.candidate);
    }
}
