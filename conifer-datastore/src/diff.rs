//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use conifer_yang::schema::SnodeId;

use crate::tree::{DataTree, NodeIndex};

/// Difference operation between two configuration trees.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataDiffOp {
    Create,
    Delete,
    Replace,
}

/// A single diff entry. Created and deleted subtrees produce one entry for
/// the subtree root; value changes produce one entry per leaf.
#[derive(Clone, Debug)]
pub struct DataDiffEntry {
    pub op: DataDiffOp,
    pub path: String,
    pub snode: SnodeId,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// Ordered set of changes turning one tree into another.
#[derive(Clone, Debug, Default)]
pub struct DataDiff {
    entries: Vec<DataDiffEntry>,
}

// ===== impl DataDiff =====

impl DataDiff {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataDiffEntry> {
        self.entries.iter()
    }
}

impl std::fmt::Display for DataDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for entry in &self.entries {
            match entry.op {
                DataDiffOp::Create => {
                    writeln!(f, "+ {}", entry.path)?;
                }
                DataDiffOp::Delete => {
                    writeln!(f, "- {}", entry.path)?;
                }
                DataDiffOp::Replace => {
                    writeln!(
                        f,
                        "~ {} [{} -> {}]",
                        entry.path,
                        entry.old_value.as_deref().unwrap_or(""),
                        entry.new_value.as_deref().unwrap_or(""),
                    )?;
                }
            }
        }
        Ok(())
    }
}

// ===== impl DataTree =====

impl DataTree {
    /// Computes the changes turning this tree into `new`. Identity follows
    /// the merge rules: lists matched by keys, leaf-lists by value.
    pub fn diff(&self, new: &DataTree) -> DataDiff {
        let mut diff = DataDiff::default();
        diff_children(self, self.root_index(), new, new.root_index(), &mut diff);
        diff
    }
}

// ===== helper functions =====

fn diff_children(
    old: &DataTree,
    old_index: NodeIndex,
    new: &DataTree,
    new_index: NodeIndex,
    diff: &mut DataDiff,
) {
    // Additions and changes.
    for new_child in new.node(new_index).children.clone() {
        let Some(snode) = new.node(new_child).snode else {
            continue;
        };
        match old.find_match(old_index, new, new_child) {
            Some(old_child) => {
                let old_value = &old.node(old_child).value;
                let new_value = &new.node(new_child).value;
                if old_value != new_value {
                    diff.entries.push(DataDiffEntry {
                        op: DataDiffOp::Replace,
                        path: new.node_ref(new_child).path(),
                        snode,
                        old_value: old_value.clone(),
                        new_value: new_value.clone(),
                    });
                }
                diff_children(old, old_child, new, new_child, diff);
            }
            None => {
                diff.entries.push(DataDiffEntry {
                    op: DataDiffOp::Create,
                    path: new.node_ref(new_child).path(),
                    snode,
                    old_value: None,
                    new_value: new.node(new_child).value.clone(),
                });
            }
        }
    }

    // Removals.
    for old_child in old.node(old_index).children.clone() {
        let Some(snode) = old.node(old_child).snode else {
            continue;
        };
        if new.find_match(new_index, old, old_child).is_none() {
            diff.entries.push(DataDiffEntry {
                op: DataDiffOp::Delete,
                path: old.node_ref(old_child).path(),
                snode,
                old_value: old.node(old_child).value.clone(),
                new_value: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testlib;

    #[test]
    fn test_diff_empty_for_identical_trees() {
        let tree = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>a</hostname></system></config>",
        );
        assert!(tree.diff(&tree.duplicate()).is_empty());
    }

    #[test]
    fn test_diff_operations() {
        let old = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>a</hostname>\
             <user><name>admin</name><uid>1</uid></user>\
             </system></config>",
        );
        let new = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>b</hostname>\
             <user><name>guest</name><uid>2</uid></user>\
             </system></config>",
        );

        let diff = old.diff(&new);
        let ops = diff
            .iter()
            .map(|entry| (entry.op, entry.path.clone()))
            .collect::<Vec<_>>();

        assert!(ops.contains(&(
            DataDiffOp::Replace,
            "/conifer-system:system/hostname".to_owned()
        )));
        assert!(ops.contains(&(
            DataDiffOp::Create,
            "/conifer-system:system/user[name='guest']".to_owned()
        )));
        assert!(ops.contains(&(
            DataDiffOp::Delete,
            "/conifer-system:system/user[name='admin']".to_owned()
        )));
        assert_eq!(diff.len(), 3);
    }
}
