//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use std::str::FromStr;

use crate::error::Error;
use crate::tree::{DataTree, NodeIndex};

/// NETCONF edit-config operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EditOp {
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
    None,
}

// ===== impl EditOp =====

impl EditOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditOp::Merge => "merge",
            EditOp::Replace => "replace",
            EditOp::Create => "create",
            EditOp::Delete => "delete",
            EditOp::Remove => "remove",
            EditOp::None => "none",
        }
    }
}

impl FromStr for EditOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<EditOp, Error> {
        match s {
            "merge" => Ok(EditOp::Merge),
            "replace" => Ok(EditOp::Replace),
            "create" => Ok(EditOp::Create),
            "delete" => Ok(EditOp::Delete),
            "remove" => Ok(EditOp::Remove),
            "none" => Ok(EditOp::None),
            _ => Err(Error::UnknownOperation(s.to_owned())),
        }
    }
}

impl std::fmt::Display for EditOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl DataTree =====

impl DataTree {
    /// Merges another tree into this one: a recursive, schema-aware union
    /// where leaves of `other` overwrite leaves here, list entries are
    /// matched by key values and leaf-list entries by value.
    pub fn merge(&mut self, other: &DataTree) -> Result<(), Error> {
        let root = self.root_index();
        let other_root = other.root_index();
        for child in other.node(other_root).children.clone() {
            merge_node(self, root, other, child)?;
        }
        Ok(())
    }

    /// Applies an edit request with NETCONF edit-config semantics. Nodes of
    /// the edit subtree may carry their own operation annotation, which
    /// overrides the inherited default operation.
    ///
    /// The edit is not atomic against this tree; callers stage it on a
    /// working copy and swap on success.
    pub fn edit(
        &mut self,
        default_op: EditOp,
        edit: &DataTree,
    ) -> Result<(), Error> {
        let root = self.root_index();
        let edit_root = edit.root_index();
        for child in edit.node(edit_root).children.clone() {
            edit_node(self, root, edit, child, default_op)?;
        }
        Ok(())
    }
}

// ===== helper functions =====

fn merge_node(
    dst: &mut DataTree,
    dst_parent: NodeIndex,
    src: &DataTree,
    src_index: NodeIndex,
) -> Result<(), Error> {
    match dst.find_match(dst_parent, src, src_index) {
        Some(existing) => {
            // Leaves take the incoming value; interior nodes recurse.
            let src_node = src.node(src_index);
            if src_node.value.is_some() {
                dst.node_mut(existing).value = src_node.value.clone();
            }
            for src_child in src.node(src_index).children.clone() {
                merge_node(dst, existing, src, src_child)?;
            }
        }
        None => {
            dst.graft(dst_parent, src, src_index);
        }
    }
    Ok(())
}

fn edit_node(
    dst: &mut DataTree,
    dst_parent: NodeIndex,
    edit: &DataTree,
    edit_index: NodeIndex,
    inherited_op: EditOp,
) -> Result<(), Error> {
    let op = edit.node(edit_index).operation.unwrap_or(inherited_op);
    let existing = dst.find_match(dst_parent, edit, edit_index);

    match op {
        EditOp::Merge => {
            merge_annotated(dst, dst_parent, edit, edit_index, op)?;
        }
        EditOp::Replace => {
            if let Some(existing) = existing {
                dst.unlink(existing);
            }
            dst.graft(dst_parent, edit, edit_index);
        }
        EditOp::Create => {
            if existing.is_some() {
                let path = edit.node_ref(edit_index).path();
                return Err(Error::DataExists(path));
            }
            dst.graft(dst_parent, edit, edit_index);
        }
        EditOp::Delete => {
            let Some(existing) = existing else {
                let path = edit.node_ref(edit_index).path();
                return Err(Error::DataMissing(path));
            };
            dst.unlink(existing);
        }
        EditOp::Remove => {
            if let Some(existing) = existing {
                dst.unlink(existing);
            }
        }
        EditOp::None => {
            // Structural placeholder: descend without touching the node
            // itself. An interior node materialized only for descent is
            // taken back out if the descent leaves it empty.
            let (target, created) = match existing {
                Some(existing) => (existing, false),
                None => (dst.graft_shallow(dst_parent, edit, edit_index), true),
            };
            for edit_child in edit.node(edit_index).children.clone() {
                edit_node(dst, target, edit, edit_child, op)?;
            }
            if created && dst.node(target).children.is_empty() {
                dst.unlink(target);
            }
        }
    }
    Ok(())
}

// Merge, honoring per-node operation overrides below this point.
fn merge_annotated(
    dst: &mut DataTree,
    dst_parent: NodeIndex,
    edit: &DataTree,
    edit_index: NodeIndex,
    inherited_op: EditOp,
) -> Result<(), Error> {
    // A child annotation may switch away from merge mid-descent.
    let op = edit.node(edit_index).operation.unwrap_or(inherited_op);
    if op != EditOp::Merge {
        return edit_node(dst, dst_parent, edit, edit_index, op);
    }

    match dst.find_match(dst_parent, edit, edit_index) {
        Some(existing) => {
            let edit_node_data = edit.node(edit_index);
            if edit_node_data.value.is_some() {
                dst.node_mut(existing).value = edit_node_data.value.clone();
            }
            for edit_child in edit.node(edit_index).children.clone() {
                merge_annotated(dst, existing, edit, edit_child, op)?;
            }
        }
        None => {
            // Nothing to merge into. Annotations below may still ask for
            // deletions: delete fails against absent data, remove no-ops.
            dst.graft_filtered(dst_parent, edit, edit_index)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testlib;

    #[test]
    fn test_merge_overwrites_leaf() {
        let mut target = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>old</hostname></system></config>",
        );
        let edit = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>new</hostname></system></config>",
        );

        target.merge(&edit).unwrap();
        let hostname = target
            .find_xpath("/conifer-system:system/hostname")
            .unwrap();
        assert_eq!(hostname[0].value(), Some("new"));
    }

    #[test]
    fn test_merge_idempotent() {
        let mut target = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>host</hostname></system></config>",
        );
        let edit = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <user><name>admin</name><uid>1</uid></user></system></config>",
        );

        target.merge(&edit).unwrap();
        let once = target.duplicate();
        target.merge(&edit).unwrap();

        assert!(target.data_eq(&once));
    }

    #[test]
    fn test_merge_matches_list_entry_by_key() {
        let mut target = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <user><name>admin</name><uid>1</uid></user></system></config>",
        );
        let edit = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <user><name>admin</name><uid>99</uid></user>\
             <user><name>guest</name><uid>2</uid></user></system></config>",
        );

        target.merge(&edit).unwrap();

        let users = target.find_xpath("/conifer-system:system/user").unwrap();
        assert_eq!(users.len(), 2);
        let admin_uid = target
            .find_xpath("/conifer-system:system/user[name='admin']/uid")
            .unwrap();
        assert_eq!(admin_uid[0].value(), Some("99"));
    }

    #[test]
    fn test_create_fails_on_existing() {
        let mut target = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>host</hostname></system></config>",
        );
        let edit = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>other</hostname></system></config>",
        );

        let result = target.edit(EditOp::Create, &edit);
        assert!(matches!(result, Err(Error::DataExists(_))));
    }

    #[test]
    fn test_delete_fails_on_absent() {
        let mut target = testlib::tree("<config/>");
        let edit = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>host</hostname></system></config>",
        );

        let result = target.edit(EditOp::Delete, &edit);
        assert!(matches!(result, Err(Error::DataMissing(_))));

        // Remove is silent on absence.
        target.edit(EditOp::Remove, &edit).unwrap();
        assert!(target.is_empty());
    }

    #[test]
    fn test_replace_discards_subtree() {
        let mut target = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>host</hostname>\
             <user><name>admin</name><uid>1</uid></user></system></config>",
        );
        let edit = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>fresh</hostname></system></config>",
        );

        target.edit(EditOp::Replace, &edit).unwrap();

        assert!(target.data_eq(&edit));
        let users = target.find_xpath("/conifer-system:system/user").unwrap();
        assert!(users.is_empty());
    }

    #[test]
    fn test_operation_annotation_overrides_default() {
        let mut target = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>host</hostname>\
             <user><name>admin</name><uid>1</uid></user></system></config>",
        );
        // Merge by default, but delete the list entry via annotation.
        let edit = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <user operation='delete'><name>admin</name></user>\
             </system></config>",
        );

        target.edit(EditOp::Merge, &edit).unwrap();

        let users = target.find_xpath("/conifer-system:system/user").unwrap();
        assert!(users.is_empty());
        let hostname = target
            .find_xpath("/conifer-system:system/hostname")
            .unwrap();
        assert_eq!(hostname[0].value(), Some("host"));
    }

    #[test]
    fn test_none_descends_without_creating() {
        let mut target = testlib::tree("<config/>");
        let edit = testlib::tree(
            "<config><system xmlns='urn:conifer:system'/></config>",
        );

        target.edit(EditOp::None, &edit).unwrap();
        assert!(target.is_empty());
    }
}
