//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use conifer_yang::Context;
use conifer_yang::schema::{SchemaNode, SchemaNodeKind, SnodeId};
use generational_arena::{Arena, Index};

use crate::edit::EditOp;
use crate::error::Error;

pub type NodeIndex = Index;

/// Schema-typed configuration tree.
///
/// Nodes live in an arena indexed by integer handles; parent/child relations
/// are index edges. Unlinked nodes are not freed individually, reclaim
/// happens in bulk when the tree is dropped or replaced. Snapshots are plain
/// clones of the arena.
#[derive(Clone)]
pub struct DataTree {
    ctx: Arc<Context>,
    arena: Arena<Node>,
    root: NodeIndex,
}

// Tree node storage.
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) module: Option<String>,
    pub(crate) name: String,
    pub(crate) value: Option<String>,
    pub(crate) attrs: Vec<Attr>,
    // Transient edit-operation annotation, meaningful only while the node is
    // part of an edit request payload.
    pub(crate) operation: Option<EditOp>,
    pub(crate) snode: Option<SnodeId>,
    pub(crate) parent: Option<NodeIndex>,
    pub(crate) children: Vec<NodeIndex>,
}

/// Keyed node attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attr {
    pub name: String,
    pub value: String,
}

/// Read-only reference to a tree node.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a DataTree,
    index: NodeIndex,
}

// A single step of a restricted XPath expression.
#[derive(Debug)]
struct PathStep {
    module: Option<String>,
    name: String,
    // Key-name/value predicates; the empty name stands for the leaf-list
    // value predicate (`[.='value']`).
    predicates: Vec<(String, String)>,
}

// ===== impl DataTree =====

impl DataTree {
    /// Creates an empty tree holding only the `<config>` root.
    pub fn new(ctx: Arc<Context>) -> DataTree {
        let mut arena = Arena::new();
        let root = arena.insert(Node {
            module: None,
            name: "config".to_owned(),
            value: None,
            attrs: Vec::new(),
            operation: None,
            snode: None,
            parent: None,
            children: Vec::new(),
        });
        DataTree { ctx, arena, root }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn root(&self) -> NodeRef<'_> {
        NodeRef { tree: self, index: self.root }
    }

    pub(crate) fn root_index(&self) -> NodeIndex {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.arena[self.root].children.is_empty()
    }

    pub fn duplicate(&self) -> DataTree {
        self.clone()
    }

    pub(crate) fn node(&self, index: NodeIndex) -> &Node {
        &self.arena[index]
    }

    pub(crate) fn node_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.arena[index]
    }

    pub(crate) fn node_ref(&self, index: NodeIndex) -> NodeRef<'_> {
        NodeRef { tree: self, index }
    }

    /// Appends a child node, resolving it against the schema. Fails with an
    /// unknown-element error when the name does not resolve.
    pub(crate) fn add_child(
        &mut self,
        parent: NodeIndex,
        module: Option<&str>,
        name: &str,
    ) -> Result<NodeIndex, Error> {
        let snode = self.resolve_child_schema(parent, module, name)?;
        let module = Some(self.ctx.snode_by_id(snode).module().name.clone());

        let index = self.arena.insert(Node {
            module,
            name: name.to_owned(),
            value: None,
            attrs: Vec::new(),
            operation: None,
            snode: Some(snode),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.arena[parent].children.push(index);
        Ok(index)
    }

    // Resolves the schema node for a child of `parent`.
    pub(crate) fn resolve_child_schema(
        &self,
        parent: NodeIndex,
        module: Option<&str>,
        name: &str,
    ) -> Result<SnodeId, Error> {
        let snode = match self.arena[parent].snode {
            Some(parent_snode) => self
                .ctx
                .snode_by_id(parent_snode)
                .find_child(module, name),
            None => self.ctx.find_root(module, name),
        };
        snode
            .map(|snode| snode.id())
            .ok_or_else(|| Error::UnknownElement(name.to_owned()))
    }

    /// Unlinks a node from its parent. The arena slot is reclaimed in bulk
    /// when the tree goes away.
    pub(crate) fn unlink(&mut self, index: NodeIndex) {
        if let Some(parent) = self.arena[index].parent {
            self.arena[parent].children.retain(|child| *child != index);
        }
        self.arena[index].parent = None;
    }

    /// Deep-copies a subtree from another tree under `parent`, stripping
    /// transient edit-operation annotations.
    pub(crate) fn graft(
        &mut self,
        parent: NodeIndex,
        src_tree: &DataTree,
        src: NodeIndex,
    ) -> NodeIndex {
        let src_node = src_tree.node(src);
        let mut node = Node {
            module: src_node.module.clone(),
            name: src_node.name.clone(),
            value: src_node.value.clone(),
            attrs: src_node.attrs.clone(),
            operation: None,
            snode: src_node.snode,
            parent: Some(parent),
            children: Vec::new(),
        };
        node.attrs.retain(|attr| !attr.name.starts_with("xmlns"));
        let index = self.arena.insert(node);
        self.arena[parent].children.push(index);

        for src_child in src_tree.node(src).children.clone() {
            self.graft(index, src_tree, src_child);
        }
        index
    }

    // Copies a single node (no children) from another tree under `parent`.
    pub(crate) fn graft_shallow(
        &mut self,
        parent: NodeIndex,
        src_tree: &DataTree,
        src: NodeIndex,
    ) -> NodeIndex {
        let src_node = src_tree.node(src);
        let index = self.arena.insert(Node {
            module: src_node.module.clone(),
            name: src_node.name.clone(),
            value: src_node.value.clone(),
            attrs: Vec::new(),
            operation: None,
            snode: src_node.snode,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.arena[parent].children.push(index);
        index
    }

    /// Deep-copies an edit subtree, honoring edit-operation annotations
    /// against absent target data: `delete` fails, `remove` is skipped, and
    /// `none` nodes are kept only while they gain children.
    pub(crate) fn graft_filtered(
        &mut self,
        parent: NodeIndex,
        src_tree: &DataTree,
        src: NodeIndex,
    ) -> Result<Option<NodeIndex>, Error> {
        let op = src_tree.node(src).operation;
        match op {
            Some(EditOp::Remove) => return Ok(None),
            Some(EditOp::Delete) => {
                return Err(Error::DataMissing(src_tree.node_ref(src).path()));
            }
            _ => (),
        }

        let index = self.graft_shallow(parent, src_tree, src);
        for src_child in src_tree.node(src).children.clone() {
            self.graft_filtered(index, src_tree, src_child)?;
        }
        if op == Some(EditOp::None) && self.arena[index].children.is_empty() {
            self.unlink(index);
            return Ok(None);
        }
        Ok(Some(index))
    }

    /// Matches an existing child against a node of another tree, using the
    /// NETCONF identity rules: containers and leaves match by qualified
    /// name, list entries by key values, leaf-list entries by value.
    pub(crate) fn find_match(
        &self,
        parent: NodeIndex,
        other_tree: &DataTree,
        other: NodeIndex,
    ) -> Option<NodeIndex> {
        let other_node = other_tree.node(other);
        let snode = other_node.snode?;
        let kind = self.ctx.snode_by_id(snode).kind();

        self.arena[parent]
            .children
            .iter()
            .copied()
            .find(|child| {
                let child_node = &self.arena[*child];
                if child_node.snode != Some(snode) {
                    return false;
                }
                match kind {
                    SchemaNodeKind::Container | SchemaNodeKind::Leaf => true,
                    SchemaNodeKind::List => {
                        self.list_keys(*child)
                            == other_tree.list_keys(other)
                    }
                    SchemaNodeKind::LeafList => {
                        child_node.value == other_node.value
                    }
                }
            })
    }

    // Returns the key leaf values of a list entry, in key declaration order.
    pub(crate) fn list_keys(&self, index: NodeIndex) -> Vec<Option<String>> {
        let node = &self.arena[index];
        let Some(snode) = node.snode else {
            return Vec::new();
        };
        self.ctx
            .snode_by_id(snode)
            .keys()
            .iter()
            .map(|key| {
                node.children.iter().find_map(|child| {
                    let child = &self.arena[*child];
                    (child.name == *key).then(|| child.value.clone()).flatten()
                })
            })
            .collect()
    }

    /// Evaluates a restricted XPath expression, returning every matching
    /// node. An expression that matches nothing yields an empty vector.
    pub fn find_xpath(&self, path: &str) -> Result<Vec<NodeRef<'_>>, Error> {
        let steps = parse_path(path)?;
        let mut matches = vec![self.root];

        for step in &steps {
            let mut next = Vec::new();
            for index in matches {
                for child in &self.arena[index].children {
                    if self.step_matches(*child, step) {
                        next.push(*child);
                    }
                }
            }
            matches = next;
        }

        Ok(matches
            .into_iter()
            .map(|index| NodeRef { tree: self, index })
            .collect())
    }

    fn step_matches(&self, index: NodeIndex, step: &PathStep) -> bool {
        let node = &self.arena[index];
        if node.name != step.name {
            return false;
        }
        if let Some(module) = &step.module
            && node.module.as_deref() != Some(module.as_str())
        {
            return false;
        }
        step.predicates.iter().all(|(key, value)| {
            if key.is_empty() {
                // Leaf-list value predicate.
                node.value.as_deref() == Some(value.as_str())
            } else {
                node.children.iter().any(|child| {
                    let child = &self.arena[*child];
                    child.name == *key
                        && child.value.as_deref() == Some(value.as_str())
                })
            }
        })
    }

    /// Extracts the subtrees matched by an XPath expression into a new tree,
    /// keeping their ancestor chain.
    pub fn get_subtree(&self, path: &str) -> Result<DataTree, Error> {
        let matches =
            self.find_xpath(path)?.iter().map(|n| n.index).collect::<Vec<_>>();

        let mut result = DataTree::new(self.ctx.clone());
        for index in matches {
            // Rebuild the ancestor chain, then graft the matched subtree.
            let mut ancestors = Vec::new();
            let mut cursor = self.arena[index].parent;
            while let Some(ancestor) = cursor {
                if ancestor == self.root {
                    break;
                }
                ancestors.push(ancestor);
                cursor = self.arena[ancestor].parent;
            }
            ancestors.reverse();

            let mut parent = result.root;
            for ancestor in ancestors {
                parent = match result.find_match(parent, self, ancestor) {
                    Some(existing) => existing,
                    None => {
                        let node = self.node(ancestor);
                        let index = result.arena.insert(Node {
                            module: node.module.clone(),
                            name: node.name.clone(),
                            value: None,
                            attrs: Vec::new(),
                            operation: None,
                            snode: node.snode,
                            parent: Some(parent),
                            children: Vec::new(),
                        });
                        result.arena[parent].children.push(index);
                        // Carry list keys so entries stay addressable.
                        for child in &self.arena[ancestor].children {
                            let child_node = &self.arena[*child];
                            if let Some(snode) = child_node.snode
                                && self.ctx.snode_by_id(snode).is_list_key()
                            {
                                result.graft(index, self, *child);
                            }
                        }
                        index
                    }
                };
            }
            if result.find_match(parent, self, index).is_none() {
                result.graft(parent, self, index);
            }
        }
        Ok(result)
    }

    /// Iterates over all linked nodes except the root, depth-first.
    pub fn traverse(&self) -> impl Iterator<Item = NodeRef<'_>> {
        let mut stack: Vec<NodeIndex> =
            self.arena[self.root].children.iter().rev().copied().collect();
        std::iter::from_fn(move || {
            let index = stack.pop()?;
            stack.extend(self.arena[index].children.iter().rev());
            Some(NodeRef { tree: self, index })
        })
    }

    /// Structural equality: same nodes, values and list order, ignoring
    /// arena layout and attributes.
    pub fn data_eq(&self, other: &DataTree) -> bool {
        self.node_eq(self.root, other, other.root)
    }

    fn node_eq(
        &self,
        index: NodeIndex,
        other_tree: &DataTree,
        other: NodeIndex,
    ) -> bool {
        let a = self.node(index);
        let b = other_tree.node(other);
        if a.name != b.name || a.module != b.module || a.value != b.value {
            return false;
        }
        if a.children.len() != b.children.len() {
            return false;
        }
        // Containers are order-insensitive; list and leaf-list entries are
        // compared in order.
        for child in &a.children {
            let child_node = &self.arena[*child];
            let is_listish = child_node.snode.is_some_and(|snode| {
                matches!(
                    self.ctx.snode_by_id(snode).kind(),
                    SchemaNodeKind::List | SchemaNodeKind::LeafList
                )
            });
            let matched = if is_listish {
                // Positional comparison among same-named siblings.
                let pos_a = a
                    .children
                    .iter()
                    .filter(|c| self.arena[**c].name == child_node.name)
                    .position(|c| c == child)
                    .unwrap();
                b.children
                    .iter()
                    .filter(|c| other_tree.arena[**c].name == child_node.name)
                    .nth(pos_a)
                    .is_some_and(|other_child| {
                        self.node_eq(*child, other_tree, *other_child)
                    })
            } else {
                b.children.iter().any(|other_child| {
                    self.node_eq(*child, other_tree, *other_child)
                })
            };
            if !matched {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Debug for DataTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DataTree({})", self.print_xml_string(false))
    }
}

// ===== impl NodeRef =====

impl<'a> NodeRef<'a> {
    pub(crate) fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn tree(&self) -> &'a DataTree {
        self.tree
    }

    pub fn module(&self) -> Option<&'a str> {
        self.tree.node(self.index).module.as_deref()
    }

    pub fn name(&self) -> &'a str {
        &self.tree.node(self.index).name
    }

    pub fn value(&self) -> Option<&'a str> {
        self.tree.node(self.index).value.as_deref()
    }

    pub fn attrs(&self) -> &'a [Attr] {
        &self.tree.node(self.index).attrs
    }

    pub fn operation(&self) -> Option<EditOp> {
        self.tree.node(self.index).operation
    }

    pub fn schema(&self) -> Option<SchemaNode<'a>> {
        self.tree
            .node(self.index)
            .snode
            .map(|snode| self.tree.ctx.snode_by_id(snode))
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        let parent = self.tree.node(self.index).parent?;
        if parent == self.tree.root {
            return None;
        }
        Some(NodeRef { tree: self.tree, index: parent })
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + use<'a> {
        let tree = self.tree;
        tree.node(self.index)
            .children
            .iter()
            .map(move |index| NodeRef { tree, index: *index })
    }

    pub fn find_child(&self, name: &str) -> Option<NodeRef<'a>> {
        self.children().find(|child| child.name() == name)
    }

    /// Iterates over this node and all descendants, depth-first.
    pub fn traverse(&self) -> impl Iterator<Item = NodeRef<'a>> + use<'a> {
        let tree = self.tree;
        let mut stack = vec![self.index];
        std::iter::from_fn(move || {
            let index = stack.pop()?;
            stack.extend(tree.node(index).children.iter().rev());
            Some(NodeRef { tree, index })
        })
    }

    /// Data path of this node, with key predicates on list entries (e.g.
    /// `/conifer-system:system/user[name='admin']/uid`).
    pub fn path(&self) -> String {
        let mut segments = Vec::new();
        let mut cursor = Some(self.index);
        while let Some(index) = cursor {
            if index == self.tree.root {
                break;
            }
            segments.push(index);
            cursor = self.tree.node(index).parent;
        }
        segments.reverse();

        let mut path = String::new();
        let mut last_module: Option<&str> = None;
        for index in segments {
            let node = self.tree.node(index);
            path.push('/');
            if let Some(module) = node.module.as_deref()
                && last_module != Some(module)
            {
                path.push_str(module);
                path.push(':');
            }
            path.push_str(&node.name);
            if let Some(snode) = node.snode {
                let snode = self.tree.ctx.snode_by_id(snode);
                match snode.kind() {
                    SchemaNodeKind::List => {
                        for (key, value) in snode
                            .keys()
                            .iter()
                            .zip(self.tree.list_keys(index))
                        {
                            let value = value.unwrap_or_default();
                            path.push_str(&format!("[{key}='{value}']"));
                        }
                    }
                    SchemaNodeKind::LeafList => {
                        let value = node.value.as_deref().unwrap_or_default();
                        path.push_str(&format!("[.='{value}']"));
                    }
                    _ => (),
                }
            }
            last_module = node.module.as_deref();
        }
        path
    }
}

impl std::fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRef")
            .field("path", &self.path())
            .field("value", &self.value())
            .finish()
    }
}

// ===== helper functions =====

// Parses a restricted XPath expression into steps. Accepted form:
// `/mod:name[key='value'][.='value']/...`.
fn parse_path(path: &str) -> Result<Vec<PathStep>, Error> {
    let mut steps = Vec::new();
    let path = path.trim();
    if path.is_empty() || path == "/" {
        return Ok(steps);
    }
    let Some(path) = path.strip_prefix('/') else {
        return Err(Error::InvalidPath(path.to_owned()));
    };

    for segment in split_segments(path)? {
        let (head, predicates) = match segment.find('[') {
            Some(pos) => {
                let (head, rest) = segment.split_at(pos);
                (head, parse_predicates(rest, &segment)?)
            }
            None => (segment.as_str(), Vec::new()),
        };
        if head.is_empty() {
            return Err(Error::InvalidPath(segment.clone()));
        }
        let (module, name) = match head.split_once(':') {
            Some((module, name)) => (Some(module.to_owned()), name),
            None => (None, head),
        };
        steps.push(PathStep {
            module,
            name: name.to_owned(),
            predicates,
        });
    }
    Ok(steps)
}

// Splits on `/` outside of quoted predicate values.
fn split_segments(path: &str) -> Result<Vec<String>, Error> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for ch in path.chars() {
        match ch {
            '\'' => {
                in_quote = !in_quote;
                current.push(ch);
            }
            '/' if !in_quote => {
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if in_quote {
        return Err(Error::InvalidPath(path.to_owned()));
    }
    segments.push(current);
    Ok(segments)
}

fn parse_predicates(
    mut rest: &str,
    segment: &str,
) -> Result<Vec<(String, String)>, Error> {
    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let Some(stripped) = rest.strip_prefix('[') else {
            return Err(Error::InvalidPath(segment.to_owned()));
        };
        let Some(end) = stripped.find(']') else {
            return Err(Error::InvalidPath(segment.to_owned()));
        };
        let predicate = &stripped[..end];
        let Some((key, value)) = predicate.split_once('=') else {
            return Err(Error::InvalidPath(segment.to_owned()));
        };
        let value = value
            .trim()
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .or_else(|| {
                value
                    .trim()
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
            })
            .ok_or_else(|| Error::InvalidPath(segment.to_owned()))?;
        let key = key.trim();
        let key = if key == "." { "" } else { key };
        predicates.push((key.to_owned(), value.to_owned()));
        rest = &stripped[end + 1..];
    }
    Ok(predicates)
}
