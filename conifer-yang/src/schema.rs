//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use enum_as_inner::EnumAsInner;
use regex::Regex;

use crate::{Context, Error, Module};

pub type SnodeId = usize;

/// YANG schema node kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchemaNodeKind {
    Container,
    List,
    Leaf,
    LeafList,
}

/// Reference to a schema node within a compiled context.
#[derive(Clone, Copy)]
pub struct SchemaNode<'a> {
    ctx: &'a Context,
    id: SnodeId,
}

// Schema node storage.
#[derive(Debug)]
pub(crate) struct SnodeData {
    pub(crate) module: usize,
    pub(crate) name: String,
    pub(crate) kind: SchemaNodeKind,
    pub(crate) parent: Option<SnodeId>,
    pub(crate) children: Vec<SnodeId>,
    pub(crate) config: bool,
    pub(crate) mandatory: bool,
    pub(crate) presence: bool,
    pub(crate) default: Option<String>,
    pub(crate) keys: Vec<String>,
    pub(crate) unique: Vec<Vec<String>>,
    pub(crate) leaf_type: Option<LeafType>,
    pub(crate) when: Option<Condition>,
    pub(crate) musts: Vec<Must>,
}

/// Compiled leaf type with its restrictions.
#[derive(Clone, Debug, EnumAsInner)]
pub enum LeafType {
    Boolean,
    Decimal64 { fraction_digits: u8 },
    Empty,
    Enumeration { values: Vec<String> },
    Int { width: IntWidth, range: Option<(i64, i64)> },
    Leafref { path: String },
    Str { length: Option<(u64, u64)>, patterns: Vec<Regex> },
    Uint { width: IntWidth, range: Option<(u64, u64)> },
    Union { types: Vec<LeafType> },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

/// Unresolved leaf type, as delivered by the schema collaborator. Patterns
/// are compiled when the context is built.
#[derive(Clone, Debug)]
pub struct TypeSpec {
    kind: TypeSpecKind,
}

#[derive(Clone, Debug)]
enum TypeSpecKind {
    Boolean,
    Decimal64 { fraction_digits: u8 },
    Empty,
    Enumeration { values: Vec<String> },
    Int { width: IntWidth, range: Option<(i64, i64)> },
    Leafref { path: String },
    Str { length: Option<(u64, u64)>, patterns: Vec<String> },
    Uint { width: IntWidth, range: Option<(u64, u64)> },
    Union { types: Vec<TypeSpec> },
}

/// Restricted when/must condition: presence or equality test on a data path,
/// optionally negated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Condition {
    pub path: String,
    pub value: Option<String>,
    pub negate: bool,
}

#[derive(Clone, Debug)]
pub struct Must {
    pub condition: Condition,
    pub error_message: Option<String>,
}

/// Schema node under construction.
#[derive(Debug)]
pub struct NodeBuilder {
    name: String,
    kind: SchemaNodeKind,
    children: Vec<NodeBuilder>,
    config: bool,
    mandatory: bool,
    presence: bool,
    default: Option<String>,
    keys: Vec<String>,
    unique: Vec<Vec<String>>,
    type_spec: Option<TypeSpec>,
    when: Option<Condition>,
    musts: Vec<Must>,
}

// ===== global functions =====

pub fn container(name: &str) -> NodeBuilder {
    NodeBuilder::new(name, SchemaNodeKind::Container)
}

pub fn list(name: &str) -> NodeBuilder {
    NodeBuilder::new(name, SchemaNodeKind::List)
}

pub fn leaf(name: &str, type_spec: TypeSpec) -> NodeBuilder {
    let mut node = NodeBuilder::new(name, SchemaNodeKind::Leaf);
    node.type_spec = Some(type_spec);
    node
}

pub fn leaf_list(name: &str, type_spec: TypeSpec) -> NodeBuilder {
    let mut node = NodeBuilder::new(name, SchemaNodeKind::LeafList);
    node.type_spec = Some(type_spec);
    node
}

// ===== impl SchemaNode =====

impl<'a> SchemaNode<'a> {
    pub(crate) fn new(ctx: &'a Context, id: SnodeId) -> SchemaNode<'a> {
        SchemaNode { ctx, id }
    }

    fn data(&self) -> &'a SnodeData {
        &self.ctx.snodes[self.id]
    }

    pub fn id(&self) -> SnodeId {
        self.id
    }

    pub fn module(&self) -> &'a Module {
        &self.ctx.modules[self.data().module]
    }

    pub fn name(&self) -> &'a str {
        &self.data().name
    }

    pub fn kind(&self) -> SchemaNodeKind {
        self.data().kind
    }

    pub fn parent(&self) -> Option<SchemaNode<'a>> {
        self.data().parent.map(|id| self.ctx.snode(id))
    }

    pub fn children(&self) -> impl Iterator<Item = SchemaNode<'a>> + use<'a> {
        let ctx = self.ctx;
        self.data().children.iter().map(move |id| ctx.snode(*id))
    }

    /// Finds a child data node by name, optionally qualified by module.
    pub fn find_child(
        &self,
        module: Option<&str>,
        name: &str,
    ) -> Option<SchemaNode<'a>> {
        self.children().find(|child| {
            child.name() == name
                && match module {
                    Some(module) => child.module().name == module,
                    None => true,
                }
        })
    }

    /// Iterates over this node and all its descendants, depth-first.
    pub fn traverse(&self) -> impl Iterator<Item = SchemaNode<'a>> + use<'a> {
        let ctx = self.ctx;
        let mut stack = vec![self.id];
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            stack.extend(ctx.snodes[id].children.iter().rev());
            Some(ctx.snode(id))
        })
    }

    pub fn ancestors(&self) -> impl Iterator<Item = SchemaNode<'a>> + use<'a> {
        let ctx = self.ctx;
        let mut next = self.data().parent;
        std::iter::from_fn(move || {
            let id = next?;
            next = ctx.snodes[id].parent;
            Some(ctx.snode(id))
        })
    }

    /// Returns the schema data path (e.g. `/module:a/b/c`). The module name
    /// qualifies the first segment and any segment whose module differs from
    /// its parent's.
    pub fn data_path(&self) -> String {
        let mut segments = vec![*self];
        segments.extend(self.ancestors());
        segments.reverse();

        let mut path = String::new();
        let mut last_module: Option<&str> = None;
        for snode in segments {
            let module = &snode.module().name;
            path.push('/');
            if last_module != Some(module) {
                path.push_str(module);
                path.push(':');
            }
            path.push_str(snode.name());
            last_module = Some(module);
        }
        path
    }

    pub fn is_config(&self) -> bool {
        self.data().config
    }

    pub fn is_mandatory(&self) -> bool {
        self.data().mandatory
    }

    pub fn has_default(&self) -> bool {
        self.data().default.is_some()
    }

    pub fn default_value(&self) -> Option<&'a str> {
        self.data().default.as_deref()
    }

    /// Non-presence containers exist only as structure and are never
    /// explicitly created or deleted.
    pub fn is_np_container(&self) -> bool {
        self.kind() == SchemaNodeKind::Container && !self.data().presence
    }

    pub fn is_presence_container(&self) -> bool {
        self.kind() == SchemaNodeKind::Container && self.data().presence
    }

    /// List key leaf names, in declaration order. Empty unless this is a
    /// keyed list.
    pub fn keys(&self) -> &'a [String] {
        &self.data().keys
    }

    pub fn unique(&self) -> &'a [Vec<String>] {
        &self.data().unique
    }

    pub fn is_list_key(&self) -> bool {
        self.kind() == SchemaNodeKind::Leaf
            && self
                .parent()
                .is_some_and(|parent| parent.keys().contains(&self.data().name))
    }

    pub fn leaf_type(&self) -> Option<&'a LeafType> {
        self.data().leaf_type.as_ref()
    }

    pub fn when(&self) -> Option<&'a Condition> {
        self.data().when.as_ref()
    }

    pub fn musts(&self) -> &'a [Must] {
        &self.data().musts
    }
}

impl PartialEq for SchemaNode<'_> {
    fn eq(&self, other: &SchemaNode<'_>) -> bool {
        self.id == other.id
    }
}

impl Eq for SchemaNode<'_> {}

impl std::fmt::Debug for SchemaNode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaNode")
            .field("path", &self.data_path())
            .field("kind", &self.kind())
            .finish()
    }
}

// ===== impl TypeSpec =====

impl TypeSpec {
    pub fn boolean() -> TypeSpec {
        TypeSpec { kind: TypeSpecKind::Boolean }
    }

    pub fn decimal64(fraction_digits: u8) -> TypeSpec {
        TypeSpec {
            kind: TypeSpecKind::Decimal64 { fraction_digits },
        }
    }

    pub fn empty() -> TypeSpec {
        TypeSpec { kind: TypeSpecKind::Empty }
    }

    pub fn enumeration<I, S>(values: I) -> TypeSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypeSpec {
            kind: TypeSpecKind::Enumeration {
                values: values.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub fn int8() -> TypeSpec {
        TypeSpec::int(IntWidth::W8)
    }

    pub fn int16() -> TypeSpec {
        TypeSpec::int(IntWidth::W16)
    }

    pub fn int32() -> TypeSpec {
        TypeSpec::int(IntWidth::W32)
    }

    pub fn int64() -> TypeSpec {
        TypeSpec::int(IntWidth::W64)
    }

    fn int(width: IntWidth) -> TypeSpec {
        TypeSpec {
            kind: TypeSpecKind::Int { width, range: None },
        }
    }

    pub fn uint8() -> TypeSpec {
        TypeSpec::uint(IntWidth::W8)
    }

    pub fn uint16() -> TypeSpec {
        TypeSpec::uint(IntWidth::W16)
    }

    pub fn uint32() -> TypeSpec {
        TypeSpec::uint(IntWidth::W32)
    }

    pub fn uint64() -> TypeSpec {
        TypeSpec::uint(IntWidth::W64)
    }

    fn uint(width: IntWidth) -> TypeSpec {
        TypeSpec {
            kind: TypeSpecKind::Uint { width, range: None },
        }
    }

    pub fn leafref(path: &str) -> TypeSpec {
        TypeSpec {
            kind: TypeSpecKind::Leafref { path: path.to_owned() },
        }
    }

    pub fn string() -> TypeSpec {
        TypeSpec {
            kind: TypeSpecKind::Str { length: None, patterns: Vec::new() },
        }
    }

    pub fn union<I>(types: I) -> TypeSpec
    where
        I: IntoIterator<Item = TypeSpec>,
    {
        TypeSpec {
            kind: TypeSpecKind::Union {
                types: types.into_iter().collect(),
            },
        }
    }

    /// Restricts a signed integer range.
    #[must_use]
    pub fn range(mut self, min: i64, max: i64) -> Self {
        if let TypeSpecKind::Int { range, .. } = &mut self.kind {
            *range = Some((min, max));
        }
        self
    }

    /// Restricts an unsigned integer range.
    #[must_use]
    pub fn urange(mut self, min: u64, max: u64) -> Self {
        if let TypeSpecKind::Uint { range, .. } = &mut self.kind {
            *range = Some((min, max));
        }
        self
    }

    /// Restricts a string length.
    #[must_use]
    pub fn length(mut self, min: u64, max: u64) -> Self {
        if let TypeSpecKind::Str { length, .. } = &mut self.kind {
            *length = Some((min, max));
        }
        self
    }

    /// Adds a string pattern restriction. Compiled when the context is
    /// built; invalid patterns fail the build.
    #[must_use]
    pub fn pattern(mut self, pattern: &str) -> Self {
        if let TypeSpecKind::Str { patterns, .. } = &mut self.kind {
            patterns.push(pattern.to_owned());
        }
        self
    }

    fn compile(&self, leaf_name: &str) -> Result<LeafType, Error> {
        let ltype = match &self.kind {
            TypeSpecKind::Boolean => LeafType::Boolean,
            TypeSpecKind::Decimal64 { fraction_digits } => {
                LeafType::Decimal64 { fraction_digits: *fraction_digits }
            }
            TypeSpecKind::Empty => LeafType::Empty,
            TypeSpecKind::Enumeration { values } => {
                LeafType::Enumeration { values: values.clone() }
            }
            TypeSpecKind::Int { width, range } => {
                LeafType::Int { width: *width, range: *range }
            }
            TypeSpecKind::Leafref { path } => {
                LeafType::Leafref { path: path.clone() }
            }
            TypeSpecKind::Str { length, patterns } => {
                let patterns = patterns
                    .iter()
                    .map(|pattern| {
                        // YANG patterns are implicitly anchored.
                        Regex::new(&format!("^(?:{pattern})$")).map_err(
                            |error| {
                                Error::InvalidPattern(
                                    leaf_name.to_owned(),
                                    error.to_string(),
                                )
                            },
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                LeafType::Str { length: *length, patterns }
            }
            TypeSpecKind::Uint { width, range } => {
                LeafType::Uint { width: *width, range: *range }
            }
            TypeSpecKind::Union { types } => LeafType::Union {
                types: types
                    .iter()
                    .map(|spec| spec.compile(leaf_name))
                    .collect::<Result<Vec<_>, _>>()?,
            },
        };
        Ok(ltype)
    }
}

// ===== impl Condition =====

impl Condition {
    /// True when a node exists at `path`.
    pub fn exists(path: &str) -> Condition {
        Condition {
            path: path.to_owned(),
            value: None,
            negate: false,
        }
    }

    /// True when no node exists at `path`.
    pub fn absent(path: &str) -> Condition {
        Condition {
            path: path.to_owned(),
            value: None,
            negate: true,
        }
    }

    /// True when the leaf at `path` exists and carries `value`.
    pub fn equals(path: &str, value: &str) -> Condition {
        Condition {
            path: path.to_owned(),
            value: Some(value.to_owned()),
            negate: false,
        }
    }

    /// True unless the leaf at `path` exists and carries `value`.
    pub fn differs(path: &str, value: &str) -> Condition {
        Condition {
            path: path.to_owned(),
            value: Some(value.to_owned()),
            negate: true,
        }
    }
}

// ===== impl Must =====

impl Must {
    pub fn new(condition: Condition, error_message: Option<&str>) -> Must {
        Must {
            condition,
            error_message: error_message.map(str::to_owned),
        }
    }
}

// ===== impl NodeBuilder =====

impl NodeBuilder {
    fn new(name: &str, kind: SchemaNodeKind) -> NodeBuilder {
        NodeBuilder {
            name: name.to_owned(),
            kind,
            children: Vec::new(),
            config: true,
            mandatory: false,
            presence: false,
            default: None,
            keys: Vec::new(),
            unique: Vec::new(),
            type_spec: None,
            when: None,
            musts: Vec::new(),
        }
    }

    #[must_use]
    pub fn child(mut self, child: NodeBuilder) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn config(mut self, config: bool) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    #[must_use]
    pub fn presence(mut self) -> Self {
        self.presence = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: &str) -> Self {
        self.default = Some(value.to_owned());
        self
    }

    /// Appends a list key. Keys must name leaf children of the list.
    #[must_use]
    pub fn key(mut self, name: &str) -> Self {
        self.keys.push(name.to_owned());
        self
    }

    /// Adds a unique constraint over a tuple of leaf children.
    #[must_use]
    pub fn unique<I, S>(mut self, leaves: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique.push(leaves.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.when = Some(condition);
        self
    }

    #[must_use]
    pub fn must(mut self, must: Must) -> Self {
        self.musts.push(must);
        self
    }

    pub(crate) fn register(
        self,
        ctx: &mut Context,
        module: usize,
        parent: Option<SnodeId>,
    ) -> Result<SnodeId, Error> {
        // Keys and unique tuples must reference leaf children.
        for key in &self.keys {
            if !self.has_leaf_child(key) {
                return Err(Error::UnknownListKey(
                    self.name.clone(),
                    key.clone(),
                ));
            }
        }
        for tuple in &self.unique {
            for leaf in tuple {
                if !self.has_leaf_child(leaf) {
                    return Err(Error::UnknownUniqueLeaf(
                        self.name.clone(),
                        leaf.clone(),
                    ));
                }
            }
        }

        let leaf_type = self
            .type_spec
            .as_ref()
            .map(|spec| spec.compile(&self.name))
            .transpose()?;

        let id = ctx.snodes.len();
        ctx.snodes.push(SnodeData {
            module,
            name: self.name,
            kind: self.kind,
            parent,
            children: Vec::new(),
            config: self.config,
            mandatory: self.mandatory,
            presence: self.presence,
            default: self.default,
            keys: self.keys,
            unique: self.unique,
            leaf_type,
            when: self.when,
            musts: self.musts,
        });

        for child in self.children {
            if ctx.snodes[id]
                .children
                .iter()
                .any(|other| ctx.snodes[*other].name == child.name)
            {
                return Err(Error::DuplicateNode(child.name));
            }
            let child_id = child.register(ctx, module, Some(id))?;
            ctx.snodes[id].children.push(child_id);
        }

        Ok(id)
    }

    fn has_leaf_child(&self, name: &str) -> bool {
        self.children.iter().any(|child| {
            child.name == name && child.kind == SchemaNodeKind::Leaf
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;

    fn test_context() -> std::sync::Arc<Context> {
        Context::builder()
            .module("conifer-system", "urn:conifer:system", "sys")
            .node(
                container("system")
                    .child(leaf("hostname", TypeSpec::string().length(1, 63)))
                    .child(
                        list("user")
                            .key("name")
                            .child(leaf("name", TypeSpec::string()))
                            .child(leaf("uid", TypeSpec::uint32())),
                    ),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_find_path() {
        let ctx = test_context();

        let snode = ctx.find_path("/conifer-system:system/user/name").unwrap();
        assert_eq!(snode.kind(), SchemaNodeKind::Leaf);
        assert!(snode.is_list_key());
        assert_eq!(
            snode.data_path(),
            "/conifer-system:system/user/name"
        );

        // Predicates are ignored during schema lookup.
        let snode = ctx
            .find_path("/conifer-system:system/user[name='admin']/uid")
            .unwrap();
        assert_eq!(snode.name(), "uid");
        assert!(!snode.is_list_key());

        assert!(ctx.find_path("/conifer-system:system/nonexistent").is_none());
    }

    #[test]
    fn test_list_keys() {
        let ctx = test_context();

        let list = ctx.find_path("/conifer-system:system/user").unwrap();
        assert_eq!(list.kind(), SchemaNodeKind::List);
        assert_eq!(list.keys(), ["name".to_owned()]);
    }

    #[test]
    fn test_unknown_list_key() {
        let result = Context::builder()
            .module("bad", "urn:bad", "bad")
            .node(list("entry").key("missing"))
            .build();
        assert!(matches!(result, Err(Error::UnknownListKey(..))));
    }

    #[test]
    fn test_traverse_order() {
        let ctx = test_context();

        let names = ctx
            .traverse()
            .map(|snode| snode.name().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, ["system", "hostname", "user", "name", "uid"]);
    }
}
