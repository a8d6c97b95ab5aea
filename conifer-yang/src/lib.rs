//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod schema;

use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::schema::{NodeBuilder, SnodeData, SnodeId};

// Global YANG schema context.
//
// Initialized once at daemon startup, after the schema collaborator has
// delivered the compiled modules. Data trees keep their own reference; the
// global exists so serde adapters can reconstruct trees without threading a
// context through every deserializer.
pub static YANG_CTX: OnceLock<Arc<Context>> = OnceLock::new();

/// Compiled YANG schema context.
///
/// The YANG parser proper is an external collaborator; modules arrive here
/// already compiled, via [`ContextBuilder`].
#[derive(Debug)]
pub struct Context {
    pub(crate) modules: Vec<Module>,
    pub(crate) snodes: Vec<SnodeData>,
    pub(crate) roots: Vec<SnodeId>,
}

/// A YANG module known to the context.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Module {
    pub name: String,
    pub namespace: String,
    pub prefix: String,
    pub revision: Option<String>,
}

#[derive(Default)]
pub struct ContextBuilder {
    modules: Vec<ModuleBuilder>,
}

pub struct ModuleBuilder {
    module: Module,
    nodes: Vec<NodeBuilder>,
}

// Schema construction errors.
#[derive(Debug)]
pub enum Error {
    DuplicateModule(String),
    DuplicateNode(String),
    InvalidPattern(String, String),
    UnknownListKey(String, String),
    UnknownUniqueLeaf(String, String),
}

// ===== impl Context =====

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    pub fn find_module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|module| module.name == name)
    }

    /// Returns the top-level schema nodes of all modules.
    pub fn roots(&self) -> impl Iterator<Item = schema::SchemaNode<'_>> {
        self.roots.iter().map(|id| schema::SchemaNode::new(self, *id))
    }

    /// Looks up a top-level schema node. When `module` is unset the name must
    /// be unambiguous across all modules.
    pub fn find_root(
        &self,
        module: Option<&str>,
        name: &str,
    ) -> Option<schema::SchemaNode<'_>> {
        self.roots()
            .find(|snode| {
                snode.name() == name
                    && match module {
                        Some(module) => snode.module().name == module,
                        None => true,
                    }
            })
    }

    /// Looks up a schema node by its data path (e.g. `/module:a/b/c`).
    pub fn find_path(&self, path: &str) -> Option<schema::SchemaNode<'_>> {
        let mut snode: Option<schema::SchemaNode<'_>> = None;

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            // Strip any predicate and optional module prefix.
            let segment = match segment.find('[') {
                Some(pos) => &segment[..pos],
                None => segment,
            };
            let (module, name) = match segment.split_once(':') {
                Some((module, name)) => (Some(module), name),
                None => (None, segment),
            };

            snode = match snode {
                Some(parent) => parent.children().find(|child| {
                    child.name() == name
                        && match module {
                            Some(module) => child.module().name == module,
                            None => true,
                        }
                }),
                None => self.find_root(module, name),
            };
            snode?;
        }

        snode
    }

    /// Iterates over all schema nodes, depth-first.
    pub fn traverse(&self) -> impl Iterator<Item = schema::SchemaNode<'_>> {
        let mut stack = self.roots.clone();
        stack.reverse();
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            let snode = schema::SchemaNode::new(self, id);
            stack.extend(self.snodes[id].children.iter().rev());
            Some(snode)
        })
    }

    /// Resolves a schema node from its stable handle. The handle must come
    /// from this context.
    pub fn snode_by_id(&self, id: SnodeId) -> schema::SchemaNode<'_> {
        schema::SchemaNode::new(self, id)
    }

    pub(crate) fn snode(&self, id: SnodeId) -> schema::SchemaNode<'_> {
        schema::SchemaNode::new(self, id)
    }
}

// ===== impl ContextBuilder =====

impl ContextBuilder {
    #[must_use]
    pub fn module(
        mut self,
        name: &str,
        namespace: &str,
        prefix: &str,
    ) -> Self {
        self.modules.push(ModuleBuilder {
            module: Module {
                name: name.to_owned(),
                namespace: namespace.to_owned(),
                prefix: prefix.to_owned(),
                revision: None,
            },
            nodes: Vec::new(),
        });
        self
    }

    #[must_use]
    pub fn revision(mut self, revision: &str) -> Self {
        if let Some(last) = self.modules.last_mut() {
            last.module.revision = Some(revision.to_owned());
        }
        self
    }

    /// Adds a top-level data node to the module opened last.
    #[must_use]
    pub fn node(mut self, node: NodeBuilder) -> Self {
        if let Some(last) = self.modules.last_mut() {
            last.nodes.push(node);
        }
        self
    }

    pub fn build(self) -> Result<Arc<Context>, Error> {
        let mut ctx = Context {
            modules: Vec::new(),
            snodes: Vec::new(),
            roots: Vec::new(),
        };

        for mbuilder in self.modules {
            if ctx.find_module(&mbuilder.module.name).is_some() {
                return Err(Error::DuplicateModule(mbuilder.module.name));
            }
            let module_id = ctx.modules.len();
            ctx.modules.push(mbuilder.module);

            for node in mbuilder.nodes {
                let id = node.register(&mut ctx, module_id, None)?;
                ctx.roots.push(id);
            }
        }

        // Reject duplicate top-level names within a module.
        for (i, a) in ctx.roots.iter().enumerate() {
            for b in &ctx.roots[i + 1..] {
                let a = &ctx.snodes[*a];
                let b = &ctx.snodes[*b];
                if a.module == b.module && a.name == b.name {
                    return Err(Error::DuplicateNode(a.name.clone()));
                }
            }
        }

        debug!(
            modules = ctx.modules.len(),
            snodes = ctx.snodes.len(),
            "schema context created"
        );
        Ok(Arc::new(ctx))
    }
}

// ===== impl Error =====

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::DuplicateModule(name) => {
                write!(f, "duplicate module: {name}")
            }
            Error::DuplicateNode(name) => {
                write!(f, "duplicate schema node: {name}")
            }
            Error::InvalidPattern(name, error) => {
                write!(f, "invalid pattern on leaf {name}: {error}")
            }
            Error::UnknownListKey(list, key) => {
                write!(f, "list {list} declares unknown key {key}")
            }
            Error::UnknownUniqueLeaf(list, leaf) => {
                write!(f, "list {list} declares unknown unique leaf {leaf}")
            }
        }
    }
}

impl std::error::Error for Error {}
