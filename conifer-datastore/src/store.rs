//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use conifer_yang::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::edit::EditOp;
use crate::error::{Error, Result};
use crate::persist;
use crate::tree::DataTree;

/// Named configuration datastore.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Store {
    Running,
    Candidate,
    Startup,
    Failsafe,
    Tmp,
}

/// Datastore lifecycle state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreState {
    Absent,
    Empty,
    Populated,
}

/// The set of named datastores, backed by one file each under the
/// configured directory. This is the only component that touches the
/// filesystem.
pub struct Datastores {
    ctx: Arc<Context>,
    dir: PathBuf,
    trees: BTreeMap<Store, DataTree>,
}

// ===== impl Store =====

impl Store {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Store::Running => "running",
            Store::Candidate => "candidate",
            Store::Startup => "startup",
            Store::Failsafe => "failsafe",
            Store::Tmp => "tmp",
        }
    }

    /// Persistent datastores survive restarts; `tmp` is a scratch working
    /// copy and stays in memory.
    pub const fn is_persistent(&self) -> bool {
        !matches!(self, Store::Tmp)
    }
}

impl FromStr for Store {
    type Err = Error;

    fn from_str(s: &str) -> Result<Store> {
        match s {
            "running" => Ok(Store::Running),
            "candidate" => Ok(Store::Candidate),
            "startup" => Ok(Store::Startup),
            "failsafe" => Ok(Store::Failsafe),
            "tmp" => Ok(Store::Tmp),
            _ => Err(Error::StoreAbsent(s.to_owned())),
        }
    }
}

impl std::fmt::Display for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl Datastores =====

impl Datastores {
    pub fn new(ctx: Arc<Context>, dir: &Path) -> Result<Datastores> {
        std::fs::create_dir_all(dir)?;
        Ok(Datastores {
            ctx,
            dir: dir.to_owned(),
            trees: BTreeMap::new(),
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self, store: Store) -> bool {
        self.trees.contains_key(&store)
            || (store.is_persistent() && persist::exists(&self.dir, store))
    }

    pub fn state(&self, store: Store) -> StoreState {
        match self.tree(store) {
            Err(_) => StoreState::Absent,
            Ok(tree) if tree.is_empty() => StoreState::Empty,
            Ok(_) => StoreState::Populated,
        }
    }

    /// Creates an empty datastore. Existing contents are preserved.
    pub fn create(&mut self, store: Store) {
        self.trees
            .entry(store)
            .or_insert_with(|| DataTree::new(self.ctx.clone()));
    }

    /// Removes a datastore and its persisted file.
    pub fn delete(&mut self, store: Store) -> Result<()> {
        self.trees.remove(&store);
        if store.is_persistent() {
            persist::remove(&self.dir, store)?;
        }
        debug!(%store, "deleted datastore");
        Ok(())
    }

    /// Loads a persistent datastore from disk, replacing any in-memory
    /// contents. Returns whether the file was present.
    pub fn load(&mut self, store: Store) -> Result<bool> {
        match persist::load(self.ctx.clone(), &self.dir, store)? {
            Some(tree) => {
                self.trees.insert(store, tree);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Writes a datastore back to its file. In-memory datastores are left
    /// alone.
    pub fn flush(&self, store: Store) -> Result<()> {
        if !store.is_persistent() {
            return Ok(());
        }
        let tree = self.tree(store)?;
        persist::store(&self.dir, store, tree)
    }

    /// Truncates a datastore to empty, keeping it (and its file) present.
    pub fn reset(&mut self, store: Store) -> Result<()> {
        self.trees.insert(store, DataTree::new(self.ctx.clone()));
        if store.is_persistent() {
            persist::reset(&self.dir, store)?;
        }
        Ok(())
    }

    /// Borrows the tree of a resident datastore. Fails when the datastore
    /// is absent; see [`Datastores::ensure_loaded`] for faulting in.
    pub fn tree(&self, store: Store) -> Result<&DataTree> {
        self.trees
            .get(&store)
            .ok_or_else(|| Error::StoreAbsent(store.as_str().to_owned()))
    }

    /// Makes sure a persistent datastore is resident, loading it from disk
    /// when needed.
    pub fn ensure_loaded(&mut self, store: Store) -> Result<()> {
        if self.trees.contains_key(&store) {
            return Ok(());
        }
        if store.is_persistent() && self.load(store)? {
            return Ok(());
        }
        Err(Error::StoreAbsent(store.as_str().to_owned()))
    }

    /// Retrieves a full or filtered copy of a datastore. A filter that
    /// matches nothing yields an empty tree.
    pub fn get(&self, store: Store, xpath: Option<&str>) -> Result<DataTree> {
        let tree = self.tree(store)?;
        match xpath {
            Some(xpath) => tree.get_subtree(xpath),
            None => Ok(tree.duplicate()),
        }
    }

    /// Applies an edit request to a datastore. The edit is staged on a
    /// working copy; on failure the datastore is untouched.
    pub fn put(
        &mut self,
        store: Store,
        default_op: EditOp,
        edit: &DataTree,
    ) -> Result<()> {
        let tree = self
            .trees
            .get(&store)
            .ok_or_else(|| Error::StoreAbsent(store.as_str().to_owned()))?;

        let mut staged = tree.duplicate();
        staged.edit(default_op, edit)?;
        self.trees.insert(store, staged);
        Ok(())
    }

    /// Atomic full-tree copy; previous destination contents are discarded.
    pub fn copy(&mut self, src: Store, dst: Store) -> Result<()> {
        let tree = self.tree(src)?.duplicate();
        self.trees.insert(dst, tree);
        debug!(%src, %dst, "copied datastore");
        Ok(())
    }

    /// Replaces a datastore's tree wholesale.
    pub fn replace(&mut self, store: Store, tree: DataTree) {
        self.trees.insert(store, tree);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testlib;

    fn datastores() -> (tempfile::TempDir, Datastores) {
        let dir = tempfile::tempdir().unwrap();
        let datastores =
            Datastores::new(testlib::context(), dir.path()).unwrap();
        (dir, datastores)
    }

    #[test]
    fn test_get_absent_store() {
        let (_dir, datastores) = datastores();
        let result = datastores.get(Store::Running, None);
        assert!(matches!(result, Err(Error::StoreAbsent(_))));
    }

    #[test]
    fn test_copy_equals_source() {
        let (_dir, mut datastores) = datastores();
        datastores.create(Store::Running);
        datastores
            .put(
                Store::Running,
                EditOp::Merge,
                &testlib::tree(
                    "<config><system xmlns='urn:conifer:system'>\
                     <hostname>router1</hostname></system></config>",
                ),
            )
            .unwrap();

        datastores.copy(Store::Running, Store::Candidate).unwrap();

        let src = datastores.get(Store::Running, None).unwrap();
        let dst = datastores.get(Store::Candidate, None).unwrap();
        assert!(src.data_eq(&dst));
        assert_eq!(
            src.print_xml_string(false),
            dst.print_xml_string(false)
        );
    }

    #[test]
    fn test_failed_put_leaves_store_untouched() {
        let (_dir, mut datastores) = datastores();
        datastores.create(Store::Candidate);
        datastores
            .put(
                Store::Candidate,
                EditOp::Merge,
                &testlib::tree(
                    "<config><system xmlns='urn:conifer:system'>\
                     <hostname>router1</hostname></system></config>",
                ),
            )
            .unwrap();
        let before = datastores
            .get(Store::Candidate, None)
            .unwrap()
            .print_xml_string(false);

        // Creating an existing node fails and must not modify the store.
        let result = datastores.put(
            Store::Candidate,
            EditOp::Create,
            &testlib::tree(
                "<config><system xmlns='urn:conifer:system'>\
                 <hostname>other</hostname></system></config>",
            ),
        );
        assert!(matches!(result, Err(Error::DataExists(_))));

        let after = datastores
            .get(Store::Candidate, None)
            .unwrap()
            .print_xml_string(false);
        assert_eq!(before, after);
    }

    #[test]
    fn test_lifecycle_states() {
        let (_dir, mut datastores) = datastores();
        assert_eq!(datastores.state(Store::Running), StoreState::Absent);

        datastores.create(Store::Running);
        assert_eq!(datastores.state(Store::Running), StoreState::Empty);

        datastores
            .put(
                Store::Running,
                EditOp::Merge,
                &testlib::tree(
                    "<config><system xmlns='urn:conifer:system'>\
                     <hostname>router1</hostname></system></config>",
                ),
            )
            .unwrap();
        assert_eq!(datastores.state(Store::Running), StoreState::Populated);
    }

    #[test]
    fn test_persistence_round_trip() {
        let (dir, mut datastores) = datastores();
        datastores.create(Store::Running);
        datastores
            .put(
                Store::Running,
                EditOp::Merge,
                &testlib::tree(
                    "<config><system xmlns='urn:conifer:system'>\
                     <hostname>router1</hostname></system></config>",
                ),
            )
            .unwrap();
        datastores.flush(Store::Running).unwrap();

        // A fresh manager sees the persisted contents.
        let mut fresh =
            Datastores::new(testlib::context(), dir.path()).unwrap();
        assert!(fresh.load(Store::Running).unwrap());
        let loaded = fresh.get(Store::Running, None).unwrap();
        let original = datastores.get(Store::Running, None).unwrap();
        assert!(loaded.data_eq(&original));
    }
}
