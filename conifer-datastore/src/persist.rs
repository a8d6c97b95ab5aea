//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use conifer_yang::Context;
use tracing::debug;

use crate::error::Result;
use crate::store::Store;
use crate::tree::DataTree;

// Persisted datastore files are group-readable.
const DB_FILE_MODE: u32 = 0o640;

/// Path of the persisted file backing a datastore.
pub fn file_path(dir: &Path, store: Store) -> PathBuf {
    dir.join(format!("{store}_db"))
}

/// Loads a datastore from its file. An absent file yields `None`; the
/// datastore is then in the absent lifecycle state.
pub fn load(
    ctx: Arc<Context>,
    dir: &Path,
    store: Store,
) -> Result<Option<DataTree>> {
    let path = file_path(dir, store);
    let input = match fs::read_to_string(&path) {
        Ok(input) => input,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(None);
        }
        Err(error) => return Err(error.into()),
    };
    let tree = DataTree::parse_xml_string(ctx, &input)?;
    debug!(%store, path = %path.display(), "loaded datastore");
    Ok(Some(tree))
}

/// Writes a datastore to its file atomically: temp file in the same
/// directory, fsync, rename. A failure leaves the previous file intact.
pub fn store(dir: &Path, store: Store, tree: &DataTree) -> Result<()> {
    let mut contents = tree.print_xml_string(true);
    if contents.is_empty() {
        contents = "<config/>\n".to_owned();
    }
    atomic_write(dir, store, contents.as_bytes())?;
    debug!(%store, "stored datastore");
    Ok(())
}

/// Truncates the persisted tree to empty while keeping the file present.
pub fn reset(dir: &Path, store: Store) -> Result<()> {
    atomic_write(dir, store, b"<config/>\n")?;
    debug!(%store, "reset datastore");
    Ok(())
}

/// Removes the persisted file. Missing files are fine.
pub fn remove(dir: &Path, store: Store) -> Result<()> {
    match fs::remove_file(file_path(dir, store)) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

pub fn exists(dir: &Path, store: Store) -> bool {
    file_path(dir, store).exists()
}

// ===== helper functions =====

fn atomic_write(dir: &Path, store: Store, contents: &[u8]) -> Result<()> {
    let path = file_path(dir, store);
    let tmp_path = dir.join(format!(".{store}_db.tmp"));

    let mut file = File::create(&tmp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    fs::set_permissions(&tmp_path, fs::Permissions::from_mode(DB_FILE_MODE))?;
    fs::rename(&tmp_path, &path)?;

    // Make the rename itself durable.
    if let Ok(dir_handle) = File::open(dir) {
        let _ = dir_handle.sync_all();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testlib;

    #[test]
    fn test_store_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tree = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>router1</hostname></system></config>",
        );

        store(dir.path(), Store::Running, &tree).unwrap();
        let loaded = load(tree.context().clone(), dir.path(), Store::Running)
            .unwrap()
            .unwrap();
        assert!(tree.data_eq(&loaded));
    }

    #[test]
    fn test_load_absent() {
        let dir = tempfile::tempdir().unwrap();
        let loaded =
            load(testlib::context(), dir.path(), Store::Startup).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_reset_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let tree = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>router1</hostname></system></config>",
        );
        store(dir.path(), Store::Startup, &tree).unwrap();

        reset(dir.path(), Store::Startup).unwrap();
        assert!(exists(dir.path(), Store::Startup));
        let loaded = load(tree.context().clone(), dir.path(), Store::Startup)
            .unwrap()
            .unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_file_permissions() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempfile::tempdir().unwrap();
        let tree = testlib::tree("<config/>");
        store(dir.path(), Store::Running, &tree).unwrap();

        let meta =
            std::fs::metadata(file_path(dir.path(), Store::Running)).unwrap();
        assert_eq!(meta.mode() & 0o777, 0o640);
    }
}
