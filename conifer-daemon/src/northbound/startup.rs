//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use std::path::Path;
use std::str::FromStr;

use conifer_datastore::{DataTree, EditOp, Store};
use conifer_northbound::plugin::PluginCapabilities;
use tracing::{info, warn};

use crate::northbound::core::Northbound;
use crate::northbound::error::Error;

/// How the startup orchestrator brings the system up.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StartupMode {
    /// Leave the datastores as found; no commit.
    None,
    /// Initialize the running datastore to empty.
    Init,
    /// Load and commit the persisted startup configuration.
    #[default]
    Startup,
    /// Re-commit the persisted running configuration.
    Running,
    /// Commit the failsafe configuration directly.
    Failsafe,
}

/// Outcome of a successful startup.
#[derive(Debug)]
pub struct StartupReport {
    pub failsafe: bool,
}

/// Terminal startup failures; the daemon exits non-zero on any of these.
#[derive(Debug)]
pub enum StartupError {
    FailsafeUnavailable,
    FailsafeCommit(Error),
    Engine(Error),
    Plugin(String),
}

// ===== impl StartupMode =====

impl StartupMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            StartupMode::None => "none",
            StartupMode::Init => "init",
            StartupMode::Startup => "startup",
            StartupMode::Running => "running",
            StartupMode::Failsafe => "failsafe",
        }
    }
}

impl FromStr for StartupMode {
    type Err = String;

    fn from_str(s: &str) -> Result<StartupMode, String> {
        match s {
            "none" => Ok(StartupMode::None),
            "init" => Ok(StartupMode::Init),
            "startup" => Ok(StartupMode::Startup),
            "running" => Ok(StartupMode::Running),
            "failsafe" => Ok(StartupMode::Failsafe),
            _ => Err(format!("unknown startup mode: {s}")),
        }
    }
}

impl std::fmt::Display for StartupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ===== impl StartupError =====

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupError::FailsafeUnavailable => {
                write!(f, "startup failed and no failsafe datastore exists")
            }
            StartupError::FailsafeCommit(error) => {
                write!(f, "failed to commit the failsafe configuration: {error}")
            }
            StartupError::Engine(error) => {
                write!(f, "startup engine error: {error}")
            }
            StartupError::Plugin(message) => {
                write!(f, "plugin extension hook failed: {message}")
            }
        }
    }
}

impl std::error::Error for StartupError {}

// ===== impl Northbound =====

impl Northbound {
    /// Brings the system from its persisted on-disk state to a validated
    /// running state. Runs once at process start, before the management
    /// transport is served.
    pub(crate) fn startup(
        &mut self,
        mode: StartupMode,
        extra_xml: Option<&Path>,
    ) -> Result<StartupReport, StartupError> {
        info!(mode = %mode, "bringing up datastores");

        // Extension hooks run once against the sealed schema context.
        let ctx = self.datastores.context().clone();
        self.plugins
            .notify_extensions(&ctx)
            .map_err(StartupError::Plugin)?;

        // A failed revert in a previous run left the applied state
        // untrustworthy; recover through the failsafe configuration.
        if self.failsafe_recovery_marked() {
            warn!(
                "failsafe recovery marker found, committing failsafe \
                 configuration"
            );
            self.enter_failsafe()?;
            self.seed_candidate()?;
            return Ok(StartupReport { failsafe: true });
        }

        // Create an empty persisted startup datastore when none exists.
        if self.datastores.exists(Store::Startup) {
            self.datastores
                .ensure_loaded(Store::Startup)
                .map_err(|error| StartupError::Engine(error.into()))?;
        } else {
            self.datastores.create(Store::Startup);
            self.datastores
                .flush(Store::Startup)
                .map_err(|error| StartupError::Engine(error.into()))?;
            info!("created empty startup datastore");
        }

        // Make the running datastore resident.
        if self.datastores.exists(Store::Running) {
            self.datastores
                .ensure_loaded(Store::Running)
                .map_err(|error| StartupError::Engine(error.into()))?;
        } else {
            self.datastores.create(Store::Running);
            self.datastores
                .flush(Store::Running)
                .map_err(|error| StartupError::Engine(error.into()))?;
        }

        // Validate and commit the boot configuration.
        if let Err(error) = self.boot_commit(mode) {
            warn!(%error, "startup commit failed, falling back to failsafe");
            self.enter_failsafe()?;
            self.seed_candidate()?;
            return Ok(StartupReport { failsafe: true });
        }
        if mode == StartupMode::Failsafe {
            self.enter_failsafe()?;
            self.seed_candidate()?;
            return Ok(StartupReport { failsafe: true });
        }

        // Fold the extra-XML file and the plugin reset output into the
        // running configuration.
        if let Err(error) = self.merge_startup_extras(extra_xml) {
            warn!(%error, "startup merge failed, falling back to failsafe");
            self.enter_failsafe()?;
            self.seed_candidate()?;
            return Ok(StartupReport { failsafe: true });
        }

        self.seed_candidate()?;
        info!("startup complete");
        Ok(StartupReport { failsafe: false })
    }

    fn boot_commit(&mut self, mode: StartupMode) -> Result<(), Error> {
        match mode {
            StartupMode::None | StartupMode::Failsafe => Ok(()),
            StartupMode::Init => {
                self.datastores.reset(Store::Running)?;
                Ok(())
            }
            StartupMode::Startup => {
                let startup =
                    self.datastores.tree(Store::Startup)?.duplicate();
                self.datastores.reset(Store::Running)?;
                self.commit_tree(
                    0,
                    Store::Startup,
                    startup,
                    "startup".to_owned(),
                )?;
                Ok(())
            }
            StartupMode::Running => {
                let running =
                    self.datastores.tree(Store::Running)?.duplicate();
                self.datastores.reset(Store::Running)?;
                self.commit_tree(
                    0,
                    Store::Running,
                    running,
                    "startup (running mode)".to_owned(),
                )?;
                Ok(())
            }
        }
    }

    // Merges the extra-XML file and the plugin reset contributions into a
    // tmp datastore, validates the result against running, and folds it in.
    // Commit callbacks are deliberately not run for this merge, so
    // application state can diverge from running until the next commit.
    fn merge_startup_extras(
        &mut self,
        extra_xml: Option<&Path>,
    ) -> Result<(), Error> {
        self.datastores.create(Store::Tmp);
        self.datastores.reset(Store::Tmp)?;

        if let Some(path) = extra_xml {
            let input = std::fs::read_to_string(path)
                .map_err(conifer_datastore::Error::from)?;
            let ctx = self.datastores.context().clone();
            let tree = DataTree::parse_xml_string(ctx, &input)?;
            self.datastores.put(Store::Tmp, EditOp::Merge, &tree)?;
            info!(path = %path.display(), "merged extra configuration file");
        }

        for index in 0..self.plugins.len() {
            let record = self.plugins.get_mut(index).unwrap();
            if !record.capabilities().contains(PluginCapabilities::RESET) {
                continue;
            }
            let name = record.name();
            let contribution = record
                .plugin_mut()
                .reset(Store::Tmp)
                .map_err(|message| Error::ResetCallback {
                    plugin: name,
                    message,
                })?;
            if let Some(tree) = contribution {
                self.datastores.put(Store::Tmp, EditOp::Merge, &tree)?;
            }
        }

        let tmp = self.datastores.tree(Store::Tmp)?.duplicate();
        if tmp.is_empty() {
            return Ok(());
        }

        warn!(
            "merging startup extras into running without commit callbacks"
        );
        let mut merged = self.datastores.tree(Store::Running)?.duplicate();
        merged.merge(&tmp)?;
        merged.validate().map_err(Error::Validation)?;
        self.datastores.replace(Store::Running, merged);
        self.datastores.flush(Store::Running)?;
        Ok(())
    }

    // Commits the failsafe configuration into running, backing the current
    // running state up first. Fatal when the failsafe datastore is absent
    // or its commit fails.
    fn enter_failsafe(&mut self) -> Result<(), StartupError> {
        if !self.datastores.exists(Store::Failsafe) {
            return Err(StartupError::FailsafeUnavailable);
        }
        self.datastores
            .ensure_loaded(Store::Failsafe)
            .map_err(|error| StartupError::Engine(error.into()))?;
        let failsafe = self
            .datastores
            .tree(Store::Failsafe)
            .map_err(|error| StartupError::Engine(error.into()))?
            .duplicate();

        if !self.datastores.exists(Store::Running) {
            self.datastores.create(Store::Running);
        } else {
            self.datastores
                .ensure_loaded(Store::Running)
                .map_err(|error| StartupError::Engine(error.into()))?;
        }

        // Snapshot the current running state, then start over from empty.
        self.datastores
            .copy(Store::Running, Store::Tmp)
            .map_err(|error| StartupError::Engine(error.into()))?;
        self.datastores
            .reset(Store::Running)
            .map_err(|error| StartupError::Engine(error.into()))?;

        match self.commit_tree(0, Store::Failsafe, failsafe, "failsafe".to_owned())
        {
            Ok(_) => {
                self.clear_failsafe_recovery();
                info!("running in failsafe mode");
                Ok(())
            }
            Err(error) => {
                // Put the backup back before going down.
                let _ = self.datastores.copy(Store::Tmp, Store::Running);
                let _ = self.datastores.flush(Store::Running);
                Err(StartupError::FailsafeCommit(error))
            }
        }
    }

    // The shared candidate starts out as a copy of running.
    fn seed_candidate(&mut self) -> Result<(), StartupError> {
        self.datastores
            .copy(Store::Running, Store::Candidate)
            .map_err(|error| StartupError::Engine(error.into()))?;
        self.datastores
            .flush(Store::Candidate)
            .map_err(|error| StartupError::Engine(error.into()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use conifer_datastore::persist;

    use super::*;
    use crate::northbound::testlib::{self, CallbackLog, RecordingPlugin};

    const STARTUP_CONFIG: &str =
        "<config><system xmlns='urn:conifer:system'>\
         <hostname>boot-host</hostname></system></config>";
    const FAILSAFE_CONFIG: &str =
        "<config><system xmlns='urn:conifer:system'>\
         <hostname>failsafe-host</hostname></system></config>";
    const INVALID_CONFIG: &str =
        "<config><system xmlns='urn:conifer:system'>\
         <user><name>admin</name><uid>not-a-number</uid></user>\
         </system></config>";

    #[test]
    fn test_startup_empty() {
        let (dir, mut nb) = testlib::daemon();

        let report = nb.startup(StartupMode::Startup, None).unwrap();
        assert!(!report.failsafe);

        // The startup datastore was created empty and persisted; running
        // and candidate are empty as well.
        let datastore_dir = dir.path().join("datastores");
        assert!(persist::exists(&datastore_dir, Store::Startup));
        assert!(nb.datastores.tree(Store::Startup).unwrap().is_empty());
        assert!(nb.datastores.tree(Store::Running).unwrap().is_empty());
        assert!(nb.datastores.tree(Store::Candidate).unwrap().is_empty());
    }

    #[test]
    fn test_startup_valid() {
        let (dir, mut nb) = testlib::daemon();
        let log = CallbackLog::default();
        nb.register_plugin(Box::new(RecordingPlugin::new("app", log.clone())));

        let datastore_dir = dir.path().join("datastores");
        std::fs::create_dir_all(&datastore_dir).unwrap();
        persist::store(
            &datastore_dir,
            Store::Startup,
            &testlib::tree(STARTUP_CONFIG),
        )
        .unwrap();

        let report = nb.startup(StartupMode::Startup, None).unwrap();
        assert!(!report.failsafe);
        assert!(
            nb.datastores
                .tree(Store::Running)
                .unwrap()
                .data_eq(&testlib::tree(STARTUP_CONFIG))
        );
        // The boot configuration went through the full commit pipeline.
        assert!(log.lock().unwrap().contains(&"app:commit".to_owned()));
    }

    #[test]
    fn test_startup_invalid_falls_back_to_failsafe() {
        let (dir, mut nb) = testlib::daemon();
        let log = CallbackLog::default();
        nb.register_plugin(Box::new(RecordingPlugin::new("app", log.clone())));

        let datastore_dir = dir.path().join("datastores");
        std::fs::create_dir_all(&datastore_dir).unwrap();
        persist::store(
            &datastore_dir,
            Store::Startup,
            &testlib::tree(INVALID_CONFIG),
        )
        .unwrap();
        persist::store(
            &datastore_dir,
            Store::Failsafe,
            &testlib::tree(FAILSAFE_CONFIG),
        )
        .unwrap();

        let report = nb.startup(StartupMode::Startup, None).unwrap();
        assert!(report.failsafe);
        assert!(
            nb.datastores
                .tree(Store::Running)
                .unwrap()
                .data_eq(&testlib::tree(FAILSAFE_CONFIG))
        );
        // Commit callbacks never ran against the rejected startup tree;
        // the only commit is the failsafe one.
        let log = log.lock().unwrap();
        assert_eq!(
            log.iter().filter(|entry| *entry == "app:commit").count(),
            1
        );
    }

    #[test]
    fn test_startup_invalid_without_failsafe_is_fatal() {
        let (dir, mut nb) = testlib::daemon();

        let datastore_dir = dir.path().join("datastores");
        std::fs::create_dir_all(&datastore_dir).unwrap();
        persist::store(
            &datastore_dir,
            Store::Startup,
            &testlib::tree(INVALID_CONFIG),
        )
        .unwrap();

        let error = nb.startup(StartupMode::Startup, None).unwrap_err();
        assert!(matches!(error, StartupError::FailsafeUnavailable));
    }

    #[test]
    fn test_extra_xml_merged_without_commit_callbacks() {
        let (dir, mut nb) = testlib::daemon();
        let log = CallbackLog::default();
        nb.register_plugin(Box::new(RecordingPlugin::new("app", log.clone())));

        let extra_path = dir.path().join("extra.xml");
        std::fs::write(
            &extra_path,
            "<config><system xmlns='urn:conifer:system'>\
             <location>lab</location></system></config>",
        )
        .unwrap();

        let report = nb
            .startup(StartupMode::Startup, Some(&extra_path))
            .unwrap();
        assert!(!report.failsafe);

        let location = nb
            .datastores
            .tree(Store::Running)
            .unwrap()
            .find_xpath("/conifer-system:system/location")
            .unwrap();
        assert_eq!(location[0].value(), Some("lab"));

        // The merge bypasses commit callbacks: the empty boot commit
        // short-circuited and the extras never go through the pipeline.
        let log = log.lock().unwrap();
        assert!(!log.iter().any(|entry| entry == "app:commit"));
        // The reset hook contributed to the merge source.
        assert!(log.iter().any(|entry| entry == "app:reset"));
    }

    #[test]
    fn test_failsafe_recovery_marker_is_honored() {
        let (dir, mut nb) = testlib::daemon();

        let datastore_dir = dir.path().join("datastores");
        std::fs::create_dir_all(&datastore_dir).unwrap();
        persist::store(
            &datastore_dir,
            Store::Startup,
            &testlib::tree(STARTUP_CONFIG),
        )
        .unwrap();
        persist::store(
            &datastore_dir,
            Store::Failsafe,
            &testlib::tree(FAILSAFE_CONFIG),
        )
        .unwrap();
        nb.mark_failsafe_recovery();

        let report = nb.startup(StartupMode::Startup, None).unwrap();
        assert!(report.failsafe);
        assert!(!nb.failsafe_recovery_marked());
        assert!(
            nb.datastores
                .tree(Store::Running)
                .unwrap()
                .data_eq(&testlib::tree(FAILSAFE_CONFIG))
        );
    }

    #[test]
    fn test_startup_mode_none_leaves_stores_alone() {
        let (dir, mut nb) = testlib::daemon();

        let datastore_dir = dir.path().join("datastores");
        std::fs::create_dir_all(&datastore_dir).unwrap();
        persist::store(
            &datastore_dir,
            Store::Running,
            &testlib::tree(STARTUP_CONFIG),
        )
        .unwrap();

        let report = nb.startup(StartupMode::None, None).unwrap();
        assert!(!report.failsafe);
        assert!(
            nb.datastores
                .tree(Store::Running)
                .unwrap()
                .data_eq(&testlib::tree(STARTUP_CONFIG))
        );
    }
}
