//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

mod client;
mod core;
mod db;
mod error;
mod session;
mod startup;
mod yang;

pub use self::core::Northbound;
pub use self::error::{Error, Result};
pub use self::startup::{StartupError, StartupMode, StartupReport};

// Shared fixtures for the daemon's tests: a fully-initialized northbound
// core over temporary state, plus a plugin that records every callback.
#[cfg(test)]
pub(crate) mod testlib {
    use std::sync::{Arc, Mutex};

    use conifer_datastore::{DataTree, Store};
    use conifer_northbound::plugin::{Plugin, PluginCapabilities};
    use conifer_northbound::transaction::{RevertReason, Transaction};
    use conifer_yang::YANG_CTX;

    use crate::config::Config;
    use crate::northbound::Northbound;

    pub(crate) fn daemon() -> (tempfile::TempDir, Northbound) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.datastore_dir =
            dir.path().join("datastores").to_str().unwrap().to_owned();
        config.database_path =
            dir.path().join("conifer.db").to_str().unwrap().to_owned();

        let db = crate::init_db(&config.database_path).unwrap();
        let nb = Northbound::init(&config, db).unwrap();
        (dir, nb)
    }

    pub(crate) fn tree(xml: &str) -> DataTree {
        let ctx = YANG_CTX.get().unwrap().clone();
        DataTree::parse_xml_string(ctx, xml).unwrap()
    }

    pub(crate) type CallbackLog = Arc<Mutex<Vec<String>>>;

    /// Records every invoked callback; optionally fails at a chosen hook.
    pub(crate) struct RecordingPlugin {
        pub(crate) plugin_name: &'static str,
        pub(crate) log: CallbackLog,
        pub(crate) fail_commit: bool,
        pub(crate) fail_revert: bool,
    }

    impl RecordingPlugin {
        pub(crate) fn new(
            plugin_name: &'static str,
            log: CallbackLog,
        ) -> RecordingPlugin {
            RecordingPlugin {
                plugin_name,
                log,
                fail_commit: false,
                fail_revert: false,
            }
        }

        fn record(&self, event: &str) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{event}", self.plugin_name));
        }
    }

    impl Plugin for RecordingPlugin {
        fn name(&self) -> &'static str {
            self.plugin_name
        }

        fn capabilities(&self) -> PluginCapabilities {
            PluginCapabilities::RESET
                | PluginCapabilities::PRE_VALIDATE
                | PluginCapabilities::VALIDATE
                | PluginCapabilities::COMMIT
                | PluginCapabilities::COMMIT_DONE
                | PluginCapabilities::REVERT
        }

        fn reset(
            &mut self,
            _store: Store,
        ) -> Result<Option<DataTree>, String> {
            self.record("reset");
            Ok(None)
        }

        fn pre_validate(&mut self, _tx: &Transaction) -> Result<(), String> {
            self.record("pre-validate");
            Ok(())
        }

        fn validate(&mut self, _tx: &mut Transaction) -> Result<(), String> {
            self.record("validate");
            Ok(())
        }

        fn commit(&mut self, _tx: &Transaction) -> Result<(), String> {
            self.record("commit");
            if self.fail_commit {
                return Err("resource allocation failed".to_owned());
            }
            Ok(())
        }

        fn commit_done(&mut self, _tx: &Transaction) -> Result<(), String> {
            self.record("commit-done");
            Ok(())
        }

        fn revert(
            &mut self,
            _tx: &Transaction,
            reason: RevertReason,
        ) -> Result<(), String> {
            self.record(&format!("revert({reason})"));
            if self.fail_revert {
                return Err("teardown failed".to_owned());
            }
            Ok(())
        }
    }
}
