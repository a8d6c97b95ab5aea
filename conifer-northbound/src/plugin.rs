//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use bitflags::bitflags;
use conifer_datastore::{DataTree, Store};
use conifer_yang::Context;
use conifer_yang::schema::SchemaNode;
use tracing::debug;

use crate::transaction::{RevertReason, Transaction};

bitflags! {
    /// The subset of phase hooks a plugin implements. The registry skips
    /// hooks a plugin does not declare.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct PluginCapabilities: u16 {
        const RESET = 0x0001;
        const PRE_VALIDATE = 0x0002;
        const VALIDATE = 0x0004;
        const COMMIT = 0x0008;
        const COMMIT_DONE = 0x0010;
        const REVERT = 0x0020;
        const EXTENSION = 0x0040;
        const AUTH = 0x0080;
    }
}

/// Decision of a pluggable authenticator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthDecision {
    Permit,
    Deny,
}

/// An authentication request handed to `auth` hooks.
#[derive(Debug)]
pub struct AuthRequest<'a> {
    pub session_id: u32,
    pub username: Option<&'a str>,
    pub operation: &'a str,
}

/// Application callback site. Every hook is optional; `capabilities`
/// declares which ones are implemented.
pub trait Plugin: Send {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> PluginCapabilities;

    /// Invoked at startup. The returned tree is merged into the system
    /// configuration alongside the extra-XML file.
    fn reset(&mut self, _store: Store) -> Result<Option<DataTree>, String> {
        Ok(None)
    }

    fn pre_validate(&mut self, _tx: &Transaction) -> Result<(), String> {
        Ok(())
    }

    /// May adjust the candidate; later validate hooks observe the
    /// adjustment. The change set is frozen once validation completes.
    fn validate(&mut self, _tx: &mut Transaction) -> Result<(), String> {
        Ok(())
    }

    fn commit(&mut self, _tx: &Transaction) -> Result<(), String> {
        Ok(())
    }

    /// Best-effort epilogue; failures are logged and never trigger revert.
    fn commit_done(&mut self, _tx: &Transaction) -> Result<(), String> {
        Ok(())
    }

    /// Unwinds a previously-succeeded `commit` hook.
    fn revert(
        &mut self,
        _tx: &Transaction,
        _reason: RevertReason,
    ) -> Result<(), String> {
        Ok(())
    }

    /// Invoked once per schema node at registration time, for nodes the
    /// plugin wants to attach extension behavior to.
    fn extension(&mut self, _snode: SchemaNode<'_>) -> Result<(), String> {
        Ok(())
    }

    fn auth(&mut self, _request: &AuthRequest<'_>) -> AuthDecision {
        AuthDecision::Permit
    }
}

/// Registered callback site.
pub struct PluginRecord {
    name: &'static str,
    capabilities: PluginCapabilities,
    plugin: Box<dyn Plugin>,
}

/// Ordered sequence of callback sites. Forward phases iterate registration
/// order; revert iterates in reverse, so each plugin sees its resources
/// torn down after its dependents.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<PluginRecord>,
}

// ===== impl PluginRecord =====

impl PluginRecord {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capabilities(&self) -> PluginCapabilities {
        self.capabilities
    }

    pub fn plugin_mut(&mut self) -> &mut dyn Plugin {
        self.plugin.as_mut()
    }
}

// ===== impl PluginRegistry =====

impl PluginRegistry {
    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        let name = plugin.name();
        let capabilities = plugin.capabilities();
        debug!(%name, ?capabilities, "registered plugin");
        self.plugins.push(PluginRecord {
            name,
            capabilities,
            plugin,
        });
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PluginRecord> {
        self.plugins.get_mut(index)
    }

    /// Callback sites in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PluginRecord> {
        self.plugins.iter_mut()
    }

    /// Callback sites in reverse registration order, for revert.
    pub fn iter_mut_rev(&mut self) -> impl Iterator<Item = &mut PluginRecord> {
        self.plugins.iter_mut().rev()
    }

    /// Runs the extension hooks against every schema node.
    pub fn notify_extensions(&mut self, ctx: &Context) -> Result<(), String> {
        for record in &mut self.plugins {
            if !record.capabilities.contains(PluginCapabilities::EXTENSION) {
                continue;
            }
            for snode in ctx.traverse() {
                record.plugin.extension(snode)?;
            }
        }
        Ok(())
    }

    /// Consults the authenticator hooks in registration order. The first
    /// deny wins; with no `auth` hook registered every request is
    /// permitted.
    pub fn authenticate(&mut self, request: &AuthRequest<'_>) -> AuthDecision {
        for record in &mut self.plugins {
            if !record.capabilities.contains(PluginCapabilities::AUTH) {
                continue;
            }
            if record.plugin.auth(request) == AuthDecision::Deny {
                return AuthDecision::Deny;
            }
        }
        AuthDecision::Permit
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct RecordingPlugin {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Plugin for RecordingPlugin {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn capabilities(&self) -> PluginCapabilities {
            PluginCapabilities::AUTH
        }

        fn auth(&mut self, _request: &AuthRequest<'_>) -> AuthDecision {
            self.log.lock().unwrap().push("auth");
            AuthDecision::Permit
        }
    }

    struct DenyPlugin;

    impl Plugin for DenyPlugin {
        fn name(&self) -> &'static str {
            "deny"
        }

        fn capabilities(&self) -> PluginCapabilities {
            PluginCapabilities::AUTH
        }

        fn auth(&mut self, _request: &AuthRequest<'_>) -> AuthDecision {
            AuthDecision::Deny
        }
    }

    #[test]
    fn test_first_deny_wins() {
        let mut registry = PluginRegistry::default();
        registry.register(Box::new(RecordingPlugin::default()));
        registry.register(Box::new(DenyPlugin));

        let request = AuthRequest {
            session_id: 1,
            username: Some("admin"),
            operation: "edit-config",
        };
        assert_eq!(registry.authenticate(&request), AuthDecision::Deny);
    }

    #[test]
    fn test_reverse_iteration_order() {
        let mut registry = PluginRegistry::default();
        registry.register(Box::new(RecordingPlugin::default()));
        registry.register(Box::new(DenyPlugin));

        let forward = registry
            .iter_mut()
            .map(|record| record.name())
            .collect::<Vec<_>>();
        let reverse = registry
            .iter_mut_rev()
            .map(|record| record.name())
            .collect::<Vec<_>>();
        assert_eq!(forward, ["recording", "deny"]);
        assert_eq!(reverse, ["deny", "recording"]);
    }
}
