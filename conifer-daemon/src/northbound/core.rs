//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use conifer_datastore::xml::XmlElement;
use conifer_datastore::{DataDiffOp, DataTree, Datastores, Store};
use conifer_northbound::plugin::{
    AuthDecision, AuthRequest, Plugin, PluginCapabilities, PluginRegistry,
};
use conifer_northbound::transaction::{
    Outcome, Phase, RevertReason, Transaction,
};
use conifer_yang::YANG_CTX;
use pickledb::PickleDb;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::Config;
use crate::northbound::client::api::{
    ConfigSource, Operation, Reply, SessionMsg,
};
use crate::northbound::client::{api as capi, netconf};
use crate::northbound::error::{Error, Result};
use crate::northbound::session::Sessions;
use crate::northbound::{db, yang};

// Default notification stream.
const STREAM_NETCONF: &str = "NETCONF";

// Marker file left behind when a failed revert makes the running state
// untrustworthy; the next startup honors it by committing the failsafe
// configuration.
const FAILSAFE_RECOVERY_MARKER: &str = "failsafe_recovery";

pub struct Northbound {
    // Named configuration datastores.
    pub(crate) datastores: Datastores,
    // Registered application callback sites.
    pub(crate) plugins: PluginRegistry,
    // Client sessions and per-datastore advisory locks.
    pub(crate) sessions: Sessions,
    // Rollback log.
    pub(crate) db: db::Database,
    // Process-wide transaction lock, held from Init through Finalize of a
    // commit. Holds the owning session ID.
    pub(crate) commit_lock: Option<u32>,
    // Dispatcher behavior.
    pub(crate) autolock: bool,
    pub(crate) callback_timeout: Duration,
    pub(crate) debug_level: u32,
    // Channel used to receive messages from client sessions.
    rx_clients: Receiver<capi::client::Request>,
    // Sender side handed to transport listeners.
    tx_clients: Sender<capi::client::Request>,
    // Transport listener tasks.
    clients: Vec<JoinHandle<()>>,
}

// ===== impl Northbound =====

impl Northbound {
    pub(crate) fn init(config: &Config, db: PickleDb) -> Result<Northbound> {
        let db = Arc::new(Mutex::new(db));

        // Create global YANG context.
        yang::create_context();
        let yang_ctx = YANG_CTX.get().unwrap().clone();

        let datastores =
            Datastores::new(yang_ctx, Path::new(&config.datastore_dir))?;

        let (tx_clients, rx_clients) = tokio::sync::mpsc::channel(4);

        Ok(Northbound {
            datastores,
            plugins: PluginRegistry::default(),
            sessions: Sessions::default(),
            db,
            commit_lock: None,
            autolock: config.netconf.autolock,
            callback_timeout: Duration::from_secs(
                config.netconf.callback_timeout,
            ),
            debug_level: 0,
            rx_clients,
            tx_clients,
            clients: Vec::new(),
        })
    }

    /// Registers an application plugin. Registration order defines callback
    /// order.
    pub(crate) fn register_plugin(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.register(plugin);
    }

    /// Starts serving the management transport. Called after the startup
    /// orchestrator has brought the datastores to a validated state.
    pub(crate) fn listen(&mut self, config: &Config) {
        let task = netconf::start(config, self.tx_clients.clone());
        self.clients.push(task);
    }

    // Main event loop.
    #[instrument(skip_all, name = "northbound")]
    pub(crate) async fn run(mut self, mut signal_rx: Receiver<()>) {
        loop {
            tokio::select! {
                Some(request) = self.rx_clients.recv() => {
                    self.process_client_msg(request);
                }
                _ = signal_rx.recv() => {
                    info!("shutting down");
                    self.rx_clients.close();
                    for client in self.clients.drain(..) {
                        client.abort();
                    }
                    break;
                }
                else => break,
            }
        }
    }

    // Processes a message received from a client session task.
    fn process_client_msg(&mut self, request: capi::client::Request) {
        trace!(%request, "received client request");

        match request {
            capi::client::Request::Attach(request) => {
                let session_id = self.sessions.attach(
                    request.username,
                    request.privileged,
                    request.tx,
                );
                let _ = request
                    .responder
                    .send(capi::client::AttachResponse { session_id });
            }
            capi::client::Request::Rpc(request) => {
                self.process_rpc_msg(request);
            }
            capi::client::Request::Detach(request) => {
                self.sessions.detach(request.session_id);
            }
        }
    }

    fn process_rpc_msg(&mut self, request: capi::client::RpcRequest) {
        let session_id = request.session_id;

        match request.operation {
            Operation::CloseSession => {
                // Reply first; the transport task writes the reply and
                // tears the connection down itself.
                let _ = request.responder.send(Ok(Reply::Ok));
                self.sessions.detach(session_id);
            }
            Operation::KillSession { session_id: victim } => {
                let result = self.kill_session(session_id, victim);
                if let Err(error) = &result {
                    warn!(%error, "kill-session failed");
                }
                let _ = request
                    .responder
                    .send(result.map_err(Error::into_error_records));
            }
            operation => {
                let result = self.process_operation(session_id, operation);
                if let Err(error) = &result {
                    warn!(%error, "request failed");
                }
                let _ = request
                    .responder
                    .send(result.map_err(Error::into_error_records));
            }
        }
    }

    // Dispatches a NETCONF operation to the engine.
    fn process_operation(
        &mut self,
        session_id: u32,
        operation: Operation,
    ) -> Result<Reply> {
        // Consult the pluggable authenticator.
        let username = self
            .sessions
            .get(session_id)
            .ok()
            .and_then(|session| session.username.clone());
        let auth_request = AuthRequest {
            session_id,
            username: username.as_deref(),
            operation: operation.name(),
        };
        if self.plugins.authenticate(&auth_request) == AuthDecision::Deny {
            return Err(Error::AccessDenied);
        }

        match operation {
            Operation::GetConfig { source, filter } => {
                self.datastores.ensure_loaded(source)?;
                let data =
                    self.datastores.get(source, filter.as_deref())?;
                Ok(Reply::Data(data))
            }
            Operation::EditConfig { target, default_op, config } => {
                self.rpc_edit_config(session_id, target, default_op, &config)
            }
            Operation::CopyConfig { source, target } => {
                self.rpc_copy_config(session_id, source, target)
            }
            Operation::DeleteConfig { target } => {
                self.rpc_delete_config(session_id, target)
            }
            Operation::Validate { source } => {
                let tree = self.resolve_config_source(source)?;
                self.validate_tree(tree)?;
                Ok(Reply::Ok)
            }
            Operation::Commit => {
                self.datastores.ensure_loaded(Store::Candidate)?;
                let candidate =
                    self.datastores.tree(Store::Candidate)?.duplicate();
                self.commit_tree(
                    session_id,
                    Store::Candidate,
                    candidate,
                    String::new(),
                )?;
                Ok(Reply::Ok)
            }
            Operation::DiscardChanges => {
                if let Some(holder) =
                    self.sessions.lock_holder(Store::Candidate)
                    && holder != session_id
                {
                    return Err(Error::InUse {
                        store: Store::Candidate,
                        holder,
                    });
                }
                self.datastores.copy(Store::Running, Store::Candidate)?;
                self.datastores.flush(Store::Candidate)?;
                Ok(Reply::Ok)
            }
            Operation::Lock { target } => {
                self.sessions.lock(target, session_id)?;
                Ok(Reply::Ok)
            }
            Operation::Unlock { target } => {
                self.sessions.unlock(target, session_id)?;
                Ok(Reply::Ok)
            }
            Operation::CreateSubscription { stream, start_time, stop_time } => {
                if start_time.is_some() || stop_time.is_some() {
                    return Err(Error::OperationNotSupported(
                        "notification replay is not supported".to_owned(),
                    ));
                }
                let session = self.sessions.get_mut(session_id)?;
                session.subscriptions.insert(stream);
                Ok(Reply::Ok)
            }
            Operation::Debug { level } => {
                info!(%level, "debug level changed");
                self.debug_level = level;
                Ok(Reply::Ok)
            }
            Operation::ListTransactions => {
                let db = self.db.lock().unwrap();
                let transactions = db::transaction_get_all(&db);
                Ok(Reply::Transactions(transactions))
            }
            Operation::Rollback { transaction_id } => {
                let transaction = {
                    let db = self.db.lock().unwrap();
                    db::transaction_get(&db, transaction_id)
                        .ok_or(Error::TransactionIdNotFound(transaction_id))?
                };
                self.commit_tree(
                    session_id,
                    Store::Running,
                    transaction.candidate,
                    format!("rollback to transaction {transaction_id}"),
                )?;
                // Keep the shared candidate in step with the new running.
                self.datastores.copy(Store::Running, Store::Candidate)?;
                self.datastores.flush(Store::Candidate)?;
                Ok(Reply::Ok)
            }
            // Handled by the caller.
            Operation::CloseSession | Operation::KillSession { .. } => {
                unreachable!()
            }
        }
    }

    fn rpc_edit_config(
        &mut self,
        session_id: u32,
        target: Store,
        default_op: conifer_datastore::EditOp,
        config: &DataTree,
    ) -> Result<Reply> {
        if target == Store::Running {
            return Err(Error::OperationNotSupported(
                "writable-running is not supported; edit the candidate and \
                 commit"
                    .to_owned(),
            ));
        }

        self.sessions.check_writable(target, session_id, self.autolock)?;

        // With autolock the dispatcher takes the lock around the edit.
        let autolocked = self.sessions.lock_holder(target).is_none();
        if autolocked {
            self.sessions.lock(target, session_id)?;
        }
        let result = self.apply_edit(target, default_op, config);
        if autolocked {
            let _ = self.sessions.unlock(target, session_id);
        }
        result?;
        Ok(Reply::Ok)
    }

    fn apply_edit(
        &mut self,
        target: Store,
        default_op: conifer_datastore::EditOp,
        config: &DataTree,
    ) -> Result<()> {
        self.datastores.ensure_loaded(target)?;
        self.datastores.put(target, default_op, config)?;
        self.datastores.flush(target)?;
        Ok(())
    }

    fn rpc_copy_config(
        &mut self,
        session_id: u32,
        source: ConfigSource,
        target: Store,
    ) -> Result<Reply> {
        let tree = self.resolve_config_source(source)?;

        // The running datastore is only ever mutated by a successful
        // commit; a copy onto it goes through the full pipeline.
        if target == Store::Running {
            self.commit_tree(
                session_id,
                Store::Running,
                tree,
                "copy-config".to_owned(),
            )?;
            return Ok(Reply::Ok);
        }

        if let Some(holder) = self.sessions.lock_holder(target)
            && holder != session_id
        {
            return Err(Error::InUse { store: target, holder });
        }
        self.datastores.replace(target, tree);
        self.datastores.flush(target)?;
        Ok(Reply::Ok)
    }

    fn rpc_delete_config(
        &mut self,
        session_id: u32,
        target: Store,
    ) -> Result<Reply> {
        if target == Store::Running {
            return Err(Error::OperationNotSupported(
                "the running datastore cannot be deleted".to_owned(),
            ));
        }
        if let Some(holder) = self.sessions.lock_holder(target)
            && holder != session_id
        {
            return Err(Error::InUse { store: target, holder });
        }
        self.datastores.delete(target)?;
        Ok(Reply::Ok)
    }

    fn kill_session(&mut self, session_id: u32, victim: u32) -> Result<Reply> {
        if !self.sessions.get(session_id)?.privileged {
            return Err(Error::AccessDenied);
        }
        if victim == session_id {
            return Err(Error::KillSelf);
        }
        let session = self.sessions.get(victim)?;
        let _ = session.tx.send(SessionMsg::Shutdown);
        self.sessions.detach(victim);
        info!(session_id = %victim, by = %session_id, "session killed");
        Ok(Reply::Ok)
    }

    fn resolve_config_source(
        &mut self,
        source: ConfigSource,
    ) -> Result<DataTree> {
        match source {
            ConfigSource::Store(store) => {
                self.datastores.ensure_loaded(store)?;
                Ok(self.datastores.tree(store)?.duplicate())
            }
            ConfigSource::Config(tree) => Ok(tree),
        }
    }

    /// Validates a tree the way a commit would, without touching any
    /// datastore: pre-validate hooks, structural validation, validate
    /// hooks.
    pub(crate) fn validate_tree(&mut self, tree: DataTree) -> Result<()> {
        let original = self.datastores.tree(Store::Running)?.duplicate();
        let mut transaction = Transaction::new(
            Utc::now(),
            String::new(),
            Store::Tmp,
            Store::Running,
            tree,
            original,
        );
        transaction.freeze_diff();
        self.run_validate_phases(&mut transaction)
    }

    /// Creates a configuration transaction promoting `candidate` into the
    /// running datastore. In case of success, the transaction ID is
    /// returned (0 when the diff was empty and nothing had to be done).
    pub(crate) fn commit_tree(
        &mut self,
        session_id: u32,
        source: Store,
        candidate: DataTree,
        comment: String,
    ) -> Result<u32> {
        // Init: take the serialization lock for the whole pipeline.
        if self.commit_lock.is_some() {
            return Err(Error::CommitInProgress);
        }
        self.commit_lock = Some(session_id);
        let result =
            self.run_transaction(session_id, source, candidate, comment);
        self.commit_lock = None;
        result
    }

    fn run_transaction(
        &mut self,
        session_id: u32,
        source: Store,
        candidate: DataTree,
        comment: String,
    ) -> Result<u32> {
        let original = self.datastores.tree(Store::Running)?.duplicate();
        let mut transaction = Transaction::new(
            Utc::now(),
            comment,
            source,
            Store::Running,
            candidate,
            original,
        );
        transaction.freeze_diff();

        // Nothing to do.
        if transaction.diff.is_empty() {
            transaction.outcome = Outcome::Ok;
            return Ok(0);
        }

        if self.debug_level > 0 {
            debug!(changes = %transaction.diff, "configuration transaction");
        }

        // Validate: hook and structural failures leave every datastore
        // untouched.
        if let Err(error) = self.run_validate_phases(&mut transaction) {
            transaction.outcome = Outcome::Invalid;
            return Err(error);
        }

        // Validate hooks may have adjusted the candidate; freeze the final
        // change set. Commit and revert both walk this frozen diff.
        transaction.freeze_diff();

        // Commit: expose the new tree as running, then drive the hooks.
        transaction.phase = Phase::Commit;
        self.datastores
            .replace(Store::Running, transaction.candidate.duplicate());

        let mut succeeded = Vec::new();
        for index in 0..self.plugins.len() {
            let timeout = self.callback_timeout;
            let record = self.plugins.get_mut(index).unwrap();
            if !record.capabilities().contains(PluginCapabilities::COMMIT) {
                continue;
            }
            let name = record.name();
            debug!(plugin = %name, phase = %Phase::Commit, "callback");

            match timed(timeout, name, Phase::Commit, || {
                record.plugin_mut().commit(&transaction)
            }) {
                Ok(()) => succeeded.push(index),
                Err(error) => {
                    // Unwind whatever already succeeded and restore the
                    // original target.
                    transaction.phase = Phase::Revert;
                    transaction.outcome = Outcome::Failed;
                    let revert_result =
                        self.revert(&transaction, &succeeded);
                    self.datastores.replace(
                        Store::Running,
                        transaction.original.duplicate(),
                    );
                    return Err(revert_result.err().unwrap_or(error));
                }
            }
        }

        // Commit-done: best-effort epilogue.
        transaction.phase = Phase::CommitDone;
        for index in 0..self.plugins.len() {
            let record = self.plugins.get_mut(index).unwrap();
            if !record
                .capabilities()
                .contains(PluginCapabilities::COMMIT_DONE)
            {
                continue;
            }
            let name = record.name();
            if let Err(message) = record.plugin_mut().commit_done(&transaction)
            {
                warn!(plugin = %name, %message, "commit-done callback failed");
            }
        }

        // Persist the new target.
        self.datastores.flush(Store::Running)?;

        transaction.phase = Phase::End;
        transaction.outcome = Outcome::Ok;

        // Record the transaction in the rollback log.
        {
            let mut db = self.db.lock().unwrap();
            db::transaction_record(&mut db, &mut transaction);
        }

        info!(
            transaction_id = %transaction.id,
            changes = %transaction.diff.len(),
            "configuration committed"
        );
        self.notify_config_change(session_id, &transaction);

        Ok(transaction.id)
    }

    fn run_validate_phases(
        &mut self,
        transaction: &mut Transaction,
    ) -> Result<()> {
        transaction.phase = Phase::Validate;

        // Pre-validate hooks.
        for index in 0..self.plugins.len() {
            let timeout = self.callback_timeout;
            let record = self.plugins.get_mut(index).unwrap();
            if !record
                .capabilities()
                .contains(PluginCapabilities::PRE_VALIDATE)
            {
                continue;
            }
            let name = record.name();
            debug!(plugin = %name, phase = "pre-validate", "callback");
            timed(timeout, name, Phase::Validate, || {
                record.plugin_mut().pre_validate(transaction)
            })?;
        }

        // Structural validation.
        transaction.candidate.validate().map_err(Error::Validation)?;

        // Application validation. A hook may adjust the candidate; later
        // hooks observe the adjustment.
        for index in 0..self.plugins.len() {
            let timeout = self.callback_timeout;
            let record = self.plugins.get_mut(index).unwrap();
            if !record.capabilities().contains(PluginCapabilities::VALIDATE) {
                continue;
            }
            let name = record.name();
            debug!(plugin = %name, phase = %Phase::Validate, "callback");
            timed(timeout, name, Phase::Validate, || {
                record.plugin_mut().validate(transaction)
            })?;
        }

        Ok(())
    }

    // Runs the revert hooks of the previously-succeeded commit callbacks,
    // in reverse registration order. A revert that itself fails is fatal:
    // the process is marked for failsafe recovery on next start.
    fn revert(
        &mut self,
        transaction: &Transaction,
        succeeded: &[usize],
    ) -> Result<()> {
        for index in succeeded.iter().rev() {
            let record = self.plugins.get_mut(*index).unwrap();
            if !record.capabilities().contains(PluginCapabilities::REVERT) {
                continue;
            }
            let name = record.name();
            debug!(plugin = %name, phase = %Phase::Revert, "callback");
            if let Err(message) =
                record.plugin_mut().revert(transaction, RevertReason::Abort)
            {
                error!(
                    plugin = %name, %message,
                    "revert failed, marking process for failsafe recovery"
                );
                self.mark_failsafe_recovery();
                return Err(Error::RevertFailed { plugin: name, message });
            }
        }
        Ok(())
    }

    pub(crate) fn mark_failsafe_recovery(&self) {
        let marker = self.datastores.dir().join(FAILSAFE_RECOVERY_MARKER);
        if let Err(error) = std::fs::write(&marker, b"") {
            error!(%error, "failed to write failsafe recovery marker");
        }
    }

    pub(crate) fn failsafe_recovery_marked(&self) -> bool {
        self.datastores.dir().join(FAILSAFE_RECOVERY_MARKER).exists()
    }

    pub(crate) fn clear_failsafe_recovery(&self) {
        let marker = self.datastores.dir().join(FAILSAFE_RECOVERY_MARKER);
        let _ = std::fs::remove_file(marker);
    }

    // Emits a netconf-config-change notification to every session
    // subscribed to the NETCONF stream.
    fn notify_config_change(
        &self,
        session_id: u32,
        transaction: &Transaction,
    ) {
        let mut change = XmlElement::new("netconf-config-change");
        change.attrs.push(conifer_datastore::Attr {
            name: "xmlns".to_owned(),
            value: "urn:ietf:params:xml:ns:yang:ietf-netconf-notifications"
                .to_owned(),
        });
        let mut changed_by = XmlElement::new("changed-by");
        let mut by_session = XmlElement::new("session-id");
        by_session.text = Some(session_id.to_string());
        changed_by.children.push(by_session);
        change.children.push(changed_by);
        let mut datastore = XmlElement::new("datastore");
        datastore.text = Some(Store::Running.as_str().to_owned());
        change.children.push(datastore);
        for entry in transaction.diff.iter() {
            let mut edit = XmlElement::new("edit");
            let mut target = XmlElement::new("target");
            target.text = Some(entry.path.clone());
            let mut operation = XmlElement::new("operation");
            operation.text = Some(
                match entry.op {
                    DataDiffOp::Create => "create",
                    DataDiffOp::Delete => "delete",
                    DataDiffOp::Replace => "replace",
                }
                .to_owned(),
            );
            edit.children.push(target);
            edit.children.push(operation);
            change.children.push(edit);
        }

        let mut notification = XmlElement::new("notification");
        notification.attrs.push(conifer_datastore::Attr {
            name: "xmlns".to_owned(),
            value: "urn:ietf:params:xml:ns:netconf:notification:1.0"
                .to_owned(),
        });
        let mut event_time = XmlElement::new("eventTime");
        event_time.text = Some(Utc::now().to_rfc3339());
        notification.children.push(event_time);
        notification.children.push(change);
        let message = notification.print_string(false);

        for session in self
            .sessions
            .iter()
            .filter(|session| session.subscriptions.contains(STREAM_NETCONF))
        {
            let _ = session.tx.send(SessionMsg::Message(message.clone()));
        }
    }
}

// ===== helper functions =====

// Invokes a callback under the soft timeout. The cooperative loop cannot
// preempt a callback, so the overrun is detected when it returns and
// counted as a failure.
fn timed<F>(
    timeout: Duration,
    plugin: &'static str,
    phase: Phase,
    callback: F,
) -> Result<()>
where
    F: FnOnce() -> std::result::Result<(), String>,
{
    let start = Instant::now();
    let result = callback();
    if start.elapsed() > timeout {
        return Err(Error::CallbackTimeout {
            plugin,
            phase,
            seconds: timeout.as_secs(),
        });
    }
    result.map_err(|message| match phase {
        Phase::Validate => Error::ValidateCallback { plugin, message },
        _ => Error::CommitCallback { plugin, message },
    })
}

#[cfg(test)]
mod tests {
    use conifer_datastore::EditOp;

    use super::*;
    use crate::northbound::testlib::{self, CallbackLog, RecordingPlugin};

    fn seed_running(nb: &mut Northbound, xml: Option<&str>) {
        nb.datastores.create(Store::Running);
        if let Some(xml) = xml {
            nb.datastores
                .put(Store::Running, EditOp::Merge, &testlib::tree(xml))
                .unwrap();
        }
        nb.datastores.flush(Store::Running).unwrap();
    }

    const HOSTNAME_R1: &str = "<config><system xmlns='urn:conifer:system'>\
                               <hostname>r1</hostname></system></config>";
    const HOSTNAME_R2: &str = "<config><system xmlns='urn:conifer:system'>\
                               <hostname>r2</hostname></system></config>";

    #[test]
    fn test_commit_rollback_order() {
        let (_dir, mut nb) = testlib::daemon();
        let log = CallbackLog::default();
        nb.register_plugin(Box::new(RecordingPlugin::new("first", log.clone())));
        let mut second = RecordingPlugin::new("second", log.clone());
        second.fail_commit = true;
        nb.register_plugin(Box::new(second));
        seed_running(&mut nb, None);

        let error = nb
            .commit_tree(
                1,
                Store::Candidate,
                testlib::tree(HOSTNAME_R1),
                String::new(),
            )
            .unwrap_err();
        match error {
            Error::CommitCallback { plugin, message } => {
                assert_eq!(plugin, "second");
                assert_eq!(message, "resource allocation failed");
            }
            other => panic!("unexpected error: {other}"),
        }

        // The target is restored and the first plugin's revert ran exactly
        // once, after the failing callback.
        assert!(nb.datastores.tree(Store::Running).unwrap().is_empty());
        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            [
                "first:pre-validate",
                "second:pre-validate",
                "first:validate",
                "second:validate",
                "first:commit",
                "second:commit",
                "first:revert(abort)",
            ]
        );
    }

    #[test]
    fn test_failed_validation_leaves_running_untouched() {
        let (_dir, mut nb) = testlib::daemon();
        seed_running(&mut nb, Some(HOSTNAME_R1));
        let before = nb
            .datastores
            .tree(Store::Running)
            .unwrap()
            .print_xml_string(false);

        let invalid = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <user><name>admin</name><uid>not-a-number</uid></user>\
             </system></config>",
        );
        let error = nb
            .commit_tree(1, Store::Candidate, invalid, String::new())
            .unwrap_err();
        assert!(matches!(error, Error::Validation(_)));

        let after = nb
            .datastores
            .tree(Store::Running)
            .unwrap()
            .print_xml_string(false);
        assert_eq!(before, after);
    }

    #[test]
    fn test_successful_commit_persists_running() {
        let (dir, mut nb) = testlib::daemon();
        let log = CallbackLog::default();
        nb.register_plugin(Box::new(RecordingPlugin::new("app", log.clone())));
        seed_running(&mut nb, None);

        let candidate = testlib::tree(HOSTNAME_R1);
        let id = nb
            .commit_tree(1, Store::Candidate, candidate.duplicate(), String::new())
            .unwrap();
        assert!(id > 0);
        assert!(nb.datastores.tree(Store::Running).unwrap().data_eq(&candidate));
        assert!(log.lock().unwrap().contains(&"app:commit-done".to_owned()));

        // The persisted file is parseable and round-trips.
        let datastore_dir = dir.path().join("datastores");
        let loaded = conifer_datastore::persist::load(
            nb.datastores.context().clone(),
            &datastore_dir,
            Store::Running,
        )
        .unwrap()
        .unwrap();
        assert!(loaded.data_eq(&candidate));
        let reserialized = loaded.print_xml_string(true);
        let on_disk = std::fs::read_to_string(conifer_datastore::persist::file_path(
            &datastore_dir,
            Store::Running,
        ))
        .unwrap();
        assert_eq!(reserialized, on_disk);
    }

    #[test]
    fn test_concurrent_commit_rejected() {
        let (_dir, mut nb) = testlib::daemon();
        seed_running(&mut nb, None);

        nb.commit_lock = Some(7);
        let error = nb
            .commit_tree(
                1,
                Store::Candidate,
                testlib::tree(HOSTNAME_R1),
                String::new(),
            )
            .unwrap_err();
        assert!(matches!(error, Error::CommitInProgress));

        // The lock holder is unaffected and running was not observed in a
        // partial state.
        assert_eq!(nb.commit_lock, Some(7));
        assert!(nb.datastores.tree(Store::Running).unwrap().is_empty());
    }

    #[test]
    fn test_empty_diff_short_circuits() {
        let (_dir, mut nb) = testlib::daemon();
        let log = CallbackLog::default();
        nb.register_plugin(Box::new(RecordingPlugin::new("app", log.clone())));
        seed_running(&mut nb, None);

        nb.commit_tree(
            1,
            Store::Candidate,
            testlib::tree(HOSTNAME_R1),
            String::new(),
        )
        .unwrap();
        log.lock().unwrap().clear();

        // Same tree again: no diff, no callbacks.
        let id = nb
            .commit_tree(
                1,
                Store::Candidate,
                testlib::tree(HOSTNAME_R1),
                String::new(),
            )
            .unwrap();
        assert_eq!(id, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_revert_failure_marks_failsafe_recovery() {
        let (_dir, mut nb) = testlib::daemon();
        let log = CallbackLog::default();
        let mut first = RecordingPlugin::new("first", log.clone());
        first.fail_revert = true;
        nb.register_plugin(Box::new(first));
        let mut second = RecordingPlugin::new("second", log.clone());
        second.fail_commit = true;
        nb.register_plugin(Box::new(second));
        seed_running(&mut nb, None);

        let error = nb
            .commit_tree(
                1,
                Store::Candidate,
                testlib::tree(HOSTNAME_R1),
                String::new(),
            )
            .unwrap_err();
        assert!(matches!(error, Error::RevertFailed { plugin: "first", .. }));
        assert!(nb.failsafe_recovery_marked());
    }

    #[test]
    fn test_edit_config_lock_contention() {
        let (_dir, mut nb) = testlib::daemon();
        seed_running(&mut nb, None);
        nb.datastores.create(Store::Candidate);
        nb.datastores.flush(Store::Candidate).unwrap();

        let (tx1, _rx1) = tokio::sync::mpsc::unbounded_channel();
        let (tx2, _rx2) = tokio::sync::mpsc::unbounded_channel();
        let s1 = nb.sessions.attach(None, false, tx1);
        let s2 = nb.sessions.attach(None, false, tx2);
        nb.sessions.lock(Store::Candidate, s1).unwrap();

        let operation = Operation::EditConfig {
            target: Store::Candidate,
            default_op: EditOp::Merge,
            config: testlib::tree(HOSTNAME_R1),
        };
        let error = nb.process_operation(s2, operation).unwrap_err();
        assert!(matches!(error, Error::InUse { holder, .. } if holder == s1));
        let records = error_records_for(error);
        assert_eq!(records[0].tag.as_str(), "in-use");

        // The holder is unaffected.
        let operation = Operation::EditConfig {
            target: Store::Candidate,
            default_op: EditOp::Merge,
            config: testlib::tree(HOSTNAME_R1),
        };
        nb.process_operation(s1, operation).unwrap();
    }

    #[test]
    fn test_edit_config_requires_lock_without_autolock() {
        let (_dir, mut nb) = testlib::daemon();
        assert!(!nb.autolock);
        seed_running(&mut nb, None);
        nb.datastores.create(Store::Candidate);

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let session = nb.sessions.attach(None, false, tx);
        let operation = Operation::EditConfig {
            target: Store::Candidate,
            default_op: EditOp::Merge,
            config: testlib::tree(HOSTNAME_R1),
        };
        let error = nb.process_operation(session, operation).unwrap_err();
        assert!(matches!(error, Error::LockRequired { .. }));

        // With autolock the dispatcher locks implicitly and releases
        // afterwards.
        nb.autolock = true;
        let operation = Operation::EditConfig {
            target: Store::Candidate,
            default_op: EditOp::Merge,
            config: testlib::tree(HOSTNAME_R1),
        };
        nb.process_operation(session, operation).unwrap();
        assert_eq!(nb.sessions.lock_holder(Store::Candidate), None);
    }

    #[test]
    fn test_rollback_log_and_rollback() {
        let (_dir, mut nb) = testlib::daemon();
        seed_running(&mut nb, None);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let session = nb.sessions.attach(None, true, tx);

        let first = nb
            .commit_tree(
                session,
                Store::Candidate,
                testlib::tree(HOSTNAME_R1),
                "first".to_owned(),
            )
            .unwrap();
        nb.commit_tree(
            session,
            Store::Candidate,
            testlib::tree(HOSTNAME_R2),
            "second".to_owned(),
        )
        .unwrap();

        match nb.process_operation(session, Operation::ListTransactions) {
            Ok(Reply::Transactions(transactions)) => {
                assert_eq!(transactions.len(), 2);
                assert_eq!(transactions[0].comment, "first");
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        nb.process_operation(
            session,
            Operation::Rollback { transaction_id: first },
        )
        .unwrap();
        assert!(
            nb.datastores
                .tree(Store::Running)
                .unwrap()
                .data_eq(&testlib::tree(HOSTNAME_R1))
        );
    }

    fn error_records_for(
        error: Error,
    ) -> Vec<conifer_northbound::error::ErrorRecord> {
        error.into_error_records()
    }
}
