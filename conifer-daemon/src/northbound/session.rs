//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashSet};

use conifer_datastore::Store;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::northbound::client::api::SessionMsg;
use crate::northbound::error::{Error, Result};

/// One client connection on the management transport.
#[derive(Debug)]
pub struct Session {
    pub id: u32,
    pub username: Option<String>,
    // Privileged sessions (e.g. local root) may kill other sessions.
    pub privileged: bool,
    // Notification streams the session subscribed to.
    pub subscriptions: HashSet<String>,
    // Channel towards the session's transport task.
    pub tx: UnboundedSender<SessionMsg>,
}

/// Session registry plus the per-datastore advisory locks.
#[derive(Debug, Default)]
pub struct Sessions {
    sessions: BTreeMap<u32, Session>,
    locks: BTreeMap<Store, u32>,
    next_id: u32,
}

// ===== impl Sessions =====

impl Sessions {
    pub(crate) fn attach(
        &mut self,
        username: Option<String>,
        privileged: bool,
        tx: UnboundedSender<SessionMsg>,
    ) -> u32 {
        self.next_id += 1;
        let id = self.next_id;
        self.sessions.insert(
            id,
            Session {
                id,
                username,
                privileged,
                subscriptions: HashSet::new(),
                tx,
            },
        );
        debug!(session_id = %id, "session attached");
        id
    }

    /// Removes a session, releasing every lock it holds. Safe to call for
    /// an already-detached session.
    pub(crate) fn detach(&mut self, id: u32) {
        if self.sessions.remove(&id).is_some() {
            debug!(session_id = %id, "session detached");
        }
        self.locks.retain(|_, holder| *holder != id);
    }

    pub(crate) fn get(&self, id: u32) -> Result<&Session> {
        self.sessions.get(&id).ok_or(Error::SessionNotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Result<&mut Session> {
        self.sessions.get_mut(&id).ok_or(Error::SessionNotFound(id))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Takes the advisory lock on a datastore. Fails with `lock-denied`
    /// while another session holds it.
    pub(crate) fn lock(&mut self, store: Store, id: u32) -> Result<()> {
        match self.locks.get(&store) {
            Some(holder) if *holder != id => {
                Err(Error::LockDenied { store, holder: *holder })
            }
            _ => {
                self.locks.insert(store, id);
                debug!(%store, session_id = %id, "datastore locked");
                Ok(())
            }
        }
    }

    pub(crate) fn unlock(&mut self, store: Store, id: u32) -> Result<()> {
        match self.locks.get(&store) {
            Some(holder) if *holder == id => {
                self.locks.remove(&store);
                debug!(%store, session_id = %id, "datastore unlocked");
                Ok(())
            }
            Some(holder) => {
                Err(Error::LockDenied { store, holder: *holder })
            }
            None => Err(Error::LockRequired { store }),
        }
    }

    pub(crate) fn lock_holder(&self, store: Store) -> Option<u32> {
        self.locks.get(&store).copied()
    }

    /// Write-access check for edit-config. A datastore locked by another
    /// session is in use; with autolock disabled the session must hold the
    /// lock itself.
    pub(crate) fn check_writable(
        &self,
        store: Store,
        id: u32,
        autolock: bool,
    ) -> Result<()> {
        match self.locks.get(&store) {
            Some(holder) if *holder != id => {
                Err(Error::InUse { store, holder: *holder })
            }
            Some(_) => Ok(()),
            None if autolock => Ok(()),
            None => Err(Error::LockRequired { store }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sessions_with_two() -> (Sessions, u32, u32) {
        let mut sessions = Sessions::default();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let s1 = sessions.attach(Some("alice".to_owned()), false, tx1);
        let s2 = sessions.attach(Some("bob".to_owned()), false, tx2);
        (sessions, s1, s2)
    }

    #[test]
    fn test_lock_contention() {
        let (mut sessions, s1, s2) = sessions_with_two();

        sessions.lock(Store::Candidate, s1).unwrap();
        assert!(matches!(
            sessions.lock(Store::Candidate, s2),
            Err(Error::LockDenied { holder, .. }) if holder == s1
        ));
        assert!(matches!(
            sessions.check_writable(Store::Candidate, s2, true),
            Err(Error::InUse { holder, .. }) if holder == s1
        ));

        // The holder itself may edit.
        sessions.check_writable(Store::Candidate, s1, false).unwrap();
    }

    #[test]
    fn test_detach_releases_locks() {
        let (mut sessions, s1, s2) = sessions_with_two();

        sessions.lock(Store::Candidate, s1).unwrap();
        sessions.lock(Store::Running, s1).unwrap();
        sessions.detach(s1);

        assert_eq!(sessions.lock_holder(Store::Candidate), None);
        sessions.lock(Store::Candidate, s2).unwrap();
    }

    #[test]
    fn test_unlock_requires_holder() {
        let (mut sessions, s1, s2) = sessions_with_two();

        sessions.lock(Store::Candidate, s1).unwrap();
        assert!(sessions.unlock(Store::Candidate, s2).is_err());
        sessions.unlock(Store::Candidate, s1).unwrap();
        assert!(matches!(
            sessions.unlock(Store::Candidate, s1),
            Err(Error::LockRequired { .. })
        ));
    }
}
