use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};

use crate::model::app_id::AppId;

/// Host-wide action locks keyed by identity.
///
/// Several records can share one identity (a wildcard-flagged and a concrete
/// record, or a record handed out before setup-again), so actions serialize
/// on the identity rather than on the record.
#[derive(Debug, Default)]
pub struct ActionLocks {
    busy: Mutex<HashSet<AppId>>,
    released: Condvar,
}

/// Holds one or more identities until dropped.
#[derive(Debug)]
pub struct ActionGuard<'a> {
    locks: &'a ActionLocks,
    ids: Vec<AppId>,
}

impl ActionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, id: &AppId) -> ActionGuard<'_> {
        self.lock_all(std::slice::from_ref(id))
    }

    /// Block until none of `ids` is held, then take all of them at once.
    /// A caller never holds part of its set while waiting.
    pub fn lock_all(&self, ids: &[AppId]) -> ActionGuard<'_> {
        let mut wanted: Vec<AppId> = ids.to_vec();
        wanted.sort();
        wanted.dedup();

        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        while wanted.iter().any(|id| busy.contains(id)) {
            busy = self
                .released
                .wait(busy)
                .unwrap_or_else(PoisonError::into_inner);
        }
        busy.extend(wanted.iter().cloned());

        ActionGuard {
            locks: self,
            ids: wanted,
        }
    }

    pub fn is_locked(&self, id: &AppId) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        let mut busy = self
            .locks
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for id in &self.ids {
            busy.remove(id);
        }
        self.locks.released.notify_all();
    }
}
