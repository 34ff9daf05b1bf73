//! The session manager (C9): mints and tracks logical session ids (`lsid`), per spec §4.9.
//! Grounded on the teacher driver's `client/session.rs` `ClientSession`/`ServerSession` split, but
//! decoupled from the teacher's `Client`/session-pool-checkout plumbing since spec §4.9 specifies
//! session lifecycle as a standalone state machine rather than a pooled-resource checkout.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Instant,
};

use uuid::Uuid;

use crate::error::{ErrorKind, Result};

/// A 16-byte logical session id, generated client-side and sent as the `lsid` field of every
/// command issued within a session, per spec §4.9.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Lsid(Uuid);

impl Lsid {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

/// Options gating [`SessionManager::start_session`], per spec §4.9.
#[derive(Clone, Copy, Debug, Default)]
pub struct StartSessionOptions {
    /// If true, starting a session while this manager already has one active is an error rather
    /// than a silent no-op success.
    pub fail_if_already_started: bool,
}

/// Options gating [`SessionManager::end_session`], per spec §4.9.
#[derive(Clone, Copy, Debug, Default)]
pub struct EndSessionOptions {
    /// If true, ending a session this manager never started (or already ended) is an error rather
    /// than a silent no-op success.
    pub fail_if_not_started: bool,
}

/// A handle to a started session. Two handles are equal iff they carry the same `lsid`; distinct
/// calls to [`SessionManager::start_session`] always mint a fresh `lsid`, so two handles returned
/// by two different calls are never equal even if the manager has no other session active at
/// either point — callers cannot accidentally treat a new session as a reused one.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SessionHandle {
    lsid: Lsid,
}

impl SessionHandle {
    pub fn lsid(&self) -> Lsid {
        self.lsid
    }
}

struct TrackedSession {
    txn_number: i64,
    last_use: Instant,
}

/// Tracks which logical sessions are currently active for a single client, per spec §4.9.
/// `start_session`/`end_session`/`kill_session` only ever mutate this bookkeeping: no network
/// command is part of starting or ending a session (the server learns about a session lazily,
/// the first time its `lsid` appears in a command).
#[derive(Default)]
pub struct SessionManager {
    active: Mutex<std::collections::HashMap<Lsid, TrackedSession>>,
    /// One async mutex per live session, held by [`Client::execute`](crate::client::Client::execute)
    /// for the duration of a command (including its retries) so that, per spec §5, "an in-flight
    /// command on a session blocks subsequent commands on the same session."
    locks: Mutex<std::collections::HashMap<Lsid, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new session, always minting a fresh `lsid`.
    ///
    /// `fail_if_already_started` rejects the call if this manager already has at least one
    /// active session — useful for call sites that assume at most one explicit session per
    /// logical unit of work.
    pub fn start_session(&self, options: StartSessionOptions) -> Result<SessionHandle> {
        let mut active = self.active.lock().unwrap();
        if options.fail_if_already_started && !active.is_empty() {
            return Err(ErrorKind::SessionState {
                message: "a session is already active".into(),
            }
            .into());
        }
        let lsid = Lsid::generate();
        active.insert(lsid, TrackedSession { txn_number: 0, last_use: Instant::now() });
        Ok(SessionHandle { lsid })
    }

    /// Ends a session, releasing its bookkeeping. A no-op if the session isn't tracked, unless
    /// `fail_if_not_started` asks for that to be an error instead.
    pub fn end_session(&self, handle: SessionHandle, options: EndSessionOptions) -> Result<()> {
        let mut active = self.active.lock().unwrap();
        let was_present = active.remove(&handle.lsid).is_some();
        if !was_present && options.fail_if_not_started {
            return Err(ErrorKind::SessionState {
                message: "no active session with this id".into(),
            }
            .into());
        }
        drop(active);
        self.locks.lock().unwrap().remove(&handle.lsid);
        Ok(())
    }

    /// Unconditionally releases a session's bookkeeping, the client-side analogue of the
    /// server's `killSessions` command: always succeeds, even for an `lsid` this manager never
    /// saw, since the point is to guarantee the session is gone afterward either way.
    pub fn kill_session(&self, handle: SessionHandle) {
        self.active.lock().unwrap().remove(&handle.lsid);
        self.locks.lock().unwrap().remove(&handle.lsid);
    }

    /// Returns the per-session mutex serializing commands on `handle`, minting one the first time
    /// a given `lsid` is asked for. Held by [`Client::execute`](crate::client::Client::execute)
    /// across the command's build/send/retry lifetime so a second command on the same session
    /// blocks until the first completes, per spec §5.
    pub(crate) fn serialization_lock(&self, handle: SessionHandle) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(handle.lsid)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn is_active(&self, handle: SessionHandle) -> bool {
        self.active.lock().unwrap().contains_key(&handle.lsid)
    }

    /// The session's current transaction number, the monotonic counter backing C10's `txnNumber`
    /// field.
    pub fn txn_number(&self, handle: SessionHandle) -> Option<i64> {
        self.active.lock().unwrap().get(&handle.lsid).map(|s| s.txn_number)
    }

    /// Advances and returns the session's transaction number, per spec §4.10 — called once per
    /// `startTransaction` and once per retried write.
    pub fn advance_txn_number(&self, handle: SessionHandle) -> Result<i64> {
        let mut active = self.active.lock().unwrap();
        let session = active.get_mut(&handle.lsid).ok_or_else(|| ErrorKind::SessionState {
            message: "no active session with this id".into(),
        })?;
        session.txn_number += 1;
        session.last_use = Instant::now();
        Ok(session.txn_number)
    }
}
