//! The transaction state machine (C10), per spec §4.10: `None -> Starting -> InProgress ->
//! (Committed | Aborted)`, one instance per logical session, pinning in-transaction operations
//! to the server that accepted the first command. Grounded on the teacher driver's
//! `client/session.rs` `Transaction`/`TransactionState`, but kept as its own table keyed by
//! [`Lsid`] rather than embedded in [`crate::session::SessionManager`]'s bookkeeping, mirroring
//! how spec §2 lists C9 (session manager) and C10 (transaction state machine) as separate
//! components that cooperate through the session's identity rather than one subsuming the other.

use std::{collections::HashMap, sync::Mutex};

use crate::{
    error::{ErrorKind, Result},
    sdam::ServerAddress,
    session::{Lsid, SessionHandle},
};

/// The state of a session's transaction, per spec §3 "Session".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionState {
    None,
    Starting,
    InProgress,
    Committed,
    Aborted,
}

/// Options gating [`TransactionManager::start_transaction`], per spec §4.10.
#[derive(Clone, Copy, Debug, Default)]
pub struct StartTransactionOptions {
    pub fail_if_already_started: bool,
}

/// Options gating [`TransactionManager::commit_transaction`]/
/// [`TransactionManager::abort_transaction`], per spec §4.10.
#[derive(Clone, Copy, Debug, Default)]
pub struct EndTransactionOptions {
    pub fail_if_not_started: bool,
}

struct TransactionEntry {
    state: TransactionState,
    pinned: Option<ServerAddress>,
}

impl Default for TransactionEntry {
    fn default() -> Self {
        Self { state: TransactionState::None, pinned: None }
    }
}

/// Tracks the transaction state of every session a [`crate::session::SessionManager`] currently
/// has active, per spec §4.10. A session with no entry here (or one that was never looked up) is
/// implicitly in state [`TransactionState::None`].
#[derive(Default)]
pub struct TransactionManager {
    entries: Mutex<HashMap<Lsid, TransactionEntry>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, session: SessionHandle) -> TransactionState {
        self.entries
            .lock()
            .unwrap()
            .get(&session.lsid())
            .map(|e| e.state)
            .unwrap_or(TransactionState::None)
    }

    /// The server this session's in-progress transaction is pinned to, if any, per spec §5 "total
    /// order across all commands, pinned to one connection".
    pub fn pinned_server(&self, session: SessionHandle) -> Option<ServerAddress> {
        self.entries.lock().unwrap().get(&session.lsid())?.pinned.clone()
    }

    /// `None -> Starting`, incrementing the session's `txnNumber` by way of the caller (who owns
    /// [`crate::session::SessionManager::advance_txn_number`]), per spec §4.10.
    ///
    /// From `InProgress`, this is a no-op unless `fail_if_already_started` asks for it to be an
    /// error; any other non-`None` state (`Committed`/`Aborted`) always restarts a fresh
    /// transaction, mirroring "the same session may start another transaction" in spec §3.
    pub fn start_transaction(
        &self,
        session: SessionHandle,
        options: StartTransactionOptions,
    ) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(session.lsid()).or_default();
        match entry.state {
            TransactionState::InProgress if options.fail_if_already_started => {
                return Err(ErrorKind::TransactionState {
                    message: "a transaction is already in progress on this session".into(),
                }
                .into());
            }
            TransactionState::InProgress => {}
            _ => {
                entry.state = TransactionState::Starting;
                entry.pinned = None;
            }
        }
        Ok(())
    }

    /// Transitions `Starting -> InProgress`, pinning the transaction to `server`: the server that
    /// accepted the first in-transaction command, per spec §4.10/§5. Called once, right after
    /// that first command succeeds; a no-op if the transaction is already `InProgress` (a
    /// retried first command must not re-pin).
    pub fn mark_in_progress(&self, session: SessionHandle, server: ServerAddress) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(session.lsid()).or_default();
        if entry.state == TransactionState::Starting {
            entry.state = TransactionState::InProgress;
            entry.pinned = Some(server);
        }
    }

    /// `InProgress -> Committed`, per spec §4.10. A no-op (by default) from `None`/`Committed`/
    /// `Aborted` unless `fail_if_not_started` asks for an error instead — committing an
    /// already-committed transaction again is how a caller retries a commit whose acknowledgement
    /// was lost.
    pub fn commit_transaction(
        &self,
        session: SessionHandle,
        options: EndTransactionOptions,
    ) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(session.lsid()).or_default();
        match entry.state {
            TransactionState::InProgress => {
                entry.state = TransactionState::Committed;
                Ok(())
            }
            TransactionState::Committed if !options.fail_if_not_started => Ok(()),
            _ if options.fail_if_not_started => Err(ErrorKind::TransactionState {
                message: "no transaction is in progress on this session".into(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// `InProgress -> Aborted`, per spec §4.10. Same no-op semantics as
    /// [`commit_transaction`](Self::commit_transaction); the server-side `NoSuchTransaction`
    /// (code 251) idempotence is handled by [`crate::command::AbortTransaction::handle_error`],
    /// not here — this only tracks the *local* state transition.
    pub fn abort_transaction(
        &self,
        session: SessionHandle,
        options: EndTransactionOptions,
    ) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(session.lsid()).or_default();
        match entry.state {
            TransactionState::InProgress => {
                entry.state = TransactionState::Aborted;
                entry.pinned = None;
                Ok(())
            }
            TransactionState::Aborted if !options.fail_if_not_started => Ok(()),
            _ if options.fail_if_not_started => Err(ErrorKind::TransactionState {
                message: "no transaction is in progress on this session".into(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Forces any non-terminal transaction to `Aborted` without server contact, per spec §4.10's
    /// `killSession` transition. Always succeeds, mirroring
    /// [`crate::session::SessionManager::kill_session`].
    pub fn force_abort(&self, session: SessionHandle) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&session.lsid()) {
            if !matches!(entry.state, TransactionState::Committed) {
                entry.state = TransactionState::Aborted;
            }
            entry.pinned = None;
        }
    }

    /// Drops all bookkeeping for a session, called when the session itself ends.
    pub fn forget(&self, session: SessionHandle) {
        self.entries.lock().unwrap().remove(&session.lsid());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::session::{SessionManager, StartSessionOptions};

    fn new_session() -> (SessionManager, SessionHandle) {
        let manager = SessionManager::new();
        let handle = manager.start_session(StartSessionOptions::default()).unwrap();
        (manager, handle)
    }

    #[test]
    fn starts_in_none_and_transitions_through_starting_to_in_progress() {
        let (_s, handle) = new_session();
        let txns = TransactionManager::new();
        assert_eq!(txns.state(handle), TransactionState::None);

        txns.start_transaction(handle, StartTransactionOptions::default()).unwrap();
        assert_eq!(txns.state(handle), TransactionState::Starting);

        txns.mark_in_progress(handle, ServerAddress::new("a", 27017));
        assert_eq!(txns.state(handle), TransactionState::InProgress);
        assert_eq!(txns.pinned_server(handle), Some(ServerAddress::new("a", 27017)));
    }

    #[test]
    fn fail_if_already_started_rejects_restart_while_in_progress() {
        let (_s, handle) = new_session();
        let txns = TransactionManager::new();
        txns.start_transaction(handle, StartTransactionOptions::default()).unwrap();
        txns.mark_in_progress(handle, ServerAddress::new("a", 27017));

        let err = txns
            .start_transaction(handle, StartTransactionOptions { fail_if_already_started: true })
            .unwrap_err();
        assert!(matches!(*err.kind, ErrorKind::TransactionState { .. }));
    }

    #[test]
    fn commit_then_commit_again_is_a_no_op() {
        let (_s, handle) = new_session();
        let txns = TransactionManager::new();
        txns.start_transaction(handle, StartTransactionOptions::default()).unwrap();
        txns.mark_in_progress(handle, ServerAddress::new("a", 27017));
        txns.commit_transaction(handle, EndTransactionOptions::default()).unwrap();
        assert_eq!(txns.state(handle), TransactionState::Committed);
        assert!(txns.commit_transaction(handle, EndTransactionOptions::default()).is_ok());
    }

    #[test]
    fn abort_idempotent_by_default_but_fails_with_fail_if_not_started() {
        let (_s, handle) = new_session();
        let txns = TransactionManager::new();
        txns.start_transaction(handle, StartTransactionOptions::default()).unwrap();
        txns.mark_in_progress(handle, ServerAddress::new("a", 27017));
        txns.abort_transaction(handle, EndTransactionOptions::default()).unwrap();
        assert_eq!(txns.state(handle), TransactionState::Aborted);

        // No-op by default.
        assert!(txns.abort_transaction(handle, EndTransactionOptions::default()).is_ok());
        // Errors when the caller insists the transaction must still be active.
        let err = txns
            .abort_transaction(handle, EndTransactionOptions { fail_if_not_started: true })
            .unwrap_err();
        assert!(matches!(*err.kind, ErrorKind::TransactionState { .. }));
    }

    #[test]
    fn force_abort_makes_subsequent_commit_with_fail_if_not_started_fail() {
        let (_s, handle) = new_session();
        let txns = TransactionManager::new();
        txns.start_transaction(handle, StartTransactionOptions::default()).unwrap();
        txns.mark_in_progress(handle, ServerAddress::new("a", 27017));
        txns.force_abort(handle);
        assert_eq!(txns.state(handle), TransactionState::Aborted);
        let err = txns
            .commit_transaction(handle, EndTransactionOptions { fail_if_not_started: true })
            .unwrap_err();
        assert!(matches!(*err.kind, ErrorKind::TransactionState { .. }));
    }

    #[test]
    fn starting_a_new_transaction_after_commit_resets_to_starting() {
        let (_s, handle) = new_session();
        let txns = TransactionManager::new();
        txns.start_transaction(handle, StartTransactionOptions::default()).unwrap();
        txns.mark_in_progress(handle, ServerAddress::new("a", 27017));
        txns.commit_transaction(handle, EndTransactionOptions::default()).unwrap();

        txns.start_transaction(handle, StartTransactionOptions::default()).unwrap();
        assert_eq!(txns.state(handle), TransactionState::Starting);
        assert_eq!(txns.pinned_server(handle), None);
    }
}
