//! The database handle (C8): a cheap, immutable value object combining a [`Client`], a database
//! name, a failover strategy, and an optional session, per spec §3's data model. Mutating
//! operations like `startSession` return a *new* handle with the field populated rather than
//! mutating `self` in place, per spec §3: "mutation produces a new handle."

use crate::{
    client::Client,
    collection::CollectionHandle,
    command::{
        AbortTransaction, CommitTransaction, Create, CreateCollectionOptions, DropDatabase,
        ListCollections, RenameCollection,
    },
    concern::WriteConcern,
    error::{ErrorKind, Result},
    failover::FailoverStrategy,
    namespace::Namespace,
    session::{EndSessionOptions, SessionHandle, StartSessionOptions},
    transaction::{EndTransactionOptions, StartTransactionOptions},
};

/// A handle to a single database on a connected cluster, per spec §6's `DatabaseHandle`. Cheaply
/// `Clone`-able: every field is either an `Arc`-backed handle or a small `Copy` value.
#[derive(Clone)]
pub struct DatabaseHandle {
    client: Client,
    name: String,
    failover: FailoverStrategy,
    session: Option<SessionHandle>,
}

impl DatabaseHandle {
    pub(crate) fn new(client: Client, name: String, failover: FailoverStrategy) -> Self {
        Self { client, name, failover, session: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> Option<SessionHandle> {
        self.session
    }

    fn require_session(&self) -> Result<SessionHandle> {
        self.session.ok_or_else(|| {
            ErrorKind::SessionState {
                message: "this database handle has no active session".into(),
            }
            .into()
        })
    }

    /// Obtains a handle to a collection in this database, per spec §6.
    pub fn collection(&self, name: impl Into<String>) -> CollectionHandle {
        CollectionHandle::new(self.client.clone(), self.name.clone(), name.into(), self.failover, self.session)
    }

    /// Creates a collection explicitly, per spec §4.8. When `fails_if_exists` is false, the
    /// server's `NamespaceExists` (code 48) is swallowed and treated as success, since the caller
    /// asked only that the collection end up existing.
    pub async fn create(
        &self,
        name: impl Into<String>,
        options: Option<CreateCollectionOptions>,
        fails_if_exists: bool,
    ) -> Result<()> {
        let ns = Namespace::new(self.name.clone(), name.into());
        let op = Create::new(ns, options);
        match self.client.execute(&op, self.session, &self.failover).await {
            Ok(()) => Ok(()),
            Err(err) if !fails_if_exists && err.is_namespace_exists() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Drops the entire database, per spec §4.8. `NamespaceNotFound` is already swallowed inside
    /// [`DropDatabase::handle_error`].
    pub async fn drop(&self, write_concern: Option<WriteConcern>) -> Result<()> {
        let op = DropDatabase::new(self.name.clone(), write_concern);
        self.client.execute(&op, self.session, &self.failover).await
    }

    /// Lists the names of every collection in this database, per spec §4.8.
    pub async fn collection_names(&self) -> Result<Vec<String>> {
        let op = ListCollections::new(self.name.clone());
        self.client.execute(&op, self.session, &self.failover).await
    }

    /// Renames a collection, per spec §4.8. Only valid when this handle is the `admin` database,
    /// matching the `renameCollection` command's requirement that it always be issued against
    /// `admin` regardless of where `from`/`to` actually live.
    pub async fn rename_collection(
        &self,
        db: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        drop_target: bool,
        write_concern: Option<WriteConcern>,
    ) -> Result<()> {
        if self.name != "admin" {
            return Err(ErrorKind::InvalidArgument {
                message: "renameCollection may only be called on the admin database handle".into(),
            }
            .into());
        }
        let db = db.into();
        let op = RenameCollection::new(
            Namespace::new(db.clone(), from.into()),
            Namespace::new(db, to.into()),
            drop_target,
            write_concern,
        );
        self.client.execute(&op, self.session, &self.failover).await
    }

    /// Starts a new session, per spec §4.9, returning a new handle with it populated.
    ///
    /// Scoped to *this handle*, not the client: if this handle already has a session,
    /// `fail_if_already_started` decides whether that's an error or a no-op returning the
    /// existing handle unchanged — a session active on some unrelated handle sharing the same
    /// `Client` is irrelevant either way.
    pub fn start_session(&self, options: StartSessionOptions) -> Result<DatabaseHandle> {
        if self.session.is_some() {
            return if options.fail_if_already_started {
                Err(ErrorKind::SessionState {
                    message: "this database handle already has an active session".into(),
                }
                .into())
            } else {
                Ok(self.clone())
            };
        }
        let session = self.client.session_manager().start_session(StartSessionOptions::default())?;
        Ok(DatabaseHandle { session: Some(session), ..self.clone() })
    }

    /// Ends this handle's session, per spec §4.9, returning a new handle with no session.
    pub fn end_session(&self, options: EndSessionOptions) -> Result<DatabaseHandle> {
        match self.session {
            Some(session) => {
                self.client.session_manager().end_session(session, options)?;
                self.client.transaction_manager().forget(session);
            }
            None if options.fail_if_not_started => {
                return Err(ErrorKind::SessionState {
                    message: "this database handle has no active session".into(),
                }
                .into());
            }
            None => {}
        }
        Ok(DatabaseHandle { session: None, ..self.clone() })
    }

    /// Forcibly kills this handle's session (the client-side analogue of the server's
    /// `killSessions`), per spec §4.9/§4.10: any in-progress transaction is force-aborted first,
    /// so a `commitTransaction` issued against the killed session's handle fails rather than
    /// silently committing. Always succeeds; returns a new handle with no session.
    pub fn kill_session(&self) -> DatabaseHandle {
        if let Some(session) = self.session {
            self.client.transaction_manager().force_abort(session);
            self.client.session_manager().kill_session(session);
        }
        DatabaseHandle { session: None, ..self.clone() }
    }

    /// Starts a transaction on this handle's session, per spec §4.10. Requires an active session.
    pub fn start_transaction(&self, options: StartTransactionOptions) -> Result<()> {
        let session = self.require_session()?;
        self.client.transaction_manager().start_transaction(session, options)?;
        self.client.session_manager().advance_txn_number(session)?;
        Ok(())
    }

    /// Commits this handle's in-progress transaction, per spec §4.10. Commands issued while
    /// `InProgress` are pinned to the server that accepted the first one; the commit itself goes
    /// there too via [`crate::client::Client::execute`]'s transaction-pin selection logic.
    ///
    /// With `options.fail_if_not_started`, committing a session whose transaction is `None`,
    /// already `Committed`, or force-`Aborted` (e.g. by [`Self::kill_session`]) fails with
    /// [`crate::error::ErrorKind::TransactionState`] instead of silently no-opping, per spec §8
    /// scenario 7.
    pub async fn commit_transaction(&self, options: EndTransactionOptions) -> Result<()> {
        let session = self.require_session()?;
        // Validate the local state transition before making a server round-trip, so a
        // `fail_if_not_started` caller never sends a commit for a transaction it never started.
        self.client.transaction_manager().commit_transaction(session, options)?;
        let txn_number = self.client.session_manager().txn_number(session).unwrap_or(0);
        let op = CommitTransaction::new(txn_number, None, None);
        self.client.execute(&op, Some(session), &self.failover).await
    }

    /// Aborts this handle's in-progress transaction, per spec §4.10. Idempotent: aborting a
    /// transaction the server has already forgotten (`NoSuchTransaction`, code 251) is swallowed
    /// by [`crate::command::AbortTransaction::handle_error`].
    ///
    /// With `options.fail_if_not_started`, aborting a session whose transaction is `None`,
    /// already `Aborted`, or force-aborted fails with
    /// [`crate::error::ErrorKind::TransactionState`], per spec §8 scenarios 6 and 7.
    pub async fn abort_transaction(&self, options: EndTransactionOptions) -> Result<()> {
        let session = self.require_session()?;
        let already_aborted =
            self.client.transaction_manager().state(session) == crate::transaction::TransactionState::Aborted;
        self.client.transaction_manager().abort_transaction(session, options)?;
        if already_aborted {
            return Ok(());
        }
        let txn_number = self.client.session_manager().txn_number(session).unwrap_or(0);
        let op = AbortTransaction::new(txn_number, None);
        self.client.execute(&op, Some(session), &self.failover).await
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use bson::{doc, Bson, Document};
    use uuid::Uuid;

    use super::*;
    use crate::{
        cmap::{test_address, AsyncStream, Connection},
        transaction::TransactionState,
        wire::{
            op_msg::{read_message, write_command},
            version::WireVersion,
        },
    };

    fn handle() -> DatabaseHandle {
        DatabaseHandle::new(Client::test_client(), "db".into(), FailoverStrategy::none())
    }

    async fn seeded_client(wire_version: WireVersion) -> (Client, tokio::io::DuplexStream) {
        let (client_side, server_side) = tokio::io::duplex(65536);
        let address = test_address();
        let conn = Connection::new(1, address.clone(), 0, AsyncStream::Duplex(client_side));
        let client = Client::test_client();
        client.test_seed_connection(address, wire_version, conn).await;
        (client, server_side)
    }

    fn lsid_of(request: &Document) -> Option<Uuid> {
        let lsid = request.get_document("lsid").ok()?;
        match lsid.get("id") {
            Some(Bson::Binary(binary)) => Uuid::from_slice(&binary.bytes).ok(),
            _ => None,
        }
    }

    /// A minimal in-memory server for spec §8 scenarios 5/6: tracks one collection's committed
    /// documents plus, per `lsid`, the writes staged by an open transaction, so `count` reflects
    /// what the issuing session should see — its own staged writes plus whatever is committed —
    /// while a session-less `count` sees only what's committed. Replies to exactly `rounds`
    /// commands and then returns; the caller's command sequence must match `rounds` exactly.
    async fn serve_transactional(server: &mut tokio::io::DuplexStream, rounds: usize) {
        let mut committed: Vec<Document> = Vec::new();
        let mut staged: HashMap<Uuid, Vec<Document>> = HashMap::new();

        for _ in 0..rounds {
            let incoming = read_message(server).await.unwrap();
            let request: Document = bson::from_slice(&incoming.document_bytes).unwrap();
            let lsid = lsid_of(&request);

            let reply = if request.contains_key("insert") {
                let documents: Vec<Document> = request
                    .get_array("documents")
                    .unwrap()
                    .iter()
                    .map(|b| b.as_document().unwrap().clone())
                    .collect();
                let n = documents.len();
                match lsid {
                    Some(id) => staged.entry(id).or_default().extend(documents),
                    None => committed.extend(documents),
                }
                doc! { "ok": 1.0, "n": n as i64 }
            } else if request.contains_key("count") {
                let staged_count = lsid.and_then(|id| staged.get(&id)).map_or(0, Vec::len);
                doc! { "ok": 1.0, "n": (committed.len() + staged_count) as i64 }
            } else if request.contains_key("commitTransaction") {
                if let Some(docs) = lsid.and_then(|id| staged.remove(&id)) {
                    committed.extend(docs);
                }
                doc! { "ok": 1.0 }
            } else if request.contains_key("abortTransaction") {
                if let Some(id) = lsid {
                    staged.remove(&id);
                }
                doc! { "ok": 1.0 }
            } else {
                panic!("fake server received an unexpected command: {request:?}");
            };

            let mut body = Vec::new();
            reply.to_writer(&mut body).unwrap();
            write_command(server, incoming.header.request_id, false, &body, crate::wire::compression::Compressor::Noop)
                .await
                .unwrap();
        }
    }

    /// A minimal in-memory catalog server for spec §8 scenarios 2/3: tracks which collection
    /// names exist and rejects a `renameCollection` whose target already does, with `code: 48`,
    /// the same as a real server's `NamespaceExists`.
    async fn serve_catalog(server: &mut tokio::io::DuplexStream, rounds: usize) {
        let mut collections: Vec<String> = Vec::new();

        for _ in 0..rounds {
            let incoming = read_message(server).await.unwrap();
            let request: Document = bson::from_slice(&incoming.document_bytes).unwrap();

            let reply = if let Ok(name) = request.get_str("create") {
                collections.push(name.to_string());
                doc! { "ok": 1.0 }
            } else if let Ok(from) = request.get_str("renameCollection") {
                let to = request.get_str("to").unwrap();
                let from_coll = from.rsplit('.').next().unwrap().to_string();
                let to_coll = to.rsplit('.').next().unwrap().to_string();
                if collections.contains(&to_coll) {
                    doc! {
                        "ok": 0.0,
                        "code": 48i32,
                        "codeName": "NamespaceExists",
                        "errmsg": "target namespace exists",
                    }
                } else {
                    collections.retain(|c| c != &from_coll);
                    collections.push(to_coll);
                    doc! { "ok": 1.0 }
                }
            } else if request.contains_key("listCollections") {
                let first_batch: Vec<Document> =
                    collections.iter().map(|name| doc! { "name": name.clone() }).collect();
                doc! { "ok": 1.0, "cursor": { "id": 0i64, "firstBatch": first_batch } }
            } else {
                panic!("fake catalog server received an unexpected command: {request:?}");
            };

            let mut body = Vec::new();
            reply.to_writer(&mut body).unwrap();
            write_command(server, incoming.header.request_id, false, &body, crate::wire::compression::Compressor::Noop)
                .await
                .unwrap();
        }
    }

    // Spec §8 scenario 2: after a successful rename, `collectionNames()` reflects the new name
    // and not the old one.
    #[tokio::test]
    async fn scenario_rename_success_updates_collection_names() {
        let (client, mut server) = seeded_client(WireVersion::V7_0).await;
        let server_task = tokio::spawn(async move {
            serve_catalog(&mut server, 3).await;
            server
        });

        let db = client.database("db", FailoverStrategy::none());
        db.create("A", None, true).await.unwrap();

        let admin = client.database("admin", FailoverStrategy::none());
        admin.rename_collection("db", "A", "B", false, None).await.unwrap();

        let names = db.collection_names().await.unwrap();
        assert!(names.contains(&"B".to_string()));
        assert!(!names.contains(&"A".to_string()));

        server_task.await.unwrap();
    }

    // Spec §8 scenario 3: renaming onto an existing target name fails with `code: 48`.
    #[tokio::test]
    async fn scenario_rename_collision_fails_with_namespace_exists() {
        let (client, mut server) = seeded_client(WireVersion::V7_0).await;
        let server_task = tokio::spawn(async move {
            serve_catalog(&mut server, 3).await;
            server
        });

        let db = client.database("db", FailoverStrategy::none());
        db.create("A", None, true).await.unwrap();
        db.create("B", None, true).await.unwrap();

        let admin = client.database("admin", FailoverStrategy::none());
        let err = admin.rename_collection("db", "A", "B", false, None).await.unwrap_err();
        assert_eq!(err.code(), Some(48));

        server_task.await.unwrap();
    }

    // Spec §8 scenario 5: a session's own query sees its uncommitted insert, a session-less query
    // doesn't, and the session-less query sees it too once the transaction commits.
    #[tokio::test]
    async fn scenario_transaction_isolation_then_commit_makes_writes_visible_everywhere() {
        let (client, mut server) = seeded_client(WireVersion::V7_0).await;
        let server_task = tokio::spawn(async move {
            serve_transactional(&mut server, 5).await;
            server
        });

        let in_session =
            client.database("db", FailoverStrategy::none()).start_session(StartSessionOptions::default()).unwrap();
        in_session.start_transaction(StartTransactionOptions::default()).unwrap();
        let session_coll = in_session.collection("C");
        session_coll.insert_one(doc! { "_id": 1i32 }, None).await.unwrap();

        assert_eq!(session_coll.count(doc! {}, None, None).await.unwrap(), 1);

        let session_less_coll = client.database("db", FailoverStrategy::none()).collection("C");
        assert_eq!(session_less_coll.count(doc! {}, None, None).await.unwrap(), 0);

        in_session.commit_transaction(EndTransactionOptions::default()).await.unwrap();

        assert_eq!(session_less_coll.count(doc! {}, None, None).await.unwrap(), 1);

        server_task.await.unwrap();
    }

    // Spec §8 scenario 6, the network-dependent half: staged writes from an aborted transaction
    // never reach the collection, so a session-less count reads back 0.
    #[tokio::test]
    async fn scenario_abort_discards_staged_writes_so_post_abort_count_is_zero() {
        let (client, mut server) = seeded_client(WireVersion::V7_0).await;
        let server_task = tokio::spawn(async move {
            serve_transactional(&mut server, 3).await;
            server
        });

        let in_session =
            client.database("db", FailoverStrategy::none()).start_session(StartSessionOptions::default()).unwrap();
        in_session.start_transaction(StartTransactionOptions::default()).unwrap();
        in_session
            .collection("C")
            .insert_many(vec![doc! { "_id": 1i32 }, doc! { "_id": 2i32 }, doc! { "_id": 3i32 }], None)
            .await
            .unwrap();

        in_session.abort_transaction(EndTransactionOptions::default()).await.unwrap();

        let session_less_count =
            client.database("db", FailoverStrategy::none()).collection("C").count(doc! {}, None, None).await.unwrap();
        assert_eq!(session_less_count, 0);

        server_task.await.unwrap();
    }

    // Spec §8 scenario 4 (session no-ops).
    #[test]
    fn start_session_then_no_flag_restart_is_a_no_op_returning_the_same_handle() {
        let h0 = handle();
        let h1 = h0.start_session(StartSessionOptions::default()).unwrap();
        assert!(h1.session().is_some());

        let h2 = h1.start_session(StartSessionOptions { fail_if_already_started: false }).unwrap();
        assert_eq!(h2.session(), h1.session());
    }

    #[test]
    fn start_session_with_flag_fails_when_this_handle_already_has_one() {
        let h0 = handle();
        let h1 = h0.start_session(StartSessionOptions::default()).unwrap();
        let err = h1.start_session(StartSessionOptions { fail_if_already_started: true }).unwrap_err();
        assert!(matches!(*err.kind, ErrorKind::SessionState { .. }));
    }

    #[test]
    fn start_session_is_scoped_to_this_handle_not_other_handles_on_the_same_client() {
        let client = Client::test_client();
        let failover = FailoverStrategy::none();
        let other = DatabaseHandle::new(client.clone(), "other".into(), failover)
            .start_session(StartSessionOptions::default())
            .unwrap();
        assert!(other.session().is_some());

        // A session active on an unrelated handle sharing the same client must not cause this
        // handle's first `startSession(failIfAlreadyStarted=true)` to fail.
        let fresh = DatabaseHandle::new(client, "db".into(), failover);
        assert!(fresh.start_session(StartSessionOptions { fail_if_already_started: true }).is_ok());
    }

    #[test]
    fn end_session_then_no_flag_end_again_is_a_no_op() {
        let h1 = handle().start_session(StartSessionOptions::default()).unwrap();
        let h2 = h1.end_session(EndSessionOptions::default()).unwrap();
        assert!(h2.session().is_none());
        assert!(h2.end_session(EndSessionOptions { fail_if_not_started: false }).is_ok());
    }

    #[test]
    fn end_session_with_flag_fails_when_no_session_is_active() {
        let h = handle();
        let err = h.end_session(EndSessionOptions { fail_if_not_started: true }).unwrap_err();
        assert!(matches!(*err.kind, ErrorKind::SessionState { .. }));
    }

    #[test]
    fn kill_session_without_a_prior_start_session_succeeds_and_yields_a_session_less_handle() {
        let h = handle();
        let killed = h.kill_session();
        assert!(killed.session().is_none());
    }

    // Spec §8 scenario 7 (kill + commit): the transaction-state guard rejects the commit before
    // any server round-trip is attempted, so this needs no fake server.
    #[tokio::test]
    async fn kill_session_then_commit_with_fail_if_not_started_fails_without_a_network_call() {
        let h = handle().start_session(StartSessionOptions::default()).unwrap();
        h.start_transaction(StartTransactionOptions::default()).unwrap();
        // `kill_session` returns a session-less handle; the killed session's lsid is tracked by
        // `h` itself, so the caller retries `commitTransaction` against `h`, the same handle it
        // started the transaction on, not the (intentionally session-less) value kill_session
        // returns.
        let _killed = h.kill_session();
        assert_eq!(h.client.transaction_manager().state(h.session().unwrap()), TransactionState::Aborted);

        let err = h
            .commit_transaction(EndTransactionOptions { fail_if_not_started: true })
            .await
            .unwrap_err();
        assert!(matches!(*err.kind, ErrorKind::TransactionState { .. }));
    }

    // Spec §8 scenario 6 (abort idempotence), the locally-decidable half: once a transaction is
    // already `Aborted`, a further `abortTransaction(failIfNotStarted=true)` fails before any
    // server round-trip, the same guard fixed for `commitTransaction` above.
    #[tokio::test]
    async fn abort_after_kill_with_fail_if_not_started_fails_without_a_network_call() {
        let h = handle().start_session(StartSessionOptions::default()).unwrap();
        h.start_transaction(StartTransactionOptions::default()).unwrap();
        let _killed = h.kill_session();

        let err = h
            .abort_transaction(EndTransactionOptions { fail_if_not_started: true })
            .await
            .unwrap_err();
        assert!(matches!(*err.kind, ErrorKind::TransactionState { .. }));
    }
}

