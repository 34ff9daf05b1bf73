//! The collection handle: the `find`/`insert`/`update`/`delete`/`aggregate` surface spec §6 names
//! on `CollectionHandle`, built entirely on top of the command algebra (C4) and the aggregation
//! pipeline builder (C5). Grounded on the teacher driver's `Collection` for the cursor-fetching
//! shape, adapted from its synchronous blocking calls to this core's async executor.

use std::collections::VecDeque;

use bson::{oid::ObjectId, Bson, Document};

use crate::{
    aggregate::Pipeline,
    client::Client,
    command::{
        Aggregate, AggregateOptions, Count, CountOptions, CursorSpec, Delete, DeleteStatement,
        DropCollection, DropCollectionOptions, Find, FindOptions, GetMore, Insert, KillCursors,
        Update, UpdateStatement,
    },
    concern::{ReadConcern, WriteConcern},
    error::Result,
    failover::FailoverStrategy,
    namespace::Namespace,
    results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult},
    session::SessionHandle,
};

/// Ensures `document` carries an `_id`, generating a fresh [`ObjectId`] client-side when it
/// doesn't, mirroring how a real driver assigns ids before a document ever reaches the wire (so
/// the assigned id is knowable even if the server's acknowledgement is lost and the write must be
/// retried under the same id).
fn ensure_id(document: &mut Document) -> Bson {
    if let Some(id) = document.get("_id") {
        return id.clone();
    }
    let id = Bson::ObjectId(ObjectId::new());
    document.insert("_id", id.clone());
    id
}

/// A handle to a single collection, per spec §6's `CollectionHandle`. Cheaply `Clone`-able, like
/// [`crate::database::DatabaseHandle`].
#[derive(Clone)]
pub struct CollectionHandle {
    client: Client,
    db: String,
    coll: String,
    failover: FailoverStrategy,
    session: Option<SessionHandle>,
}

impl CollectionHandle {
    pub(crate) fn new(
        client: Client,
        db: String,
        coll: String,
        failover: FailoverStrategy,
        session: Option<SessionHandle>,
    ) -> Self {
        Self { client, db, coll, failover, session }
    }

    fn ns(&self) -> Namespace {
        Namespace::new(self.db.clone(), self.coll.clone())
    }

    pub fn name(&self) -> &str {
        &self.coll
    }

    /// Queries the collection, per spec §4.5, returning a [`Cursor`] streaming the result.
    pub async fn find(
        &self,
        filter: Document,
        options: Option<FindOptions>,
        read_concern: Option<ReadConcern>,
    ) -> Result<Cursor> {
        let batch_size = options.as_ref().and_then(|o| o.batch_size);
        let op = Find::new(self.ns(), filter, options, read_concern);
        let spec = self.client.execute(&op, self.session, &self.failover).await?;
        Ok(Cursor::new(self.client.clone(), self.session, self.failover, spec, batch_size))
    }

    /// Inserts a single document, per spec §4.3, assigning it an `_id` first if it doesn't
    /// already have one.
    pub async fn insert_one(
        &self,
        mut document: Document,
        write_concern: Option<WriteConcern>,
    ) -> Result<InsertOneResult> {
        let inserted_id = ensure_id(&mut document);
        let op = Insert::new(self.ns(), vec![document], write_concern);
        self.client.execute(&op, self.session, &self.failover).await?;
        Ok(InsertOneResult { inserted_id })
    }

    /// Inserts a batch of documents, per spec §4.3.
    pub async fn insert_many(
        &self,
        mut documents: Vec<Document>,
        write_concern: Option<WriteConcern>,
    ) -> Result<InsertManyResult> {
        let inserted_ids = documents.iter_mut().map(ensure_id).collect();
        let op = Insert::new(self.ns(), documents, write_concern);
        self.client.execute(&op, self.session, &self.failover).await?;
        Ok(InsertManyResult { inserted_ids })
    }

    async fn update(
        &self,
        query: Document,
        update: Document,
        multi: bool,
        upsert: bool,
        write_concern: Option<WriteConcern>,
    ) -> Result<UpdateResult> {
        let statement = UpdateStatement { query, update, multi, upsert };
        let op = Update::new(self.ns(), vec![statement], write_concern);
        self.client.execute(&op, self.session, &self.failover).await
    }

    /// Updates at most one document matching `query`, per spec §4.3.
    pub async fn update_one(
        &self,
        query: Document,
        update: Document,
        upsert: bool,
        write_concern: Option<WriteConcern>,
    ) -> Result<UpdateResult> {
        self.update(query, update, false, upsert, write_concern).await
    }

    /// Updates every document matching `query`, per spec §4.3. Never retried by the failover
    /// engine, since a multi-document update is not idempotent.
    pub async fn update_many(
        &self,
        query: Document,
        update: Document,
        upsert: bool,
        write_concern: Option<WriteConcern>,
    ) -> Result<UpdateResult> {
        self.update(query, update, true, upsert, write_concern).await
    }

    async fn delete(&self, query: Document, limit: u32, write_concern: Option<WriteConcern>) -> Result<DeleteResult> {
        let statement = DeleteStatement { query, limit };
        let op = Delete::new(self.ns(), vec![statement], write_concern);
        let deleted_count = self.client.execute(&op, self.session, &self.failover).await?;
        Ok(DeleteResult { deleted_count })
    }

    /// Deletes at most one document matching `query`, per spec §4.3.
    pub async fn delete_one(&self, query: Document, write_concern: Option<WriteConcern>) -> Result<DeleteResult> {
        self.delete(query, 1, write_concern).await
    }

    /// Deletes every document matching `query`, per spec §4.3. Never retried, for the same
    /// non-idempotence reason as [`Self::update_many`].
    pub async fn delete_many(&self, query: Document, write_concern: Option<WriteConcern>) -> Result<DeleteResult> {
        self.delete(query, 0, write_concern).await
    }

    /// Runs an aggregation pipeline (C5) against the collection, per spec §4.6, returning a
    /// [`Cursor`] streaming the result.
    pub async fn aggregate(
        &self,
        pipeline: Pipeline,
        batch_size: Option<i64>,
        options: Option<AggregateOptions>,
        read_concern: Option<ReadConcern>,
    ) -> Result<Cursor> {
        let op = Aggregate::new(self.ns(), pipeline, batch_size, options, read_concern);
        let spec = self.client.execute(&op, self.session, &self.failover).await?;
        let spec = CursorSpec { id: spec.id, ns: spec.ns, first_batch: spec.first_batch };
        Ok(Cursor::new(self.client.clone(), self.session, self.failover, spec, batch_size))
    }

    /// Drops this collection, per spec §4.3/§4.4. `ns not found` is already swallowed inside
    /// [`crate::command::DropCollection::handle_error`].
    pub async fn drop(&self, write_concern: Option<WriteConcern>) -> Result<()> {
        let options = DropCollectionOptions { write_concern };
        let op = DropCollection::new(self.ns(), Some(options));
        self.client.execute(&op, self.session, &self.failover).await
    }

    /// Counts the documents matching `filter`, per spec §4.3.
    pub async fn count(
        &self,
        filter: Document,
        options: Option<CountOptions>,
        read_concern: Option<ReadConcern>,
    ) -> Result<u64> {
        let op = Count::new(self.ns(), filter, options, read_concern);
        self.client.execute(&op, self.session, &self.failover).await
    }
}

/// Streams the results of a `find`/`aggregate` command, fetching further batches via `getMore` as
/// the buffered batch is exhausted, per spec §4.5. Grounded on the teacher driver's `Cursor`,
/// adapted from its blocking `Iterator` shape to an async `next()`.
pub struct Cursor {
    client: Client,
    session: Option<SessionHandle>,
    failover: FailoverStrategy,
    ns: Namespace,
    cursor_id: i64,
    batch_size: Option<i64>,
    buffer: VecDeque<Document>,
}

impl Cursor {
    fn new(
        client: Client,
        session: Option<SessionHandle>,
        failover: FailoverStrategy,
        spec: CursorSpec,
        batch_size: Option<i64>,
    ) -> Self {
        Self {
            client,
            session,
            failover,
            ns: spec.ns,
            cursor_id: spec.id,
            batch_size,
            buffer: spec.first_batch,
        }
    }

    async fn fetch_next_batch(&mut self) -> Result<()> {
        let op = GetMore::new(self.ns.clone(), self.cursor_id, self.batch_size);
        let next = self.client.execute(&op, self.session, &self.failover).await?;
        self.cursor_id = next.cursor_id;
        self.buffer.extend(next.batch);
        Ok(())
    }

    /// Returns the next document, fetching another batch from the server if the buffered one is
    /// exhausted and the server hasn't closed the cursor (`cursor_id != 0`), per spec §4.5.
    pub async fn next(&mut self) -> Option<Result<Document>> {
        if let Some(doc) = self.buffer.pop_front() {
            return Some(Ok(doc));
        }
        if self.cursor_id == 0 {
            return None;
        }
        if let Err(err) = self.fetch_next_batch().await {
            return Some(Err(err));
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl Drop for Cursor {
    /// Cancelling the stream must issue `killCursors` when the cursor id is nonzero, per spec §9's
    /// design note. `Drop::drop` cannot be `async`, so the cleanup command is dispatched on a
    /// detached task instead; this is best-effort; the operation's `handle_error` already swallows
    /// any failure, and nothing observes this task's outcome.
    fn drop(&mut self) {
        if self.cursor_id == 0 {
            return;
        }
        let client = self.client.clone();
        let session = self.session;
        let ns = self.ns.clone();
        let cursor_id = self.cursor_id;
        tokio::spawn(async move {
            let op = KillCursors::new(ns, vec![cursor_id]);
            let _ = client.execute(&op, session, &FailoverStrategy::none()).await;
        });
    }
}
