use bson::{doc, Document};

use crate::{
    command::{deserialize_body, Operation, Retryability, WriteResponseBody},
    concern::WriteConcern,
    error::Result,
    namespace::Namespace,
    wire::version::WireVersion,
};

/// A single delete statement within a `delete` command's `deletes` array.
#[derive(Clone, Debug)]
pub struct DeleteStatement {
    pub query: Document,
    /// 0 to delete every matching document, 1 to delete at most one.
    pub limit: u32,
}

/// Deletes documents matching a filter, per spec §4.3. Retryable only when every statement has
/// `limit: 1`, for the same idempotence reason as a multi-document update.
#[derive(Debug)]
pub struct Delete {
    ns: Namespace,
    deletes: Vec<DeleteStatement>,
    write_concern: Option<WriteConcern>,
}

impl Delete {
    pub fn new(ns: Namespace, deletes: Vec<DeleteStatement>, write_concern: Option<WriteConcern>) -> Self {
        Self { ns, deletes, write_concern }
    }

    fn is_retryable(&self) -> bool {
        self.deletes.iter().all(|d| d.limit == 1)
    }
}

impl Operation for Delete {
    type Output = u64;

    const NAME: &'static str = "delete";

    fn build(&self, _wire_version: WireVersion) -> Result<Document> {
        let deletes: Vec<Document> = self
            .deletes
            .iter()
            .map(|d| doc! { "q": d.query.clone(), "limit": d.limit })
            .collect();
        Ok(doc! {
            Self::NAME: self.ns.coll.clone(),
            "$db": self.ns.db.clone(),
            "deletes": deletes,
        })
    }

    fn handle_response(&self, response: Document) -> Result<Self::Output> {
        let body: WriteResponseBody = deserialize_body(response)?;
        Ok(body.validate()?.n)
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }

    fn retryability(&self) -> Retryability {
        if self.is_retryable() {
            Retryability::Write
        } else {
            Retryability::None
        }
    }
}
