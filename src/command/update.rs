use bson::{doc, Document};

use crate::{
    command::{deserialize_body, Operation, Retryability, WriteResponseBody},
    concern::WriteConcern,
    error::Result,
    namespace::Namespace,
    results::UpdateResult,
    wire::version::WireVersion,
};

/// A single update statement within an `update` command's `updates` array.
#[derive(Clone, Debug)]
pub struct UpdateStatement {
    pub query: Document,
    pub update: Document,
    pub multi: bool,
    pub upsert: bool,
}

/// Updates documents matching a filter, per spec §4.3. Retryable only when every statement
/// targets at most one document (`multi: false`), since a multi-document update is not
/// idempotent under retry.
#[derive(Debug)]
pub struct Update {
    ns: Namespace,
    updates: Vec<UpdateStatement>,
    write_concern: Option<WriteConcern>,
}

impl Update {
    pub fn new(ns: Namespace, updates: Vec<UpdateStatement>, write_concern: Option<WriteConcern>) -> Self {
        Self { ns, updates, write_concern }
    }

    fn is_retryable(&self) -> bool {
        self.updates.iter().all(|u| !u.multi)
    }
}

impl Operation for Update {
    type Output = UpdateResult;

    const NAME: &'static str = "update";

    fn build(&self, _wire_version: WireVersion) -> Result<Document> {
        let updates: Vec<Document> = self
            .updates
            .iter()
            .map(|u| {
                doc! {
                    "q": u.query.clone(),
                    "u": u.update.clone(),
                    "multi": u.multi,
                    "upsert": u.upsert,
                }
            })
            .collect();
        Ok(doc! {
            Self::NAME: self.ns.coll.clone(),
            "$db": self.ns.db.clone(),
            "updates": updates,
        })
    }

    fn handle_response(&self, response: Document) -> Result<Self::Output> {
        let body: WriteResponseBody = deserialize_body(response)?;
        let body = body.validate()?;
        Ok(UpdateResult {
            matched_count: body.n,
            modified_count: body.n_modified,
            upserted_id: body.upserted.into_iter().next().map(|u| u.id),
        })
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
