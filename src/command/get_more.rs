use std::collections::VecDeque;

use bson::{doc, Document};
use serde::Deserialize;

use crate::{
    command::{deserialize_body, Operation, Retryability},
    namespace::Namespace,
    wire::version::WireVersion,
};

#[derive(Debug, Deserialize)]
struct GetMoreBody {
    cursor: GetMoreCursor,
}

#[derive(Debug, Deserialize)]
struct GetMoreCursor {
    id: i64,
    #[serde(rename = "nextBatch")]
    next_batch: VecDeque<Document>,
}

/// The next batch from an open cursor, returned by `getMore`.
#[derive(Debug)]
pub struct NextBatch {
    pub cursor_id: i64,
    pub batch: VecDeque<Document>,
}

/// Fetches the next batch from an open cursor, per spec §4.5. Read-retryable per spec §4.7 since
/// it has no side effect other than advancing a server-side iterator the client already owns.
#[derive(Debug)]
pub struct GetMore {
    ns: Namespace,
    cursor_id: i64,
    batch_size: Option<i64>,
}

impl GetMore {
    pub fn new(ns: Namespace, cursor_id: i64, batch_size: Option<i64>) -> Self {
        Self { ns, cursor_id, batch_size }
    }
}

impl Operation for GetMore {
    type Output = NextBatch;

    const NAME: &'static str = "getMore";

    fn build(&self, _wire_version: WireVersion) -> crate::error::Result<Document> {
        let mut body = doc! {
            Self::NAME: self.cursor_id,
            "$db": self.ns.db.clone(),
            "collection": self.ns.coll.clone(),
        };
        if let Some(batch_size) = self.batch_size {
            body.insert("batchSize", batch_size);
        }
        Ok(body)
    }

    fn handle_response(&self, response: Document) -> crate::error::Result<Self::Output> {
        let body: GetMoreBody = deserialize_body(response)?;
        Ok(NextBatch { cursor_id: body.cursor.id, batch: body.cursor.next_batch })
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_includes_batch_size_when_set() {
        let op = GetMore::new(Namespace::new("db", "coll"), 42, Some(100));
        let cmd = op.build(WireVersion::V7_0).unwrap();
        assert_eq!(cmd.get_i64(GetMore::NAME).unwrap(), 42);
        assert_eq!(cmd.get_str("collection").unwrap(), "coll");
        assert_eq!(cmd.get_i64("batchSize").unwrap(), 100);
    }

    #[test]
    fn build_omits_batch_size_when_absent() {
        let op = GetMore::new(Namespace::new("db", "coll"), 42, None);
        let cmd = op.build(WireVersion::V7_0).unwrap();
        assert!(!cmd.contains_key("batchSize"));
    }

    #[test]
    fn handle_response_reads_next_batch() {
        let op = GetMore::new(Namespace::new("db", "coll"), 42, None);
        let response = doc! {
            "ok": 1.0,
            "cursor": { "id": 0i64, "nextBatch": [doc! { "a": 1 }, doc! { "b": 2 }] },
        };
        let batch = op.handle_response(response).unwrap();
        assert_eq!(batch.cursor_id, 0);
        assert_eq!(batch.batch.len(), 2);
    }
}
