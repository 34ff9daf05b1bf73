use std::collections::VecDeque;

use bson::{doc, Document};
use serde::Deserialize;

use crate::{
    command::{append_options, deserialize_body, Operation, Retryability},
    concern::ReadConcern,
    namespace::Namespace,
    wire::version::WireVersion,
};

#[derive(Clone, Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
    pub batch_size: Option<i64>,
    pub projection: Option<Document>,
}

/// The cursor a `find`/`aggregate`/`listCollections`-style command returns, per spec §4.5.
#[derive(Debug)]
pub struct CursorSpec {
    pub id: i64,
    pub ns: Namespace,
    pub first_batch: VecDeque<Document>,
}

#[derive(Debug, Deserialize)]
struct CursorBody {
    cursor: CursorInfo,
}

#[derive(Debug, Deserialize)]
struct CursorInfo {
    id: i64,
    ns: String,
    #[serde(rename = "firstBatch")]
    first_batch: VecDeque<Document>,
}

/// Queries a collection and returns the cursor the server opened for it, per spec §4.5.
#[derive(Debug)]
pub struct Find {
    ns: Namespace,
    filter: Document,
    options: Option<FindOptions>,
    read_concern: Option<ReadConcern>,
}

impl Find {
    pub fn new(
        ns: Namespace,
        filter: Document,
        options: Option<FindOptions>,
        read_concern: Option<ReadConcern>,
    ) -> Self {
        Self { ns, filter, options, read_concern }
    }
}

impl Operation for Find {
    type Output = CursorSpec;

    const NAME: &'static str = "find";

    fn build(&self, _wire_version: WireVersion) -> crate::error::Result<Document> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "$db": self.ns.db.clone(),
            "filter": self.filter.clone(),
        };
        append_options(&mut body, self.options.as_ref())?;
        Ok(body)
    }

    fn handle_response(&self, response: Document) -> crate::error::Result<Self::Output> {
        let body: CursorBody = deserialize_body(response)?;
        Ok(CursorSpec {
            id: body.cursor.id,
            ns: {
                let mut parts = body.cursor.ns.splitn(2, '.');
                let db = parts.next().unwrap_or_default().to_string();
                let coll = parts.next().unwrap_or_default().to_string();
                Namespace::new(db, coll)
            },
            first_batch: body.cursor.first_batch,
        })
    }

    fn read_concern(&self) -> Option<&ReadConcern> {
        self.read_concern.as_ref()
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
