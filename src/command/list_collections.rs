use bson::Document;
use serde::Deserialize;

use crate::{
    command::{deserialize_body, Operation, Retryability},
    wire::version::WireVersion,
};

#[derive(Debug, Deserialize)]
struct ListCollectionsBody {
    cursor: ListCollectionsCursor,
}

#[derive(Debug, Deserialize)]
struct ListCollectionsCursor {
    #[serde(rename = "firstBatch")]
    first_batch: Vec<CollectionEntry>,
}

#[derive(Debug, Deserialize)]
struct CollectionEntry {
    name: String,
}

/// Lists the names of the collections in a database, per spec §4.8's `collectionNames()`.
/// Uses `nameOnly` so the server doesn't bother shipping each collection's options/info.
#[derive(Debug)]
pub struct ListCollections {
    db: String,
}

impl ListCollections {
    pub fn new(db: impl Into<String>) -> Self {
        Self { db: db.into() }
    }
}

impl Operation for ListCollections {
    type Output = Vec<String>;

    const NAME: &'static str = "listCollections";

    fn build(&self, _wire_version: WireVersion) -> crate::error::Result<Document> {
        Ok(bson::doc! {
            Self::NAME: 1,
            "$db": self.db.clone(),
            "nameOnly": true,
            "cursor": {},
        })
    }

    fn handle_response(&self, response: Document) -> crate::error::Result<Self::Output> {
        let body: ListCollectionsBody = deserialize_body(response)?;
        Ok(body.cursor.first_batch.into_iter().map(|e| e.name).collect())
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_requests_names_only() {
        let op = ListCollections::new("db");
        let cmd = op.build(WireVersion::V7_0).unwrap();
        assert_eq!(cmd.get_str("$db").unwrap(), "db");
        assert_eq!(cmd.get_bool("nameOnly").unwrap(), true);
    }

    #[test]
    fn handle_response_collects_names() {
        let op = ListCollections::new("db");
        let response = doc! {
            "ok": 1.0,
            "cursor": { "firstBatch": [doc! { "name": "a" }, doc! { "name": "b" }] },
        };
        let names = op.handle_response(response).unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
