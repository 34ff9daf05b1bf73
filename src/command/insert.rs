use bson::{doc, Bson, Document};

use crate::{
    command::{deserialize_body, Operation, Retryability, WriteResponseBody},
    concern::WriteConcern,
    error::Result,
    namespace::Namespace,
    wire::version::WireVersion,
};

/// Inserts a batch of documents, per spec §4.3. Retryable per spec §4.7 (idempotent because each
/// document is inserted with a pre-assigned `_id`).
#[derive(Debug)]
pub struct Insert {
    ns: Namespace,
    documents: Vec<Document>,
    write_concern: Option<WriteConcern>,
    ordered: bool,
}

impl Insert {
    pub fn new(ns: Namespace, documents: Vec<Document>, write_concern: Option<WriteConcern>) -> Self {
        Self { ns, documents, write_concern, ordered: true }
    }
}

impl Operation for Insert {
    type Output = u64;

    const NAME: &'static str = "insert";

    fn build(&self, _wire_version: WireVersion) -> Result<Document> {
        Ok(doc! {
            Self::NAME: self.ns.coll.clone(),
            "$db": self.ns.db.clone(),
            "documents": self.documents.iter().cloned().map(Bson::Document).collect::<Vec<_>>(),
            "ordered": self.ordered,
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
        Retryability::Write
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_includes_documents_and_defaults_to_ordered() {
        let op = Insert::new(Namespace::new("db", "coll"), vec![doc! { "a": 1 }], None);
        let cmd = op.build(WireVersion::V7_0).unwrap();
        assert_eq!(cmd.get_str(Insert::NAME).unwrap(), "coll");
        assert_eq!(cmd.get_str("$db").unwrap(), "db");
        assert_eq!(cmd.get_array("documents").unwrap().len(), 1);
        assert_eq!(cmd.get_bool("ordered").unwrap(), true);
    }

    #[test]
    fn handle_response_reads_inserted_count() {
        let op = Insert::new(Namespace::new("db", "coll"), vec![], None);
        let n = op.handle_response(doc! { "n": 2i64, "ok": 1.0 }).unwrap();
        assert_eq!(n, 2);
    }
}
