use std::collections::VecDeque;

use bson::{doc, Document};
use serde::Deserialize;

use crate::{
    aggregate::Pipeline,
    command::{append_options, deserialize_body, Operation, Retryability},
    concern::ReadConcern,
    namespace::Namespace,
    wire::version::WireVersion,
};

#[derive(Debug, Deserialize)]
struct AggregateBody {
    cursor: AggregateCursor,
}

#[derive(Debug, Deserialize)]
struct AggregateCursor {
    id: i64,
    #[serde(rename = "firstBatch")]
    first_batch: VecDeque<Document>,
}

/// The cursor opened by an `aggregate` command.
#[derive(Debug)]
pub struct AggregateCursorSpec {
    pub id: i64,
    pub ns: Namespace,
    pub first_batch: VecDeque<Document>,
}

/// The options an `aggregate` command accepts beyond the pipeline itself, per spec §4.6.
#[derive(Clone, Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOptions {
    pub explain: Option<bool>,
    pub allow_disk_use: Option<bool>,
    pub bypass_document_validation: Option<bool>,
}

/// Runs an aggregation pipeline (C5) against a collection, per spec §4.6. Not retryable unless
/// the pipeline contains no `$out`/`$merge` stage — those write to the server and are excluded
/// from the published retryable-reads rules the same way a single-document write is included in
/// retryable-writes.
#[derive(Debug)]
pub struct Aggregate {
    ns: Namespace,
    pipeline: Pipeline,
    batch_size: Option<i64>,
    options: Option<AggregateOptions>,
    read_concern: Option<ReadConcern>,
}

impl Aggregate {
    pub fn new(
        ns: Namespace,
        pipeline: Pipeline,
        batch_size: Option<i64>,
        options: Option<AggregateOptions>,
        read_concern: Option<ReadConcern>,
    ) -> Self {
        Self { ns, pipeline, batch_size, options, read_concern }
    }

    fn writes_output(&self) -> bool {
        self.pipeline.stages().iter().any(|s| matches!(s, crate::aggregate::Stage::Out { .. }))
    }
}

impl Operation for Aggregate {
    type Output = AggregateCursorSpec;

    const NAME: &'static str = "aggregate";

    fn build(&self, _wire_version: WireVersion) -> crate::error::Result<Document> {
        let mut cursor = Document::new();
        if let Some(batch_size) = self.batch_size {
            cursor.insert("batchSize", batch_size);
        }
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "$db": self.ns.db.clone(),
            "pipeline": self.pipeline.to_bson(),
            "cursor": cursor,
        };
        append_options(&mut body, self.options.as_ref())?;
        Ok(body)
    }

    fn handle_response(&self, response: Document) -> crate::error::Result<Self::Output> {
        let body: AggregateBody = deserialize_body(response)?;
        Ok(AggregateCursorSpec {
            id: body.cursor.id,
            ns: self.ns.clone(),
            first_batch: body.cursor.first_batch,
        })
    }

    fn read_concern(&self) -> Option<&ReadConcern> {
        self.read_concern.as_ref()
    }

    fn retryability(&self) -> Retryability {
        if self.writes_output() {
            Retryability::None
        } else {
            Retryability::Read
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::aggregate::Stage;

    #[test]
    fn build_includes_pipeline_and_batch_size() {
        let pipeline = Pipeline::new().push(Stage::Match(doc! { "x": 1 })).push(Stage::Limit(5));
        let op = Aggregate::new(Namespace::new("db", "coll"), pipeline, Some(100), None, None);
        let cmd = op.build(WireVersion::V7_0).unwrap();
        assert_eq!(cmd.get_str(Aggregate::NAME).unwrap(), "coll");
        assert_eq!(cmd.get_array("pipeline").unwrap().len(), 2);
        assert_eq!(cmd.get_document("cursor").unwrap().get_i64("batchSize").unwrap(), 100);
    }

    #[test]
    fn pipeline_with_out_stage_is_not_retryable() {
        let pipeline = Pipeline::new().push(Stage::Out { db: None, coll: "dest".into() });
        let op = Aggregate::new(Namespace::new("db", "coll"), pipeline, None, None, None);
        assert_eq!(op.retryability(), Retryability::None);
    }

    #[test]
    fn pipeline_without_out_stage_is_retryable() {
        let pipeline = Pipeline::new().push(Stage::Match(doc! {}));
        let op = Aggregate::new(Namespace::new("db", "coll"), pipeline, None, None, None);
        assert_eq!(op.retryability(), Retryability::Read);
    }

    #[test]
    fn handle_response_reads_cursor() {
        let op = Aggregate::new(Namespace::new("db", "coll"), Pipeline::new(), None, None, None);
        let response = doc! {
            "ok": 1.0,
            "cursor": { "id": 0i64, "firstBatch": [doc! { "a": 1 }] },
        };
        let spec = op.handle_response(response).unwrap();
        assert_eq!(spec.id, 0);
        assert_eq!(spec.first_batch.len(), 1);
    }
}
