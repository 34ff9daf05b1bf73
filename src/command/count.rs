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
pub struct CountOptions {
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CountBody {
    n: u64,
}

/// Counts documents matching a filter via the `count` command, per spec §4.3.
#[derive(Debug)]
pub struct Count {
    ns: Namespace,
    filter: Document,
    options: Option<CountOptions>,
    read_concern: Option<ReadConcern>,
}

impl Count {
    pub fn new(
        ns: Namespace,
        filter: Document,
        options: Option<CountOptions>,
        read_concern: Option<ReadConcern>,
    ) -> Self {
        Self { ns, filter, options, read_concern }
    }
}

impl Operation for Count {
    type Output = u64;

    const NAME: &'static str = "count";

    fn build(&self, _wire_version: WireVersion) -> crate::error::Result<Document> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "$db": self.ns.db.clone(),
            "query": self.filter.clone(),
        };
        append_options(&mut body, self.options.as_ref())?;
        Ok(body)
    }

    fn handle_response(&self, response: Document) -> crate::error::Result<Self::Output> {
        Ok(deserialize_body::<CountBody>(response)?.n)
    }

    fn read_concern(&self) -> Option<&ReadConcern> {
        self.read_concern.as_ref()
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_includes_filter_and_options() {
        let ns = Namespace::new("db", "coll");
        let options = CountOptions { limit: Some(10), skip: Some(2) };
        let op = Count::new(ns, doc! { "x": 1 }, Some(options), None);
        let cmd = op.build(WireVersion::V7_0).unwrap();
        assert_eq!(cmd.get_str(Count::NAME).unwrap(), "coll");
        assert_eq!(cmd.get_str("$db").unwrap(), "db");
        assert_eq!(cmd.get_document("query").unwrap(), &doc! { "x": 1 });
        assert_eq!(cmd.get_i64("limit").unwrap(), 10);
        assert_eq!(cmd.get_i64("skip").unwrap(), 2);
    }

    #[test]
    fn handle_response_reads_count() {
        let op = Count::new(Namespace::new("db", "coll"), doc! {}, None, None);
        let n = op.handle_response(doc! { "n": 5i64, "ok": 1.0 }).unwrap();
        assert_eq!(n, 5);
    }
}
