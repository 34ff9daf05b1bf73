use bson::{doc, Bson, Document};

use crate::{
    command::{deserialize_body, AckResponseBody, Operation},
    error::Result,
    namespace::Namespace,
    wire::version::WireVersion,
};

/// Closes one or more open cursors, per spec §4.5. Issued when a cursor is dropped before being
/// exhausted, including when cancellation tears down an in-flight `getMore`.
#[derive(Debug)]
pub struct KillCursors {
    ns: Namespace,
    cursor_ids: Vec<i64>,
}

impl KillCursors {
    pub fn new(ns: Namespace, cursor_ids: Vec<i64>) -> Self {
        Self { ns, cursor_ids }
    }
}

impl Operation for KillCursors {
    type Output = ();

    const NAME: &'static str = "killCursors";

    fn build(&self, _wire_version: WireVersion) -> Result<Document> {
        Ok(doc! {
            Self::NAME: self.ns.coll.clone(),
            "$db": self.ns.db.clone(),
            "cursors": self.cursor_ids.iter().copied().map(Bson::from).collect::<Vec<_>>(),
        })
    }

    fn handle_response(&self, response: Document) -> Result<Self::Output> {
        deserialize_body::<AckResponseBody>(response)?;
        Ok(())
    }

    fn handle_error(&self, _error: crate::error::Error) -> Result<Self::Output> {
        // Best-effort: failing to kill a cursor (e.g. the server already reaped it) does not
        // need to surface as an error to whatever triggered the cleanup.
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{CommandError, ErrorKind};

    #[test]
    fn build_includes_all_cursor_ids() {
        let op = KillCursors::new(Namespace::new("db", "coll"), vec![1, 2, 3]);
        let cmd = op.build(WireVersion::V7_0).unwrap();
        assert_eq!(cmd.get_str(KillCursors::NAME).unwrap(), "coll");
        assert_eq!(cmd.get_array("cursors").unwrap().len(), 3);
    }

    #[test]
    fn any_error_is_swallowed() {
        let op = KillCursors::new(Namespace::new("db", "coll"), vec![1]);
        let err = ErrorKind::Command(CommandError {
            code: 43,
            code_name: "CursorNotFound".into(),
            message: "cursor not found".into(),
        })
        .into();
        assert!(op.handle_error(err).is_ok());
    }
}
