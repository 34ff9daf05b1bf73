use bson::{doc, Document};

use crate::{
    command::{append_options, deserialize_body, AckResponseBody, Operation},
    concern::WriteConcern,
    error::{Error, Result},
    namespace::Namespace,
    wire::version::WireVersion,
};

#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct DropCollectionOptions {
    #[serde(skip_serializing)]
    pub write_concern: Option<WriteConcern>,
}

/// Drops a collection, per spec §4.3. `ns not found` (code 26) is swallowed: dropping a
/// collection that doesn't exist is not a failure from the caller's perspective.
#[derive(Debug)]
pub struct DropCollection {
    ns: Namespace,
    options: Option<DropCollectionOptions>,
}

impl DropCollection {
    pub fn new(ns: Namespace, options: Option<DropCollectionOptions>) -> Self {
        Self { ns, options }
    }
}

impl Operation for DropCollection {
    type Output = ();

    const NAME: &'static str = "drop";

    fn build(&self, _wire_version: WireVersion) -> Result<Document> {
        let mut body = doc! { Self::NAME: self.ns.coll.clone(), "$db": self.ns.db.clone() };
        append_options(&mut body, self.options.as_ref())?;
        Ok(body)
    }

    fn handle_response(&self, response: Document) -> Result<Self::Output> {
        deserialize_body::<AckResponseBody>(response)?;
        Ok(())
    }

    fn handle_error(&self, error: Error) -> Result<Self::Output> {
        if error.is_ns_not_found() {
            Ok(())
        } else {
            Err(error)
        }
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.as_ref().and_then(|o| o.write_concern.as_ref())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{CommandError, ErrorKind};

    #[test]
    fn build_omits_write_concern_field() {
        let options = DropCollectionOptions { write_concern: Some(WriteConcern::majority()) };
        let op = DropCollection::new(Namespace::new("db", "coll"), Some(options));
        let cmd = op.build(WireVersion::V7_0).unwrap();
        assert_eq!(cmd.get_str(DropCollection::NAME).unwrap(), "coll");
        assert_eq!(cmd.get_str("$db").unwrap(), "db");
        assert!(!cmd.contains_key("writeConcern"));
        assert!(op.write_concern().is_some());
    }

    #[test]
    fn ns_not_found_is_swallowed() {
        let op = DropCollection::new(Namespace::new("db", "coll"), None);
        let err = ErrorKind::Command(CommandError {
            code: 26,
            code_name: "NamespaceNotFound".into(),
            message: "ns not found".into(),
        })
        .into();
        assert!(op.handle_error(err).is_ok());
    }

    #[test]
    fn other_errors_propagate() {
        let op = DropCollection::new(Namespace::new("db", "coll"), None);
        let err = ErrorKind::Command(CommandError {
            code: 13,
            code_name: "Unauthorized".into(),
            message: "not authorized".into(),
        })
        .into();
        assert!(op.handle_error(err).is_err());
    }
}
