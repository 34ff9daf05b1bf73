use bson::Document;

use crate::{
    command::{deserialize_body, AckResponseBody, Operation},
    concern::WriteConcern,
    error::{Error, Result},
    wire::version::WireVersion,
};

/// Drops an entire database, per spec §4.8's `drop()`. `NamespaceNotFound` (code 26) is
/// swallowed, the same idempotence [`crate::command::DropCollection`] applies to a single
/// collection.
#[derive(Debug)]
pub struct DropDatabase {
    db: String,
    write_concern: Option<WriteConcern>,
}

impl DropDatabase {
    pub fn new(db: impl Into<String>, write_concern: Option<WriteConcern>) -> Self {
        Self { db: db.into(), write_concern }
    }
}

impl Operation for DropDatabase {
    type Output = ();

    const NAME: &'static str = "dropDatabase";

    fn build(&self, _wire_version: WireVersion) -> Result<Document> {
        Ok(bson::doc! { Self::NAME: 1, "$db": self.db.clone() })
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
        self.write_concern.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{CommandError, ErrorKind};

    #[test]
    fn build_targets_db_with_drop_database_flag() {
        let op = DropDatabase::new("db", None);
        let cmd = op.build(WireVersion::V7_0).unwrap();
        assert_eq!(cmd.get_i32(DropDatabase::NAME).unwrap(), 1);
        assert_eq!(cmd.get_str("$db").unwrap(), "db");
    }

    #[test]
    fn ns_not_found_is_swallowed() {
        let op = DropDatabase::new("db", None);
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
        let op = DropDatabase::new("db", None);
        let err = ErrorKind::Command(CommandError {
            code: 13,
            code_name: "Unauthorized".into(),
            message: "not authorized".into(),
        })
        .into();
        assert!(op.handle_error(err).is_err());
    }
}
