use bson::{doc, Document};

use crate::{
    command::{deserialize_body, AckResponseBody, Operation},
    concern::WriteConcern,
    error::Result,
    namespace::Namespace,
    wire::version::WireVersion,
};

/// Renames a collection via the `renameCollection` admin command, per spec §4.3.
///
/// The command runs against the `admin` database regardless of which database `from`/`to` name,
/// which is how the server allows (and validates) renames across databases on the same cluster.
#[derive(Debug)]
pub struct RenameCollection {
    from: Namespace,
    to: Namespace,
    drop_target: bool,
    write_concern: Option<WriteConcern>,
}

impl RenameCollection {
    pub fn new(from: Namespace, to: Namespace, drop_target: bool, write_concern: Option<WriteConcern>) -> Self {
        Self { from, to, drop_target, write_concern }
    }
}

impl Operation for RenameCollection {
    type Output = ();

    const NAME: &'static str = "renameCollection";

    fn build(&self, _wire_version: WireVersion) -> Result<Document> {
        Ok(doc! {
            Self::NAME: self.from.to_string(),
            "to": self.to.to_string(),
            "dropTarget": self.drop_target,
            "$db": "admin",
        })
    }

    fn handle_response(&self, response: Document) -> Result<Self::Output> {
        deserialize_body::<AckResponseBody>(response)?;
        Ok(())
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_targets_admin_database_regardless_of_source() {
        let op = RenameCollection::new(
            Namespace::new("db_a", "coll"),
            Namespace::new("db_b", "coll2"),
            false,
            None,
        );
        let cmd = op.build(WireVersion::V7_0).unwrap();
        assert_eq!(cmd.get_str("$db").unwrap(), "admin");
        assert_eq!(cmd.get_str(RenameCollection::NAME).unwrap(), "db_a.coll");
        assert_eq!(cmd.get_str("to").unwrap(), "db_b.coll2");
    }
}
