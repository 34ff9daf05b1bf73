use bson::{doc, Document};

use crate::{
    command::{deserialize_body, AckResponseBody, Operation, Retryability},
    concern::WriteConcern,
    error::{Error, Result},
    selection_criteria::SelectionCriteria,
    wire::version::WireVersion,
};

/// Commits the transaction identified by the session's `lsid`/`txnNumber`, per spec §4.10.
/// Write-retryable: a retried commit after a network blip is safe because the server treats
/// `commitTransaction` as idempotent for a given `txnNumber`. `NoSuchTransaction` (code 251) is
/// swallowed, per spec §4.4's table: the server having already forgotten the transaction is
/// treated the same as the commit having already landed.
#[derive(Debug)]
pub struct CommitTransaction {
    txn_number: i64,
    selection_criteria: Option<SelectionCriteria>,
    write_concern: Option<WriteConcern>,
}

impl CommitTransaction {
    pub fn new(txn_number: i64, selection_criteria: Option<SelectionCriteria>, write_concern: Option<WriteConcern>) -> Self {
        Self { txn_number, selection_criteria, write_concern }
    }
}

impl Operation for CommitTransaction {
    type Output = ();

    const NAME: &'static str = "commitTransaction";

    fn build(&self, _wire_version: WireVersion) -> Result<Document> {
        Ok(doc! {
            Self::NAME: 1,
            "$db": "admin",
            "txnNumber": self.txn_number,
            "autocommit": false,
        })
    }

    fn handle_response(&self, response: Document) -> Result<Self::Output> {
        deserialize_body::<AckResponseBody>(response)?;
        Ok(())
    }

    fn handle_error(&self, error: Error) -> Result<Self::Output> {
        if error.is_no_such_transaction() {
            Ok(())
        } else {
            Err(error)
        }
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
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
    use crate::error::CommandError;

    #[test]
    fn build_targets_admin_with_txn_fields() {
        let op = CommitTransaction::new(3, None, None);
        let cmd = op.build(WireVersion::V7_0).unwrap();
        assert_eq!(cmd.get_str("$db").unwrap(), "admin");
        assert_eq!(cmd.get_i32(CommitTransaction::NAME).unwrap(), 1);
        assert_eq!(cmd.get_i64("txnNumber").unwrap(), 3);
        assert_eq!(cmd.get_bool("autocommit").unwrap(), false);
    }

    #[test]
    fn no_such_transaction_is_swallowed() {
        let op = CommitTransaction::new(1, None, None);
        let err = crate::error::ErrorKind::Command(CommandError {
            code: 251,
            code_name: "NoSuchTransaction".into(),
            message: "transaction not found".into(),
        })
        .into();
        assert!(op.handle_error(err).is_ok());
    }

    #[test]
    fn write_concern_is_exposed_for_central_attachment() {
        let wc = crate::concern::WriteConcern::majority();
        let op = CommitTransaction::new(1, None, Some(wc.clone()));
        assert_eq!(op.write_concern(), Some(&wc));
    }
}
