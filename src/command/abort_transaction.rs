use bson::{doc, Document};

use crate::{
    command::{deserialize_body, AckResponseBody, Operation, Retryability},
    error::{Error, Result},
    selection_criteria::SelectionCriteria,
    wire::version::WireVersion,
};

/// Aborts the transaction identified by the session's `lsid`/`txnNumber`, per spec §4.10.
/// `NoSuchTransaction` (code 251) is swallowed, so aborting a transaction the server has already
/// forgotten about is idempotent from the caller's perspective.
#[derive(Debug)]
pub struct AbortTransaction {
    txn_number: i64,
    selection_criteria: Option<SelectionCriteria>,
}

impl AbortTransaction {
    pub fn new(txn_number: i64, selection_criteria: Option<SelectionCriteria>) -> Self {
        Self { txn_number, selection_criteria }
    }
}

impl Operation for AbortTransaction {
    type Output = ();

    const NAME: &'static str = "abortTransaction";

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

    fn retryability(&self) -> Retryability {
        Retryability::Write
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{CommandError, ErrorKind};

    #[test]
    fn build_targets_admin_with_txn_fields() {
        let op = AbortTransaction::new(7, None);
        let cmd = op.build(WireVersion::V7_0).unwrap();
        assert_eq!(cmd.get_str("$db").unwrap(), "admin");
        assert_eq!(cmd.get_i32(AbortTransaction::NAME).unwrap(), 1);
        assert_eq!(cmd.get_i64("txnNumber").unwrap(), 7);
        assert_eq!(cmd.get_bool("autocommit").unwrap(), false);
    }

    #[test]
    fn no_such_transaction_is_swallowed() {
        let op = AbortTransaction::new(1, None);
        let err = ErrorKind::Command(CommandError {
            code: 251,
            code_name: "NoSuchTransaction".into(),
            message: "transaction not found".into(),
        })
        .into();
        assert!(op.handle_error(err).is_ok());
    }

    #[test]
    fn other_command_errors_propagate() {
        let op = AbortTransaction::new(1, None);
        let err = ErrorKind::Command(CommandError {
            code: 11600,
            code_name: "InterruptedAtShutdown".into(),
            message: "shutting down".into(),
        })
        .into();
        assert!(op.handle_error(err).is_err());
    }
}
