//! The command algebra (C4): a trait modeling a server-side command, so that the failover engine
//! (C7) and the executor can build, send, and interpret any operation uniformly. Grounded on the
//! teacher driver's `operation/mod.rs` `Operation` trait, simplified to this core's single
//! `Document -> Document` command shape (the teacher's generic `Command`/`Response` associated
//! types exist to support typed command bodies across hundreds of operations; this core only
//! needs the one algebra spec.md names).

mod abort_transaction;
mod aggregate;
mod commit_transaction;
mod count;
mod create;
mod delete;
mod drop_collection;
mod drop_database;
mod find;
mod get_more;
mod insert;
mod kill_cursors;
mod list_collections;
mod rename_collection;
mod update;

pub use abort_transaction::AbortTransaction;
pub use aggregate::{Aggregate, AggregateCursorSpec, AggregateOptions};
pub use commit_transaction::CommitTransaction;
pub use count::{Count, CountOptions};
pub use create::{Create, CreateCollectionOptions};
pub use delete::{Delete, DeleteStatement};
pub use drop_collection::{DropCollection, DropCollectionOptions};
pub use drop_database::DropDatabase;
pub use find::{CursorSpec, Find, FindOptions};
pub use get_more::{GetMore, NextBatch};
pub use insert::Insert;
pub use kill_cursors::KillCursors;
pub use list_collections::ListCollections;
pub use rename_collection::RenameCollection;
pub use update::{Update, UpdateStatement};

use bson::Document;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    concern::{ReadConcern, WriteConcern},
    error::{Error, ErrorKind, Result, WriteError},
    selection_criteria::SelectionCriteria,
    wire::version::WireVersion,
};

/// The level of retryability the failover engine (C7) may apply to an operation, per spec §4.7.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Retryability {
    Read,
    Write,
    None,
}

/// Models a single server-side command: how to build it, how to interpret its reply, and what
/// recovery (if any) to apply to a failure.
pub trait Operation {
    /// The type produced by a successful call, after [`handle_response`](Self::handle_response)
    /// shapes the raw server reply.
    type Output;

    /// The server-side command name, used as both the command's first key and for diagnostics.
    const NAME: &'static str;

    /// Builds the command document to send, given the wire version negotiated with the
    /// destination connection (some commands, e.g. those gated on a capability, need this to
    /// decide how to shape themselves).
    fn build(&self, wire_version: WireVersion) -> Result<Document>;

    /// Interprets a successful (`ok: 1`) server reply.
    fn handle_response(&self, response: Document) -> Result<Self::Output>;

    /// Interprets a failed command, with the chance to recover. The default simply propagates
    /// the error; operations like [`DropCollection`] override this to swallow expected failures
    /// (e.g. `ns not found`).
    fn handle_error(&self, error: Error) -> Result<Self::Output> {
        Err(error)
    }

    /// Criteria restricting which servers this operation may run on (e.g. pinned to a
    /// transaction's server).
    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        None
    }

    /// The write concern this operation should request, if any. Attached onto the wire body as
    /// `writeConcern` centrally by the executor (`Client::execute_once`), per spec §4.4's
    /// `(collection?, body, read_concern?, write_concern?, session?)` command shape.
    fn write_concern(&self) -> Option<&WriteConcern> {
        None
    }

    /// The read concern this operation should request, if any. Attached onto the wire body as
    /// `readConcern` the same way as [`Self::write_concern`].
    fn read_concern(&self) -> Option<&ReadConcern> {
        None
    }

    /// Whether the server acknowledges this operation (derived from `write_concern` unless
    /// overridden).
    fn is_acknowledged(&self) -> bool {
        self.write_concern().map(WriteConcern::is_acknowledged).unwrap_or(true)
    }

    /// The level of retryability the failover engine may apply.
    fn retryability(&self) -> Retryability {
        Retryability::None
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}

/// Appends a serializable options struct onto a command document, per the teacher driver's
/// `operation::append_options` helper.
pub(crate) fn append_options<T: Serialize>(doc: &mut Document, options: Option<&T>) -> Result<()> {
    let Some(options) = options else { return Ok(()) };
    match bson::to_bson(options)? {
        bson::Bson::Document(d) => {
            doc.extend(d);
            Ok(())
        }
        other => Err(ErrorKind::Internal {
            message: format!("options did not serialize to a document: {other:?}"),
        }
        .into()),
    }
}

/// The body common to every write command's reply: the number of documents affected, plus any
/// per-document write errors. Not named as its own thing in spec.md, but every insert/update/
/// delete response needs this shape.
#[derive(Debug, Deserialize, Default)]
pub(crate) struct WriteResponseBody {
    #[serde(default)]
    pub(crate) n: u64,
    #[serde(rename = "nModified", default)]
    pub(crate) n_modified: u64,
    #[serde(default)]
    pub(crate) upserted: Vec<UpsertedEntry>,
    #[serde(rename = "writeErrors", default)]
    pub(crate) write_errors: Vec<WriteError>,
}

/// A single entry of an `update` command's `upserted` array, reporting the `_id` the server
/// assigned to a document it created via upsert.
#[derive(Debug, Deserialize)]
pub(crate) struct UpsertedEntry {
    #[allow(dead_code)]
    pub(crate) index: usize,
    #[serde(rename = "_id")]
    pub(crate) id: bson::Bson,
}

impl WriteResponseBody {
    pub(crate) fn validate(self) -> Result<Self> {
        if self.write_errors.is_empty() {
            Ok(self)
        } else {
            let first = self.write_errors[0].clone();
            Err(ErrorKind::Command(crate::error::CommandError {
                code: first.code,
                code_name: String::new(),
                message: first.message,
            })
            .into())
        }
    }
}

/// A command reply shaped only by its `ok` field, for commands whose success/failure is the
/// entire story (e.g. `create`, `drop`, `commitTransaction`).
#[derive(Debug, Deserialize)]
pub(crate) struct AckResponseBody {
    #[allow(dead_code)]
    pub(crate) ok: f64,
}

/// Deserializes a command response body, translating a decode failure into a protocol error
/// rather than an opaque serde error.
pub(crate) fn deserialize_body<T: DeserializeOwned>(doc: Document) -> Result<T> {
    bson::from_document(doc)
        .map_err(|e| Error::from(ErrorKind::Protocol(crate::error::ProtocolError::Codec { message: e.to_string() })))
}
