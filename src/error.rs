//! Contains the `Error` and `Result` types that this crate uses.

use std::{any::Any, collections::HashSet, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bson_pack::Document;

/// MongoDB-defined codes that denote a retryable error, plus connection errors, per the published
/// retryable-writes/retryable-reads lists referenced by spec §4.7.
const RETRYABLE_CODES: [i32; 15] = [
    6, 7, 89, 91, 150, 189, 202, 9001, 10107, 11600, 11602, 13388, 13435, 13436, 63,
];

/// Label added to an error when it is write-retryable.
pub const RETRYABLE_WRITE_ERROR: &str = "RetryableWriteError";
/// Label added to a network error or server selection error that occurs during a transaction.
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";
/// Label added when it is unknown whether a transaction commit satisfied its write concern.
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

/// The result type for all methods in this crate that can fail.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in this crate. The inner [`ErrorKind`] is wrapped in an `Arc`-free
/// `Box` and cloned label set so errors stay cheap to thread through retry/transaction state.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
#[non_exhaustive]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: Box<ErrorKind>,
    labels: HashSet<String>,
    #[source]
    source: Option<Box<Error>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: impl IntoIterator<Item = String>) -> Self {
        Self {
            kind: Box::new(kind),
            labels: labels.into_iter().collect(),
            source: None,
        }
    }

    /// Wraps an arbitrary user-supplied payload, e.g. to abort a transaction retry loop from
    /// within a callback.
    pub fn custom(e: impl Any + Send + Sync) -> Self {
        Self::new(ErrorKind::Custom(Arc::new(e)), None)
    }

    /// Retrieves a previously stored custom payload, if any and if the types match.
    pub fn get_custom<E: Any>(&self) -> Option<&E> {
        match &*self.kind {
            ErrorKind::Custom(c) => c.downcast_ref(),
            _ => None,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn with_source(mut self, source: Error) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The labels attached to this error.
    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    /// Whether this error carries the given label.
    pub fn contains_label(&self, label: impl AsRef<str>) -> bool {
        self.labels.contains(label.as_ref())
    }

    pub(crate) fn add_label(&mut self, label: impl Into<String>) {
        self.labels.insert(label.into());
    }

    /// Returns the command error code for this error, if any, checking a wrapped source error
    /// recursively the way the failover engine (C7) needs to.
    pub fn code(&self) -> Option<i32> {
        match &*self.kind {
            ErrorKind::Command(e) => Some(e.code),
            _ => self.source.as_ref().and_then(|s| s.code()),
        }
    }

    /// Whether this error is a network-level failure, per SPEC_FULL.md §10.2. Exposed publicly
    /// because callers composing their own retry layer on top of the failover engine (C7) need
    /// the same classification the engine uses internally.
    pub fn is_network_error(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Io(_) | ErrorKind::ConnectionPoolCleared { .. })
    }

    pub(crate) fn is_network_timeout(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::TimedOut)
    }

    pub(crate) fn is_auth_error(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Authentication { .. })
    }

    pub(crate) fn is_ns_not_found(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Command(e) if e.code == 26)
    }

    pub(crate) fn is_namespace_exists(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Command(e) if e.code == 48)
    }

    pub(crate) fn is_no_such_transaction(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Command(e) if e.code == 251)
    }

    /// Whether the failover engine (C7) should classify this error as retryable.
    ///
    /// Per spec §4.7: network errors are always retryable; command errors are retryable only if
    /// their code is in the published retryable set. Auth, validation, and `NamespaceExists`
    /// errors are never retryable.
    pub(crate) fn is_retryable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        match &*self.kind {
            ErrorKind::Command(e) => RETRYABLE_CODES.contains(&e.code),
            _ => false,
        }
    }

    pub(crate) fn is_write_conflict(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Command(e) if e.code == 112)
    }

    /// Whether a read operation carrying this error may be retried per spec §4.7's published
    /// retryable-reads code set, mirroring the teacher driver's `Error::is_read_retryable`.
    pub fn is_read_retryable(&self) -> bool {
        self.is_retryable()
    }

    /// Whether a write operation carrying this error may be retried per spec §4.7, mirroring the
    /// teacher driver's `Error::is_write_retryable`. Write retryability additionally requires the
    /// `RETRYABLE_WRITE_ERROR` label when the error originated from a modern server that labels
    /// its own retryable writes.
    pub fn is_write_retryable(&self) -> bool {
        self.is_retryable() || self.contains_label(RETRYABLE_WRITE_ERROR)
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into(), None)
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(err: std::io::ErrorKind) -> Self {
        Self::Io(Arc::new(err.into()))
    }
}

impl From<bson::ser::Error> for ErrorKind {
    fn from(err: bson::ser::Error) -> Self {
        Self::BsonSerialization(Arc::new(err))
    }
}

impl From<bson::de::Error> for ErrorKind {
    fn from(err: bson::de::Error) -> Self {
        Self::BsonDeserialization(Arc::new(err))
    }
}

/// The taxonomy of errors described in spec §7, plus the ambient variants needed to bridge the
/// pack (C1) and socket (external) boundaries into it.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A client-side precondition was violated (`InvalidArgument` in spec §7).
    #[error("invalid argument: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// Handshake authentication failed (`AuthenticationError`).
    #[error("authentication error: {message}")]
    #[non_exhaustive]
    Authentication { message: String },

    /// A frame/codec violation (`ProtocolError`), further distinguished by the condition in
    /// spec §4.2.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    /// The server replied `{ok: 0.0}` (`CommandException` in spec §7).
    #[error("command failed: {0}")]
    Command(CommandError),

    /// A required wire version was not negotiated (`UnsupportedOperation`).
    #[error("operation requires wire version >= {required:?}, server supports {actual:?}")]
    #[non_exhaustive]
    UnsupportedOperation {
        required: crate::wire::version::WireVersion,
        actual: crate::wire::version::WireVersion,
    },

    /// The deadline for an operation, including all scheduled retries, elapsed (`Timeout`).
    #[error("operation timed out")]
    Timeout,

    /// An in-flight operation was cancelled by its caller (`Cancelled`).
    #[error("operation was cancelled")]
    Cancelled,

    /// A session-state precondition was violated (`SessionState`).
    #[error("session error: {message}")]
    #[non_exhaustive]
    SessionState { message: String },

    /// A transaction-state precondition was violated (`TransactionState`).
    #[error("transaction error: {message}")]
    #[non_exhaustive]
    TransactionState { message: String },

    /// Wrapper around `std::io::Error`, the socket-layer external boundary.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// A value could not be serialized into the pack's wire representation, the ambient
    /// counterpart to spec §4.1's "the core never inspects raw bytes" contract: the pack (an
    /// external collaborator) can still fail, and that failure must surface through this
    /// taxonomy rather than as a bare serde error.
    #[error("BSON serialization error: {0}")]
    BsonSerialization(Arc<bson::ser::Error>),

    /// A server reply could not be deserialized into the shape a command's result reader
    /// expected.
    #[error("BSON deserialization error: {0}")]
    BsonDeserialization(Arc<bson::de::Error>),

    /// The connection pool for a server was cleared during operation execution due to a
    /// concurrent failure, aborting this operation.
    #[error("{message}")]
    #[non_exhaustive]
    ConnectionPoolCleared { message: String },

    /// The failover engine could not select an eligible node for this operation.
    #[error("server selection failed: {message}")]
    #[non_exhaustive]
    ServerSelection { message: String },

    /// A defect internal to the core (a response could not be shaped as expected).
    #[error("internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },

    /// A value produced by user code (e.g. to abort a transaction retry loop).
    #[error("custom error")]
    Custom(Arc<dyn Any + Send + Sync>),
}

/// Sub-taxonomy for C2 frame/codec failures, named per spec §4.2.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A wire message was truncated before a full frame could be read.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    #[non_exhaustive]
    Frame { expected: usize, actual: usize },

    /// The header declared an opCode this core does not understand.
    #[error("unknown opcode: {0}")]
    UnknownOp(i32),

    /// Compression or decompression of a message body failed.
    #[error("codec error: {message}")]
    #[non_exhaustive]
    Codec { message: String },
}

/// An error reported by the server for a failed command, per spec §4.4.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct CommandError {
    /// The numeric error code the server attached to this failure.
    pub code: i32,

    /// The human-readable name for `code`, when the server supplied one.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// The server's description of the failure.
    #[serde(rename = "errmsg", default)]
    pub message: String,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {} ({}): {}", self.code, self.code_name, self.message)
    }
}

impl From<CommandErrorBody> for Error {
    fn from(body: CommandErrorBody) -> Self {
        Error::new(ErrorKind::Command(body.command_error), body.error_labels.unwrap_or_default())
    }
}

/// A response body used to deserialize a failed command reply, including its error labels.
#[derive(Deserialize, Debug)]
pub(crate) struct CommandErrorBody {
    #[serde(rename = "errorLabels")]
    pub(crate) error_labels: Option<Vec<String>>,

    #[serde(flatten)]
    pub(crate) command_error: CommandError,
}

/// A write error nested in a bulk write response's `writeErrors` array (ambient result shaping;
/// spec §4.4 only names the top-level command-failure mapping, but insert/update/delete commands
/// need this to report per-document failures).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct WriteError {
    pub index: usize,
    pub code: i32,
    #[serde(rename = "errmsg", default)]
    pub message: String,
    #[serde(rename = "errInfo")]
    pub details: Option<Document>,
}
