//! A core MongoDB client driver: wire protocol framing and command dispatch (C1-C4), an
//! aggregation pipeline builder (C5), a CMAP-style connection pool and SDAM-lite topology view
//! (C6), a failover/retry engine (C7), and a session/transaction state machine (C9/C10), composed
//! into [`Client`]/[`DatabaseHandle`]/[`CollectionHandle`] handles per spec §6's external
//! interface. Authentication, encryption, change streams, and GridFS are explicitly out of scope.

pub mod aggregate;
pub mod bson_pack;
pub mod client;
pub mod client_options;
pub mod cmap;
pub mod collection;
pub mod command;
pub mod concern;
pub mod database;
pub mod error;
pub mod failover;
pub mod namespace;
pub mod results;
pub mod sdam;
pub mod selection_criteria;
pub mod session;
pub(crate) mod trace;
pub mod transaction;
pub mod wire;

pub use client::Client;
pub use client_options::{ClientOptions, Credential};
pub use collection::{Cursor, CollectionHandle};
pub use database::DatabaseHandle;
pub use error::{Error, ErrorKind, Result};
pub use failover::FailoverStrategy;
pub use namespace::Namespace;
pub use session::{Lsid, SessionHandle};
