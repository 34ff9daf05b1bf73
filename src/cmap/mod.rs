//! Connection monitoring and pooling (C6), per spec §3 "Connection" and §4.8's CMAP-style
//! checkout/check-in semantics.

mod conn;
mod pool;

pub use conn::{Connection, ConnectionState};
pub use pool::{ConnectionPool, PoolOptions};

#[cfg(test)]
pub(crate) use conn::{test_address, AsyncStream};
