//! The connection pool (second half of C6): generation-tagged checkout/check-in over a bounded
//! set of connections per server, per spec §4.8's CMAP-style semantics. Adapted from the teacher
//! driver's synchronous, thread-based pool (`cmap/mod.rs`) to tokio's async primitives — a
//! `Semaphore` takes the place of the original's condvar-backed wait queue.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    net::TcpStream,
    sync::{Mutex, Semaphore},
};

use crate::{
    cmap::conn::{AsyncStream, Connection},
    error::{Error, ErrorKind, Result},
    sdam::ServerAddress,
    wire::compression::Compressor,
};

const DEFAULT_MAX_POOL_SIZE: u32 = 100;

/// Tunables for a [`ConnectionPool`], per spec §6's pool-related connection-string options.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    pub max_pool_size: u32,
    pub wait_queue_timeout: Option<Duration>,
    pub compressors: Vec<Compressor>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            wait_queue_timeout: None,
            compressors: Vec::new(),
        }
    }
}

/// A pool of connections to a single server, implementing the checkout/check-in/clear semantics
/// of spec §4.8. Cheaply `Clone`-able; all mutable state lives behind the shared `Arc`.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<Inner>,
}

struct Inner {
    address: ServerAddress,
    options: PoolOptions,
    generation: AtomicU32,
    total_connection_count: AtomicU32,
    next_connection_id: AtomicU32,
    /// Bounds concurrent checkouts to `max_pool_size`; acquiring a permit is the async analogue
    /// of the teacher's wait-queue blocking.
    semaphore: Semaphore,
    available: Mutex<VecDeque<Connection>>,
}

impl ConnectionPool {
    pub fn new(address: ServerAddress, options: PoolOptions) -> Self {
        let max_pool_size = options.max_pool_size;
        Self {
            inner: Arc::new(Inner {
                address,
                options,
                generation: AtomicU32::new(0),
                total_connection_count: AtomicU32::new(0),
                next_connection_id: AtomicU32::new(1),
                semaphore: Semaphore::new(max_pool_size as usize),
                available: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.inner.address
    }

    pub fn generation(&self) -> u32 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Checks out a ready connection, reusing an available one or dialing a new one if the pool
    /// has capacity. Blocks until a permit frees up (or `wait_queue_timeout` elapses) when the
    /// pool is already at `max_pool_size`, per spec §4.8.
    pub async fn check_out(&self) -> Result<Connection> {
        let permit = match self.inner.options.wait_queue_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.inner.semaphore.acquire())
                .await
                .map_err(|_| {
                    Error::from(ErrorKind::ServerSelection {
                        message: format!(
                            "timed out waiting for a connection to {}",
                            self.inner.address
                        ),
                    })
                })?
                .expect("semaphore is never closed"),
            None => self.inner.semaphore.acquire().await.expect("semaphore is never closed"),
        };
        permit.forget();

        loop {
            let candidate = self.inner.available.lock().await.pop_front();
            match candidate {
                Some(conn) if conn.is_stale(self.generation()) => {
                    self.inner.total_connection_count.fetch_sub(1, Ordering::SeqCst);
                    continue;
                }
                Some(conn) => return Ok(conn),
                None => return self.create_connection().await,
            }
        }
    }

    async fn create_connection(&self) -> Result<Connection> {
        crate::trace::debug!(address = %self.inner.address, "pool dialing new connection");
        let stream = TcpStream::connect(format!("{}:{}", self.inner.address.host, self.inner.address.port))
            .await
            .map_err(|e| Error::from(ErrorKind::Io(Arc::new(e))))?;
        stream.set_nodelay(true).map_err(|e| Error::from(ErrorKind::Io(Arc::new(e))))?;

        let id = self.inner.next_connection_id.fetch_add(1, Ordering::SeqCst);
        self.inner.total_connection_count.fetch_add(1, Ordering::SeqCst);
        let conn = Connection::new(id, self.inner.address.clone(), self.generation(), AsyncStream::Tcp(stream));
        conn.handshake(&self.inner.options.compressors).await?;
        Ok(conn)
    }

    /// Returns a connection to the pool, discarding it instead if it belongs to a stale
    /// generation (i.e. a [`clear`](Self::clear) happened while it was checked out).
    pub async fn check_in(&self, conn: Connection) {
        if conn.is_stale(self.generation()) {
            self.inner.total_connection_count.fetch_sub(1, Ordering::SeqCst);
        } else {
            self.inner.available.lock().await.push_back(conn);
        }
        self.inner.semaphore.add_permits(1);
    }

    /// Marks every connection currently outstanding or idle-pooled as stale, per spec §4.8 (used
    /// after a network error forces the failover engine to stop trusting this server's sockets).
    /// Existing available connections are dropped immediately; checked-out ones are dropped on
    /// their next check-in.
    pub async fn clear(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut available = self.inner.available.lock().await;
        let dropped = available.len() as u32;
        available.clear();
        self.inner.total_connection_count.fetch_sub(dropped, Ordering::SeqCst);
        crate::trace::warn!(
            address = %self.inner.address,
            generation,
            dropped,
            "connection pool cleared"
        );
    }
}
