//! A single pooled connection: the per-socket handshake state machine and the pending-requests
//! map that lets the background reader task dispatch replies back to their caller, per spec §3
//! "Connection".

use std::{
    collections::HashMap,
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};

use bson::Document;
use tokio::{
    io::{split, AsyncRead, AsyncWrite, WriteHalf},
    net::TcpStream,
    sync::{oneshot, Mutex, RwLock},
    task::JoinHandle,
};

use crate::{
    error::{Error, ErrorKind, ProtocolError, Result},
    sdam::ServerAddress,
    wire::{
        self,
        compression::Compressor,
        op_msg::{read_message, write_command, RequestIdGenerator},
        version::{WireCapabilities, WireVersion},
    },
};

/// The handshake lifecycle of a pooled connection, per spec §3.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Init,
    HandshakeSent,
    Ready,
    Failed,
}

/// The concrete transport a connection is built on. A second, in-memory variant backs tests that
/// need a connection without a real socket.
pub(crate) enum AsyncStream {
    Tcp(TcpStream),
    #[cfg(test)]
    Duplex(tokio::io::DuplexStream),
}

impl AsyncRead for AsyncStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(test)]
            AsyncStream::Duplex(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AsyncStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            AsyncStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(test)]
            AsyncStream::Duplex(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(test)]
            AsyncStream::Duplex(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(test)]
            AsyncStream::Duplex(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<i32, oneshot::Sender<Result<Document>>>>>;

struct Negotiated {
    state: ConnectionState,
    max_wire_version: Option<WireVersion>,
    compressor: Compressor,
    use_op_msg: bool,
}

/// A single connection checked out of a [`ConnectionPool`](super::ConnectionPool).
pub struct Connection {
    pub id: u32,
    pub address: ServerAddress,
    pub generation: u32,
    pub established_at: Instant,
    request_ids: RequestIdGenerator,
    negotiated: RwLock<Negotiated>,
    writer: Mutex<WriteHalf<AsyncStream>>,
    pending: PendingMap,
    reader_task: JoinHandle<()>,
}

impl Connection {
    pub(crate) fn new(id: u32, address: ServerAddress, generation: u32, stream: AsyncStream) -> Self {
        crate::trace::debug!(connection_id = id, address = %address, "connection created");
        let (read_half, write_half) = split(stream);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_task = tokio::spawn(Self::run_reader(read_half, pending.clone()));

        Self {
            id,
            address,
            generation,
            established_at: Instant::now(),
            request_ids: RequestIdGenerator::new(),
            negotiated: RwLock::new(Negotiated {
                state: ConnectionState::Init,
                max_wire_version: None,
                compressor: Compressor::Noop,
                use_op_msg: false,
            }),
            writer: Mutex::new(write_half),
            pending,
            reader_task,
        }
    }

    async fn run_reader<R: AsyncRead + Unpin>(mut reader: R, pending: PendingMap) {
        loop {
            match read_message(&mut reader).await {
                Ok(incoming) => {
                    let decoded: Result<Document> = bson::from_slice(&incoming.document_bytes)
                        .map_err(|e| {
                            Error::from(ErrorKind::Protocol(ProtocolError::Codec {
                                message: e.to_string(),
                            }))
                        });
                    if let Some(tx) = pending.lock().await.remove(&incoming.header.response_to) {
                        let _ = tx.send(decoded);
                    }
                }
                Err(_) => {
                    // The socket is no longer readable; fail every outstanding waiter so callers
                    // don't hang forever, then stop.
                    let mut waiters = pending.lock().await;
                    for (_, tx) in waiters.drain() {
                        let _ = tx.send(Err(ErrorKind::Io(Arc::new(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "connection closed while awaiting reply",
                        )))
                        .into()));
                    }
                    return;
                }
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.negotiated.try_read().map(|n| n.state).unwrap_or(ConnectionState::Init)
    }

    /// Runs the initial handshake (`hello`/`isMaster`), negotiating wire version and compression.
    /// Transitions `Init -> HandshakeSent -> {Ready, Failed}`, per spec §3.
    pub async fn handshake(&self, preferred_compressors: &[Compressor]) -> Result<()> {
        crate::trace::debug!(connection_id = self.id, "handshake started");
        {
            let mut n = self.negotiated.write().await;
            n.state = ConnectionState::HandshakeSent;
        }

        let hello = bson::doc! {
            "hello": 1,
            "client": { "driver": { "name": "mongo-core", "version": env!("CARGO_PKG_VERSION") } },
        };

        let result = self.execute_raw(&hello, false, Compressor::Noop).await;
        let mut n = self.negotiated.write().await;
        match result {
            Ok(reply) => {
                let raw_version = reply.get_i32("maxWireVersion").unwrap_or(0);
                let max_wire_version = WireVersion::coerce(raw_version);
                let server_compressors: Vec<_> = reply
                    .get_array("compression")
                    .ok()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str())
                            .filter_map(|s| match s {
                                "snappy" => Some(wire::compression::CompressorId::Snappy),
                                "zlib" => Some(wire::compression::CompressorId::Zlib),
                                "zstd" => Some(wire::compression::CompressorId::Zstd),
                                _ => None,
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                n.max_wire_version = Some(max_wire_version);
                n.use_op_msg = max_wire_version.capabilities().contains(WireCapabilities::OP_MSG);
                n.compressor = Compressor::negotiate(preferred_compressors, &server_compressors);
                n.state = ConnectionState::Ready;
                crate::trace::debug!(
                    connection_id = self.id,
                    wire_version = %max_wire_version,
                    "handshake completed"
                );
                Ok(())
            }
            Err(e) => {
                n.state = ConnectionState::Failed;
                crate::trace::warn!(connection_id = self.id, error = %e, "handshake failed");
                Err(e)
            }
        }
    }

    /// Sends `command` and awaits its reply, per spec §4.2/§4.4. Used directly by the handshake;
    /// the command algebra (C4) layers typed `build`/`handle_response` on top of this.
    pub async fn execute_raw(
        &self,
        command: &Document,
        use_op_msg: bool,
        compressor: Compressor,
    ) -> Result<Document> {
        let request_id = self.request_ids.next();
        let mut body = Vec::new();
        command
            .to_writer(&mut body)
            .map_err(|e| Error::from(ErrorKind::Protocol(ProtocolError::Codec { message: e.to_string() })))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);

        {
            let mut writer = self.writer.lock().await;
            write_command(&mut *writer, request_id, use_op_msg, &body, compressor).await?;
        }

        rx.await.map_err(|_| {
            Error::from(ErrorKind::Io(Arc::new(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection closed while awaiting reply",
            ))))
        })?
    }

    /// Sends a command using this connection's negotiated wire format and compressor.
    pub async fn execute(&self, command: &Document) -> Result<Document> {
        let (use_op_msg, compressor) = {
            let n = self.negotiated.read().await;
            (n.use_op_msg, n.compressor)
        };
        self.execute_raw(command, use_op_msg, compressor).await
    }

    pub async fn max_wire_version(&self) -> Option<WireVersion> {
        self.negotiated.read().await.max_wire_version
    }

    pub(crate) fn is_stale(&self, pool_generation: u32) -> bool {
        self.generation != pool_generation
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[cfg(test)]
static NEXT_TEST_ADDRESS: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(1);

#[cfg(test)]
pub(crate) fn test_address() -> ServerAddress {
    let n = NEXT_TEST_ADDRESS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    ServerAddress::new("test", n as u16)
}

#[cfg(test)]
mod test {
    use super::*;

    async fn paired_connections() -> (Connection, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        let conn = Connection::new(1, test_address(), 0, AsyncStream::Duplex(client));
        (conn, server)
    }

    #[tokio::test]
    async fn handshake_transitions_init_to_ready_on_success() {
        let (conn, mut server) = paired_connections().await;
        assert_eq!(conn.state(), ConnectionState::Init);

        let server_task = tokio::spawn(async move {
            let incoming = read_message(&mut server).await.unwrap();
            let _request: Document = bson::from_slice(&incoming.document_bytes).unwrap();
            let reply = bson::doc! { "ok": 1.0, "maxWireVersion": 17 };
            let mut body = Vec::new();
            reply.to_writer(&mut body).unwrap();
            write_command(&mut server, incoming.header.request_id, false, &body, Compressor::Noop)
                .await
                .unwrap();
            server
        });

        conn.handshake(&[]).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert_eq!(conn.max_wire_version().await, Some(WireVersion::V7_0));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_failure_transitions_to_failed() {
        let (conn, server) = paired_connections().await;
        drop(server);
        let err = conn.handshake(&[]).await.unwrap_err();
        assert!(err.to_string().len() > 0);
        assert_eq!(conn.state(), ConnectionState::Failed);
    }
}
