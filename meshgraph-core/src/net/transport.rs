/*
    transport.rs - TCP peer transport

    Dials, listens, and moves length-prefixed frames. Knows nothing about
    sync semantics; it deals only in bytes and connection ids.

    Per connection:
    - a reader task that decodes frames and emits TransportEvents
    - a writer task fed by a bounded per-connection queue, so one slow
      peer backs up its own queue and nobody else's

    Frames are [len: u32 LE][payload]. Ordering is preserved within one
    connection only.
*/

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Refuse frames larger than this
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Capacity of each connection's outbound queue
const SEND_QUEUE_DEPTH: usize = 256;

/// Errors from the transport layer
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dial timed out: {0}")]
    DialTimeout(SocketAddr),

    #[error("Unknown connection: {0}")]
    UnknownConnection(u64),
}

/// Events emitted to the transport's owner
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A connection is up; `outbound` is true when we dialed it
    Connected { conn_id: u64, addr: SocketAddr, outbound: bool },

    /// One complete frame arrived
    Frame { conn_id: u64, bytes: Vec<u8> },

    /// The connection closed or failed
    Disconnected { conn_id: u64 },
}

/// TCP transport. Clone-free; share via Arc.
pub struct Transport {
    event_tx: mpsc::Sender<TransportEvent>,
    senders: Arc<Mutex<HashMap<u64, mpsc::Sender<Vec<u8>>>>>,
    next_conn_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl Transport {
    /// Create a transport and the event stream its owner consumes
    pub fn new() -> (Self, mpsc::Receiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (shutdown_tx, _) = watch::channel(false);
        let transport = Transport {
            event_tx,
            senders: Arc::new(Mutex::new(HashMap::new())),
            next_conn_id: AtomicU64::new(1),
            shutdown_tx,
        };
        (transport, event_rx)
    }

    /// Start accepting inbound connections; returns the bound address.
    /// The accept loop runs until `shutdown`, which drops the listener
    /// and releases the port.
    pub async fn listen(self: &Arc<Self>, addr: SocketAddr) -> Result<SocketAddr, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening for peers");

        let transport = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            if *shutdown_rx.borrow() {
                return;
            }
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, peer_addr)) => {
                            transport.register(stream, peer_addr, false).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    },
                    _ = shutdown_rx.changed() => {
                        debug!(%local_addr, "listener stopped");
                        break;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Stop accepting and close every live connection. Reader tasks emit
    /// their Disconnected events as the sockets close.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.clear();
    }

    /// Dial a peer; resolves to the connection id once established
    pub async fn dial(
        self: &Arc<Self>,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<u64, TransportError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::DialTimeout(addr))??;
        Ok(self.register(stream, addr, true).await)
    }

    /// Queue a frame for a connection. Fire-and-forget: a full queue drops
    /// the frame (anti-entropy repairs the peer on its next handshake) and
    /// an unknown connection is reported as an error.
    pub fn send(&self, conn_id: u64, bytes: Vec<u8>) -> Result<(), TransportError> {
        let sender = {
            let senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
            senders.get(&conn_id).cloned()
        };
        let sender = sender.ok_or(TransportError::UnknownConnection(conn_id))?;

        if let Err(e) = sender.try_send(bytes) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(conn_id, "outbound queue full, dropping frame");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    return Err(TransportError::UnknownConnection(conn_id));
                }
            }
        }
        Ok(())
    }

    /// Close a connection. The reader task emits the Disconnected event.
    pub fn close(&self, conn_id: u64) {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.remove(&conn_id);
    }

    async fn register(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr, outbound: bool) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let (mut read_half, mut write_half) = stream.into_split();

        let (send_tx, mut send_rx) = mpsc::channel::<Vec<u8>>(SEND_QUEUE_DEPTH);
        {
            let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
            senders.insert(conn_id, send_tx);
        }
        debug!(conn_id, %addr, outbound, "connection registered");

        // Writer: drains this connection's queue only
        tokio::spawn(async move {
            while let Some(bytes) = send_rx.recv().await {
                let len = (bytes.len() as u32).to_le_bytes();
                if write_half.write_all(&len).await.is_err()
                    || write_half.write_all(&bytes).await.is_err()
                {
                    break;
                }
            }
            // Queue closed or write failed; dropping the half closes the
            // socket and wakes the peer's reader
        });

        // Reader: frames in, events out
        let event_tx = self.event_tx.clone();
        let senders = Arc::clone(&self.senders);
        tokio::spawn(async move {
            let _ = event_tx
                .send(TransportEvent::Connected { conn_id, addr, outbound })
                .await;

            loop {
                let mut len_buf = [0u8; 4];
                if read_half.read_exact(&mut len_buf).await.is_err() {
                    break;
                }
                let len = u32::from_le_bytes(len_buf) as usize;
                if len > MAX_FRAME_LEN {
                    warn!(conn_id, len, "oversized frame, closing connection");
                    break;
                }

                let mut bytes = vec![0u8; len];
                if read_half.read_exact(&mut bytes).await.is_err() {
                    break;
                }
                if event_tx.send(TransportEvent::Frame { conn_id, bytes }).await.is_err() {
                    break;
                }
            }

            {
                let mut senders = senders.lock().unwrap_or_else(|e| e.into_inner());
                senders.remove(&conn_id);
            }
            let _ = event_tx.send(TransportEvent::Disconnected { conn_id }).await;
        });

        conn_id
    }
}
