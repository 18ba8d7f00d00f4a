/*
    mesh - Node orchestrator

    Wires the graph engine, sync protocol and transport into one runnable
    peer: a single event loop shuttles transport events into the protocol,
    protocol output back to the wire, local changes out as gossip, and
    schedules redials with exponential backoff when a dialed peer drops.
*/

use crate::config::{NodeConfig, StoreBackend};
use crate::graph::clock::LamportClock;
use crate::graph::engine::GraphEngine;
use crate::graph::model::DeltaTuple;
use crate::graph::store::{DiskStore, MemoryStore, NodeStore, StoreError};
use crate::net::backoff::Backoff;
use crate::net::transport::{Transport, TransportError, TransportEvent};
use crate::sync::message::SyncMessage;
use crate::sync::protocol::{Outgoing, SyncError, SyncProtocol};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Errors from building or running a mesh node
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Internal control messages for the event loop
enum Control {
    Dial(SocketAddr),
    Dialed(SocketAddr, u64),
    DialFailed(SocketAddr),
}

/// Requests the event loop to stop
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// One runnable peer
pub struct MeshNode {
    config: NodeConfig,
    engine: Arc<GraphEngine>,
    protocol: Arc<SyncProtocol>,
    transport: Arc<Transport>,
    events: mpsc::Receiver<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<DeltaTuple>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    bound: bool,
}

impl MeshNode {
    /// Build a node from configuration. Nothing touches the network until
    /// `bind` / `run`.
    pub fn new(config: NodeConfig) -> Result<Self, MeshError> {
        let store: Arc<dyn NodeStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Disk => Arc::new(DiskStore::open(&config.node.data_dir)?),
        };

        let engine = Arc::new(GraphEngine::new(
            config.node.id.clone(),
            store,
            Arc::new(LamportClock::new()),
        )?);
        let outbound = engine
            .take_outbound()
            .expect("fresh engine always has an outbound queue");

        let protocol = Arc::new(SyncProtocol::new(engine.clone()));
        let (transport, events) = Transport::new();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(node_id = %config.node.id, "mesh node created");
        Ok(MeshNode {
            config,
            engine,
            protocol,
            transport: Arc::new(transport),
            events,
            outbound,
            control_tx,
            control_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            bound: false,
        })
    }

    /// The local graph API: put / get / subscribe
    pub fn engine(&self) -> Arc<GraphEngine> {
        self.engine.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: self.shutdown_tx.clone() }
    }

    /// Bind the listen address, if one is configured. Returns the actual
    /// bound address, useful when the configured port is 0.
    pub async fn bind(&mut self) -> Result<Option<SocketAddr>, MeshError> {
        if let Some(addr) = self.config.network.listen_addr {
            let bound = self.transport.listen(addr).await?;
            self.bound = true;
            return Ok(Some(bound));
        }
        Ok(None)
    }

    /// Run the event loop until shutdown. Peer failures are never fatal;
    /// they only schedule reconnects.
    pub async fn run(mut self) -> Result<(), MeshError> {
        if !self.bound {
            self.bind().await?;
        }

        for addr in self.config.network.peers.clone() {
            let _ = self.control_tx.send(Control::Dial(addr));
        }

        // Connections we dialed, for redial on disconnect
        let mut dialed: HashMap<u64, SocketAddr> = HashMap::new();
        let mut backoffs: HashMap<SocketAddr, Backoff> = HashMap::new();

        loop {
            tokio::select! {
                result = self.shutdown_rx.changed() => {
                    if result.is_err() || *self.shutdown_rx.borrow() {
                        info!("mesh node shutting down");
                        break;
                    }
                }
                Some(event) = self.events.recv() => {
                    self.handle_transport_event(event, &mut dialed);
                }
                Some(tuple) = self.outbound.recv() => {
                    let outgoing = self.protocol.on_local_change(tuple);
                    self.send_all(outgoing);
                }
                Some(control) = self.control_rx.recv() => {
                    self.handle_control(control, &mut dialed, &mut backoffs);
                }
            }
        }

        // Stops the accept loop and closes every connection, releasing the
        // listen port
        self.transport.shutdown();
        Ok(())
    }

    fn handle_transport_event(
        &self,
        event: TransportEvent,
        dialed: &mut HashMap<u64, SocketAddr>,
    ) {
        match event {
            TransportEvent::Connected { conn_id, addr, outbound } => {
                info!(conn_id, %addr, outbound, "peer connected");
                match self.protocol.on_connected(conn_id) {
                    Ok(outgoing) => self.send_all(outgoing),
                    Err(e) => error!(conn_id, error = %e, "handshake setup failed"),
                }
            }
            TransportEvent::Frame { conn_id, bytes } => match SyncMessage::decode(&bytes) {
                Ok(message) => match self.protocol.on_message(conn_id, message) {
                    Ok(outgoing) => self.send_all(outgoing),
                    // Recoverable: the store stays consistent, other
                    // connections keep flowing
                    Err(e) => error!(conn_id, error = %e, "failed to process message"),
                },
                Err(e) => {
                    warn!(conn_id, error = %e, "undecodable frame, closing connection");
                    self.transport.close(conn_id);
                }
            },
            TransportEvent::Disconnected { conn_id } => {
                self.protocol.on_disconnected(conn_id);
                if let Some(addr) = dialed.remove(&conn_id) {
                    let _ = self.control_tx.send(Control::DialFailed(addr));
                }
            }
        }
    }

    fn handle_control(
        &self,
        control: Control,
        dialed: &mut HashMap<u64, SocketAddr>,
        backoffs: &mut HashMap<SocketAddr, Backoff>,
    ) {
        match control {
            Control::Dial(addr) => {
                let transport = self.transport.clone();
                let control_tx = self.control_tx.clone();
                let timeout = self.config.network.connect_timeout;
                tokio::spawn(async move {
                    match transport.dial(addr, timeout).await {
                        Ok(conn_id) => {
                            let _ = control_tx.send(Control::Dialed(addr, conn_id));
                        }
                        Err(e) => {
                            debug!(%addr, error = %e, "dial failed");
                            let _ = control_tx.send(Control::DialFailed(addr));
                        }
                    }
                });
            }
            Control::Dialed(addr, conn_id) => {
                dialed.insert(conn_id, addr);
                if let Some(backoff) = backoffs.get_mut(&addr) {
                    backoff.reset();
                }
            }
            Control::DialFailed(addr) => {
                let backoff = backoffs
                    .entry(addr)
                    .or_insert_with(|| Backoff::new(self.config.network.backoff.clone()));
                let delay = backoff.next_delay();
                debug!(%addr, attempts = backoff.attempts(), ?delay, "scheduling redial");

                let control_tx = self.control_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = control_tx.send(Control::Dial(addr));
                });
            }
        }
    }

    fn send_all(&self, outgoing: Vec<Outgoing>) {
        for (conn_id, message) in outgoing {
            match message.encode() {
                Ok(bytes) => {
                    // Races with disconnects are expected; the session is
                    // already gone when send reports unknown connection
                    if let Err(e) = self.transport.send(conn_id, bytes) {
                        debug!(conn_id, error = %e, "send skipped");
                    }
                }
                Err(e) => error!(conn_id, error = %e, "failed to encode message"),
            }
        }
    }
}
