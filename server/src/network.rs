//! TCP connection handling for the race server
//!
//! Every accepted connection runs as its own task with a handful of helpers:
//! a reader that decodes inbound frames, a writer that drains the outbound
//! queue, a heartbeat, and once the client has joined, a snapshot forwarder
//! and a command translator. When either the reader or the writer stops, the
//! connection is torn down and any identity it held is released.

use crate::client_manager::ClientManager;
use crate::commands::{Command, CommandSender};
use crate::error::{AllocationError, HandshakeError};
use crate::heartbeat::run_heartbeat;
use crate::race::Race;
use crate::snapshot::Snapshot;
use log::{debug, error, info, trace, warn};
use shared::protocol::{decode_message, read_frame, write_message};
use shared::{JoinAcceptanceStatus, Message, ProtocolError, RequestToJoinKind, HEARTBEAT_PERIOD_MS};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::{JoinHandle, JoinSet};

/// Messages buffered per connection before the snapshot forwarder waits
pub const OUTBOUND_QUEUE_LEN: usize = 1024;
/// Snapshots buffered per subscriber before a slow connection starts skipping
pub const SNAPSHOT_QUEUE_LEN: usize = 64;

pub type SnapshotSender = broadcast::Sender<Arc<Snapshot>>;

type Inbound = mpsc::UnboundedReceiver<Result<Message, ProtocolError>>;

/// Shared handles every connection task needs
#[derive(Clone)]
struct SessionContext {
    race: Arc<RwLock<Race>>,
    clients: Arc<RwLock<ClientManager>>,
    commands: CommandSender,
    snapshots: SnapshotSender,
    heartbeat_period: Duration,
}

/// Accepts race clients and runs one session per connection
pub struct Server {
    listener: TcpListener,
    context: SessionContext,
}

impl Server {
    pub async fn bind(
        addr: &str,
        race: Arc<RwLock<Race>>,
        commands: CommandSender,
        snapshots: SnapshotSender,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            context: SessionContext {
                race,
                clients: Arc::new(RwLock::new(ClientManager::new())),
                commands,
                snapshots,
                heartbeat_period: Duration::from_millis(HEARTBEAT_PERIOD_MS),
            },
        })
    }

    pub fn with_heartbeat_period(mut self, period: Duration) -> Self {
        self.context.heartbeat_period = period;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` completes, then aborts every session
    pub async fn serve<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            sessions.spawn(run_session(stream, addr, self.context.clone()));
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                },

                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!("Connection task panicked: {}", e);
                        }
                    }
                },

                _ = &mut shutdown => {
                    info!("Server shutting down with {} open connections", sessions.len());
                    break;
                }
            }
        }

        sessions.shutdown().await;
    }
}

/// Helper tasks of one connection; aborted together when dropped
#[derive(Default)]
struct SessionTasks(Vec<JoinHandle<()>>);

impl SessionTasks {
    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.0.push(tokio::spawn(task));
    }
}

impl Drop for SessionTasks {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

async fn run_session(stream: TcpStream, addr: SocketAddr, context: SessionContext) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", addr, e);
    }
    let client_id = context.clients.write().await.add_client(addr);

    let (read_half, write_half) = stream.into_split();
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_LEN);
    let (closed_tx, mut closed_rx) = mpsc::channel(2);

    let mut tasks = SessionTasks::default();
    tasks.spawn(read_messages(read_half, inbound_tx, closed_tx.clone()));
    tasks.spawn(write_messages(write_half, outbound_rx, closed_tx));
    tasks.spawn(run_heartbeat(outbound_tx.clone(), context.heartbeat_period));

    match handshake(client_id, &mut inbound_rx, &outbound_tx, &context).await {
        Ok(source_id) => {
            tasks.spawn(forward_snapshots(
                client_id,
                context.snapshots.subscribe(),
                outbound_tx,
            ));
            tasks.spawn(translate_commands(
                client_id,
                source_id,
                inbound_rx,
                context.commands.clone(),
            ));

            if let Some(side) = closed_rx.recv().await {
                debug!("Client {} {} stopped", client_id, side);
            }
        }
        Err(e) => warn!("Client {} did not join: {}", client_id, e),
    }

    drop(tasks);

    let mut clients = context.clients.write().await;
    {
        let mut race = context.race.write().await;
        clients.release(client_id, &mut race);
    }
    clients.remove_client(client_id);
}

/// Decodes inbound frames until the stream ends or breaks.
///
/// A payload that fails to decode is passed on as an error and reading
/// continues; an oversized frame or an I/O error ends the connection.
async fn read_messages(
    mut reader: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<Result<Message, ProtocolError>>,
    closed: mpsc::Sender<&'static str>,
) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(payload)) => {
                if inbound.send(decode_message(&payload)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = inbound.send(Err(e));
                break;
            }
        }
    }
    let _ = closed.send("reader").await;
}

async fn write_messages(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Message>,
    closed: mpsc::Sender<&'static str>,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = write_message(&mut writer, &message).await {
            debug!("Failed to send {}: {}", message.name(), e);
            break;
        }
    }
    let _ = closed.send("writer").await;
}

/// Waits for a join request and answers it.
///
/// Returns the granted identity, or 0 for a spectator or a refused participant.
async fn handshake(
    client_id: u64,
    inbound: &mut Inbound,
    outbound: &mpsc::Sender<Message>,
    context: &SessionContext,
) -> Result<u32, HandshakeError> {
    let kind = loop {
        match inbound.recv().await {
            None => return Err(HandshakeError::Disconnected),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::RequestToJoin { kind })) => break kind,
            Some(Ok(other)) => debug!(
                "Client {} sent {} before joining; ignored",
                client_id,
                other.name()
            ),
        }
    };

    let (status, source_id) = match kind {
        RequestToJoinKind::Spectator => (JoinAcceptanceStatus::JoinSuccessfulSpectator, 0),
        RequestToJoinKind::Participant => {
            let mut clients = context.clients.write().await;
            let mut race = context.race.write().await;
            match clients.allocate(client_id, &mut race) {
                Ok(source_id) => (JoinAcceptanceStatus::JoinSuccessfulParticipant, source_id),
                Err(e) => {
                    info!("Client {} refused: {}", client_id, e);
                    (acceptance_for(e), 0)
                }
            }
        }
    };

    outbound
        .send(Message::JoinAcceptance { status, source_id })
        .await
        .map_err(|_| HandshakeError::OutboundClosed)?;
    Ok(source_id)
}

fn acceptance_for(error: AllocationError) -> JoinAcceptanceStatus {
    match error {
        AllocationError::RosterExhausted => JoinAcceptanceStatus::ServerFull,
        AllocationError::JoiningClosed(_) | AllocationError::UnknownSourceId(_) => {
            JoinAcceptanceStatus::JoinFailure
        }
    }
}

/// Copies every snapshot onto the outbound queue.
///
/// Documents are only sent when the snapshot's revision differs from the last
/// one this connection sent. A connection that falls behind skips the
/// snapshots it missed.
async fn forward_snapshots(
    client_id: u64,
    mut snapshots: broadcast::Receiver<Arc<Snapshot>>,
    outbound: mpsc::Sender<Message>,
) {
    let mut sent_revision = None;

    loop {
        let snapshot = match snapshots.recv().await {
            Ok(snapshot) => snapshot,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Client {} fell behind and skipped {} snapshots", client_id, skipped);
                continue;
            }
            Err(RecvError::Closed) => {
                debug!("Snapshot stream closed for client {}", client_id);
                return;
            }
        };

        if sent_revision != Some(snapshot.revision) {
            for document in snapshot.documents.iter() {
                if outbound.send(Message::Document(document.clone())).await.is_err() {
                    return;
                }
            }
            sent_revision = Some(snapshot.revision);
        }

        for message in &snapshot.messages {
            if outbound.send(message.clone()).await.is_err() {
                return;
            }
        }
    }
}

/// Turns a participant's boat actions into commands for the driver
async fn translate_commands(
    client_id: u64,
    source_id: u32,
    mut inbound: Inbound,
    commands: CommandSender,
) {
    while let Some(message) = inbound.recv().await {
        match message {
            Ok(Message::BoatAction { action }) if source_id != 0 => {
                trace!("Boat {} requested {:?}", source_id, action);
                if commands.send(Command::action(source_id, action)).is_err() {
                    debug!("Command queue closed; client {} stops translating", client_id);
                    return;
                }
            }
            Ok(Message::BoatAction { action }) => {
                debug!("Client {} is spectating; {:?} ignored", client_id, action)
            }
            Ok(Message::Heartbeat { .. }) => {}
            Ok(other) => debug!("Client {} sent unexpected {}", client_id, other.name()),
            Err(e) => warn!("Client {} sent a malformed message: {}", client_id, e),
        }
    }
}
