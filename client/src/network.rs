//! Client side of the race connection: the join handshake, then a stream of
//! server messages and a way to send boat actions.

use log::{debug, info, warn};
use shared::protocol::{decode_message, read_frame, write_message};
use shared::{BoatAction, JoinAcceptanceStatus, Message, ProtocolError, RequestToJoinKind};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("server closed the connection during the handshake")]
    Disconnected,

    #[error("boat actions need a participant identity")]
    NotParticipant,
}

/// An established connection to a race server
pub struct RaceClient {
    server_addr: SocketAddr,
    writer: OwnedWriteHalf,
    inbound: mpsc::UnboundedReceiver<Result<Message, ProtocolError>>,
    reader: JoinHandle<()>,
    acceptance: JoinAcceptanceStatus,
    source_id: u32,
}

impl RaceClient {
    /// Connects and completes the join handshake.
    ///
    /// A refused participant is not an error: the server keeps the connection
    /// open as a spectator and [`RaceClient::acceptance`] reports why.
    pub async fn connect(server_addr: &str, kind: RequestToJoinKind) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(server_addr).await?;
        let server_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        info!("Connected to {}, requesting to join as {:?}", server_addr, kind);

        let (mut read_half, mut write_half) = stream.into_split();
        write_message(&mut write_half, &Message::RequestToJoin { kind }).await?;

        let (acceptance, source_id) = loop {
            let payload = read_frame(&mut read_half)
                .await?
                .ok_or(ClientError::Disconnected)?;
            match decode_message(&payload)? {
                Message::JoinAcceptance { status, source_id } => break (status, source_id),
                other => debug!("Ignoring {} before the join acceptance", other.name()),
            }
        };

        match acceptance {
            JoinAcceptanceStatus::JoinSuccessfulParticipant => {
                info!("Joined as boat {}", source_id)
            }
            JoinAcceptanceStatus::JoinSuccessfulSpectator => info!("Joined as a spectator"),
            refused => warn!("Participation refused ({:?}); spectating instead", refused),
        }

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_messages(read_half, inbound_tx));

        Ok(RaceClient {
            server_addr,
            writer: write_half,
            inbound,
            reader,
            acceptance,
            source_id,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn acceptance(&self) -> JoinAcceptanceStatus {
        self.acceptance
    }

    /// Granted identity; 0 when spectating
    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    pub fn is_participant(&self) -> bool {
        self.acceptance == JoinAcceptanceStatus::JoinSuccessfulParticipant
    }

    pub async fn send_action(&mut self, action: BoatAction) -> Result<(), ClientError> {
        if !self.is_participant() {
            return Err(ClientError::NotParticipant);
        }
        write_message(&mut self.writer, &Message::BoatAction { action }).await?;
        Ok(())
    }

    /// Waits for the next server message; `None` once the server has closed the connection.
    ///
    /// Safe to use as a `tokio::select!` branch.
    pub async fn next_message(&mut self) -> Result<Option<Message>, ClientError> {
        match self.inbound.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}

impl Drop for RaceClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_messages(
    mut reader: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<Result<Message, ProtocolError>>,
) {
    loop {
        let message = match read_frame(&mut reader).await {
            Ok(Some(payload)) => decode_message(&payload),
            Ok(None) => break,
            Err(e) => {
                let _ = inbound.send(Err(e));
                break;
            }
        };
        if inbound.send(message).is_err() {
            break;
        }
    }
    debug!("Server stream ended");
}
