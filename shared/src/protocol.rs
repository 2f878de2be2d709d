//! Wire messages exchanged between the race server and its clients.
//!
//! Every message travels as one frame over TCP: a 4-byte big-endian payload
//! length followed by the bincode encoding of a [`Message`]. The numeric code
//! enums keep the AC35 streaming codes so that logs and tooling stay readable.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload accepted on the wire
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Version number carried in race status messages
pub const RACE_STATUS_VERSION: u8 = 2;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] bincode::Error),

    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),

    #[error("unknown {kind} code {code}")]
    UnknownCode { kind: &'static str, code: u8 },
}

/// Declares an enum whose wire form is its AC35 numeric code.
macro_rules! wire_codes {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$variant_meta:meta])* $variant:ident = $code:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "u8", try_from = "u8")]
        pub enum $name {
            $($(#[$variant_meta])* $variant),+
        }

        impl $name {
            /// Numeric code used on the wire
            pub fn code(self) -> u8 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value.code()
            }
        }

        impl TryFrom<u8> for $name {
            type Error = ProtocolError;

            fn try_from(code: u8) -> Result<Self, Self::Error> {
                $name::from_code(code).ok_or(ProtocolError::UnknownCode {
                    kind: stringify!($name),
                    code,
                })
            }
        }
    };
}

wire_codes! {
    /// Overall phase of the race
    RaceStatus {
        NotActive = 0,
        Warning = 1,
        Preparatory = 2,
        Started = 3,
        Finished = 4,
        Retired = 5,
        Abandoned = 6,
        Postponed = 7,
        Terminated = 8,
        StartNotSet = 9,
        Prestart = 10,
    }
}

wire_codes! {
    /// Per-boat race progress
    BoatStatus {
        Undefined = 0,
        Prestart = 1,
        Racing = 2,
        Finished = 3,
        DidNotStart = 4,
        DidNotFinish = 5,
    }
}

wire_codes! {
    RequestToJoinKind {
        Spectator = 0,
        Participant = 1,
    }
}

wire_codes! {
    JoinAcceptanceStatus {
        JoinSuccessfulSpectator = 0,
        JoinSuccessfulParticipant = 1,
        JoinFailure = 0x10,
        ServerFull = 0x11,
    }
}

wire_codes! {
    /// Control input sent by a participant
    BoatAction {
        Vmg = 1,
        SailsIn = 2,
        SailsOut = 3,
        TackGybe = 4,
        Upwind = 5,
        Downwind = 6,
        ZoomIn = 7,
        ZoomOut = 8,
        ToggleSails = 9,
    }
}

wire_codes! {
    /// What a location message describes
    DeviceKind {
        RacingYacht = 1,
        Mark = 3,
    }
}

wire_codes! {
    RaceType {
        MatchRace = 1,
        FleetRace = 2,
    }
}

wire_codes! {
    YachtEventCode {
        Collision = 1,
    }
}

wire_codes! {
    /// Descriptive document carried by a [`Document`] message
    DocumentKind {
        Regatta = 5,
        Race = 6,
        Boats = 7,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoatLocation {
    pub source_id: u32,
    /// Incrementing across every location message the server sends
    pub sequence: u32,
    pub device: DeviceKind,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: f64,
    pub speed_knots: f64,
    /// Milliseconds since the unix epoch
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoatStatusEntry {
    pub source_id: u32,
    pub status: BoatStatus,
    pub leg_number: u32,
    pub estimated_time_at_next_mark: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceStatusMessage {
    pub version: u8,
    pub timestamp: i64,
    pub race_id: u32,
    pub status: RaceStatus,
    pub start_time: i64,
    pub wind_direction: f64,
    pub wind_speed_knots: f64,
    pub race_type: RaceType,
    pub boats: Vec<BoatStatusEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YachtEvent {
    pub timestamp: i64,
    pub sequence: u32,
    pub race_id: u32,
    pub source_id: u32,
    pub event: YachtEventCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub kind: DocumentKind,
    /// Revision of the source data the body was rendered from
    pub sequence: u32,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Heartbeat {
        sequence: u32,
    },
    RequestToJoin {
        kind: RequestToJoinKind,
    },
    JoinAcceptance {
        status: JoinAcceptanceStatus,
        source_id: u32,
    },
    BoatAction {
        action: BoatAction,
    },
    BoatLocation(BoatLocation),
    BoatState {
        source_id: u32,
        health: u8,
    },
    RaceStatus(RaceStatusMessage),
    YachtEvent(YachtEvent),
    Document(Document),
}

impl Message {
    /// Short name for log output
    pub fn name(&self) -> &'static str {
        match self {
            Message::Heartbeat { .. } => "heartbeat",
            Message::RequestToJoin { .. } => "request-to-join",
            Message::JoinAcceptance { .. } => "join-acceptance",
            Message::BoatAction { .. } => "boat-action",
            Message::BoatLocation(_) => "boat-location",
            Message::BoatState { .. } => "boat-state",
            Message::RaceStatus(_) => "race-status",
            Message::YachtEvent(_) => "yacht-event",
            Message::Document(_) => "document",
        }
    }
}

/// Serializes a message into a length-prefixed frame
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let payload = bincode::serialize(message).map_err(ProtocolError::Encode)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub fn decode_message(payload: &[u8]) -> Result<Message, ProtocolError> {
    bincode::deserialize(payload).map_err(ProtocolError::Decode)
}

/// Reads one frame payload.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_status() -> RaceStatusMessage {
        RaceStatusMessage {
            version: RACE_STATUS_VERSION,
            timestamp: 1_500_000_000_000,
            race_id: 17070101,
            status: RaceStatus::Warning,
            start_time: 1_500_000_120_000,
            wind_direction: 300.0,
            wind_speed_knots: 12.0,
            race_type: RaceType::FleetRace,
            boats: vec![BoatStatusEntry {
                source_id: 101,
                status: BoatStatus::Prestart,
                leg_number: 0,
                estimated_time_at_next_mark: 1_500_000_000_000,
            }],
        }
    }

    #[test]
    fn test_codes_match_wire_values() {
        assert_eq!(RaceStatus::Prestart.code(), 10);
        assert_eq!(RaceStatus::from_code(3), Some(RaceStatus::Started));
        assert_eq!(JoinAcceptanceStatus::ServerFull.code(), 0x11);
        assert_eq!(BoatAction::from_code(4), Some(BoatAction::TackGybe));
        assert_eq!(BoatAction::from_code(42), None);
        assert_eq!(DeviceKind::Mark.code(), 3);
    }

    #[test]
    fn test_enum_serializes_as_code() {
        let bytes = bincode::serialize(&JoinAcceptanceStatus::JoinFailure).unwrap();
        assert_eq!(bytes, vec![0x10]);
    }

    #[test]
    fn test_unknown_code_fails_to_decode() {
        let mut frame = bincode::serialize(&Message::RequestToJoin {
            kind: RequestToJoinKind::Participant,
        })
        .unwrap();
        let last = frame.len() - 1;
        frame[last] = 200;

        match decode_message(&frame) {
            Err(ProtocolError::Decode(_)) => {}
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_has_length_prefix() {
        let message = Message::Heartbeat { sequence: 9 };
        let frame = encode_frame(&message).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;

        assert_eq!(len, frame.len() - 4);
        assert_eq!(decode_message(&frame[4..]).unwrap(), message);
    }

    #[tokio::test]
    async fn test_stream_read_write() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let status = Message::RaceStatus(sample_status());

        write_message(&mut client, &Message::Heartbeat { sequence: 1 })
            .await
            .unwrap();
        write_message(&mut client, &status).await.unwrap();
        drop(client);

        let first = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(decode_message(&first).unwrap(), Message::Heartbeat { sequence: 1 });
        let second = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(decode_message(&second).unwrap(), status);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes())
            .await
            .unwrap();

        match read_frame(&mut server).await {
            Err(ProtocolError::FrameTooLarge(len)) => assert_eq!(len, MAX_FRAME_LEN + 1),
            other => panic!("expected oversized frame error, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let mut stream = tokio_test::io::Builder::new()
            .read(&8u32.to_be_bytes())
            .read(&[1, 2, 3])
            .build();

        match tokio_test::block_on(read_frame(&mut stream)) {
            Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected an I/O error, got {:?}", other),
        }
    }

    #[test]
    fn test_message_names() {
        assert_eq!(Message::Heartbeat { sequence: 0 }.name(), "heartbeat");
        assert_eq!(Message::RaceStatus(sample_status()).name(), "race-status");
    }
}
