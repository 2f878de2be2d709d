//! Types shared between the race server and race clients: the wire protocol
//! and the geographic primitives both sides compute with.

pub mod geo;
pub mod protocol;

pub use geo::{Bearing, GpsCoordinate};
pub use protocol::{
    BoatAction, BoatLocation, BoatStatus, BoatStatusEntry, DeviceKind, Document, DocumentKind,
    JoinAcceptanceStatus, Message, ProtocolError, RaceStatus, RaceStatusMessage, RaceType,
    RequestToJoinKind, YachtEvent, YachtEventCode,
};

pub const DEFAULT_PORT: u16 = 4942;
pub const HEARTBEAT_PERIOD_MS: u64 = 2500;
pub const FRAME_PERIOD_MS: u64 = 16;

/// Current wall-clock time in milliseconds since the unix epoch
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
