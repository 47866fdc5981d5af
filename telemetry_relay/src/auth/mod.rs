// src/auth/mod.rs
pub mod handshake;

pub use handshake::{AuthState, Authenticator};

use crate::store::StationCredential;
use station_protocol::Timestamp;
use uuid::Uuid;

/// Authenticated binding of one live connection to a station.
/// Owned by that connection's relay; never shared.
#[derive(Debug, Clone)]
pub struct Session {
    pub station: StationCredential,
    pub entry: Uuid,
    pub peer: String,
    pub since: Timestamp,
}

impl Session {
    pub fn station_id(&self) -> &str {
        &self.station.id
    }
}
