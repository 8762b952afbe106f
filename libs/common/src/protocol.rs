//! Wire-format messages exchanged between globe clients and the presence relay.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

const IDENTITY_PREFIX: &str = "conn";

/// Opaque per-connection token assigned by the server (`conn_` prefixed ULID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Allocate a fresh identity. Never derived from client-supplied data.
    pub fn generate() -> Self {
        Self(format!("{IDENTITY_PREFIX}_{}", Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

pub const MAX_LATITUDE: f64 = 90.0;
pub const MAX_LONGITUDE: f64 = 180.0;

/// A validated (latitude, longitude) pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    lat: f64,
    lng: f64,
}

impl Position {
    /// Validate shape only: finite and inside the degree bounds.
    pub fn new(lat: f64, lng: f64) -> Result<Self, ProtocolError> {
        let lat_ok = lat.is_finite() && (-MAX_LATITUDE..=MAX_LATITUDE).contains(&lat);
        let lng_ok = lng.is_finite() && (-MAX_LONGITUDE..=MAX_LONGITUDE).contains(&lng);
        if lat_ok && lng_ok {
            Ok(Self { lat, lng })
        } else {
            Err(ProtocolError::OutOfRange { lat, lng })
        }
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an inbound frame was discarded.
#[derive(Debug)]
pub enum ProtocolError {
    /// Not JSON, unknown `type`, or missing/mistyped fields.
    Malformed(serde_json::Error),
    /// Coordinates outside [-90, 90] x [-180, 180] or not finite.
    OutOfRange { lat: f64, lng: f64 },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(err) => write!(f, "malformed message: {err}"),
            Self::OutOfRange { lat, lng } => {
                write!(f, "coordinates out of range: lat={lat}, lng={lng}")
            }
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Malformed(err) => Some(err),
            Self::OutOfRange { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err)
    }
}

// ---------------------------------------------------------------------------
// Client -> Server message
// ---------------------------------------------------------------------------

/// A message received from the client. Used for both the first and every
/// subsequent position report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    AddMarkerRequest { lat: f64, lng: f64 },
}

impl ClientMessage {
    pub fn add_marker_request(position: Position) -> Self {
        Self::AddMarkerRequest {
            lat: position.lat(),
            lng: position.lng(),
        }
    }

    /// Parse a text frame and validate its coordinates.
    pub fn parse_position(text: &str) -> Result<Position, ProtocolError> {
        match serde_json::from_str::<ClientMessage>(text)? {
            Self::AddMarkerRequest { lat, lng } => Position::new(lat, lng),
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> Client message
// ---------------------------------------------------------------------------

/// Payload of an `add-marker` event. Coordinates are omitted while the member
/// has not reported a position yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerPosition {
    pub id: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

impl MarkerPosition {
    pub fn new(id: Identity, position: Option<Position>) -> Self {
        Self {
            id,
            lat: position.map(|p| p.lat()),
            lng: position.map(|p| p.lng()),
        }
    }

    /// The reported location, if both coordinates are present.
    pub fn position(&self) -> Option<Position> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Position::new(lat, lng).ok(),
            _ => None,
        }
    }
}

/// A message sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First frame on every joined connection: the identity the server
    /// assigned to it, so the client can recognise its own marker.
    Welcome { id: Identity },
    AddMarker { position: MarkerPosition },
    RemoveMarker { id: Identity },
}

impl ServerMessage {
    pub fn welcome(id: Identity) -> Self {
        Self::Welcome { id }
    }

    pub fn add_marker(id: Identity, position: Option<Position>) -> Self {
        Self::AddMarker {
            position: MarkerPosition::new(id, position),
        }
    }

    pub fn remove_marker(id: Identity) -> Self {
        Self::RemoveMarker { id }
    }

    /// Identity the event is about.
    pub fn subject(&self) -> &Identity {
        match self {
            Self::AddMarker { position } => &position.id,
            Self::Welcome { id } | Self::RemoveMarker { id } => id,
        }
    }
}
