//! Core types for the subscription client.

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Longest identity accepted from storage or the server.
pub const MAX_IDENTITY_LEN: usize = 128;

/// Token identifying one logical subscription at the server.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionIdentity(String);

impl ConnectionIdentity {
    /// Mint a random identity (UUID v4, canonical hyphenated form).
    pub fn random() -> Self {
        ConnectionIdentity(Uuid::new_v4().hyphenated().to_string())
    }

    /// Validate an identity read from storage or issued by the server.
    ///
    /// Well-formed means non-empty, at most [`MAX_IDENTITY_LEN`] bytes, and
    /// printable ASCII with no whitespace.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(ClientError::InvalidIdentity("identity is empty".into()));
        }
        if value.len() > MAX_IDENTITY_LEN {
            return Err(ClientError::InvalidIdentity(format!(
                "identity is {} bytes, limit is {}",
                value.len(),
                MAX_IDENTITY_LEN
            )));
        }
        if !value.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(ClientError::InvalidIdentity(
                "identity contains whitespace or non-printable characters".into(),
            ));
        }
        Ok(ConnectionIdentity(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionIdentity({})", self.0)
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct EpochMillis(pub i64);

impl fmt::Debug for EpochMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EpochMillis({})", self.0)
    }
}

impl fmt::Display for EpochMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Coded transit mode carried by each observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitMode {
    #[default]
    Unknown,
    Car,
    Truck,
    Bus,
    Motorcycle,
}

impl TransitMode {
    /// Decode the wire code. Unrecognised codes decode as `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => TransitMode::Car,
            2 => TransitMode::Truck,
            3 => TransitMode::Bus,
            4 => TransitMode::Motorcycle,
            _ => TransitMode::Unknown,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            TransitMode::Unknown => 0,
            TransitMode::Car => 1,
            TransitMode::Truck => 2,
            TransitMode::Bus => 3,
            TransitMode::Motorcycle => 4,
        }
    }
}

impl fmt::Display for TransitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitMode::Unknown => "UNKNOWN",
            TransitMode::Car => "CAR",
            TransitMode::Truck => "TRUCK",
            TransitMode::Bus => "BUS",
            TransitMode::Motorcycle => "MOTORCYCLE",
        };
        f.write_str(name)
    }
}

/// One vehicle observation delivered by the stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Vehicle identifier.
    pub vehicle: String,
    /// Address of the reporting device, when the server forwards it.
    pub source_ip: Option<String>,
    /// Device-side observation time.
    pub timestamp: EpochMillis,
    pub latitude: f64,
    pub longitude: f64,
    /// Heading in degrees.
    pub heading: f64,
    pub speed: f64,
    pub transit_mode: TransitMode,
    /// Free-text annotation.
    pub message: Option<String>,
    /// Time the server received the observation.
    pub server_timestamp: EpochMillis,
}

impl fmt::Display for StreamRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IP={}, Vehicle={}, Lat={}, Lon={}, Speed={}, Bearing={}, TransitMode={}, Timestamp={}, ServerTimestamp={}, Message={}",
            self.source_ip.as_deref().unwrap_or("-"),
            self.vehicle,
            self.latitude,
            self.longitude,
            self.speed,
            self.heading,
            self.transit_mode,
            self.timestamp,
            self.server_timestamp,
            self.message.as_deref().unwrap_or(""),
        )
    }
}

/// Result category of one termination attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStatus {
    /// Server confirmed the subscription was ended.
    Succeeded,
    /// Server refused or the call failed.
    Failed,
    /// Nothing to terminate.
    Skipped,
}

/// Outcome of a termination attempt. Produced once, never retried.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationOutcome {
    pub status: TerminationStatus,
    pub detail: Option<String>,
}

impl TerminationOutcome {
    pub fn succeeded() -> Self {
        Self {
            status: TerminationStatus::Succeeded,
            detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: TerminationStatus::Failed,
            detail: Some(detail.into()),
        }
    }

    pub fn skipped(detail: impl Into<String>) -> Self {
        Self {
            status: TerminationStatus::Skipped,
            detail: Some(detail.into()),
        }
    }

    /// The boolean success flag reported by the server.
    pub fn success(&self) -> bool {
        self.status == TerminationStatus::Succeeded
    }

    pub fn is_skipped(&self) -> bool {
        self.status == TerminationStatus::Skipped
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
