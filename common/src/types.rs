use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Sleep,
    Active,
    Idle,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sleep => "sleep",
            Self::Active => "active",
            Self::Idle => "idle",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "sleep" => Some(Self::Sleep),
            "active" => Some(Self::Active),
            "idle" => Some(Self::Idle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
        }
    }

    pub fn from_u8(raw: u8) -> Self {
        match raw {
            2 => Self::Connected,
            1 => Self::Connecting,
            _ => Self::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoSource {
    Configured,
    Geolocated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub acquired_at: DateTime<Utc>,
    pub source: GeoSource,
}

impl GeoFix {
    pub fn configured(latitude: f64, longitude: f64, altitude: f64, now: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            acquired_at: now,
            source: GeoSource::Configured,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Chromaticity {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LightCommand {
    On {
        state: &'static str,
        color: Chromaticity,
        brightness: u8,
    },
    Off {
        state: &'static str,
    },
}

impl LightCommand {
    pub fn off() -> Self {
        Self::Off { state: "off" }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPayload {
    pub x: f64,
    pub y: f64,
    pub brightness: u8,
    pub ts: String,
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
}
