use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{GeoFix, GeoSource};

pub const DEFAULT_GPSD_PORT: u16 = 2947;
pub const WATCH_COMMAND: &str = "?WATCH={\"enable\":true,\"json\":true};\n";

const MODE_2D: u8 = 2;
const MODE_3D: u8 = 3;

#[derive(Debug, Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(rename = "altMSL")]
    alt_msl: Option<f64>,
    alt: Option<f64>,
    #[serde(rename = "altHAE")]
    alt_hae: Option<f64>,
}

/// Extracts a fix from one protocol line. Anything that is not a TPV report
/// with at least a 2D fix, including malformed JSON, yields `None`.
pub fn parse_tpv(line: &str, now: DateTime<Utc>) -> Option<GeoFix> {
    let report: Report = serde_json::from_str(line.trim()).ok()?;
    if report.class != "TPV" || report.mode < MODE_2D {
        return None;
    }

    let latitude = report.lat.filter(|v| v.is_finite())?;
    let longitude = report.lon.filter(|v| v.is_finite())?;
    let altitude = if report.mode >= MODE_3D {
        report
            .alt_msl
            .or(report.alt)
            .or(report.alt_hae)
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    } else {
        0.0
    };

    Some(GeoFix {
        latitude,
        longitude,
        altitude,
        acquired_at: now,
        source: GeoSource::Geolocated,
    })
}
