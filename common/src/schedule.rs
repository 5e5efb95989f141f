use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, TimeZone};
use serde::Serialize;

use crate::types::{Chromaticity, GeoFix, LightCommand, StatusPayload};

pub const MAX_BRIGHTNESS: u8 = 254;
pub const MIN_BRIGHTNESS: u8 = 1;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScheduleEntry {
    #[serde(rename = "fakeTime")]
    pub fake_time: DateTime<FixedOffset>,
    #[serde(rename = "x")]
    pub chroma_x: f64,
    #[serde(rename = "y")]
    pub chroma_y: f64,
    pub brightness: f64,
}

impl ScheduleEntry {
    pub fn chromaticity(&self) -> Chromaticity {
        Chromaticity {
            x: round4(self.chroma_x),
            y: round4(self.chroma_y),
        }
    }

    /// Brightness on the light's 1..=254 scale; never fully off mid-sequence.
    pub fn brightness_level(&self) -> u8 {
        let scaled = (self.brightness * f64::from(MAX_BRIGHTNESS)).floor();
        if scaled.is_nan() {
            return MIN_BRIGHTNESS;
        }
        scaled.clamp(f64::from(MIN_BRIGHTNESS), f64::from(MAX_BRIGHTNESS)) as u8
    }

    pub fn light_command(&self) -> LightCommand {
        LightCommand::On {
            state: "on",
            color: self.chromaticity(),
            brightness: self.brightness_level(),
        }
    }

    pub fn fake_time_payload(&self) -> String {
        self.fake_time.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn status<Tz: TimeZone>(&self, now: DateTime<Tz>, fix: &GeoFix) -> StatusPayload
    where
        Tz::Offset: std::fmt::Display,
    {
        let color = self.chromaticity();
        StatusPayload {
            x: color.x,
            y: color.y,
            brightness: self.brightness_level(),
            ts: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            lat: fix.latitude,
            lon: fix.longitude,
            alt_m: fix.altitude,
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

pub fn trajectory_span(entries: &[ScheduleEntry]) -> Duration {
    match (entries.first(), entries.last()) {
        (Some(first), Some(last)) => last.fake_time - first.fake_time,
        _ => Duration::zero(),
    }
}

/// Outcome of fitting a trajectory so that it finishes at sunset.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub entries: Vec<ScheduleEntry>,
    /// Time to wait before the first entry; negative when playback started late.
    pub wait: Duration,
    pub dropped: usize,
}

impl Alignment {
    pub fn needs_sleep(&self) -> bool {
        self.wait >= Duration::zero()
    }
}

pub fn align<Tz: TimeZone>(
    entries: Vec<ScheduleEntry>,
    sunset: DateTime<Tz>,
    now: DateTime<Tz>,
) -> Alignment {
    let desired_start = sunset - trajectory_span(&entries);
    let wait = desired_start - now;

    if wait >= Duration::zero() {
        return Alignment {
            entries,
            wait,
            dropped: 0,
        };
    }

    let late_ms = wait.num_milliseconds().unsigned_abs();
    let late_minutes = late_ms.div_ceil(60_000) as usize;
    let dropped = late_minutes.min(entries.len());

    Alignment {
        entries: entries.into_iter().skip(dropped).collect(),
        wait,
        dropped,
    }
}
