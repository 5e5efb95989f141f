use std::f64::consts::PI;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;
use sunrise::{Coordinates, SolarDay, SolarEvent};
use thiserror::Error;

use crate::{
    config::{MonthDay, SeasonAnchors},
    schedule::{trajectory_span, ScheduleEntry},
};

#[derive(Debug, Error, PartialEq)]
pub enum DayModelError {
    #[error("anchor {anchor} does not exist in {year}")]
    MissingAnchor { anchor: MonthDay, year: i32 },
    #[error("long and short solstice anchors coincide")]
    DegenerateSeasons,
    #[error("invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayModel {
    pub real_date: NaiveDate,
    pub pseudo_date: NaiveDate,
    pub sunrise: DateTime<FixedOffset>,
    pub sunset: DateTime<FixedOffset>,
    pub trajectory_duration: Duration,
    pub timezone: Tz,
}

impl DayModel {
    /// Returns a model whose duration is the span of the retained trajectory.
    pub fn with_trajectory(self, entries: &[ScheduleEntry]) -> Self {
        Self {
            trajectory_duration: trajectory_span(entries),
            ..self
        }
    }

    pub fn natural_day_length(&self) -> Duration {
        self.sunset - self.sunrise
    }
}

#[derive(Debug, Clone, Default)]
pub struct DayModelBuilder {
    seasons: SeasonAnchors,
}

impl DayModelBuilder {
    pub fn new(seasons: SeasonAnchors) -> Self {
        Self { seasons }
    }

    pub fn build(
        &self,
        today: NaiveDate,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        timezone: Tz,
    ) -> Result<DayModel, DayModelError> {
        let pseudo_date = pseudo_date(today, &self.seasons)?;
        let (sunrise, sunset) = sun_times(today, latitude, longitude, altitude)?;

        Ok(DayModel {
            real_date: today,
            pseudo_date,
            sunrise: sunrise.with_timezone(&timezone).fixed_offset(),
            sunset: sunset.with_timezone(&timezone).fixed_offset(),
            // Full pseudo-day until the sampler reports what survived.
            trajectory_duration: Duration::minutes(24 * 60 - 1),
            timezone,
        })
    }
}

/// Cosine interpolation of the calendar position between the two solstice
/// anchors onto the range `[long_solstice, anchor]`.
pub fn pseudo_date(today: NaiveDate, seasons: &SeasonAnchors) -> Result<NaiveDate, DayModelError> {
    let year = today.year();
    let anchor_in_year = |anchor: MonthDay| {
        anchor
            .in_year(year)
            .ok_or(DayModelError::MissingAnchor { anchor, year })
    };
    let dl = anchor_in_year(seasons.long_solstice)?;
    let ds = anchor_in_year(seasons.short_solstice)?;
    let dsp = anchor_in_year(seasons.anchor)?;

    let span = (dl - ds).num_days();
    if span == 0 {
        return Err(DayModelError::DegenerateSeasons);
    }

    let angle = PI * (dl - today).num_days() as f64 / span as f64;
    let half_range = (dl - dsp).num_days() as f64 / 2.0;
    let offset_days = half_range * (angle.cos() + 1.0);

    // Fractional days fall back to the midnight before them.
    Ok(dsp + Duration::days(offset_days.floor() as i64))
}

pub fn sun_times(
    date: NaiveDate,
    latitude: f64,
    longitude: f64,
    altitude: f64,
) -> Result<(DateTime<Utc>, DateTime<Utc>), DayModelError> {
    let coordinates = Coordinates::new(latitude, longitude).ok_or(
        DayModelError::InvalidCoordinates {
            latitude,
            longitude,
        },
    )?;
    let day = SolarDay::new(coordinates, date).with_altitude(altitude);
    Ok((
        day.event_time(SolarEvent::Sunrise),
        day.event_time(SolarEvent::Sunset),
    ))
}
