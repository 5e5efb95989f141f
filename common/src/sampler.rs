use chrono::{Duration, NaiveTime, TimeZone, Utc};

use crate::{
    day_model::DayModel,
    schedule::ScheduleEntry,
    sky::{Atmosphere, Colorimetry, SkyModel},
    types::GeoFix,
};

pub const GRID_START_NM: f64 = 380.0;
pub const GRID_END_NM: f64 = 780.0;
pub const GRID_STEP_NM: f64 = 5.0;
pub const MINUTES_PER_DAY: i64 = 24 * 60;

pub fn wavelength_grid() -> Vec<f64> {
    let steps = ((GRID_END_NM - GRID_START_NM) / GRID_STEP_NM).round() as usize;
    (0..=steps)
        .map(|i| GRID_START_NM + GRID_STEP_NM * i as f64)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampledDay {
    pub entries: Vec<ScheduleEntry>,
    /// Largest spectrum norm of the pseudo-day; brightness is relative to it.
    pub peak_norm: f64,
    pub dropped: usize,
}

pub struct SpectralSampler<S, C> {
    sky: S,
    colorimetry: C,
    atmosphere: Atmosphere,
    grid: Vec<f64>,
}

impl<S: SkyModel, C: Colorimetry> SpectralSampler<S, C> {
    pub fn new(sky: S, colorimetry: C, atmosphere: Atmosphere) -> Self {
        Self {
            sky,
            colorimetry,
            atmosphere,
            grid: wavelength_grid(),
        }
    }

    pub fn sample(&self, model: &DayModel, fix: &GeoFix) -> SampledDay {
        let midnight = model.pseudo_date.and_time(NaiveTime::MIN);
        let Some(start) = model.timezone.from_local_datetime(&midnight).earliest() else {
            return SampledDay {
                entries: Vec::new(),
                peak_norm: f64::NAN,
                dropped: MINUTES_PER_DAY as usize,
            };
        };

        let rows: Vec<_> = (0..MINUTES_PER_DAY)
            .map(|minute| {
                let fake_time = start + Duration::minutes(minute);
                let geometry = self.sky.geometry(fix, fake_time.with_timezone(&Utc));
                let spectrum = self
                    .sky
                    .irradiance(&geometry, &self.atmosphere)
                    .resample(&self.grid);
                let norm = spectrum.iter().map(|v| v * v).sum::<f64>().sqrt();
                let color = self.colorimetry.chromaticity(&self.grid, &spectrum);
                (fake_time.fixed_offset(), norm, color)
            })
            .collect();

        let peak_norm = rows
            .iter()
            .map(|(_, norm, _)| *norm)
            .filter(|norm| norm.is_finite())
            .fold(f64::NAN, f64::max);

        let entries: Vec<ScheduleEntry> = rows
            .into_iter()
            .filter_map(|(fake_time, norm, color)| {
                let brightness = norm / peak_norm;
                let defined = brightness.is_finite()
                    && brightness > 0.0
                    && color.x.is_finite()
                    && color.y.is_finite();
                defined.then_some(ScheduleEntry {
                    fake_time,
                    chroma_x: color.x,
                    chroma_y: color.y,
                    brightness,
                })
            })
            .collect();

        SampledDay {
            dropped: MINUTES_PER_DAY as usize - entries.len(),
            entries,
            peak_norm,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, Timelike};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        schedule::trajectory_span,
        sky::{Cie1931, ClearSky, SolarGeometry, Spectrum},
        types::Chromaticity,
    };

    /// Sun up between 06:00 and 18:00 local, peaking at noon.
    struct TriangleSky;

    impl SkyModel for TriangleSky {
        fn geometry(&self, _fix: &GeoFix, at: DateTime<Utc>) -> SolarGeometry {
            let local = at.with_timezone(&chrono_tz::UTC);
            let minutes = (local.hour() * 60 + local.minute()) as f64;
            SolarGeometry::from_zenith((minutes - 720.0).abs() / 4.0)
        }

        fn irradiance(&self, geometry: &SolarGeometry, _atmosphere: &Atmosphere) -> Spectrum {
            let level = geometry.relative_airmass.recip();
            Spectrum {
                wavelengths: vec![380.0, 780.0],
                irradiance: vec![level, level],
            }
        }
    }

    struct FixedColour;

    impl Colorimetry for FixedColour {
        fn chromaticity(&self, _wavelengths: &[f64], values: &[f64]) -> Chromaticity {
            if values.iter().any(|v| v.is_nan()) {
                Chromaticity {
                    x: f64::NAN,
                    y: f64::NAN,
                }
            } else {
                Chromaticity { x: 0.4, y: 0.4 }
            }
        }
    }

    fn model(pseudo: NaiveDate, timezone: chrono_tz::Tz) -> DayModel {
        let noon = timezone
            .from_local_datetime(&pseudo.and_hms_opt(12, 0, 0).unwrap())
            .unwrap()
            .fixed_offset();
        DayModel {
            real_date: pseudo,
            pseudo_date: pseudo,
            sunrise: noon,
            sunset: noon,
            trajectory_duration: Duration::zero(),
            timezone,
        }
    }

    fn fix() -> GeoFix {
        GeoFix::configured(43.09, -73.49, 121.0, Utc::now())
    }

    #[test]
    fn grid_spans_visible_range() {
        let grid = wavelength_grid();
        assert_eq!(grid.len(), 81);
        assert_eq!(grid.first(), Some(&380.0));
        assert_eq!(grid.last(), Some(&780.0));
    }

    #[test]
    fn drops_night_minutes_and_shrinks_duration() {
        let sampler = SpectralSampler::new(TriangleSky, FixedColour, Atmosphere::default());
        let pseudo = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let day = sampler.sample(&model(pseudo, chrono_tz::UTC), &fix());

        // Zenith below 90 degrees only strictly inside 06:00..18:00.
        assert_eq!(day.entries.len(), 719);
        assert_eq!(day.dropped, 1440 - 719);
        assert_eq!(day.entries[0].fake_time.hour(), 6);
        assert_eq!(day.entries[0].fake_time.minute(), 1);
        assert_eq!(trajectory_span(&day.entries), Duration::minutes(718));

        let model = model(pseudo, chrono_tz::UTC).with_trajectory(&day.entries);
        assert_eq!(model.trajectory_duration, Duration::minutes(718));
    }

    #[test]
    fn brightness_is_normalised_to_the_peak() {
        let sampler = SpectralSampler::new(TriangleSky, FixedColour, Atmosphere::default());
        let pseudo = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let day = sampler.sample(&model(pseudo, chrono_tz::UTC), &fix());

        assert!(day
            .entries
            .iter()
            .all(|entry| entry.brightness > 0.0 && entry.brightness <= 1.0));
        let peak = day
            .entries
            .iter()
            .find(|entry| entry.brightness == 1.0)
            .expect("one row attains the peak");
        assert_eq!(peak.fake_time.hour(), 12);
        assert_eq!(peak.fake_time.minute(), 0);
    }

    #[test]
    fn entries_are_strictly_increasing_by_minute() {
        let sampler = SpectralSampler::new(TriangleSky, FixedColour, Atmosphere::default());
        let pseudo = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let day = sampler.sample(&model(pseudo, chrono_tz::America::New_York), &fix());

        assert!(day
            .entries
            .windows(2)
            .all(|pair| pair[1].fake_time - pair[0].fake_time == Duration::minutes(1)));
    }

    #[test]
    fn all_night_day_is_empty() {
        struct Night;
        impl SkyModel for Night {
            fn geometry(&self, _fix: &GeoFix, _at: DateTime<Utc>) -> SolarGeometry {
                SolarGeometry::from_zenith(120.0)
            }
            fn irradiance(&self, geometry: &SolarGeometry, atmosphere: &Atmosphere) -> Spectrum {
                ClearSky::default().irradiance(geometry, atmosphere)
            }
        }

        let sampler = SpectralSampler::new(Night, Cie1931, Atmosphere::default());
        let pseudo = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let day = sampler.sample(&model(pseudo, chrono_tz::UTC), &fix());

        assert!(day.entries.is_empty());
        assert!(day.peak_norm.is_nan());
        assert_eq!(trajectory_span(&day.entries), Duration::zero());
    }

    #[test]
    fn clear_sky_day_tracks_real_daylight() {
        let sampler = SpectralSampler::new(ClearSky::default(), Cie1931, Atmosphere::default());
        let pseudo = NaiveDate::from_ymd_opt(2026, 6, 21).unwrap();
        let day = sampler.sample(&model(pseudo, chrono_tz::America::New_York), &fix());

        // Roughly fifteen hours of daylight at the summer solstice.
        let hours = trajectory_span(&day.entries).num_minutes() as f64 / 60.0;
        assert!((14.5..16.0).contains(&hours), "{hours}");
        assert!(day.entries.iter().any(|entry| entry.brightness == 1.0));
        assert!(day
            .entries
            .iter()
            .all(|entry| entry.brightness > 0.0 && entry.brightness <= 1.0));
    }
}
