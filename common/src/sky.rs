use chrono::{DateTime, Datelike, Utc};
use solar_positioning::{spa, time::DeltaT, RefractionCorrection};

use crate::types::{Chromaticity, GeoFix};

const SOLAR_TEMPERATURE_K: f64 = 5_778.0;
/// Solid angle subtended by the solar disc at one astronomical unit.
const SOLAR_SOLID_ANGLE_SR: f64 = 6.794e-5;
const PLANCK: f64 = 6.626_070_15e-34;
const LIGHT_SPEED: f64 = 2.997_924_58e8;
const BOLTZMANN: f64 = 1.380_649e-23;
const STANDARD_PRESSURE_PA: f64 = 101_325.0;
const ANGSTROM_ALPHA: f64 = 1.14;
const AEROSOL_SINGLE_SCATTER_ALBEDO: f64 = 0.945;
const AEROSOL_FORWARD_FRACTION: f64 = 0.82;
const SKY_REFLECTIVITY: f64 = 0.1;
const FALLBACK_DELTA_T: f64 = 69.0;
const REFRACTION_PRESSURE_HPA: f64 = 1013.25;
const REFRACTION_TEMPERATURE_C: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarGeometry {
    pub apparent_zenith: f64,
    pub relative_airmass: f64,
}

impl SolarGeometry {
    pub fn from_zenith(apparent_zenith: f64) -> Self {
        Self {
            apparent_zenith,
            relative_airmass: relative_airmass(apparent_zenith),
        }
    }
}

/// Atmospheric inputs to the spectral model. Held constant rather than measured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Atmosphere {
    pub surface_tilt: f64,
    pub ground_albedo: f64,
    pub surface_pressure: f64,
    pub precipitable_water: f64,
    pub ozone: f64,
    pub aerosol_turbidity_500nm: f64,
}

impl Default for Atmosphere {
    fn default() -> Self {
        Self {
            surface_tilt: 0.0,
            ground_albedo: 0.2,
            surface_pressure: 101_300.0,
            precipitable_water: 0.5,
            ozone: 0.31,
            aerosol_turbidity_500nm: 0.1,
        }
    }
}

/// Spectral irradiance in W/m²/nm over ascending wavelengths in nm.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub wavelengths: Vec<f64>,
    pub irradiance: Vec<f64>,
}

impl Spectrum {
    /// Linear interpolation onto `grid`, holding the end values outside the source range.
    pub fn resample(&self, grid: &[f64]) -> Vec<f64> {
        grid.iter()
            .map(|&wl| interpolate(&self.wavelengths, &self.irradiance, wl))
            .collect()
    }
}

pub trait SkyModel {
    fn geometry(&self, fix: &GeoFix, at: DateTime<Utc>) -> SolarGeometry;
    fn irradiance(&self, geometry: &SolarGeometry, atmosphere: &Atmosphere) -> Spectrum;
}

pub trait Colorimetry {
    fn chromaticity(&self, wavelengths: &[f64], values: &[f64]) -> Chromaticity;
}

/// Kasten & Young (1989). Undefined once the sun is at or below the horizon.
pub fn relative_airmass(apparent_zenith: f64) -> f64 {
    if !apparent_zenith.is_finite() || apparent_zenith >= 90.0 {
        return f64::NAN;
    }
    1.0 / (apparent_zenith.to_radians().cos()
        + 0.50572 * (96.07995 - apparent_zenith).powf(-1.6364))
}

/// Clear-sky spectral model: black-body extraterrestrial spectrum attenuated by
/// Rayleigh, aerosol, ozone and water-vapour extinction, plus sky and ground diffuse terms.
#[derive(Debug, Clone)]
pub struct ClearSky {
    wavelengths: Vec<f64>,
}

impl Default for ClearSky {
    fn default() -> Self {
        Self {
            wavelengths: (0..=80).map(|i| 300.0 + 10.0 * i as f64).collect(),
        }
    }
}

impl SkyModel for ClearSky {
    fn geometry(&self, fix: &GeoFix, at: DateTime<Utc>) -> SolarGeometry {
        let delta_t =
            DeltaT::estimate_from_date(at.year(), at.month()).unwrap_or(FALLBACK_DELTA_T);
        let zenith = RefractionCorrection::new(REFRACTION_PRESSURE_HPA, REFRACTION_TEMPERATURE_C)
            .and_then(|refraction| {
                spa::solar_position(
                    at,
                    fix.latitude,
                    fix.longitude,
                    fix.altitude,
                    delta_t,
                    Some(refraction),
                )
            })
            .map(|position| position.zenith_angle())
            .unwrap_or(f64::NAN);

        SolarGeometry::from_zenith(zenith)
    }

    fn irradiance(&self, geometry: &SolarGeometry, atmosphere: &Atmosphere) -> Spectrum {
        let airmass = geometry.relative_airmass;
        let cos_zenith = geometry.apparent_zenith.to_radians().cos();
        let tilt = atmosphere.surface_tilt.to_radians();
        let sky_view = (1.0 + tilt.cos()) / 2.0;
        let ground_view = (1.0 - tilt.cos()) / 2.0;
        // Tilt is taken toward the sun, so incidence is zenith minus tilt.
        let cos_incidence = if atmosphere.surface_tilt == 0.0 {
            cos_zenith
        } else {
            (geometry.apparent_zenith.to_radians() - tilt).cos()
        };
        let pressure_ratio = atmosphere.surface_pressure / STANDARD_PRESSURE_PA;

        let irradiance = self
            .wavelengths
            .iter()
            .map(|&wl| {
                let microns = wl / 1_000.0;
                let extraterrestrial = extraterrestrial(wl);

                let tau_rayleigh = 0.008_735 * microns.powf(-4.08) * pressure_ratio;
                let tau_aerosol =
                    atmosphere.aerosol_turbidity_500nm * (microns / 0.5).powf(-ANGSTROM_ALPHA);
                let tau_ozone = atmosphere.ozone * ozone_coefficient(wl);
                let tau_water = atmosphere.precipitable_water * water_coefficient(wl);

                let t_rayleigh = (-tau_rayleigh * airmass).exp();
                let t_aerosol = (-tau_aerosol * airmass).exp();
                let t_absorb = (-(tau_ozone + tau_water) * airmass).exp();

                let direct_normal = extraterrestrial * t_rayleigh * t_aerosol * t_absorb;
                let top = extraterrestrial * cos_zenith * t_absorb;
                let rayleigh_diffuse = top * (1.0 - t_rayleigh) * 0.5;
                let aerosol_diffuse = top
                    * t_rayleigh
                    * (1.0 - (-AEROSOL_SINGLE_SCATTER_ALBEDO * tau_aerosol * airmass).exp())
                    * AEROSOL_FORWARD_FRACTION;

                let horizontal_global =
                    direct_normal * cos_zenith + rayleigh_diffuse + aerosol_diffuse;
                let multiple_reflection = horizontal_global * atmosphere.ground_albedo
                    * SKY_REFLECTIVITY
                    / (1.0 - atmosphere.ground_albedo * SKY_REFLECTIVITY);
                let diffuse = rayleigh_diffuse + aerosol_diffuse + multiple_reflection;

                direct_normal * cos_incidence.max(0.0)
                    + diffuse * sky_view
                    + horizontal_global * atmosphere.ground_albedo * ground_view
            })
            .collect();

        Spectrum {
            wavelengths: self.wavelengths.clone(),
            irradiance,
        }
    }
}

/// Black-body solar spectrum at one astronomical unit, W/m²/nm.
fn extraterrestrial(wavelength_nm: f64) -> f64 {
    let lambda = wavelength_nm * 1e-9;
    let radiance = 2.0 * PLANCK * LIGHT_SPEED.powi(2)
        / lambda.powi(5)
        / ((PLANCK * LIGHT_SPEED / (lambda * BOLTZMANN * SOLAR_TEMPERATURE_K)).exp() - 1.0);
    radiance * SOLAR_SOLID_ANGLE_SR * 1e-9
}

// Chappuis band plus the Huggins edge in the near UV.
fn ozone_coefficient(wavelength_nm: f64) -> f64 {
    let chappuis = 0.12 * (-((wavelength_nm - 600.0) / 70.0).powi(2)).exp();
    let huggins = if wavelength_nm < 340.0 {
        10.0 * (-(wavelength_nm - 300.0) / 8.0).exp()
    } else {
        0.0
    };
    chappuis + huggins
}

fn water_coefficient(wavelength_nm: f64) -> f64 {
    [(720.0, 0.02, 10.0), (820.0, 0.04, 12.0), (940.0, 0.3, 20.0)]
        .iter()
        .map(|&(centre, depth, width)| depth * (-((wavelength_nm - centre) / width).powi(2)).exp())
        .sum()
}

fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let (Some(&first), Some(&last)) = (xs.first(), xs.last()) else {
        return f64::NAN;
    };
    if x <= first {
        return ys[0];
    }
    if x >= last {
        return ys[xs.len() - 1];
    }
    let upper = xs.partition_point(|&value| value <= x);
    let (x0, x1) = (xs[upper - 1], xs[upper]);
    let (y0, y1) = (ys[upper - 1], ys[upper]);
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// CIE 1931 2° observer using the multi-lobe Gaussian fit of Wyman, Sloan & Shirley.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cie1931;

impl Cie1931 {
    pub fn matching(wavelength_nm: f64) -> [f64; 3] {
        let lobe = |mu: f64, below: f64, above: f64| {
            let sigma = if wavelength_nm < mu { below } else { above };
            (-0.5 * ((wavelength_nm - mu) / sigma).powi(2)).exp()
        };
        let x = 1.056 * lobe(599.8, 37.9, 31.0) + 0.362 * lobe(442.0, 16.0, 26.7)
            - 0.065 * lobe(501.1, 20.4, 26.2);
        let y = 0.821 * lobe(568.8, 46.9, 40.5) + 0.286 * lobe(530.9, 16.3, 31.1);
        let z = 1.217 * lobe(437.0, 11.8, 36.0) + 0.681 * lobe(459.0, 26.0, 13.8);
        [x, y, z]
    }
}

impl Colorimetry for Cie1931 {
    fn chromaticity(&self, wavelengths: &[f64], values: &[f64]) -> Chromaticity {
        let [x, y, z] = wavelengths.iter().zip(values).fold(
            [0.0; 3],
            |[x, y, z], (&wl, &value)| {
                let [xb, yb, zb] = Self::matching(wl);
                [x + value * xb, y + value * yb, z + value * zb]
            },
        );
        let total = x + y + z;
        if !total.is_finite() || total <= 0.0 {
            return Chromaticity {
                x: f64::NAN,
                y: f64::NAN,
            };
        }
        Chromaticity {
            x: x / total,
            y: y / total,
        }
    }
}
