use std::{fmt, str::FromStr, time::Duration};

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gpsd::DEFAULT_GPSD_PORT;

pub const MIN_GEO_REFRESH_SECS: u64 = 30;
pub const MAX_GEO_REFRESH_SECS: u64 = 3_600;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("MQTT_HOST is not set")]
    MissingBrokerHost,
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),
}

/// Calendar anchor without a year, written `MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    pub const fn new(month: u32, day: u32) -> Self {
        Self { month, day }
    }

    pub fn in_year(self, year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
    }
}

impl FromStr for MonthDay {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (month, day) = value.trim().split_once('-').ok_or(())?;
        let anchor = Self {
            month: month.parse().map_err(|_| ())?,
            day: day.parse().map_err(|_| ())?,
        };
        // Must exist every year, which rules out 02-29.
        anchor.in_year(2001).ok_or(())?;
        Ok(anchor)
    }
}

impl fmt::Display for MonthDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

/// Anchors of the seasonal cosine interpolation. The defaults assume a
/// northern-hemisphere calendar; southern deployments must set them explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonAnchors {
    pub long_solstice: MonthDay,
    pub short_solstice: MonthDay,
    pub anchor: MonthDay,
}

impl Default for SeasonAnchors {
    fn default() -> Self {
        Self {
            long_solstice: MonthDay::new(6, 21),
            short_solstice: MonthDay::new(12, 21),
            anchor: MonthDay::new(8, 15),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub client_id: String,
    pub keepalive_secs: u64,
    pub reconnect_min_secs: u64,
    pub reconnect_max_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            client_id: "daylight-controller".to_string(),
            keepalive_secs: 60,
            reconnect_min_secs: 1,
            reconnect_max_secs: 60,
        }
    }
}

impl MqttConfig {
    pub fn reconnect_min(&self) -> Duration {
        Duration::from_secs(self.reconnect_min_secs)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    pub discovery_prefix: String,
    pub base: String,
    pub light: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            discovery_prefix: "homeassistant".to_string(),
            base: "daylight".to_string(),
            light: "zigbee2mqtt/Coop Light/set".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub timezone: String,
    pub seasons: SeasonAnchors,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            latitude: 43.091_760_734,
            longitude: -73.496_065_005,
            altitude: 121.0,
            timezone: "America/New_York".to_string(),
            seasons: SeasonAnchors::default(),
        }
    }
}

impl SiteConfig {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    pub fn uses_default_seasons_south_of_equator(&self) -> bool {
        self.latitude < 0.0 && self.seasons == SeasonAnchors::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsdConfig {
    pub host: Option<String>,
    pub port: u16,
    pub timeout_secs: u64,
    pub refresh_secs: u64,
}

impl Default for GpsdConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_GPSD_PORT,
            timeout_secs: 10,
            refresh_secs: 0,
        }
    }
}

impl GpsdConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.host.is_some() && self.refresh_secs > 0)
            .then(|| Duration::from_secs(self.refresh_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub mqtt: MqttConfig,
    pub topics: TopicConfig,
    pub site: SiteConfig,
    pub gpsd: GpsdConfig,
    pub health_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            topics: TopicConfig::default(),
            site: SiteConfig::default(),
            gpsd: GpsdConfig::default(),
            health_dir: "/tmp".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        config.mqtt.host = get("MQTT_HOST").ok_or(ConfigError::MissingBrokerHost)?;
        parse_into(&get, "MQTT_PORT", &mut config.mqtt.port)?;
        if let Some(user) = get("MQTT_USER") {
            config.mqtt.user = user;
        }
        if let Some(pass) = get("MQTT_PASS") {
            config.mqtt.pass = pass;
        }
        if let Some(client_id) = get("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        parse_into(&get, "MQTT_KEEPALIVE_SECS", &mut config.mqtt.keepalive_secs)?;
        parse_into(&get, "MQTT_RECONNECT_MIN_SECS", &mut config.mqtt.reconnect_min_secs)?;
        parse_into(&get, "MQTT_RECONNECT_MAX_SECS", &mut config.mqtt.reconnect_max_secs)?;

        if let Some(prefix) = get("DISCOVERY_PREFIX") {
            config.topics.discovery_prefix = prefix;
        }
        if let Some(base) = get("BASE_TOPIC") {
            config.topics.base = base;
        }
        if let Some(light) = get("LIGHT_TOPIC") {
            config.topics.light = light;
        }

        parse_into(&get, "LATITUDE", &mut config.site.latitude)?;
        parse_into(&get, "LONGITUDE", &mut config.site.longitude)?;
        parse_into(&get, "ALTITUDE", &mut config.site.altitude)?;
        if let Some(timezone) = get("TIMEZONE") {
            config.site.timezone = timezone;
        }
        parse_into(&get, "SEASON_LONG_SOLSTICE", &mut config.site.seasons.long_solstice)?;
        parse_into(&get, "SEASON_SHORT_SOLSTICE", &mut config.site.seasons.short_solstice)?;
        parse_into(&get, "SEASON_ANCHOR", &mut config.site.seasons.anchor)?;

        config.gpsd.host = get("GPSD_HOST");
        parse_into(&get, "GPSD_PORT", &mut config.gpsd.port)?;
        parse_into(&get, "GPSD_TIMEOUT_SECS", &mut config.gpsd.timeout_secs)?;
        parse_into(&get, "GPSD_REFRESH_SECS", &mut config.gpsd.refresh_secs)?;

        if let Some(dir) = get("HEALTH_DIR") {
            config.health_dir = dir;
        }

        config.site.tz()?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.site.latitude = self.site.latitude.clamp(-90.0, 90.0);
        self.site.longitude = self.site.longitude.clamp(-180.0, 180.0);
        if !self.site.altitude.is_finite() {
            self.site.altitude = 0.0;
        }

        self.mqtt.keepalive_secs = self.mqtt.keepalive_secs.clamp(5, 3_600);
        self.mqtt.reconnect_min_secs = self.mqtt.reconnect_min_secs.max(1);
        if self.mqtt.reconnect_max_secs < self.mqtt.reconnect_min_secs {
            self.mqtt.reconnect_max_secs = self.mqtt.reconnect_min_secs;
        }

        self.gpsd.timeout_secs = self.gpsd.timeout_secs.clamp(1, 300);
        if self.gpsd.refresh_secs > 0 {
            self.gpsd.refresh_secs = self
                .gpsd
                .refresh_secs
                .clamp(MIN_GEO_REFRESH_SECS, MAX_GEO_REFRESH_SECS);
        }

        for topic in [&mut self.topics.base, &mut self.topics.discovery_prefix] {
            while topic.ends_with('/') {
                topic.pop();
            }
        }
    }
}

fn parse_into<G, T>(get: &G, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = get(key) {
        *slot = raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw })?;
    }
    Ok(())
}
