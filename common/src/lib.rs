pub mod config;
pub mod day_model;
pub mod gate;
pub mod gpsd;
pub mod health;
pub mod playback;
pub mod sampler;
pub mod schedule;
pub mod sky;
pub mod topics;
pub mod types;

pub use config::{ConfigError, RuntimeConfig, SeasonAnchors};
pub use day_model::{DayModel, DayModelBuilder, DayModelError};
pub use gate::{DayGate, GateDecision};
pub use health::HealthSignal;
pub use playback::{next_minute_boundary, PhaseError, PlaybackAction, PlaybackEngine};
pub use sampler::{SampledDay, SpectralSampler};
pub use schedule::{align, Alignment, ScheduleEntry};
pub use sky::{Atmosphere, Cie1931, ClearSky};
pub use topics::Topics;
pub use types::{ConnectionState, GeoFix, GeoSource, LightCommand, Phase, StatusPayload};
