use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::Phase;

pub const PHASE_FILE: &str = "phase";
pub const NEXT_WAKE_FILE: &str = "next_wake";
pub const LAST_TICK_FILE: &str = "last_tick";

pub const MAX_TICK_AGE_SECS: i64 = 180;
pub const MAX_OVERSLEEP_SECS: i64 = 600;

/// Liveness state exported to the external monitor. One writer per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSignal {
    pub phase: Phase,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub next_wake_at: Option<DateTime<Utc>>,
}

impl Default for HealthSignal {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            last_tick_at: None,
            next_wake_at: None,
        }
    }
}

impl HealthSignal {
    pub fn enter_sleep(&mut self, next_wake: DateTime<Utc>) {
        self.phase = Phase::Sleep;
        self.next_wake_at = Some(next_wake);
    }

    pub fn enter_active(&mut self, now: DateTime<Utc>) {
        self.phase = Phase::Active;
        self.last_tick_at = Some(now);
    }

    pub fn tick(&mut self, now: DateTime<Utc>) {
        self.last_tick_at = Some(now);
    }

    pub fn enter_idle(&mut self) {
        self.phase = Phase::Idle;
    }

    /// File name and contents for every file the monitor reads.
    pub fn files(&self) -> Vec<(&'static str, String)> {
        let mut files = vec![(PHASE_FILE, self.phase.as_str().to_string())];
        if let Some(next_wake) = self.next_wake_at {
            files.push((NEXT_WAKE_FILE, next_wake.timestamp().to_string()));
        }
        if let Some(last_tick) = self.last_tick_at {
            files.push((LAST_TICK_FILE, last_tick.timestamp().to_string()));
        }
        files
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum Unhealthy {
    #[error("sleep without next_wake")]
    SleepWithoutWake,
    #[error("bad next_wake: {0:?}")]
    BadNextWake(String),
    #[error("overslept")]
    Overslept,
    #[error("{0} without last_tick")]
    MissingTick(&'static str),
    #[error("bad last_tick: {0:?}")]
    BadLastTick(String),
    #[error("stale tick")]
    StaleTick,
    #[error("unknown phase: {0}")]
    UnknownPhase(String),
}

/// Applies the monitor rules to raw file contents; `None` means the file is absent.
pub fn evaluate(
    phase: Option<&str>,
    next_wake: Option<&str>,
    last_tick: Option<&str>,
    now: i64,
) -> Result<(), Unhealthy> {
    let (label, parsed) = match phase.map(str::trim) {
        None => ("unset", None),
        Some(raw) => match Phase::parse(raw) {
            Some(phase) => (phase.as_str(), Some(phase)),
            None => return Err(Unhealthy::UnknownPhase(raw.to_string())),
        },
    };

    match parsed {
        Some(Phase::Idle) => Ok(()),
        Some(Phase::Sleep) => {
            let raw = next_wake.ok_or(Unhealthy::SleepWithoutWake)?;
            let next_wake = raw
                .trim()
                .parse::<i64>()
                .map_err(|_| Unhealthy::BadNextWake(raw.to_string()))?;
            if now > next_wake + MAX_OVERSLEEP_SECS {
                return Err(Unhealthy::Overslept);
            }
            Ok(())
        }
        Some(Phase::Active) | None => {
            let raw = last_tick.ok_or(Unhealthy::MissingTick(label))?;
            let last_tick = raw
                .trim()
                .parse::<i64>()
                .map_err(|_| Unhealthy::BadLastTick(raw.to_string()))?;
            if now - last_tick > MAX_TICK_AGE_SECS {
                return Err(Unhealthy::StaleTick);
            }
            Ok(())
        }
    }
}
