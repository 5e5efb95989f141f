use std::collections::VecDeque;

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use thiserror::Error;

use crate::{
    schedule::{Alignment, ScheduleEntry},
    types::Phase,
};

#[derive(Debug, Error, PartialEq)]
#[error("phase cannot move from {from:?} to {to:?}")]
pub struct PhaseError {
    pub from: Option<Phase>,
    pub to: Phase,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackAction {
    /// Entered Sleep; nothing to do until `until`.
    Sleep { until: DateTime<Utc> },
    /// Entered Active.
    Activate,
    /// Publish this entry on the next minute boundary.
    Emit(ScheduleEntry),
    /// Entered Idle; turn the light off.
    Finish,
}

/// One day's playback: Sleep (optional) -> Active -> Idle, never backwards.
#[derive(Debug, Clone)]
pub struct PlaybackEngine {
    phase: Option<Phase>,
    history: Vec<Phase>,
    start_at: Option<DateTime<Utc>>,
    entries: VecDeque<ScheduleEntry>,
    finished: bool,
}

impl PlaybackEngine {
    pub fn new(alignment: Alignment, now: DateTime<Utc>) -> Self {
        let start_at = alignment.needs_sleep().then(|| now + alignment.wait);
        Self {
            phase: None,
            history: Vec::with_capacity(3),
            start_at,
            entries: alignment.entries.into(),
            finished: false,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    pub fn remaining(&self) -> usize {
        self.entries.len()
    }

    pub fn start_at(&self) -> Option<DateTime<Utc>> {
        self.start_at
    }

    pub fn transition(&mut self, to: Phase) -> Result<(), PhaseError> {
        if self.phase.is_some_and(|from| from >= to) {
            return Err(PhaseError {
                from: self.phase,
                to,
            });
        }
        self.phase = Some(to);
        self.history.push(to);
        Ok(())
    }

    pub fn advance(&mut self) -> Result<Option<PlaybackAction>, PhaseError> {
        if self.finished {
            return Ok(None);
        }

        match self.phase {
            None => match self.start_at {
                Some(until) => {
                    self.transition(Phase::Sleep)?;
                    Ok(Some(PlaybackAction::Sleep { until }))
                }
                None => {
                    self.transition(Phase::Active)?;
                    Ok(Some(PlaybackAction::Activate))
                }
            },
            Some(Phase::Sleep) => {
                self.transition(Phase::Active)?;
                Ok(Some(PlaybackAction::Activate))
            }
            Some(Phase::Active) => match self.entries.pop_front() {
                Some(entry) => Ok(Some(PlaybackAction::Emit(entry))),
                None => {
                    self.transition(Phase::Idle)?;
                    self.finished = true;
                    Ok(Some(PlaybackAction::Finish))
                }
            },
            Some(Phase::Idle) => {
                self.finished = true;
                Ok(None)
            }
        }
    }
}

/// The instant at which the next emit may happen: now if we are inside the
/// first second of a minute, otherwise the start of the following minute.
pub fn next_minute_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    if now.second() == 0 {
        return now;
    }
    let floor = now.duration_trunc(Duration::minutes(1)).unwrap_or(now);
    floor + Duration::minutes(1)
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::schedule::align;

    fn entries(count: i64) -> Vec<ScheduleEntry> {
        let start = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 7, 1, 6, 0, 0)
            .unwrap();
        (0..count)
            .map(|minute| ScheduleEntry {
                fake_time: start + Duration::minutes(minute),
                chroma_x: 0.35,
                chroma_y: 0.36,
                brightness: 0.5,
            })
            .collect()
    }

    fn run(engine: &mut PlaybackEngine) -> Vec<PlaybackAction> {
        let mut actions = Vec::new();
        while let Some(action) = engine.advance().unwrap() {
            actions.push(action);
        }
        actions
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    #[test]
    fn early_day_sleeps_then_plays_then_idles() {
        let sunset = now() + Duration::hours(5);
        let mut engine = PlaybackEngine::new(align(entries(3), sunset, now()), now());
        let actions = run(&mut engine);

        assert_eq!(engine.history(), &[Phase::Sleep, Phase::Active, Phase::Idle]);
        assert_eq!(
            actions[0],
            PlaybackAction::Sleep {
                until: sunset - Duration::minutes(2)
            }
        );
        assert_eq!(actions[1], PlaybackAction::Activate);
        assert!(matches!(actions[2], PlaybackAction::Emit(_)));
        assert_eq!(actions.len(), 6);
        assert_eq!(actions[5], PlaybackAction::Finish);
    }

    #[test]
    fn late_day_skips_sleep() {
        let sunset = now() + Duration::minutes(30);
        let mut engine = PlaybackEngine::new(align(entries(60), sunset, now()), now());
        assert_eq!(engine.remaining(), 31);
        assert_eq!(engine.start_at(), None);

        let actions = run(&mut engine);
        assert_eq!(engine.history(), &[Phase::Active, Phase::Idle]);
        assert_eq!(actions.first(), Some(&PlaybackAction::Activate));
        assert_eq!(actions.last(), Some(&PlaybackAction::Finish));
        assert_eq!(actions.len(), 33);
    }

    #[test]
    fn emits_in_fake_time_order() {
        let sunset = now() + Duration::hours(1);
        let mut engine = PlaybackEngine::new(align(entries(10), sunset, now()), now());
        let emitted: Vec<_> = run(&mut engine)
            .into_iter()
            .filter_map(|action| match action {
                PlaybackAction::Emit(entry) => Some(entry.fake_time),
                _ => None,
            })
            .collect();

        assert_eq!(emitted.len(), 10);
        assert!(emitted.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn empty_day_goes_straight_to_idle() {
        let mut engine = PlaybackEngine::new(align(Vec::new(), now(), now() + Duration::hours(1)), now());
        let actions = run(&mut engine);

        assert_eq!(actions, vec![PlaybackAction::Activate, PlaybackAction::Finish]);
        assert_eq!(engine.phase(), Some(Phase::Idle));
        assert_eq!(engine.advance(), Ok(None));
    }

    #[test]
    fn phases_never_go_backwards() {
        let mut engine = PlaybackEngine::new(align(entries(1), now(), now()), now());
        engine.transition(Phase::Active).unwrap();

        assert_eq!(
            engine.transition(Phase::Sleep),
            Err(PhaseError {
                from: Some(Phase::Active),
                to: Phase::Sleep
            })
        );
        assert!(engine.transition(Phase::Active).is_err());
        engine.transition(Phase::Idle).unwrap();
        assert!(engine.transition(Phase::Active).is_err());

        let observed = engine.history().to_vec();
        let full = [Phase::Sleep, Phase::Active, Phase::Idle];
        assert!(full.ends_with(&observed) || full.starts_with(&observed));
    }

    #[test]
    fn minute_boundary_alignment() {
        let on_boundary = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        assert_eq!(next_minute_boundary(on_boundary), on_boundary);

        let within_first_second = on_boundary + Duration::milliseconds(400);
        assert_eq!(next_minute_boundary(within_first_second), within_first_second);

        let mid_minute = on_boundary + Duration::seconds(17);
        assert_eq!(
            next_minute_boundary(mid_minute),
            on_boundary + Duration::minutes(1)
        );

        let just_after_publish = on_boundary + Duration::milliseconds(1_050);
        assert_eq!(
            next_minute_boundary(just_after_publish),
            on_boundary + Duration::minutes(1)
        );
    }
}
