use chrono::NaiveDate;

use crate::types::ConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Run,
    AlreadyRan,
    Offline,
}

/// At most one day-run per calendar date. Only the date of the last run is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayGate {
    last_run: NaiveDate,
}

impl DayGate {
    /// A fresh gate treats yesterday as already run, so today is due immediately.
    pub fn new(today: NaiveDate) -> Self {
        Self {
            last_run: today.pred_opt().unwrap_or(NaiveDate::MIN),
        }
    }

    pub fn last_run(&self) -> NaiveDate {
        self.last_run
    }

    pub fn poll(&mut self, today: NaiveDate, connection: ConnectionState) -> GateDecision {
        if (today - self.last_run).num_days() < 1 {
            return GateDecision::AlreadyRan;
        }
        if connection != ConnectionState::Connected {
            return GateDecision::Offline;
        }
        self.last_run = today;
        GateDecision::Run
    }
}
