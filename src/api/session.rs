use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::{collections::BTreeMap, str::FromStr};
use strum::IntoEnumIterator;
use uuid::Uuid;

use super::{
    archive::SessionArchive,
    outcome::{SelfTestReport, SweepOutcome, TestField, TestStatus},
};

/// One board's run through the bench.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSession {
    pub id: Uuid,
    pub serial_number: String,
    pub operator: String,
    pub started_at: DateTime<Local>,
    pub results: BTreeMap<TestField, TestStatus>,
    pub sweep: SweepOutcome,
    /// Why the run ended early, if it did
    pub aborted: Option<String>,
    /// `PENDING` until the session is finalized
    pub verdict: TestStatus,
}

impl TestSession {
    fn new(serial_number: &str, operator: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            serial_number: serial_number.to_string(),
            operator: operator.to_string(),
            started_at: Local::now(),
            results: TestField::iter().map(|f| (f, TestStatus::Pending)).collect(),
            sweep: SweepOutcome::default(),
            aborted: None,
            verdict: TestStatus::Pending,
        }
    }

    pub fn status(&self, field: TestField) -> TestStatus {
        self.results.get(&field).copied().unwrap_or_default()
    }

    /// OK when the run completed, something was recorded and nothing
    /// recorded failed. Pending slots do not count against the board.
    pub fn compute_verdict(&self) -> TestStatus {
        if self.aborted.is_some() {
            return TestStatus::Ng;
        }
        let mut recorded = self
            .results
            .values()
            .filter(|s| **s != TestStatus::Pending)
            .peekable();
        if recorded.peek().is_none() {
            return TestStatus::Ng;
        }
        TestStatus::from(recorded.all(|s| *s == TestStatus::Ok))
    }
}

/// What `finalize` hands back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedSession {
    pub session: TestSession,
    /// Whether the archive accepted the record
    pub archived: bool,
}

/// Collects verdicts for the session in progress.
pub struct SessionAggregator {
    archive: Box<dyn SessionArchive>,
    current: Option<TestSession>,
    self_test: Option<SelfTestReport>,
}

impl SessionAggregator {
    pub fn new(archive: Box<dyn SessionArchive>) -> Self {
        Self {
            archive,
            current: None,
            self_test: None,
        }
    }

    /// Begin a fresh session, discarding any unfinished one.
    pub fn start(&mut self, serial_number: &str, operator: &str) -> &TestSession {
        if let Some(stale) = &self.current {
            log::warn!("Discarding unfinished session {}", stale.id);
        }
        self.self_test = None;
        let session = TestSession::new(serial_number, operator);
        log::info!(
            "Session {} started for board {:?} by {}",
            session.id,
            serial_number,
            operator
        );
        self.current.insert(session)
    }

    pub fn current(&self) -> Option<&TestSession> {
        self.current.as_ref()
    }

    /// Store a verdict. Returns `false` when no session is active.
    pub fn record(&mut self, field: TestField, passed: bool) -> bool {
        let Some(session) = self.current.as_mut() else {
            log::warn!("No active session, dropping {field} result");
            return false;
        };
        let status = TestStatus::from(passed);
        if let Some(previous) = session.results.insert(field, status) {
            if previous != TestStatus::Pending {
                log::warn!("{field} recorded twice ({previous} -> {status})");
            }
        }
        true
    }

    /// [`record`](Self::record) by slot name.
    pub fn record_named(&mut self, name: &str, passed: bool) -> Result<bool> {
        let field = TestField::from_str(name).map_err(|_| anyhow!("Unknown test field {name:?}"))?;
        Ok(self.record(field, passed))
    }

    /// Copy the numbers a sweep found; missing ones leave the slot alone.
    pub fn record_sweep(&mut self, sweep: &SweepOutcome) {
        let Some(session) = self.current.as_mut() else {
            log::warn!("No active session, dropping sweep numbers");
            return;
        };
        let target = &mut session.sweep;
        let pairs = [
            (&mut target.duty_at_load_alarm, sweep.duty_at_load_alarm),
            (&mut target.battery_at_load_alarm, sweep.battery_at_load_alarm),
            (&mut target.duty_at_rail_5v_collapse, sweep.duty_at_rail_5v_collapse),
            (&mut target.battery_at_rail_5v_collapse, sweep.battery_at_rail_5v_collapse),
            (&mut target.duty_at_rail_15v_collapse, sweep.duty_at_rail_15v_collapse),
            (&mut target.battery_at_rail_15v_collapse, sweep.battery_at_rail_15v_collapse),
        ];
        for (slot, value) in pairs {
            if value.is_some() {
                *slot = value;
            }
        }
    }

    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        match self.current.as_mut() {
            Some(session) => {
                log::error!("Session {} aborted: {reason}", session.id);
                session.aborted = Some(reason);
            }
            None => log::warn!("No active session to abort ({reason})"),
        }
    }

    /// Close the session, compute its verdict and archive it.
    ///
    /// Returns `None` when no session was active.
    pub fn finalize(&mut self) -> Option<FinalizedSession> {
        let mut session = self.current.take()?;
        self.self_test = None;
        session.verdict = session.compute_verdict();

        let archived = match self.archive.store(&session) {
            Ok(()) => true,
            Err(err) => {
                log::error!("Failed to archive session {}: {err:#}", session.id);
                false
            }
        };
        log::info!("Session {} finished: {}", session.id, session.verdict);
        Some(FinalizedSession { session, archived })
    }

    pub fn cached_self_test(&self) -> Option<&SelfTestReport> {
        self.self_test.as_ref()
    }

    pub fn cache_self_test(&mut self, report: SelfTestReport) {
        self.self_test = Some(report);
    }
}
