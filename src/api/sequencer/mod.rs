//! Ordered test stages for one board.
//!
//! A run goes `Idle → BatteryShort → … → CommunicationChecks → Done`. Each
//! stage owns a fixed set of session slots. A stage that fails with an
//! ordinary error fails its remaining slots and the run moves on; a
//! [`TransportFault`](crate::protocol::TransportFault) aborts the whole run.
//! The session is finalized and archived on every path.
pub mod comm;
pub mod stages;
pub mod sweep;

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use strum::{Display, EnumIter, IntoStaticStr};

use self::stages::TempSensor;
use crate::{
    api::{
        archive::{NoOpArchive, SessionArchive},
        outcome::{SweepOutcome, TestField, TestOutcome, TestStatus},
        session::{FinalizedSession, SessionAggregator},
        traits::SequencerHook,
    },
    core::{
        clock::{Clock, SystemClock},
        logs::LogEntry,
        settings::{Calibration, SweepTuning, Timings},
    },
    protocol::{link::BoardLink, transport::is_transport_fault, Transport},
};

pub const STOPPED_BY_OPERATOR: &str = "stopped by operator";

/// Extra pause between the initialisation burst and the first stage.
const FIRST_STAGE_SETTLE: Duration = Duration::from_secs(1);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Idle,
    BatteryShort,
    DcdcShort,
    DcdcAndLoad,
    IsolatedBattery,
    TemperatureAlarms,
    PwmSweep,
    PwmSweepWithPreheat,
    CommunicationChecks,
    Done,
}

impl Stage {
    /// Stages that do work, in execution order.
    pub const RUN_ORDER: [Stage; 8] = [
        Stage::BatteryShort,
        Stage::DcdcShort,
        Stage::DcdcAndLoad,
        Stage::IsolatedBattery,
        Stage::TemperatureAlarms,
        Stage::PwmSweep,
        Stage::PwmSweepWithPreheat,
        Stage::CommunicationChecks,
    ];

    /// Session slots this stage records.
    pub fn fields(self) -> &'static [TestField] {
        match self {
            Stage::Idle | Stage::Done => &[],
            Stage::BatteryShort => &[TestField::BatteryShort],
            Stage::DcdcShort => &[TestField::DcdcShort],
            Stage::DcdcAndLoad => &[TestField::DcdcLoadStepUp, TestField::BatteryChargeCircuit],
            Stage::IsolatedBattery => &[TestField::IsolatedBattery],
            Stage::TemperatureAlarms => &[
                TestField::TempAlarm1,
                TestField::TempAlarm1Return,
                TestField::TempAlarm2,
                TestField::TempAlarm2Return,
            ],
            Stage::PwmSweep => &[TestField::Pwm],
            Stage::PwmSweepWithPreheat => &[TestField::PwmPreheat],
            Stage::CommunicationChecks => &[
                TestField::Inclinometer,
                TestField::Adc,
                TestField::Rak,
                TestField::Rtc,
                TestField::SerialNumber,
                TestField::Eeprom,
                TestField::HBridge,
            ],
        }
    }
}

/// Builder for a [`Sequencer`].
///
/// Everything but the transport has a default: system clock, bench
/// calibration and timings, and an archive that discards sessions.
pub struct SequencerBuilder {
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    calibration: Calibration,
    timings: Timings,
    tuning: SweepTuning,
    archive: Box<dyn SessionArchive>,
    hooks: Vec<Arc<dyn SequencerHook>>,
}

impl SequencerBuilder {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            clock: Arc::new(SystemClock::new()),
            calibration: Calibration::default(),
            timings: Timings::default(),
            tuning: SweepTuning::default(),
            archive: Box::new(NoOpArchive),
            hooks: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_tuning(mut self, tuning: SweepTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_archive(mut self, archive: Box<dyn SessionArchive>) -> Self {
        self.archive = archive;
        self
    }

    /// Hooks are called in the order they were added.
    pub fn add_hook(mut self, hook: Arc<dyn SequencerHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn build(self) -> Sequencer {
        Sequencer {
            link: BoardLink::new(self.transport, self.clock, self.calibration, self.timings),
            tuning: self.tuning,
            aggregator: SessionAggregator::new(self.archive),
            hooks: self.hooks,
            stage: Stage::Idle,
        }
    }
}

/// Runs the full bench sequence against one board.
pub struct Sequencer {
    link: BoardLink,
    tuning: SweepTuning,
    aggregator: SessionAggregator,
    hooks: Vec<Arc<dyn SequencerHook>>,
    stage: Stage,
}

impl Sequencer {
    pub fn builder(transport: Box<dyn Transport>) -> SequencerBuilder {
        SequencerBuilder::new(transport)
    }

    /// Stage currently running, `Done` after a run.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Test one board. The returned session is already archived.
    ///
    /// Only a failure to produce a session at all is an error; faults during
    /// the run end up in `session.aborted`.
    pub fn run(&mut self, serial_number: &str, operator: &str) -> Result<FinalizedSession> {
        self.stage = Stage::Idle;
        self.aggregator.start(serial_number, operator);
        self.progress(LogEntry::info(format!("Testing board {serial_number}")));

        if let Err(err) = self.run_stages(serial_number) {
            let reason = format!("{err:#}");
            self.aggregator.mark_aborted(reason.clone());
            for hook in &self.hooks {
                hook.on_fault(&reason);
            }
        }

        self.stage = Stage::Done;
        let done = self
            .aggregator
            .finalize()
            .ok_or_else(|| anyhow!("session vanished before finalize"))?;
        for hook in &self.hooks {
            hook.on_finished(&done);
        }
        Ok(done)
    }

    fn run_stages(&mut self, serial_number: &str) -> Result<()> {
        if let Err(err) = self.link.initialize() {
            if is_transport_fault(&err) {
                return Err(err);
            }
            log::warn!("Board initialisation incomplete: {err:#}");
        }
        self.link.sleep(FIRST_STAGE_SETTLE);

        for stage in Stage::RUN_ORDER {
            if !self.hooks.iter().all(|hook| hook.should_continue()) {
                self.progress(LogEntry::warning(format!("Stopped before {stage}")));
                self.aggregator.mark_aborted(STOPPED_BY_OPERATOR);
                return Ok(());
            }

            self.stage = stage;
            for hook in &self.hooks {
                hook.on_stage(stage);
            }
            log::info!("Stage {stage}");

            if let Err(err) = self.run_stage(stage, serial_number) {
                if is_transport_fault(&err) {
                    return Err(err);
                }
                let message = format!("{stage} failed: {err:#}");
                self.progress(LogEntry::error(message.clone()));
                for &field in stage.fields() {
                    let pending = self
                        .aggregator
                        .current()
                        .is_some_and(|s| s.status(field) == TestStatus::Pending);
                    if pending {
                        self.finish_check(field, TestOutcome::fail(message.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    fn run_stage(&mut self, stage: Stage, serial_number: &str) -> Result<()> {
        match stage {
            Stage::Idle | Stage::Done => {}
            Stage::BatteryShort => {
                let outcome = stages::battery_short(&mut self.link)?;
                self.finish_check(TestField::BatteryShort, outcome);
            }
            Stage::DcdcShort => {
                let outcome = stages::dcdc_short(&mut self.link)?;
                self.finish_check(TestField::DcdcShort, outcome);
            }
            Stage::DcdcAndLoad => {
                let (part_a, part_b) = stages::dcdc_and_load(&mut self.link)?;
                self.finish_check(TestField::DcdcLoadStepUp, part_a);
                self.finish_check(TestField::BatteryChargeCircuit, part_b);
            }
            Stage::IsolatedBattery => {
                let outcome = stages::isolated_battery(&mut self.link)?;
                self.finish_check(TestField::IsolatedBattery, outcome);
            }
            Stage::TemperatureAlarms => {
                let outcome = stages::temp_alarm(&mut self.link, TempSensor::One)?;
                self.finish_check(TestField::TempAlarm1, outcome);
                let outcome =
                    stages::temp_alarm_return(&mut self.link, TempSensor::One, Duration::from_secs(1))?;
                self.finish_check(TestField::TempAlarm1Return, outcome);
                let outcome = stages::temp_alarm(&mut self.link, TempSensor::Two)?;
                self.finish_check(TestField::TempAlarm2, outcome);
                let outcome =
                    stages::temp_alarm_return(&mut self.link, TempSensor::Two, Duration::from_secs(2))?;
                self.finish_check(TestField::TempAlarm2Return, outcome);
            }
            Stage::PwmSweep => {
                let sweep = sweep::plain_sweep(&mut self.link, &self.tuning)?;
                let passed = if self.tuning.detect_load_alarm_without_preheat {
                    sweep.is_valid()
                } else {
                    sweep.rails_valid()
                };
                self.finish_sweep(stage, TestField::Pwm, &sweep, passed);
            }
            Stage::PwmSweepWithPreheat => {
                let sweep = sweep::preheat_sweep(&mut self.link, &self.tuning)?;
                self.aggregator.record_sweep(&sweep);
                self.finish_sweep(stage, TestField::PwmPreheat, &sweep, sweep.is_valid());
            }
            Stage::CommunicationChecks => {
                let comm_timeout = self.link.timings().comm_timeout();
                let line_timeout = self.link.line_timeout();
                self.link.set_line_timeout(comm_timeout)?;
                let result = self.communication_checks(serial_number);
                let restored = self.link.set_line_timeout(line_timeout);
                result?;
                restored?;
            }
        }
        Ok(())
    }

    fn communication_checks(&mut self, serial_number: &str) -> Result<()> {
        let report = match self.aggregator.cached_self_test() {
            Some(report) => report.clone(),
            None => {
                let report = comm::self_test(&mut self.link)?;
                self.aggregator.cache_self_test(report.clone());
                report
            }
        };
        self.finish_check(TestField::Inclinometer, report.inclinometer);
        self.finish_check(TestField::Adc, report.adc);
        self.finish_check(TestField::Rak, report.rak);

        let rtc = comm::set_clock(&mut self.link)?;
        self.finish_check(TestField::Rtc, rtc);

        let serial = comm::set_serial_number(&mut self.link, serial_number)?;
        self.finish_check(TestField::SerialNumber, serial);

        self.finish_check(TestField::Eeprom, comm::eeprom());
        self.finish_check(TestField::HBridge, comm::h_bridge());
        Ok(())
    }

    fn finish_sweep(&mut self, stage: Stage, field: TestField, sweep: &SweepOutcome, passed: bool) {
        for hook in &self.hooks {
            hook.on_sweep(stage, sweep);
        }
        let numbers = [
            ("duty_at_load_alarm", sweep.duty_at_load_alarm),
            ("battery_at_load_alarm", sweep.battery_at_load_alarm),
            ("duty_at_rail_5v_collapse", sweep.duty_at_rail_5v_collapse),
            ("battery_at_rail_5v_collapse", sweep.battery_at_rail_5v_collapse),
            ("duty_at_rail_15v_collapse", sweep.duty_at_rail_15v_collapse),
            ("battery_at_rail_15v_collapse", sweep.battery_at_rail_15v_collapse),
        ];
        let mut outcome = TestOutcome::judged(
            passed,
            if passed {
                "collapse points inside limits"
            } else {
                "collapse points missing or outside limits"
            },
        );
        for (name, value) in numbers {
            if let Some(value) = value {
                outcome = outcome.with_detail(name, value);
            }
        }
        self.finish_check(field, outcome);
    }

    fn finish_check(&mut self, field: TestField, outcome: TestOutcome) {
        self.aggregator.record(field, outcome.passed);
        log::info!(
            "{field}: {} ({})",
            if outcome.passed { "OK" } else { "NG" },
            outcome.message
        );
        for hook in &self.hooks {
            hook.on_check(field, &outcome);
        }
    }

    fn progress(&self, entry: LogEntry) {
        for hook in &self.hooks {
            hook.on_progress(&entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use strum::IntoEnumIterator;

    #[test]
    fn every_field_has_exactly_one_stage() {
        let mut seen = HashSet::new();
        for stage in Stage::RUN_ORDER {
            for field in stage.fields() {
                assert!(seen.insert(*field), "{field} owned twice");
            }
        }
        assert_eq!(seen.len(), TestField::iter().count());
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::PwmSweepWithPreheat.to_string(), "pwm_sweep_with_preheat");
        assert!(Stage::Done.fields().is_empty());
    }
}
