//! Single-shot power checks and the rail-5V warm-up wait.
//!
//! Every check returns a [`TestOutcome`]; `Err` is reserved for link
//! problems so the sequencer can decide whether the run survives.
use anyhow::Result;
use std::time::Duration;

use crate::{
    api::outcome::TestOutcome,
    protocol::{command::Command, link::BoardLink, telemetry::TelemetryFrame},
};

pub const NO_FRAME: &str = "no telemetry frame";

fn judge(
    frame: Option<TelemetryFrame>,
    name: &str,
    predicate: impl FnOnce(&TelemetryFrame) -> bool,
) -> TestOutcome {
    let Some(frame) = frame else {
        log::warn!("{name}: {NO_FRAME}");
        return TestOutcome::fail(NO_FRAME);
    };
    let passed = predicate(&frame);
    log::info!("{name}: {}", if passed { "OK" } else { "NG" });
    TestOutcome::judged(passed, format!("{name}: {}", if passed { "OK" } else { "NG" }))
        .with_frame(&frame)
}

/// A shorted battery path reads exactly 0 V.
pub fn battery_short(link: &mut BoardLink) -> Result<TestOutcome> {
    link.clear_input()?;
    link.send(Command::BatteryOn)?;
    link.sleep(Duration::from_millis(300));
    let frame = link.read_frame()?;
    link.send(Command::BatteryOff)?;

    Ok(match frame {
        Some(f) if f.battery_sense == 0.0 => {
            TestOutcome::fail("possible battery short").with_frame(&f)
        }
        other => judge(other, "Battery short", |_| true),
    })
}

pub fn dcdc_short(link: &mut BoardLink) -> Result<TestOutcome> {
    link.clear_input()?;
    link.send(Command::DcdcOn)?;
    link.sleep(Duration::from_millis(300));
    let frame = link.read_frame()?;
    link.send(Command::DcdcOff)?;

    Ok(match frame {
        Some(f) if f.dcdc_sense == 0.0 => TestOutcome::fail("possible DCDC short").with_frame(&f),
        other => judge(other, "DCDC short", |_| true),
    })
}

/// How a warm-up that finishes early is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupPolicy {
    /// Reaching the level before the minimum time is an anomaly
    Strict,
    Lenient,
}

/// Result of waiting for rail-5V to come up.
#[derive(Debug, Clone, PartialEq)]
pub struct Warmup {
    pub ready: bool,
    pub elapsed: Duration,
    pub message: String,
}

impl Warmup {
    pub fn into_failure(self) -> TestOutcome {
        TestOutcome::fail(self.message).with_detail("warmup_seconds", self.elapsed.as_secs_f64())
    }
}

/// Poll telemetry once per interval until rail-5V exceeds the warm-up level
/// or the ceiling passes. A missing frame counts as 0 V.
pub fn wait_for_rail_5v(link: &mut BoardLink, policy: WarmupPolicy) -> Result<Warmup> {
    let timings = link.timings().clone();
    let start = link.now();

    loop {
        link.sleep(timings.warmup_poll());
        let rail_5v = link.read_frame()?.map(|f| f.rail_5v).unwrap_or(0.0);
        let elapsed = link.now().saturating_sub(start);

        if rail_5v > timings.warmup_rail_5v {
            log::info!(
                "Rail 5V at {rail_5v:.2} V after {:.1} s",
                elapsed.as_secs_f64()
            );
            if policy == WarmupPolicy::Strict && elapsed < timings.warmup_min() {
                return Ok(Warmup {
                    ready: false,
                    elapsed,
                    message: format!(
                        "rail-5V came up after {:.1} s, expected at least {:.1} s",
                        elapsed.as_secs_f64(),
                        timings.warmup_min().as_secs_f64()
                    ),
                });
            }
            link.sleep(Duration::from_secs(2));
            return Ok(Warmup {
                ready: true,
                elapsed,
                message: format!("rail-5V ready after {:.1} s", elapsed.as_secs_f64()),
            });
        }

        if elapsed > timings.warmup_ceiling() {
            log::warn!(
                "Rail 5V still at {rail_5v:.2} V after {:.1} s",
                elapsed.as_secs_f64()
            );
            return Ok(Warmup {
                ready: false,
                elapsed,
                message: "rail-5V did not reach 4 V".into(),
            });
        }
    }
}

/// DCDC with load (part A) followed by the charge circuit (part B).
pub fn dcdc_and_load(link: &mut BoardLink) -> Result<(TestOutcome, TestOutcome)> {
    link.clear_input()?;
    link.send(Command::DcdcOn)?;

    let warmup = wait_for_rail_5v(link, WarmupPolicy::Strict)?;
    if !warmup.ready {
        return Ok((
            warmup.into_failure(),
            TestOutcome::fail("not executed"),
        ));
    }
    let warmup_seconds = warmup.elapsed.as_secs_f64();

    let frame = link.read_frame()?;
    let part_a = judge(frame, "DCDC, load and step-up", |f| {
        f.battery_sense > 27.5
            && f.dcdc_sense > 22.0
            && f.load_sense > 21.5
            && f.rail_15v > 14.5
            && f.rail_5v > 4.5
            && f.step_up_sense > 29.5
    })
    .with_detail("warmup_seconds", warmup_seconds);

    link.send(Command::ChargeOn)?;
    link.sleep(Duration::from_millis(500));
    let frame = link.read_frame()?;
    link.sleep(Duration::from_millis(300));
    link.send(Command::ChargeOff)?;

    let part_b = judge(frame, "Battery charge circuit", |f| {
        f.dcdc_sense > 22.0 && 11.0 < f.cap_filter_sense && f.cap_filter_sense < 15.0
    });

    Ok((part_a, part_b))
}

/// Battery alone must carry the load with the DCDC off.
pub fn isolated_battery(link: &mut BoardLink) -> Result<TestOutcome> {
    link.clear_input()?;
    link.send(Command::BatteryOn)?;
    link.send(Command::DcdcOff)?;
    link.sleep(Duration::from_millis(500));
    let frame = link.read_frame()?;

    Ok(judge(frame, "Isolated battery", |f| {
        f.battery_sense > 22.0 && f.dcdc_sense < 5.0 && f.load_sense > 21.5
    }))
}

/// Which temperature input to trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempSensor {
    One,
    Two,
}

/// Trip a temperature alarm: the load must drop.
pub fn temp_alarm(link: &mut BoardLink, sensor: TempSensor) -> Result<TestOutcome> {
    let (command, name) = match sensor {
        TempSensor::One => (Command::TempAlarm1, "Temperature alarm 1"),
        TempSensor::Two => (Command::TempAlarm2, "Temperature alarm 2"),
    };
    link.send(Command::LoadAlarm)?;
    link.sleep(Duration::from_secs(1));
    link.send(command)?;
    link.sleep(Duration::from_secs(1));
    let frame = link.read_frame()?;
    link.send(Command::LoadReturn)?;

    Ok(judge(frame, name, |f| {
        f.battery_sense > 22.0 && f.dcdc_sense < 5.0 && f.load_sense < 10.0
    }))
}

/// Clear the temperature alarms: the load must come back.
pub fn temp_alarm_return(
    link: &mut BoardLink,
    sensor: TempSensor,
    settle: Duration,
) -> Result<TestOutcome> {
    let name = match sensor {
        TempSensor::One => "Temperature alarm 1 return",
        TempSensor::Two => "Temperature alarm 2 return",
    };
    link.send(Command::TempAlarmClear)?;
    link.sleep(settle);
    let frame = link.read_frame()?;

    Ok(judge(frame, name, |f| {
        f.battery_sense > 22.0 && f.dcdc_sense < 5.0 && f.load_sense > 21.0
    }))
}
