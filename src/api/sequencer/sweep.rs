//! PWM duty-cycle sweeps locating the load alarm and the two rail
//! collapses.
//!
//! Two variants exist. The plain sweep steps the duty down in coarse steps
//! with preheat off and, after a rail-15V collapse, brings the board back
//! up before continuing. The preheat sweep first runs a fine search with an
//! exponential moving average to spot the load disconnect, then a coarse
//! pass for the rails.
//!
//! Both always return the load to normal (`DGLOAD`) before handing back.
use anyhow::Result;
use std::time::Duration;

use super::stages::{wait_for_rail_5v, WarmupPolicy};
use crate::{
    api::outcome::SweepOutcome,
    core::settings::SweepTuning,
    protocol::{command::Command, link::BoardLink, transport::is_transport_fault},
};

/// Duty used to park the converter between phases.
pub const PARK_DUTY: f64 = 80.0;

/// Inclusive, descending duty range counted in thousandths of a percent
/// so every yielded duty is an exact decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutyRange {
    start_milli: i64,
    end_milli: i64,
    step_milli: i64,
}

impl DutyRange {
    pub const fn descending(start_milli: i64, end_milli: i64, step_milli: i64) -> Self {
        Self {
            start_milli,
            end_milli,
            step_milli,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> {
        let Self {
            start_milli,
            end_milli,
            step_milli,
        } = *self;
        (0..)
            .map(move |i| start_milli - i * step_milli)
            .take_while(move |milli| step_milli > 0 && *milli >= end_milli)
            .map(|milli| milli as f64 / 1000.0)
    }
}

pub const PLAIN_SWEEP: DutyRange = DutyRange::descending(70_000, 60_000, 200);
pub const FINE_SWEEP: DutyRange = DutyRange::descending(63_000, 60_000, 1);
pub const COARSE_SWEEP: DutyRange = DutyRange::descending(72_000, 60_000, 200);

/// Exponential moving average seeded by its first sample.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            None => sample,
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Plain sweep: preheat off unless configured, load-alarm detection off
/// unless configured.
pub fn plain_sweep(link: &mut BoardLink, tuning: &SweepTuning) -> Result<SweepOutcome> {
    let mut outcome = SweepOutcome::default();
    let result = run_plain(link, tuning, &mut outcome);
    finish(link, result, outcome)
}

/// Preheat sweep: fine EMA search for the load disconnect, then a coarse
/// pass for the rail collapses.
pub fn preheat_sweep(link: &mut BoardLink, tuning: &SweepTuning) -> Result<SweepOutcome> {
    let mut outcome = SweepOutcome::default();
    let result = run_preheat(link, tuning, &mut outcome);
    finish(link, result, outcome)
}

fn finish(link: &mut BoardLink, result: Result<()>, outcome: SweepOutcome) -> Result<SweepOutcome> {
    let cleanup = link.send(Command::LoadReturn);

    if let Err(err) = result {
        if is_transport_fault(&err) {
            return Err(err);
        }
        log::error!("Sweep interrupted, keeping partial result: {err:#}");
    }
    match cleanup {
        Err(err) if is_transport_fault(&err) => Err(err),
        Err(err) => {
            log::warn!("Failed to return load after sweep: {err:#}");
            Ok(outcome)
        }
        Ok(_) => Ok(outcome),
    }
}

fn run_plain(link: &mut BoardLink, tuning: &SweepTuning, outcome: &mut SweepOutcome) -> Result<()> {
    let detect_load = tuning.detect_load_alarm_without_preheat;

    link.send(Command::PreheatOff)?;
    if tuning.preheat_in_plain_sweep {
        link.send(Command::PreheatOn)?;
    }

    let mut battery_released = false;
    for duty in PLAIN_SWEEP.iter() {
        link.send(Command::SetDuty(duty))?;
        link.sleep(Duration::from_secs(1));
        if !battery_released {
            link.send(Command::BatteryOff)?;
            battery_released = true;
        }

        let Some(frame) = link.read_frame()? else {
            continue;
        };

        if detect_load
            && frame.load_sense < tuning.load_alarm_volts
            && outcome.record_load_alarm(duty, frame.battery_sense)
        {
            log::info!("Load alarm at duty {duty:.1}, battery {:.2} V", frame.battery_sense);
        }

        let armed = !detect_load || outcome.has_load_alarm();
        if !armed {
            continue;
        }

        if frame.rail_5v < tuning.rail_5v_collapse_volts
            && outcome.record_rail_5v_collapse(duty, frame.battery_sense)
        {
            log::info!("Rail 5V collapse at duty {duty:.1}, battery {:.2} V", frame.battery_sense);
        }

        if frame.rail_15v < tuning.rail_15v_collapse_volts
            && outcome.record_rail_15v_collapse(duty, frame.battery_sense)
        {
            log::info!("Rail 15V collapse at duty {duty:.1}, battery {:.2} V", frame.battery_sense);

            link.send(Command::SetDuty(PARK_DUTY))?;
            link.send(Command::DcdcOn)?;
            let warmup = wait_for_rail_5v(link, WarmupPolicy::Lenient)?;
            if !warmup.ready {
                log::warn!("Recovery after rail 15V collapse failed: {}", warmup.message);
                return Ok(());
            }
            link.sleep(Duration::from_secs(2));
            link.send(Command::DcdcOff)?;
        }

        if outcome.has_rail_5v_collapse() && outcome.has_rail_15v_collapse() {
            break;
        }
    }
    Ok(())
}

fn run_preheat(
    link: &mut BoardLink,
    tuning: &SweepTuning,
    outcome: &mut SweepOutcome,
) -> Result<()> {
    link.send(Command::PreheatOn)?;
    link.send(Command::LoadAlarm)?;

    link.send(Command::SetDuty(PARK_DUTY))?;
    link.sleep(Duration::from_millis(500));
    link.clear_input()?;
    link.send(Command::BatteryOff)?;

    let mut ema_load = Ema::new(tuning.ema_alpha);
    let mut ema_battery = Ema::new(tuning.ema_alpha);
    let mut samples = 0u64;

    for duty in FINE_SWEEP.iter() {
        link.send(Command::SetDuty(duty))?;
        let Some(frame) = link.read_frame_now()? else {
            continue;
        };

        let load = ema_load.update(frame.load_sense);
        let battery = ema_battery.update(frame.battery_sense);
        let gap = (load - battery).abs();

        samples += 1;
        if samples % 100 == 0 {
            log::debug!("EMA load {load:.2} V, battery {battery:.2} V, gap {gap:.2} V");
        }

        if gap > tuning.disconnect_gap_volts {
            link.send(Command::BatteryOn)?;
            link.send(Command::SetDuty(PARK_DUTY))?;
            outcome.record_load_alarm(duty, frame.battery_sense);
            link.send(Command::BatteryOff)?;
            log::info!(
                "Load disconnect at duty {duty:.3}, battery {:.2} V",
                frame.battery_sense
            );
            break;
        }
    }

    for duty in COARSE_SWEEP.iter() {
        link.send(Command::SetDuty(duty))?;
        link.sleep(Duration::from_millis(500));
        let Some(frame) = link.read_frame()? else {
            continue;
        };
        log::debug!(
            "Duty {duty:.1}: rail 15V {:.2} V, rail 5V {:.2} V, battery {:.2} V",
            frame.rail_15v,
            frame.rail_5v,
            frame.battery_sense
        );

        if frame.rail_5v < tuning.rail_5v_collapse_volts
            && outcome.record_rail_5v_collapse(duty, frame.battery_sense)
        {
            log::info!("Rail 5V collapse at duty {duty:.1}, battery {:.2} V", frame.battery_sense);
        }
        if frame.rail_15v < tuning.rail_15v_collapse_volts
            && outcome.record_rail_15v_collapse(duty, frame.battery_sense)
        {
            log::info!("Rail 15V collapse at duty {duty:.1}, battery {:.2} V", frame.battery_sense);
        }

        if outcome.has_rail_5v_collapse() && outcome.has_rail_15v_collapse() {
            break;
        }
    }
    Ok(())
}
