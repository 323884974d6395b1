//! Scripted JT2302 board for driving the sequencer in virtual time.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};

use powerqa::{
    core::{
        clock::{Clock, ManualClock},
        settings::Calibration,
    },
    protocol::{Transport, TransportFault},
};

/// Board outputs the model sees when a frame is requested.
#[derive(Debug, Clone, Default)]
pub struct BoardState {
    pub duty: f64,
    pub battery_on: bool,
    pub dcdc_on: bool,
    /// Virtual time the DCDC was switched on
    pub dcdc_since: Option<Duration>,
    pub charge_on: bool,
    pub load_alarm: bool,
    pub temp_alarm: bool,
    pub preheat: bool,
    pub now: Duration,
}

impl BoardState {
    pub fn dcdc_running_for(&self) -> Duration {
        self.dcdc_since
            .map(|since| self.now.saturating_sub(since))
            .unwrap_or_default()
    }
}

/// Channel volts in frame order: rail 15V, rail 5V, load, DCDC, battery,
/// cap filter, PWM, step-up, current. `None` leaves the request unanswered.
pub type BoardModel = Box<dyn Fn(&BoardState) -> Option<[f64; 9]> + Send>;

/// Raw ADC codes that decode back to `volts` under `calibration`.
pub fn codes_for_volts(volts: [f64; 9], calibration: &Calibration) -> [u32; 9] {
    let ratios = [
        calibration.general.ratio(),
        calibration.general.ratio(),
        calibration.general.ratio(),
        calibration.dcdc.ratio(),
        calibration.battery.ratio(),
        calibration.cap_filter.ratio(),
        calibration.pwm.ratio(),
        calibration.battery.ratio(),
        calibration.load.ratio(),
    ];
    let vpc = calibration.volts_per_code();
    let mut codes = [0u32; 9];
    for ((code, v), ratio) in codes.iter_mut().zip(volts).zip(ratios) {
        *code = (v / (vpc * ratio)).round().clamp(0.0, 99_999.0) as u32;
    }
    codes
}

pub fn frame_line(volts: [f64; 9], calibration: &Calibration) -> String {
    let fields: Vec<String> = codes_for_volts(volts, calibration)
        .iter()
        .map(|code| format!("{code:05}"))
        .collect();
    format!("#{}#\r\n", fields.join(","))
}

/// Battery sense while the PWM converter stands in for the battery.
pub fn sweep_battery(duty: f64, preheat: bool) -> f64 {
    let volts = 23.2 + (duty - 64.0) * 0.5;
    if preheat {
        volts - 2.0
    } else {
        volts
    }
}

/// A board that passes every check.
///
/// Rail 5V needs 16 s after `LIGDC` to come up. During the sweeps the rails
/// collapse with the converter output: rail 5V below 23.25 V, rail 15V below
/// 22.75 V. With `ACLOAD` active the load disconnects just below 20 V.
pub fn healthy(state: &BoardState) -> Option<[f64; 9]> {
    let sweeping = !state.battery_on && !state.dcdc_on && state.duty > 0.0;
    let supply = if state.dcdc_on {
        28.0
    } else if sweeping {
        sweep_battery(state.duty, state.preheat)
    } else {
        24.0
    };

    let (rail_15v, rail_5v) = if state.dcdc_on {
        if state.dcdc_running_for() >= Duration::from_secs(16) {
            (15.0, 5.0)
        } else {
            (2.0, 0.5)
        }
    } else {
        (
            if supply < 22.75 { 14.0 } else { 15.0 },
            if supply < 23.25 { 4.5 } else { 5.0 },
        )
    };

    let load = if state.temp_alarm || (state.load_alarm && supply < 19.97) {
        0.0
    } else if state.dcdc_on {
        23.0
    } else {
        supply
    };
    let dcdc = if state.dcdc_on { 24.0 } else { 0.0 };
    let cap_filter = if state.charge_on && state.dcdc_on { 13.0 } else { 0.0 };
    let step_up = if state.dcdc_on { 30.0 } else { supply };

    Some([rail_15v, rail_5v, load, dcdc, supply, cap_filter, 3.0, step_up, 1.0])
}

/// Shared view of what the board received.
#[derive(Debug, Clone, Default)]
pub struct Wire {
    written: Arc<Mutex<Vec<String>>>,
}

impl Wire {
    /// Every command written so far, terminator stripped.
    pub fn commands(&self) -> Vec<String> {
        self.written.lock().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.written.lock().iter().filter(|c| *c == command).count()
    }

    pub fn position(&self, command: &str) -> Option<usize> {
        self.written.lock().iter().position(|c| c == command)
    }

    pub fn last(&self) -> Option<String> {
        self.written.lock().last().cloned()
    }
}

pub struct MockBoard {
    clock: Arc<ManualClock>,
    calibration: Calibration,
    model: BoardModel,
    state: BoardState,
    input: Vec<u8>,
    timeout: Duration,
    wire: Wire,
    writes: usize,
    fail_after: Option<usize>,
    fail_once_on: Option<String>,
    serial_reply: bool,
}

impl MockBoard {
    pub fn new(clock: Arc<ManualClock>, model: BoardModel) -> Self {
        Self {
            clock,
            calibration: Calibration::default(),
            model,
            state: BoardState::default(),
            input: Vec::new(),
            timeout: Duration::from_secs(2),
            wire: Wire::default(),
            writes: 0,
            fail_after: None,
            fail_once_on: None,
            serial_reply: true,
        }
    }

    pub fn healthy(clock: Arc<ManualClock>) -> Self {
        Self::new(clock, Box::new(healthy))
    }

    /// Report a transport fault on every call after `writes` writes.
    pub fn fail_after(mut self, writes: usize) -> Self {
        self.fail_after = Some(writes);
        self
    }

    /// Reject the first write of `command` with an ordinary I/O error.
    pub fn fail_once_on(mut self, command: &str) -> Self {
        self.fail_once_on = Some(command.to_string());
        self
    }

    /// Never confirm `$cSerialNumber`.
    pub fn without_serial_reply(mut self) -> Self {
        self.serial_reply = false;
        self
    }

    pub fn wire(&self) -> Wire {
        self.wire.clone()
    }

    fn check_fault(&self) -> Result<()> {
        match self.fail_after {
            Some(limit) if self.writes > limit => {
                Err(anyhow!(TransportFault::new("mock", "device removed")))
            }
            _ => Ok(()),
        }
    }

    fn reply(&mut self, text: &str) {
        self.input.extend_from_slice(text.as_bytes());
    }

    fn handle(&mut self, command: &str) {
        self.state.now = self.clock.now();
        if let Some(duty) = command.strip_prefix("FR1D") {
            if let Ok(duty) = duty.parse() {
                self.state.duty = duty;
            }
            self.reply("ACKOK\r\n");
            return;
        }
        if command.starts_with("$cTime,") {
            self.reply("$ok,rtc\r\n");
            return;
        }
        if command.starts_with("$cSerialNumber,") {
            if self.serial_reply {
                self.reply("$OK,serialNumber\r\n");
            }
            return;
        }

        match command {
            "AQADC" => {
                if let Some(volts) = (self.model)(&self.state) {
                    let line = frame_line(volts, &self.calibration);
                    self.reply(&line);
                }
                return;
            }
            "$startTest" => {
                self.reply("$ok,startTest,rak,ok,inc,ok,adc,ok\r\n");
                return;
            }
            "LIGBT" => self.state.battery_on = true,
            "DESBT" => self.state.battery_on = false,
            "LIGDC" => {
                if !self.state.dcdc_on {
                    self.state.dcdc_since = Some(self.state.now);
                }
                self.state.dcdc_on = true;
            }
            "DESDC" => {
                self.state.dcdc_on = false;
                self.state.dcdc_since = None;
            }
            "LIGCB" => self.state.charge_on = true,
            "DESCB" => self.state.charge_on = false,
            "ACLOAD" => self.state.load_alarm = true,
            "DGLOAD" => self.state.load_alarm = false,
            "ACTP1" | "ACTP2" => self.state.temp_alarm = true,
            "ACTPA" => self.state.temp_alarm = false,
            "ENPTH" => self.state.preheat = true,
            "DGPTH" => self.state.preheat = false,
            _ => {}
        }
        self.reply("ACKOK\r\n");
    }
}

impl Transport for MockBoard {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writes += 1;
        self.check_fault()?;

        let command = String::from_utf8_lossy(bytes).trim_end_matches('\r').to_string();
        if self.fail_once_on.as_deref() == Some(command.as_str()) {
            self.fail_once_on = None;
            return Err(anyhow!("write of {command} timed out"));
        }
        self.wire.written.lock().push(command.clone());
        self.handle(&command);
        Ok(())
    }

    fn poll(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        self.check_fault()?;
        let n = self.input.len();
        buf.append(&mut self.input);
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<()> {
        self.check_fault()?;
        self.input.clear();
        Ok(())
    }

    fn read_line(&mut self) -> Result<Vec<u8>> {
        self.check_fault()?;
        match self.input.iter().position(|b| *b == b'\n') {
            Some(end) => Ok(self.input.drain(..=end).collect()),
            None => {
                self.clock.sleep(self.timeout);
                Ok(std::mem::take(&mut self.input))
            }
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.check_fault()?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
