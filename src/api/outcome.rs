use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::protocol::telemetry::TelemetryFrame;

/// Verdict of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestOutcome {
    pub passed: bool,
    pub message: String,
    /// Named measurements backing the verdict
    pub details: BTreeMap<String, f64>,
}

impl TestOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn judged(passed: bool, message: impl Into<String>) -> Self {
        if passed {
            Self::pass(message)
        } else {
            Self::fail(message)
        }
    }

    pub fn with_frame(mut self, frame: &TelemetryFrame) -> Self {
        self.details.extend(frame.details());
        self
    }

    pub fn with_detail(mut self, name: impl Into<String>, value: f64) -> Self {
        self.details.insert(name.into(), value);
        self
    }
}

/// Battery windows the three sweep events must fall in.
pub const LOAD_ALARM_BATTERY: (f64, f64) = (19.0, 21.0);
pub const RAIL_5V_BATTERY: (f64, f64) = (22.9, 23.5);
pub const RAIL_15V_BATTERY: (f64, f64) = (22.5, 22.9);

fn strictly_inside(value: Option<f64>, (low, high): (f64, f64)) -> bool {
    matches!(value, Some(v) if low < v && v < high)
}

/// Result of one duty-cycle sweep.
///
/// Each event pair is written at most once; later detections of the same
/// event are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub duty_at_load_alarm: Option<f64>,
    pub battery_at_load_alarm: Option<f64>,
    pub duty_at_rail_5v_collapse: Option<f64>,
    pub battery_at_rail_5v_collapse: Option<f64>,
    pub duty_at_rail_15v_collapse: Option<f64>,
    pub battery_at_rail_15v_collapse: Option<f64>,
}

impl SweepOutcome {
    /// Returns `false` when the event was already recorded.
    pub fn record_load_alarm(&mut self, duty: f64, battery: f64) -> bool {
        Self::record_once(
            &mut self.duty_at_load_alarm,
            &mut self.battery_at_load_alarm,
            duty,
            battery,
        )
    }

    pub fn record_rail_5v_collapse(&mut self, duty: f64, battery: f64) -> bool {
        Self::record_once(
            &mut self.duty_at_rail_5v_collapse,
            &mut self.battery_at_rail_5v_collapse,
            duty,
            battery,
        )
    }

    pub fn record_rail_15v_collapse(&mut self, duty: f64, battery: f64) -> bool {
        Self::record_once(
            &mut self.duty_at_rail_15v_collapse,
            &mut self.battery_at_rail_15v_collapse,
            duty,
            battery,
        )
    }

    fn record_once(
        duty_slot: &mut Option<f64>,
        battery_slot: &mut Option<f64>,
        duty: f64,
        battery: f64,
    ) -> bool {
        if duty_slot.is_some() {
            return false;
        }
        *duty_slot = Some(duty);
        *battery_slot = Some(battery);
        true
    }

    pub fn has_load_alarm(&self) -> bool {
        self.duty_at_load_alarm.is_some()
    }

    pub fn has_rail_5v_collapse(&self) -> bool {
        self.duty_at_rail_5v_collapse.is_some()
    }

    pub fn has_rail_15v_collapse(&self) -> bool {
        self.duty_at_rail_15v_collapse.is_some()
    }

    /// All three events found with the battery inside its window.
    pub fn is_valid(&self) -> bool {
        strictly_inside(self.battery_at_load_alarm, LOAD_ALARM_BATTERY) && self.rails_valid()
    }

    /// Only the two rail-collapse events, for sweeps without load-alarm
    /// detection.
    pub fn rails_valid(&self) -> bool {
        strictly_inside(self.battery_at_rail_5v_collapse, RAIL_5V_BATTERY)
            && strictly_inside(self.battery_at_rail_15v_collapse, RAIL_15V_BATTERY)
    }
}

/// The session slots, in the order the bench runs them.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TestField {
    BatteryShort,
    DcdcShort,
    DcdcLoadStepUp,
    BatteryChargeCircuit,
    IsolatedBattery,
    #[serde(rename = "temp_alarm_1")]
    #[strum(serialize = "temp_alarm_1")]
    TempAlarm1,
    #[serde(rename = "temp_alarm_1_return")]
    #[strum(serialize = "temp_alarm_1_return")]
    TempAlarm1Return,
    #[serde(rename = "temp_alarm_2")]
    #[strum(serialize = "temp_alarm_2")]
    TempAlarm2,
    #[serde(rename = "temp_alarm_2_return")]
    #[strum(serialize = "temp_alarm_2_return")]
    TempAlarm2Return,
    Pwm,
    PwmPreheat,
    Inclinometer,
    Adc,
    Rak,
    Rtc,
    SerialNumber,
    Eeprom,
    #[serde(rename = "h_bridge")]
    #[strum(serialize = "h_bridge")]
    HBridge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum TestStatus {
    #[default]
    Pending,
    Ok,
    Ng,
}

impl From<bool> for TestStatus {
    fn from(passed: bool) -> Self {
        if passed {
            TestStatus::Ok
        } else {
            TestStatus::Ng
        }
    }
}

/// Per-component verdicts of the grouped firmware self-test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelfTestReport {
    pub rak: TestOutcome,
    pub inclinometer: TestOutcome,
    pub adc: TestOutcome,
}

impl SelfTestReport {
    /// Every component failed for the same reason.
    pub fn failed(message: &str) -> Self {
        Self {
            rak: TestOutcome::fail(message),
            inclinometer: TestOutcome::fail(message),
            adc: TestOutcome::fail(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn events_are_recorded_once() {
        let mut sweep = SweepOutcome::default();
        assert!(sweep.record_rail_5v_collapse(64.0, 23.2));
        assert!(!sweep.record_rail_5v_collapse(63.8, 22.0));
        assert_eq!(sweep.duty_at_rail_5v_collapse, Some(64.0));
        assert_eq!(sweep.battery_at_rail_5v_collapse, Some(23.2));
    }

    #[test]
    fn validity_uses_open_intervals() {
        let mut sweep = SweepOutcome::default();
        sweep.record_rail_5v_collapse(64.0, 23.0);
        sweep.record_rail_15v_collapse(62.0, 22.7);
        assert!(sweep.rails_valid());
        assert!(!sweep.is_valid());

        sweep.record_load_alarm(66.0, 20.0);
        assert!(sweep.is_valid());

        let mut edge = sweep.clone();
        edge.battery_at_load_alarm = Some(21.0);
        assert!(!edge.is_valid());

        let mut edge = sweep;
        edge.battery_at_rail_15v_collapse = Some(22.9);
        assert!(!edge.rails_valid());
    }

    #[test]
    fn empty_sweep_is_invalid() {
        let sweep = SweepOutcome::default();
        assert!(!sweep.is_valid());
        assert!(!sweep.rails_valid());
    }

    #[test]
    fn there_are_eighteen_fields() {
        assert_eq!(TestField::iter().count(), 18);
        assert_eq!(TestField::TempAlarm1Return.to_string(), "temp_alarm_1_return");
        assert_eq!(TestField::from_str("h_bridge").unwrap(), TestField::HBridge);
        assert_eq!(TestField::from_str("RAK").unwrap(), TestField::Rak);
        assert!(TestField::from_str("teste_xyz").is_err());
    }

    #[test]
    fn names_agree_between_strum_and_serde() {
        for field in TestField::iter() {
            let json = serde_json::to_string(&field).unwrap();
            assert_eq!(json, format!("\"{field}\""));
        }
    }

    #[test]
    fn status_spelling() {
        assert_eq!(serde_json::to_string(&TestStatus::Ng).unwrap(), "\"NG\"");
        assert_eq!(TestStatus::Pending.to_string(), "PENDING");
        assert_eq!(TestStatus::from(true), TestStatus::Ok);
    }
}
