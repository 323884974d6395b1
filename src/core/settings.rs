//! Per-revision constants: ADC calibration, link timings and sweep tuning.
//!
//! Every value has a default matching the JT2302 bench; a config file only
//! needs to list what differs. The structs are plain values handed to each
//! component at construction and never mutated during a run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resistor divider in front of an ADC input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Divider {
    /// Upper leg, kΩ
    pub top_kohm: f64,
    /// Lower leg (the one the ADC sees), kΩ
    pub bottom_kohm: f64,
}

impl Divider {
    pub const fn new(top_kohm: f64, bottom_kohm: f64) -> Self {
        Self {
            top_kohm,
            bottom_kohm,
        }
    }

    /// Input voltage per volt seen at the ADC pin.
    pub fn ratio(&self) -> f64 {
        (self.top_kohm + self.bottom_kohm) / self.bottom_kohm
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// ADC reference voltage
    pub reference_volts: f64,
    /// Number of codes spanning the reference
    pub code_span: f64,
    pub general: Divider,
    pub dcdc: Divider,
    pub load: Divider,
    pub battery: Divider,
    pub cap_filter: Divider,
    pub pwm: Divider,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            reference_volts: 3.49,
            code_span: 4096.0,
            general: Divider::new(27.0, 3.9),
            dcdc: Divider::new(27.0, 3.9),
            load: Divider::new(27.0, 3.9),
            battery: Divider::new(27.0, 2.2),
            cap_filter: Divider::new(100.0, 33.0),
            pwm: Divider::new(22.0, 3.3),
        }
    }
}

impl Calibration {
    pub fn volts_per_code(&self) -> f64 {
        self.reference_volts / self.code_span
    }
}

/// Timing windows of the command/telemetry protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub ack_timeout_ms: u64,
    /// Sleep between empty polls while waiting for an acknowledgment
    pub ack_poll_ms: u64,
    /// Delay between the telemetry request and reading the response line
    pub telemetry_settle_ms: u64,
    /// Default line-read timeout of the transport
    pub line_timeout_ms: u64,
    /// Line-read timeout while the communication self-tests run
    pub comm_timeout_ms: u64,
    /// Ceiling for the rail-5V warm-up wait
    pub warmup_ceiling_ms: u64,
    /// Minimum plausible warm-up time for the DCDC+load stage
    pub warmup_min_ms: u64,
    pub warmup_poll_ms: u64,
    /// Rail-5V level that ends the warm-up wait
    pub warmup_rail_5v: f64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 1000,
            ack_poll_ms: 5,
            telemetry_settle_ms: 300,
            line_timeout_ms: 2000,
            comm_timeout_ms: 30_000,
            warmup_ceiling_ms: 20_000,
            warmup_min_ms: 15_000,
            warmup_poll_ms: 1000,
            warmup_rail_5v: 4.0,
        }
    }
}

impl Timings {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn ack_poll(&self) -> Duration {
        Duration::from_millis(self.ack_poll_ms)
    }

    pub fn telemetry_settle(&self) -> Duration {
        Duration::from_millis(self.telemetry_settle_ms)
    }

    pub fn line_timeout(&self) -> Duration {
        Duration::from_millis(self.line_timeout_ms)
    }

    pub fn comm_timeout(&self) -> Duration {
        Duration::from_millis(self.comm_timeout_ms)
    }

    pub fn warmup_ceiling(&self) -> Duration {
        Duration::from_millis(self.warmup_ceiling_ms)
    }

    pub fn warmup_min(&self) -> Duration {
        Duration::from_millis(self.warmup_min_ms)
    }

    pub fn warmup_poll(&self) -> Duration {
        Duration::from_millis(self.warmup_poll_ms)
    }
}

/// Empirically tuned constants of the duty-cycle sweeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepTuning {
    /// EMA smoothing factor for the disconnect detector
    pub ema_alpha: f64,
    /// |EMA(load) - EMA(battery)| above this marks the load disconnect
    pub disconnect_gap_volts: f64,
    /// load-sense below this marks the load alarm in the coarse sweep
    pub load_alarm_volts: f64,
    pub rail_5v_collapse_volts: f64,
    pub rail_15v_collapse_volts: f64,
    /// Look for the load alarm in the plain (non-preheat) sweep
    pub detect_load_alarm_without_preheat: bool,
    /// Enable preheat during the plain sweep
    pub preheat_in_plain_sweep: bool,
}

impl Default for SweepTuning {
    fn default() -> Self {
        Self {
            ema_alpha: 0.25,
            disconnect_gap_volts: 0.7,
            load_alarm_volts: 4.8,
            rail_5v_collapse_volts: 4.8,
            rail_15v_collapse_volts: 14.8,
            detect_load_alarm_without_preheat: false,
            preheat_in_plain_sweep: false,
        }
    }
}
