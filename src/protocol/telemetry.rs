//! Analog telemetry frame: request, fixed-offset decoding and calibration.
//!
//! The board answers `AQADC` with one line of nine five-character code
//! fields, each separated by one delimiter character:
//!
//! ```text
//! #02048,02048,01234,03000,02000,01500,00800,02300,00100#
//!  ^1    ^7    ^13   ^19   ^25   ^31   ^37   ^43   ^49
//! ```
//!
//! Decoding is all-or-nothing: one unparseable field discards the frame.
use anyhow::Result;
use serde::Serialize;
use std::{collections::BTreeMap, time::Duration};

use super::{command::Command, decode_text, transport::Transport};
use crate::core::{clock::Clock, settings::Calibration};

/// Shortest response line that can hold a full frame.
pub const MIN_FRAME_CHARS: usize = 54;

const FIELD_OFFSETS: [usize; 9] = [1, 7, 13, 19, 25, 31, 37, 43, 49];
const FIELD_WIDTH: usize = 5;

/// One decoded telemetry frame, in volts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TelemetryFrame {
    pub rail_15v: f64,
    pub rail_5v: f64,
    pub load_sense: f64,
    pub dcdc_sense: f64,
    pub battery_sense: f64,
    pub cap_filter_sense: f64,
    pub pwm_sense: f64,
    pub step_up_sense: f64,
    pub current_sense: f64,
}

impl TelemetryFrame {
    /// Channel values keyed by name, for outcome details.
    pub fn details(&self) -> BTreeMap<String, f64> {
        [
            ("rail_15v", self.rail_15v),
            ("rail_5v", self.rail_5v),
            ("load", self.load_sense),
            ("dcdc", self.dcdc_sense),
            ("battery", self.battery_sense),
            ("cap_filter", self.cap_filter_sense),
            ("pwm", self.pwm_sense),
            ("step_up", self.step_up_sense),
            ("current", self.current_sense),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }
}

/// Decode a response line into calibrated volts.
///
/// Returns `None` for short lines or any field that does not parse as a
/// number. Fields that parse to NaN or infinity read as 0 V.
pub fn decode_frame(text: &str, calibration: &Calibration) -> Option<TelemetryFrame> {
    let chars: Vec<char> = text.trim().chars().collect();
    if chars.len() < MIN_FRAME_CHARS {
        return None;
    }

    let mut codes = [0.0f64; 9];
    for (slot, offset) in codes.iter_mut().zip(FIELD_OFFSETS) {
        let field: String = chars[offset..offset + FIELD_WIDTH].iter().collect();
        let value: f64 = field.trim().parse().ok()?;
        *slot = if value.is_finite() { value } else { 0.0 };
    }

    let vpc = calibration.volts_per_code();
    let volts = |code: f64, ratio: f64| code * vpc * ratio;
    let general = calibration.general.ratio();
    let battery = calibration.battery.ratio();

    Some(TelemetryFrame {
        rail_15v: volts(codes[0], general),
        rail_5v: volts(codes[1], general),
        load_sense: volts(codes[2], general),
        dcdc_sense: volts(codes[3], calibration.dcdc.ratio()),
        battery_sense: volts(codes[4], battery),
        cap_filter_sense: volts(codes[5], calibration.cap_filter.ratio()),
        pwm_sense: volts(codes[6], calibration.pwm.ratio()),
        step_up_sense: volts(codes[7], battery),
        current_sense: volts(codes[8], calibration.load.ratio()),
    })
}

/// Requests and decodes telemetry frames over a borrowed transport.
pub struct TelemetryDecoder<'a> {
    transport: &'a mut dyn Transport,
    clock: &'a dyn Clock,
    calibration: &'a Calibration,
    settle: Duration,
}

impl<'a> TelemetryDecoder<'a> {
    pub fn new(
        transport: &'a mut dyn Transport,
        clock: &'a dyn Clock,
        calibration: &'a Calibration,
        settle: Duration,
    ) -> Self {
        Self {
            transport,
            clock,
            calibration,
            settle,
        }
    }

    /// Flush, request one frame, wait the settle time and read the reply.
    ///
    /// `Ok(None)` means the line was missing or malformed; only transport
    /// faults are errors.
    pub fn read_frame(&mut self) -> Result<Option<TelemetryFrame>> {
        let settle = self.settle;
        self.read_frame_after(settle)
    }

    /// Same as [`read_frame`](Self::read_frame) without the settle delay.
    pub fn read_frame_now(&mut self) -> Result<Option<TelemetryFrame>> {
        self.read_frame_after(Duration::ZERO)
    }

    fn read_frame_after(&mut self, settle: Duration) -> Result<Option<TelemetryFrame>> {
        self.transport.clear_input()?;
        self.transport.write(&Command::ReadTelemetry.encode())?;
        if !settle.is_zero() {
            self.clock.sleep(settle);
        }

        let line = self.transport.read_line()?;
        let text = decode_text(&line);
        let frame = decode_frame(&text, self.calibration);
        match &frame {
            Some(frame) => log::debug!("Telemetry: {frame:?}"),
            None => log::warn!("Discarding telemetry line {:?}", text.trim()),
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(codes: [u32; 9]) -> String {
        let fields: Vec<String> = codes.iter().map(|c| format!("{c:05}")).collect();
        format!("#{}#", fields.join(","))
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn decodes_calibrated_channels() {
        let cal = Calibration::default();
        let text = line([2048, 2048, 0, 0, 0, 0, 0, 0, 0]);
        let frame = decode_frame(&text, &cal).unwrap();

        let expected = 2048.0 * (3.49 / 4096.0) * (30.9 / 3.9);
        assert!(close(frame.rail_15v, expected));
        assert!((frame.rail_15v - 13.826).abs() < 1e-3);
        assert!(close(frame.rail_5v, expected));
        assert_eq!(frame.battery_sense, 0.0);
    }

    #[test]
    fn battery_and_step_up_share_the_battery_divider() {
        let cal = Calibration::default();
        let frame = decode_frame(&line([0, 0, 0, 0, 3000, 0, 0, 3000, 0]), &cal).unwrap();
        let expected = 3000.0 * cal.volts_per_code() * cal.battery.ratio();
        assert!(close(frame.battery_sense, expected));
        assert!(close(frame.step_up_sense, expected));
    }

    #[test]
    fn decoding_is_deterministic() {
        let cal = Calibration::default();
        let text = line([1, 22, 333, 4444, 1234, 2345, 3456, 4095, 7]);
        assert_eq!(decode_frame(&text, &cal), decode_frame(&text, &cal));
    }

    #[test]
    fn short_lines_are_rejected() {
        let cal = Calibration::default();
        let text = line([0; 9]);
        assert_eq!(text.len(), 55);
        assert!(decode_frame(&text[..53], &cal).is_none());
        assert!(decode_frame("", &cal).is_none());
        assert!(decode_frame("ACKOK", &cal).is_none());
    }

    #[test]
    fn one_bad_field_discards_the_frame() {
        let cal = Calibration::default();
        let mut text = line([100; 9]);
        text.replace_range(25..30, "0x1F0");
        assert!(decode_frame(&text, &cal).is_none());
    }

    #[test]
    fn surrounding_whitespace_and_padding_are_ignored() {
        let cal = Calibration::default();
        let text = format!("  {}\r\n", line([10; 9]).replace("00010", "   10"));
        let frame = decode_frame(&text, &cal).unwrap();
        assert!(close(frame.pwm_sense, 10.0 * cal.volts_per_code() * cal.pwm.ratio()));
    }

    #[test]
    fn non_finite_reads_as_zero() {
        let cal = Calibration::default();
        let mut text = line([500; 9]);
        text.replace_range(1..6, "  NaN");
        text.replace_range(7..12, "  inf");
        let frame = decode_frame(&text, &cal).unwrap();
        assert_eq!(frame.rail_15v, 0.0);
        assert_eq!(frame.rail_5v, 0.0);
        assert!(frame.load_sense > 0.0);
    }

    #[test]
    fn details_cover_every_channel() {
        let details = TelemetryFrame::default().details();
        assert_eq!(details.len(), 9);
        assert!(details.contains_key("battery"));
        assert!(details.contains_key("step_up"));
    }
}
