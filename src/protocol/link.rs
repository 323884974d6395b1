use anyhow::Result;
use std::{sync::Arc, time::Duration};

use super::{
    ack::{AckChannel, AckOutcome},
    command::Command,
    decode_text,
    telemetry::{TelemetryDecoder, TelemetryFrame},
    transport::Transport,
};
use crate::core::{
    clock::Clock,
    settings::{Calibration, Timings},
};

/// Initialisation burst that puts the board in a known idle state.
pub const INIT_SEQUENCE: [Command; 5] = [
    Command::DcdcOff,
    Command::BatteryOff,
    Command::SetDuty(0.0),
    Command::ChargeOff,
    Command::LoadReturn,
];

/// Pause after the initialisation burst.
pub const INIT_SETTLE: Duration = Duration::from_secs(1);

/// Everything one run needs to talk to the board.
///
/// Owns the transport for the whole run; the ack and telemetry helpers
/// borrow it per call.
pub struct BoardLink {
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    calibration: Calibration,
    timings: Timings,
}

impl BoardLink {
    pub fn new(
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
        calibration: Calibration,
        timings: Timings,
    ) -> Self {
        Self {
            transport,
            clock,
            calibration,
            timings,
        }
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn ack(&mut self) -> AckChannel<'_> {
        AckChannel::new(self.transport.as_mut(), self.clock.as_ref())
            .with_poll(self.timings.ack_poll())
    }

    pub fn telemetry(&mut self) -> TelemetryDecoder<'_> {
        TelemetryDecoder::new(
            self.transport.as_mut(),
            self.clock.as_ref(),
            &self.calibration,
            self.timings.telemetry_settle(),
        )
    }

    /// Send a command and wait for `ACKOK` within the configured timeout.
    pub fn send(&mut self, command: Command) -> Result<AckOutcome> {
        log::debug!("-> {command}");
        let timeout = self.timings.ack_timeout();
        self.ack().send_and_await_ack(&command.encode(), timeout)
    }

    /// Write a command without waiting for any reply.
    pub fn write(&mut self, command: &Command) -> Result<()> {
        log::debug!("-> {command} (no ack)");
        self.transport.write(&command.encode())
    }

    pub fn read_frame(&mut self) -> Result<Option<TelemetryFrame>> {
        self.telemetry().read_frame()
    }

    pub fn read_frame_now(&mut self) -> Result<Option<TelemetryFrame>> {
        self.telemetry().read_frame_now()
    }

    pub fn clear_input(&mut self) -> Result<()> {
        self.transport.clear_input()
    }

    /// Read one response line as text, invalid bytes dropped.
    pub fn read_line(&mut self) -> Result<String> {
        let line = self.transport.read_line()?;
        let text = decode_text(&line);
        log::debug!("<- {:?}", text.trim());
        Ok(text)
    }

    /// Line-read timeout currently in effect on the transport.
    pub fn line_timeout(&self) -> Duration {
        self.transport.timeout()
    }

    pub fn set_line_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.transport.set_timeout(timeout)
    }

    pub fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration);
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn unix_seconds(&self) -> i64 {
        self.clock.unix_seconds()
    }

    /// Drive the board to idle: DCDC, battery, duty, charger and load off.
    ///
    /// Acknowledgments are not checked; a board that ignores one of these
    /// still gets the settle delay.
    pub fn initialize(&mut self) -> Result<()> {
        log::info!("Initialising board");
        for command in INIT_SEQUENCE {
            self.send(command)?;
        }
        self.sleep(INIT_SETTLE);
        Ok(())
    }
}
