use std::fmt;

/// Every outgoing command ends with this byte.
pub const TERMINATOR: u8 = b'\r';

/// Marker the firmware includes in every positive acknowledgment.
pub const ACK_MARKER: &str = "ACKOK";

/// Commands understood by the JT2302 firmware.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BatteryOn,
    BatteryOff,
    DcdcOn,
    DcdcOff,
    ChargeOn,
    ChargeOff,
    ReadTelemetry,
    /// Duty cycle of the PWM converter in percent
    SetDuty(f64),
    LoadAlarm,
    LoadReturn,
    TempAlarm1,
    TempAlarm2,
    TempAlarmClear,
    PreheatOn,
    PreheatOff,
    StartSelfTest,
    SetClock(i64),
    SetSerialNumber(String),
}

impl Command {
    /// The command text without terminator.
    pub fn text(&self) -> String {
        match self {
            Command::BatteryOn => "LIGBT".into(),
            Command::BatteryOff => "DESBT".into(),
            Command::DcdcOn => "LIGDC".into(),
            Command::DcdcOff => "DESDC".into(),
            Command::ChargeOn => "LIGCB".into(),
            Command::ChargeOff => "DESCB".into(),
            Command::ReadTelemetry => "AQADC".into(),
            Command::SetDuty(duty) => format!("FR1D{duty:.1}"),
            Command::LoadAlarm => "ACLOAD".into(),
            Command::LoadReturn => "DGLOAD".into(),
            Command::TempAlarm1 => "ACTP1".into(),
            Command::TempAlarm2 => "ACTP2".into(),
            Command::TempAlarmClear => "ACTPA".into(),
            Command::PreheatOn => "ENPTH".into(),
            Command::PreheatOff => "DGPTH".into(),
            Command::StartSelfTest => "$startTest".into(),
            Command::SetClock(unix_seconds) => format!("$cTime,{unix_seconds}"),
            Command::SetSerialNumber(serial) => format!("$cSerialNumber,{serial}"),
        }
    }

    /// Bytes as written to the wire.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.text().into_bytes();
        bytes.push(TERMINATOR);
        bytes
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_is_carriage_return_terminated() {
        for cmd in [
            Command::BatteryOn,
            Command::DcdcOff,
            Command::ReadTelemetry,
            Command::StartSelfTest,
            Command::SetClock(1_757_338_736),
        ] {
            assert_eq!(cmd.encode().last(), Some(&b'\r'), "{cmd}");
        }
    }

    #[test]
    fn duty_has_one_fractional_digit() {
        assert_eq!(Command::SetDuty(65.0).encode(), b"FR1D65.0\r");
        assert_eq!(Command::SetDuty(80.0).text(), "FR1D80.0");
        assert_eq!(Command::SetDuty(0.0).text(), "FR1D0.0");
        assert_eq!(Command::SetDuty(62.999).text(), "FR1D63.0");
    }

    #[test]
    fn parameterized_commands() {
        assert_eq!(
            Command::SetSerialNumber("0000000000001".into()).text(),
            "$cSerialNumber,0000000000001"
        );
        assert_eq!(Command::SetClock(42).text(), "$cTime,42");
    }
}
