//! Firmware communication checks run once the power checks are done.
use anyhow::Result;
use std::time::Duration;

use crate::{
    api::outcome::{SelfTestReport, TestOutcome},
    protocol::{command::Command, link::BoardLink},
};

const SELF_TEST_ATTEMPTS: usize = 2;
const RTC_ATTEMPTS: usize = 3;

/// Parse the grouped self-test reply, e.g.
/// `$ok,startTest,rak,ok,inc,ok,adc,ok`.
///
/// Components missing from the reply fail with "no response".
pub fn parse_self_test(response: &str) -> SelfTestReport {
    let mut report = SelfTestReport::failed("no response");
    if !(response.contains("$ok") && response.contains("startTest")) {
        return report;
    }

    let parts: Vec<&str> = response.trim().split(',').map(str::trim).collect();
    for (i, part) in parts.iter().enumerate() {
        if part.eq_ignore_ascii_case("$ok") {
            continue;
        }
        let Some(status) = parts.get(i + 1) else {
            break;
        };
        let part = part.to_lowercase();
        let slot = if part.contains("rak") {
            &mut report.rak
        } else if part.contains("inc") {
            &mut report.inclinometer
        } else if part.contains("adc") {
            &mut report.adc
        } else {
            continue;
        };
        let passed = status.eq_ignore_ascii_case("ok");
        *slot = TestOutcome::judged(passed, if passed { "OK" } else { "NG" });
    }
    report
}

fn power_up_for_comm(link: &mut BoardLink, settle: Duration) -> Result<()> {
    link.initialize()?;
    link.send(Command::BatteryOn)?;
    link.send(Command::DcdcOn)?;
    link.sleep(settle);
    Ok(())
}

/// Run `$startTest` and split the reply into the RAK, inclinometer and ADC
/// verdicts.
pub fn self_test(link: &mut BoardLink) -> Result<SelfTestReport> {
    power_up_for_comm(link, Duration::from_secs(2))?;

    let mut response = String::new();
    for attempt in 1..=SELF_TEST_ATTEMPTS {
        link.clear_input()?;
        link.write(&Command::StartSelfTest)?;
        response = link.read_line()?;
        if response.contains("$ok") && response.contains("startTest") {
            break;
        }
        log::warn!("Self-test attempt {attempt}: incomplete reply {:?}", response.trim());
    }
    Ok(parse_self_test(&response))
}

/// Program the board clock from the host's wall clock.
pub fn set_clock(link: &mut BoardLink) -> Result<TestOutcome> {
    let mut response = String::new();
    for attempt in 1..=RTC_ATTEMPTS {
        power_up_for_comm(link, Duration::from_secs(5))?;
        let now = link.unix_seconds();
        link.clear_input()?;
        link.write(&Command::SetClock(now))?;
        response = link.read_line()?;

        let lower = response.to_lowercase();
        if lower.contains("$ok") && lower.contains("rtc") {
            return Ok(TestOutcome::pass("RTC set"));
        }
        log::warn!("RTC attempt {attempt}: reply {:?}", response.trim());
    }
    Ok(TestOutcome::fail(format!("RTC not set, reply: {:?}", response.trim())))
}

/// Write the serial number and wait for the firmware to confirm it.
pub fn set_serial_number(link: &mut BoardLink, serial_number: &str) -> Result<TestOutcome> {
    if serial_number.trim().is_empty() {
        return Ok(TestOutcome::fail("serial number not provided"));
    }

    link.clear_input()?;
    link.write(&Command::SetSerialNumber(serial_number.to_string()))?;
    let timeout = link.timings().comm_timeout();
    let outcome = link
        .ack()
        .with_poll(Duration::from_millis(10))
        .await_marker("$ok,serialnumber", timeout, true)?;

    Ok(if outcome.acknowledged {
        TestOutcome::pass("serial number set")
    } else {
        TestOutcome::fail(format!("serial number not confirmed, reply: {:?}", outcome.raw_text))
    })
}

/// The firmware has no EEPROM check; the slot is recorded as passing.
pub fn eeprom() -> TestOutcome {
    log::warn!("EEPROM check has no firmware support, recording OK");
    TestOutcome::pass("no firmware check available")
}

/// The firmware has no H-bridge check; the slot is recorded as passing.
pub fn h_bridge() -> TestOutcome {
    log::warn!("H-bridge check has no firmware support, recording OK");
    TestOutcome::pass("no firmware check available")
}
