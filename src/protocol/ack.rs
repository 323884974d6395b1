use anyhow::Result;
use serde::Serialize;
use std::time::Duration;

use super::{command::ACK_MARKER, decode_text, transport::Transport};
use crate::core::clock::Clock;

/// Result of one command round-trip.
///
/// A missing acknowledgment is a normal outcome, not an error: the caller
/// decides whether to retry, abandon the stage or carry on without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AckOutcome {
    pub acknowledged: bool,
    /// Everything received while waiting, trimmed
    pub raw_text: String,
}

/// Sends a command and collects the reply until a marker shows up.
pub struct AckChannel<'a> {
    transport: &'a mut dyn Transport,
    clock: &'a dyn Clock,
    poll: Duration,
}

impl<'a> AckChannel<'a> {
    pub fn new(transport: &'a mut dyn Transport, clock: &'a dyn Clock) -> Self {
        Self {
            transport,
            clock,
            poll: Duration::from_millis(5),
        }
    }

    /// Sleep used between polls that returned nothing.
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn send_and_await_ack(&mut self, command: &[u8], timeout: Duration) -> Result<AckOutcome> {
        self.transport.write(command)?;
        let outcome = self.await_marker(ACK_MARKER, timeout, false)?;
        if !outcome.acknowledged {
            log::warn!(
                "No ACK for {:?} within {:?}, partial: {:?}",
                String::from_utf8_lossy(command).trim_end(),
                timeout,
                outcome.raw_text
            );
        }
        Ok(outcome)
    }

    /// Accumulate incoming bytes until `marker` appears or `timeout` elapses.
    pub fn await_marker(
        &mut self,
        marker: &str,
        timeout: Duration,
        case_insensitive: bool,
    ) -> Result<AckOutcome> {
        let needle = if case_insensitive {
            marker.to_lowercase()
        } else {
            marker.to_string()
        };
        let start = self.clock.now();
        let mut raw = Vec::new();

        while self.clock.now().saturating_sub(start) < timeout {
            if self.transport.poll(&mut raw)? == 0 {
                self.clock.sleep(self.poll);
                continue;
            }

            let text = decode_text(&raw);
            let found = if case_insensitive {
                text.to_lowercase().contains(&needle)
            } else {
                text.contains(&needle)
            };
            if found {
                return Ok(AckOutcome {
                    acknowledged: true,
                    raw_text: text.trim().to_string(),
                });
            }
        }

        Ok(AckOutcome {
            acknowledged: false,
            raw_text: decode_text(&raw).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use std::{collections::VecDeque, sync::Arc};

    /// Replies to each write with a fixed chunk after a delay.
    struct DelayedEcho {
        clock: Arc<ManualClock>,
        reply: Vec<u8>,
        delay: Duration,
        queued: VecDeque<(Duration, Vec<u8>)>,
        written: Vec<u8>,
    }

    impl DelayedEcho {
        fn new(clock: Arc<ManualClock>, reply: &[u8], delay: Duration) -> Self {
            Self {
                clock,
                reply: reply.to_vec(),
                delay,
                queued: VecDeque::new(),
                written: Vec::new(),
            }
        }
    }

    impl Transport for DelayedEcho {
        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            self.written.extend_from_slice(bytes);
            if !self.reply.is_empty() {
                let due = self.clock.now() + self.delay;
                self.queued.push_back((due, self.reply.clone()));
            }
            Ok(())
        }

        fn poll(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
            match self.queued.front() {
                Some((due, _)) if *due <= self.clock.now() => {
                    let (_, chunk) = self.queued.pop_front().unwrap();
                    buf.extend_from_slice(&chunk);
                    Ok(chunk.len())
                }
                _ => Ok(0),
            }
        }

        fn clear_input(&mut self) -> Result<()> {
            self.queued.clear();
            Ok(())
        }

        fn read_line(&mut self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(2)
        }
    }

    #[test]
    fn returns_whole_buffer_once_marker_arrives() {
        let clock = Arc::new(ManualClock::default());
        let mut transport =
            DelayedEcho::new(clock.clone(), b"noiseACKOKtail", Duration::from_millis(50));

        let outcome = AckChannel::new(&mut transport, clock.as_ref())
            .send_and_await_ack(b"LIGBT\r", Duration::from_secs(1))
            .unwrap();

        assert!(outcome.acknowledged);
        assert_eq!(outcome.raw_text, "noiseACKOKtail");
        assert_eq!(transport.written, b"LIGBT\r");
        assert!(clock.now() >= Duration::from_millis(50));
        assert!(clock.now() < Duration::from_millis(60));
    }

    #[test]
    fn timeout_is_a_value_with_partial_text() {
        let clock = Arc::new(ManualClock::default());
        let mut transport = DelayedEcho::new(clock.clone(), b"ACK", Duration::ZERO);

        let outcome = AckChannel::new(&mut transport, clock.as_ref())
            .send_and_await_ack(b"DESBT\r", Duration::from_secs(1))
            .unwrap();

        assert!(!outcome.acknowledged);
        assert_eq!(outcome.raw_text, "ACK");
        // never waits past timeout + one poll interval
        assert!(clock.now() >= Duration::from_secs(1));
        assert!(clock.now() <= Duration::from_millis(1005));
    }

    #[test]
    fn late_reply_is_not_an_ack() {
        let clock = Arc::new(ManualClock::default());
        let mut transport = DelayedEcho::new(clock.clone(), b"ACKOK", Duration::from_millis(1200));

        let outcome = AckChannel::new(&mut transport, clock.as_ref())
            .send_and_await_ack(b"LIGDC\r", Duration::from_secs(1))
            .unwrap();

        assert!(!outcome.acknowledged);
        assert!(outcome.raw_text.is_empty());
    }

    #[test]
    fn case_insensitive_marker() {
        let clock = Arc::new(ManualClock::default());
        let mut transport = DelayedEcho::new(
            clock.clone(),
            b"$OK,serialNumber,0001\r\n",
            Duration::from_millis(300),
        );
        transport.write(b"$cSerialNumber,0001\r").unwrap();

        let outcome = AckChannel::new(&mut transport, clock.as_ref())
            .with_poll(Duration::from_millis(10))
            .await_marker("$ok,serialnumber", Duration::from_secs(30), true)
            .unwrap();

        assert!(outcome.acknowledged);
        assert_eq!(outcome.raw_text, "$OK,serialNumber,0001");
    }
}
