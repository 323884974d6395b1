pub mod ack;
pub mod command;
pub mod link;
pub mod telemetry;
pub mod transport;
pub mod tty;

pub use ack::{AckChannel, AckOutcome};
pub use command::Command;
pub use link::BoardLink;
pub use telemetry::{decode_frame, TelemetryDecoder, TelemetryFrame};
pub use transport::{is_transport_fault, SerialConfig, SerialTransport, Transport, TransportFault};

/// Decode wire bytes as UTF-8, dropping invalid sequences instead of
/// replacing them.
pub fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_bytes_are_dropped() {
        assert_eq!(decode_text(b"AC\xffKOK"), "ACKOK");
        assert_eq!(decode_text(b"\xfe\xff"), "");
    }
}
