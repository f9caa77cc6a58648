//! Scanner wire protocol: framing, incremental decoding, and the outbound
//! command vocabulary.
//!
//! The protocol is ASCII line-and-field based: fields are separated by the
//! 5-byte token ` <|> `, records open with a `SERVER` field and close with a
//! `SERVER` sentinel. The decoder consumes bytes incrementally and never
//! assumes a complete record is buffered.

pub mod buffer;
pub mod decoder;

pub use buffer::{Field, FieldEnd, ReceiveBuffer};
pub use decoder::{InitPhase, OtpDecoder};

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use vigil_model::{NvtPlugin, PortDescriptor, Preference, ResultMessage};

/// Field separator on the wire.
pub const FIELD_SEPARATOR: &str = " <|> ";
/// Record sentinel.
pub const RECORD_SENTINEL: &str = "SERVER";
/// Version line opening the handshake.
pub const PROTOCOL_VERSION_LINE: &str = "< OTP/2.0 >";
/// Structural line the scanner sends on a failed login.
pub const BAD_LOGIN_LINE: &str = "Bad login attempt !";
/// Opener of the "still loading" progress line.
pub const LOADING_TOKEN: &str = "SCANNER_LOADING";

/// Outcome of one `feed` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// All buffered input was consumed at a record boundary.
    Consumed,
    /// A partial field or record remains buffered; read more bytes.
    NeedMore,
    /// The scanner said goodbye; tear the connection down after
    /// acknowledging.
    Bye,
    /// The scanner rejected the login; the connection is unusable.
    LoginFailed,
    /// The scanner is still loading its plugin cache; retry the connection.
    Loading { loaded: u64, total: u64 },
}

/// Structured output of the decoder, applied by the scanner session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpEvent {
    /// The scanner agreed on the protocol version.
    VersionAgreed,
    /// The handshake finished; normal operation may begin.
    HandshakeComplete,
    /// Feed version from an `NVT_INFO` record.
    FeedVersion(String),
    /// One plugin out of a `PLUGIN_LIST` record.
    Plugin(NvtPlugin),
    /// One scanner preference pair.
    Preference(Preference),
    /// Scan-wide start time.
    ScanStarted { at: Option<DateTime<Utc>> },
    /// Scan-wide end time; drives the task to its terminal state.
    ScanEnded { at: Option<DateTime<Utc>> },
    HostStarted {
        host: String,
        at: Option<DateTime<Utc>>,
    },
    HostEnded {
        host: String,
        at: Option<DateTime<Utc>>,
    },
    /// One finding to append to the current report.
    Result(ResultMessage),
    /// A host detail delivered through a `general/Host_Details` log record.
    HostDetail { host: String, detail: String },
    /// Port-scan progress of one host.
    HostProgress { host: String, current: u32, max: u32 },
    /// Attack-state change of one host.
    HostAttackState { host: String, state: String },
    /// The scanner confirmed the whole test is paused.
    AttackPaused { host: String },
    /// The scanner confirmed the whole test resumed.
    AttackResumed { host: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("receive buffer overflow (capacity {capacity} bytes)")]
    BufferOverflow { capacity: usize },

    #[error("expected {expected}, got {found:?}")]
    UnexpectedField {
        expected: &'static str,
        found: String,
    },

    #[error("unsupported protocol version line {0:?}")]
    UnsupportedVersion(String),

    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Parse a scanner-formatted timestamp (`Fri Jun 13 10:21:51 2014`).
pub fn parse_scanner_time(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text.trim(), "%a %b %e %H:%M:%S %Y")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse a port field (`ssh (22/tcp)`, `general/tcp`, `443/tcp`).
pub fn parse_port(raw: &str) -> PortDescriptor {
    use regex::Regex;
    use std::sync::LazyLock;

    static PORT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\((\d+)/([^)\s]+)\)\s*$").unwrap());
    static BARE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\d+)/([^\s]+)$").unwrap());

    if let Some(captures) = PORT_RE.captures(raw).or_else(|| BARE_RE.captures(raw)) {
        return PortDescriptor {
            number: captures[1].parse().ok(),
            protocol: Some(captures[2].to_string()),
            raw: raw.to_string(),
        };
    }
    if let Some(protocol) = raw.strip_prefix("general/") {
        return PortDescriptor {
            number: None,
            protocol: Some(protocol.to_string()),
            raw: raw.to_string(),
        };
    }
    PortDescriptor {
        number: None,
        protocol: None,
        raw: raw.to_string(),
    }
}

/// Outbound commands the manager writes to the scanner.
pub mod command {
    use vigil_model::Preference;

    /// Handshake version line.
    pub fn version_request() -> &'static [u8] {
        b"< OTP/2.0 >\n"
    }

    /// Cache-mode request for the complete plugin list.
    pub fn complete_list_request() -> &'static [u8] {
        b"CLIENT <|> COMPLETE_LIST <|> CLIENT\n"
    }

    /// Acknowledge a `BYE`.
    pub fn bye_ack() -> &'static [u8] {
        b"CLIENT <|> BYE <|> ACK\n"
    }

    pub fn stop_whole_test() -> &'static [u8] {
        b"CLIENT <|> STOP_WHOLE_TEST <|> CLIENT\n"
    }

    pub fn pause_whole_test() -> &'static [u8] {
        b"CLIENT <|> PAUSE_WHOLE_TEST <|> CLIENT\n"
    }

    pub fn resume_whole_test() -> &'static [u8] {
        b"CLIENT <|> RESUME_WHOLE_TEST <|> CLIENT\n"
    }

    /// Preference block sent before an attack.
    pub fn preferences(preferences: &[Preference]) -> Vec<u8> {
        let mut out = Vec::from(&b"CLIENT <|> PREFERENCES <|>\n"[..]);
        for preference in preferences {
            out.extend_from_slice(preference.name.as_bytes());
            out.extend_from_slice(b" <|> ");
            out.extend_from_slice(preference.value.as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(b"<|> CLIENT\n");
        out
    }

    /// Launch an attack against `target`.
    pub fn long_attack(target: &str) -> Vec<u8> {
        let mut out = Vec::from(&b"CLIENT <|> LONG_ATTACK <|>\n"[..]);
        out.extend_from_slice(target.len().to_string().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(target.as_bytes());
        out.push(b'\n');
        out
    }

    /// Frame an attached file: explicit name/content-type/byte-count header
    /// followed by exactly that many raw bytes.
    pub fn attached_file(name: &str, content: &[u8]) -> Vec<u8> {
        let header = format!(
            "CLIENT <|> ATTACHED_FILE\nname: {name}\ncontent: octet/stream\nbytes: {}\n",
            content.len()
        );
        let mut out = header.into_bytes();
        out.extend_from_slice(content);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_times_parse() {
        let parsed = parse_scanner_time("Fri Jun 13 10:21:51 2014").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2014-06-13T10:21:51+00:00");
        // Single-digit days are space padded by the scanner.
        assert!(parse_scanner_time("Mon Feb  3 07:00:00 2025").is_some());
        assert!(parse_scanner_time("not a time").is_none());
    }

    #[test]
    fn port_descriptors_parse() {
        let port = parse_port("ssh (22/tcp)");
        assert_eq!(port.number, Some(22));
        assert_eq!(port.protocol.as_deref(), Some("tcp"));
        assert_eq!(port.raw, "ssh (22/tcp)");

        let general = parse_port("general/udp");
        assert_eq!(general.number, None);
        assert_eq!(general.protocol.as_deref(), Some("udp"));

        let bare = parse_port("443/tcp");
        assert_eq!(bare.number, Some(443));

        let odd = parse_port("unknown");
        assert_eq!(odd.number, None);
        assert_eq!(odd.protocol, None);
    }

    #[test]
    fn attached_file_frames_exact_byte_count() {
        let frame = command::attached_file("targets.txt", b"10.0.0.0/24");
        let text = String::from_utf8_lossy(&frame);
        assert!(text.starts_with(
            "CLIENT <|> ATTACHED_FILE\nname: targets.txt\ncontent: octet/stream\nbytes: 11\n"
        ));
        assert!(frame.ends_with(b"10.0.0.0/24"));
    }

    #[test]
    fn preference_blocks_are_terminated() {
        let block = command::preferences(&[Preference::new("ntp_keep_communication_alive", "yes")]);
        let text = String::from_utf8_lossy(&block);
        assert_eq!(
            text,
            "CLIENT <|> PREFERENCES <|>\nntp_keep_communication_alive <|> yes\n<|> CLIENT\n"
        );
    }
}
