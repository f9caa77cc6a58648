//! Incremental decoder for the scanner protocol.
//!
//! One decoder instance lives per scanner connection. It consumes fields
//! from the [`ReceiveBuffer`] and emits [`OtpEvent`]s; the session applies
//! them to the store and the task state machine. The handshake sub-state
//! machine gates normal operation: records other than the handshake
//! vocabulary are only accepted once the scanner has agreed on the protocol
//! version.

use regex::Regex;
use std::sync::LazyLock;
use tracing::trace;
use vigil_model::{NvtPlugin, Preference, ResultMessage, ResultType};

use super::{
    BAD_LOGIN_LINE, Feed, FieldEnd, LOADING_TOKEN, OtpEvent, PROTOCOL_VERSION_LINE,
    ProtocolError, ReceiveBuffer, RECORD_SENTINEL, parse_port, parse_scanner_time,
};

static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)/(\d+)$").unwrap());

/// Port string that turns a `LOG` record into a host detail.
const HOST_DETAILS_PORT: &str = "general/Host_Details";

/// Preferences that must never be cached.
const SKIPPED_PREFERENCES: [&str; 2] = ["SSH Authorization", "SMB Authorization"];

/// Handshake sub-state. Advances as the scanner delivers its feed version,
/// plugin list, and preferences after the version exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    /// TCP established, nothing sent yet.
    Connected,
    /// We wrote the version line and wait for the scanner's.
    SentVersion,
    /// Versions agreed; handshake records may arrive.
    GotVersion,
    /// Feed version received.
    GotFeedVersion,
    /// Plugin list received.
    GotPlugins,
    /// Preferences received; steady state.
    Done,
}

/// Kind of the message record currently being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageKind {
    Errmsg,
    Alarm,
    Log,
}

impl MessageKind {
    fn result_type(self) -> ResultType {
        match self {
            MessageKind::Errmsg => ResultType::ErrorMessage,
            MessageKind::Alarm => ResultType::Alarm,
            MessageKind::Log => ResultType::LogMessage,
        }
    }
}

/// Flat per-record field cursor. Each record grammar is an ordered field
/// sequence; the cursor names the field expected next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Opener,
    LoadingLoaded,
    LoadingTotal,
    Kind,
    MessageHost,
    MessagePort,
    MessageDescription,
    MessageOid,
    MessageClose,
    StatusHost,
    StatusValue,
    StatusClose,
    TimeKind,
    TimeHostStartHost,
    TimeHostStartTime,
    TimeHostEndHost,
    TimeHostEndTime,
    TimeScanStartTime,
    TimeScanEndTime,
    TimeClose,
    PluginOid,
    PluginName,
    PluginCategory,
    PluginCopyright,
    PluginSummary,
    PluginFamily,
    PluginVersion,
    PluginCve,
    PluginBugtraq,
    PluginXrefs,
    PluginTags,
    PluginsClose,
    PreferenceName,
    PreferenceValue,
    PreferencesClose,
    NvtInfoVersion,
    NvtInfoClose,
    ByeAck,
    ByeClose,
}

/// Incremental scanner-protocol decoder.
#[derive(Debug)]
pub struct OtpDecoder {
    phase: InitPhase,
    record: RecordState,
    cache_mode: bool,
    kind: MessageKind,
    host: String,
    port: String,
    description: String,
    plugin: NvtPlugin,
    preference_name: String,
    loading_loaded: u64,
}

impl OtpDecoder {
    /// `cache_mode` selects whether the session requests the complete
    /// plugin list after the version exchange.
    pub fn new(cache_mode: bool) -> Self {
        Self {
            phase: InitPhase::Connected,
            record: RecordState::Opener,
            cache_mode,
            kind: MessageKind::Log,
            host: String::new(),
            port: String::new(),
            description: String::new(),
            plugin: NvtPlugin::default(),
            preference_name: String::new(),
            loading_loaded: 0,
        }
    }

    pub fn phase(&self) -> InitPhase {
        self.phase
    }

    pub fn cache_mode(&self) -> bool {
        self.cache_mode
    }

    /// True once the handshake finished and scans may be launched.
    pub fn is_ready(&self) -> bool {
        self.phase == InitPhase::Done
    }

    /// The session wrote the version line.
    pub fn version_sent(&mut self) {
        if self.phase == InitPhase::Connected {
            self.phase = InitPhase::SentVersion;
        }
    }

    /// Consume as much buffered input as possible, pushing structured
    /// events. Grammar violations poison the connection: the caller must
    /// close it, no mid-record resynchronization is attempted.
    pub fn feed(
        &mut self,
        buf: &mut ReceiveBuffer,
        events: &mut Vec<OtpEvent>,
    ) -> Result<Feed, ProtocolError> {
        if self.phase == InitPhase::Connected {
            return Ok(Feed::NeedMore);
        }

        while let Some(field) = buf.take_field() {
            trace!(text = %field.text, state = ?self.record, "otp field");
            match self.step(field.text, field.end, events)? {
                Step::Continue => {}
                Step::Finish(feed) => return Ok(feed),
            }
        }

        if buf.is_empty() {
            Ok(Feed::Consumed)
        } else {
            Ok(Feed::NeedMore)
        }
    }

    fn step(
        &mut self,
        text: String,
        end: FieldEnd,
        events: &mut Vec<OtpEvent>,
    ) -> Result<Step, ProtocolError> {
        use RecordState::*;

        match self.record {
            Opener => self.open(text, end, events),

            LoadingLoaded => {
                self.loading_loaded = parse_count(&text)?;
                self.record = LoadingTotal;
                Ok(Step::Continue)
            }
            LoadingTotal => {
                let total = parse_count(&text)?;
                self.record = Opener;
                Ok(Step::Finish(Feed::Loading {
                    loaded: self.loading_loaded,
                    total,
                }))
            }

            Kind => self.dispatch_kind(&text),

            MessageHost => {
                self.host = text;
                self.record = MessagePort;
                Ok(Step::Continue)
            }
            MessagePort => {
                self.port = text;
                self.record = MessageDescription;
                Ok(Step::Continue)
            }
            MessageDescription => {
                self.description = text;
                self.record = MessageOid;
                Ok(Step::Continue)
            }
            MessageOid => {
                self.finish_message(text, events);
                self.record = MessageClose;
                Ok(Step::Continue)
            }
            MessageClose => self.close_record(&text),

            StatusHost => {
                self.host = text;
                self.record = StatusValue;
                Ok(Step::Continue)
            }
            StatusValue => {
                self.finish_status(&text, events);
                self.record = StatusClose;
                Ok(Step::Continue)
            }
            StatusClose => self.close_record(&text),

            TimeKind => {
                self.record = match text.as_str() {
                    "HOST_START" => TimeHostStartHost,
                    "HOST_END" => TimeHostEndHost,
                    "SCAN_START" => TimeScanStartTime,
                    "SCAN_END" => TimeScanEndTime,
                    _ => {
                        return Err(ProtocolError::UnexpectedField {
                            expected: "TIME sub-kind",
                            found: text,
                        });
                    }
                };
                Ok(Step::Continue)
            }
            TimeHostStartHost => {
                self.host = text;
                self.record = TimeHostStartTime;
                Ok(Step::Continue)
            }
            TimeHostStartTime => {
                events.push(OtpEvent::HostStarted {
                    host: std::mem::take(&mut self.host),
                    at: parse_scanner_time(&text),
                });
                self.record = TimeClose;
                Ok(Step::Continue)
            }
            TimeHostEndHost => {
                self.host = text;
                self.record = TimeHostEndTime;
                Ok(Step::Continue)
            }
            TimeHostEndTime => {
                events.push(OtpEvent::HostEnded {
                    host: std::mem::take(&mut self.host),
                    at: parse_scanner_time(&text),
                });
                self.record = TimeClose;
                Ok(Step::Continue)
            }
            TimeScanStartTime => {
                events.push(OtpEvent::ScanStarted {
                    at: parse_scanner_time(&text),
                });
                self.record = TimeClose;
                Ok(Step::Continue)
            }
            TimeScanEndTime => {
                events.push(OtpEvent::ScanEnded {
                    at: parse_scanner_time(&text),
                });
                self.record = TimeClose;
                Ok(Step::Continue)
            }
            TimeClose => self.close_record(&text),

            PluginOid => {
                if text.is_empty() {
                    // Empty-oid sentinel closes the list.
                    self.record = PluginsClose;
                    return Ok(Step::Continue);
                }
                if text == RECORD_SENTINEL {
                    self.plugin_list_done();
                    return Ok(Step::Continue);
                }
                self.plugin = NvtPlugin::with_oid(text);
                self.record = PluginName;
                Ok(Step::Continue)
            }
            PluginName => {
                self.plugin.name = text;
                self.record = PluginCategory;
                Ok(Step::Continue)
            }
            PluginCategory => {
                self.plugin.category = text;
                self.record = PluginCopyright;
                Ok(Step::Continue)
            }
            PluginCopyright => {
                self.plugin.copyright = text;
                self.record = PluginSummary;
                Ok(Step::Continue)
            }
            PluginSummary => {
                self.plugin.summary = text;
                self.record = PluginFamily;
                Ok(Step::Continue)
            }
            PluginFamily => {
                self.plugin.family = text;
                self.record = PluginVersion;
                Ok(Step::Continue)
            }
            PluginVersion => {
                self.plugin.version = text;
                self.record = PluginCve;
                Ok(Step::Continue)
            }
            PluginCve => {
                self.plugin.cve = text;
                self.record = PluginBugtraq;
                Ok(Step::Continue)
            }
            PluginBugtraq => {
                self.plugin.bugtraq = text;
                self.record = PluginXrefs;
                Ok(Step::Continue)
            }
            PluginXrefs => {
                self.plugin.xrefs = text;
                self.record = PluginTags;
                Ok(Step::Continue)
            }
            PluginTags => {
                self.plugin.tags = text;
                events.push(OtpEvent::Plugin(std::mem::take(&mut self.plugin)));
                self.record = PluginOid;
                Ok(Step::Continue)
            }
            PluginsClose => {
                if text == RECORD_SENTINEL {
                    self.plugin_list_done();
                    Ok(Step::Continue)
                } else {
                    Err(ProtocolError::UnexpectedField {
                        expected: "SERVER after plugin list",
                        found: text,
                    })
                }
            }

            PreferenceName => {
                if text.is_empty() {
                    // Empty-name sentinel closes the list.
                    self.record = PreferencesClose;
                    return Ok(Step::Continue);
                }
                if text == RECORD_SENTINEL {
                    self.preferences_done(events);
                    return Ok(Step::Continue);
                }
                self.preference_name = text;
                self.record = PreferenceValue;
                Ok(Step::Continue)
            }
            PreferenceValue => {
                let name = std::mem::take(&mut self.preference_name);
                // Credentials ride the preference channel but are never
                // cached.
                if !SKIPPED_PREFERENCES.contains(&name.as_str()) {
                    events.push(OtpEvent::Preference(Preference::new(name, text)));
                }
                self.record = PreferenceName;
                Ok(Step::Continue)
            }
            PreferencesClose => {
                if text == RECORD_SENTINEL {
                    self.preferences_done(events);
                    Ok(Step::Continue)
                } else {
                    Err(ProtocolError::UnexpectedField {
                        expected: "SERVER after preferences",
                        found: text,
                    })
                }
            }

            NvtInfoVersion => {
                events.push(OtpEvent::FeedVersion(text));
                if self.phase == InitPhase::GotVersion {
                    self.phase = InitPhase::GotFeedVersion;
                }
                self.record = NvtInfoClose;
                Ok(Step::Continue)
            }
            NvtInfoClose => self.close_record(&text),

            ByeAck => {
                if text == "BYE" {
                    self.record = ByeClose;
                    Ok(Step::Continue)
                } else {
                    Err(ProtocolError::UnexpectedField {
                        expected: "BYE",
                        found: text,
                    })
                }
            }
            ByeClose => {
                if text == RECORD_SENTINEL {
                    self.record = Opener;
                    Ok(Step::Finish(Feed::Bye))
                } else {
                    Err(ProtocolError::UnexpectedField {
                        expected: "SERVER after BYE",
                        found: text,
                    })
                }
            }
        }
    }

    fn open(
        &mut self,
        text: String,
        end: FieldEnd,
        events: &mut Vec<OtpEvent>,
    ) -> Result<Step, ProtocolError> {
        // Structural lines outrank record parsing while the handshake is
        // still underway.
        if self.phase != InitPhase::Done {
            if text == BAD_LOGIN_LINE {
                return Ok(Step::Finish(Feed::LoginFailed));
            }
            if text == LOADING_TOKEN {
                self.record = RecordState::LoadingLoaded;
                return Ok(Step::Continue);
            }
        }

        if self.phase == InitPhase::SentVersion {
            return if text == PROTOCOL_VERSION_LINE {
                self.phase = InitPhase::GotVersion;
                events.push(OtpEvent::VersionAgreed);
                Ok(Step::Continue)
            } else if text.starts_with("< OTP/") {
                Err(ProtocolError::UnsupportedVersion(text))
            } else {
                Err(ProtocolError::UnexpectedField {
                    expected: "protocol version line",
                    found: text,
                })
            };
        }

        if text == RECORD_SENTINEL {
            self.record = RecordState::Kind;
            return Ok(Step::Continue);
        }
        if text.is_empty() && end == FieldEnd::Newline {
            // Blank line between records.
            return Ok(Step::Continue);
        }
        Err(ProtocolError::UnexpectedField {
            expected: "SERVER record opener",
            found: text,
        })
    }

    fn dispatch_kind(&mut self, text: &str) -> Result<Step, ProtocolError> {
        self.record = match text {
            "BYE" => RecordState::ByeAck,
            "ERRMSG" => {
                self.kind = MessageKind::Errmsg;
                RecordState::MessageHost
            }
            "ALARM" => {
                self.kind = MessageKind::Alarm;
                RecordState::MessageHost
            }
            "LOG" => {
                self.kind = MessageKind::Log;
                RecordState::MessageHost
            }
            "STATUS" => RecordState::StatusHost,
            "TIME" => RecordState::TimeKind,
            "PLUGIN_LIST" => RecordState::PluginOid,
            "PREFERENCES" => RecordState::PreferenceName,
            "NVT_INFO" => RecordState::NvtInfoVersion,
            _ => {
                return Err(ProtocolError::UnexpectedField {
                    expected: "record kind",
                    found: text.to_string(),
                });
            }
        };
        Ok(Step::Continue)
    }

    fn finish_message(&mut self, oid: String, events: &mut Vec<OtpEvent>) {
        let host = std::mem::take(&mut self.host);
        let port = std::mem::take(&mut self.port);
        // Scanner descriptions carry `;` where newlines belong.
        let description = std::mem::take(&mut self.description).replace(';', "\n");

        if self.kind == MessageKind::Log && port == HOST_DETAILS_PORT {
            events.push(OtpEvent::HostDetail {
                host,
                detail: description,
            });
            return;
        }

        events.push(OtpEvent::Result(ResultMessage {
            host,
            port: parse_port(&port),
            nvt_oid: oid,
            description,
            result_type: self.kind.result_type(),
        }));
    }

    fn finish_status(&mut self, value: &str, events: &mut Vec<OtpEvent>) {
        let host = std::mem::take(&mut self.host);
        if let Some(captures) = PROGRESS_RE.captures(value) {
            let current = captures[1].parse().unwrap_or(0);
            let max = captures[2].parse().unwrap_or(0);
            events.push(OtpEvent::HostProgress { host, current, max });
            return;
        }
        match value {
            "pause" => events.push(OtpEvent::AttackPaused { host }),
            "resume" => events.push(OtpEvent::AttackResumed { host }),
            state => events.push(OtpEvent::HostAttackState {
                host,
                state: state.to_string(),
            }),
        }
    }

    fn close_record(&mut self, text: &str) -> Result<Step, ProtocolError> {
        if text == RECORD_SENTINEL {
            self.record = RecordState::Opener;
            Ok(Step::Continue)
        } else {
            Err(ProtocolError::UnexpectedField {
                expected: "SERVER record close",
                found: text.to_string(),
            })
        }
    }

    fn plugin_list_done(&mut self) {
        if matches!(self.phase, InitPhase::GotVersion | InitPhase::GotFeedVersion) {
            self.phase = InitPhase::GotPlugins;
        }
        self.record = RecordState::Opener;
    }

    fn preferences_done(&mut self, events: &mut Vec<OtpEvent>) {
        if self.phase != InitPhase::Done {
            self.phase = InitPhase::Done;
            events.push(OtpEvent::HandshakeComplete);
        }
        self.record = RecordState::Opener;
    }
}

enum Step {
    Continue,
    Finish(Feed),
}

fn parse_count(text: &str) -> Result<u64, ProtocolError> {
    text.parse().map_err(|_| ProtocolError::UnexpectedField {
        expected: "loading counter",
        found: text.to_string(),
    })
}
