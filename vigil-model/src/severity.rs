//! Severity scores and threat-level classification.
//!
//! Scores live in `(0.0, 10.0]`; `0.0` is the log sentinel and the negative
//! sentinels mark false positives, debug output, and scanner errors. The
//! score-to-level mapping depends on the active classification scheme, and
//! levels are mutually convertible with the legacy message-type vocabulary
//! ("Security Hole", "Security Warning", ...).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Log sentinel. Results with no severity of their own carry this score.
pub const SEVERITY_LOG: f64 = 0.0;
/// False-positive sentinel.
pub const SEVERITY_FP: f64 = -1.0;
/// Debug-message sentinel.
pub const SEVERITY_DEBUG: f64 = -2.0;
/// Scanner-error sentinel.
pub const SEVERITY_ERROR: f64 = -3.0;
/// Upper bound of the severity scale.
pub const SEVERITY_MAX: f64 = 10.0;

/// Classification scheme selecting the score thresholds per threat level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassificationScheme {
    Classic,
    PciDss,
    /// NIST/BSI thresholds. The default scheme.
    #[default]
    Nist,
}

impl FromStr for ClassificationScheme {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classic" => Ok(ClassificationScheme::Classic),
            "pci-dss" => Ok(ClassificationScheme::PciDss),
            "nist" | "bsi" => Ok(ClassificationScheme::Nist),
            other => Err(ModelError::UnknownScheme(other.to_string())),
        }
    }
}

impl fmt::Display for ClassificationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationScheme::Classic => write!(f, "classic"),
            ClassificationScheme::PciDss => write!(f, "pci-dss"),
            ClassificationScheme::Nist => write!(f, "nist"),
        }
    }
}

/// Named threat level of a severity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    High,
    Medium,
    Low,
    Log,
    Debug,
    FalsePositive,
    Error,
    None,
}

impl FromStr for ThreatLevel {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "High" | "high" => Ok(ThreatLevel::High),
            "Medium" | "medium" => Ok(ThreatLevel::Medium),
            "Low" | "low" => Ok(ThreatLevel::Low),
            "Log" | "log" => Ok(ThreatLevel::Log),
            "Debug" | "debug" => Ok(ThreatLevel::Debug),
            "False Positive" | "false positive" => Ok(ThreatLevel::FalsePositive),
            "Error" | "error" => Ok(ThreatLevel::Error),
            "None" | "none" => Ok(ThreatLevel::None),
            other => Err(ModelError::UnknownLevel(other.to_string())),
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreatLevel::High => write!(f, "High"),
            ThreatLevel::Medium => write!(f, "Medium"),
            ThreatLevel::Low => write!(f, "Low"),
            ThreatLevel::Log => write!(f, "Log"),
            ThreatLevel::Debug => write!(f, "Debug"),
            ThreatLevel::FalsePositive => write!(f, "False Positive"),
            ThreatLevel::Error => write!(f, "Error"),
            ThreatLevel::None => write!(f, "None"),
        }
    }
}

/// Legacy message-type vocabulary, interconvertible with [`ThreatLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    SecurityHole,
    SecurityWarning,
    SecurityNote,
    LogMessage,
    DebugMessage,
    FalsePositive,
    ErrorMessage,
}

impl FromStr for MessageType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Security Hole" => Ok(MessageType::SecurityHole),
            "Security Warning" => Ok(MessageType::SecurityWarning),
            "Security Note" => Ok(MessageType::SecurityNote),
            "Log Message" => Ok(MessageType::LogMessage),
            "Debug Message" => Ok(MessageType::DebugMessage),
            "False Positive" => Ok(MessageType::FalsePositive),
            "Error Message" => Ok(MessageType::ErrorMessage),
            other => Err(ModelError::UnknownMessageType(other.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::SecurityHole => write!(f, "Security Hole"),
            MessageType::SecurityWarning => write!(f, "Security Warning"),
            MessageType::SecurityNote => write!(f, "Security Note"),
            MessageType::LogMessage => write!(f, "Log Message"),
            MessageType::DebugMessage => write!(f, "Debug Message"),
            MessageType::FalsePositive => write!(f, "False Positive"),
            MessageType::ErrorMessage => write!(f, "Error Message"),
        }
    }
}

impl MessageType {
    pub fn to_level(self) -> ThreatLevel {
        match self {
            MessageType::SecurityHole => ThreatLevel::High,
            MessageType::SecurityWarning => ThreatLevel::Medium,
            MessageType::SecurityNote => ThreatLevel::Low,
            MessageType::LogMessage => ThreatLevel::Log,
            MessageType::DebugMessage => ThreatLevel::Debug,
            MessageType::FalsePositive => ThreatLevel::FalsePositive,
            MessageType::ErrorMessage => ThreatLevel::Error,
        }
    }

    pub fn from_level(level: ThreatLevel) -> Option<MessageType> {
        match level {
            ThreatLevel::High => Some(MessageType::SecurityHole),
            ThreatLevel::Medium => Some(MessageType::SecurityWarning),
            ThreatLevel::Low => Some(MessageType::SecurityNote),
            ThreatLevel::Log => Some(MessageType::LogMessage),
            ThreatLevel::Debug => Some(MessageType::DebugMessage),
            ThreatLevel::FalsePositive => Some(MessageType::FalsePositive),
            ThreatLevel::Error => Some(MessageType::ErrorMessage),
            ThreatLevel::None => None,
        }
    }
}

/// True when `severity` falls inside `level` under `scheme`.
///
/// The sentinel levels (Log, Debug, False Positive, Error) accept exactly
/// their sentinel score in every scheme.
pub fn severity_in_level(
    scheme: ClassificationScheme,
    severity: f64,
    level: ThreatLevel,
) -> bool {
    match level {
        ThreatLevel::Log => severity == SEVERITY_LOG,
        ThreatLevel::Debug => severity == SEVERITY_DEBUG,
        ThreatLevel::FalsePositive => severity == SEVERITY_FP,
        ThreatLevel::Error => severity == SEVERITY_ERROR,
        ThreatLevel::None => severity == SEVERITY_LOG,
        ThreatLevel::High | ThreatLevel::Medium | ThreatLevel::Low => match scheme {
            ClassificationScheme::Classic => match level {
                ThreatLevel::High => severity > 5.0 && severity <= 10.0,
                ThreatLevel::Medium => severity > 2.0 && severity <= 5.0,
                ThreatLevel::Low => severity > 0.0 && severity <= 2.0,
                _ => unreachable!(),
            },
            ClassificationScheme::PciDss => match level {
                ThreatLevel::High => severity >= 4.0 && severity <= 10.0,
                // pci-dss knows only high; everything below 4.0 is none
                ThreatLevel::Medium | ThreatLevel::Low => false,
                _ => unreachable!(),
            },
            ClassificationScheme::Nist => match level {
                ThreatLevel::High => severity >= 7.0 && severity <= 10.0,
                ThreatLevel::Medium => severity >= 4.0 && severity < 7.0,
                ThreatLevel::Low => severity > 0.0 && severity < 4.0,
                _ => unreachable!(),
            },
        },
    }
}

/// Lowest score accepted by `level` under `scheme`, at 0.1 granularity.
pub fn level_min_severity(scheme: ClassificationScheme, level: ThreatLevel) -> f64 {
    match level {
        ThreatLevel::Log | ThreatLevel::None => SEVERITY_LOG,
        ThreatLevel::Debug => SEVERITY_DEBUG,
        ThreatLevel::FalsePositive => SEVERITY_FP,
        ThreatLevel::Error => SEVERITY_ERROR,
        ThreatLevel::High => match scheme {
            ClassificationScheme::Classic => 5.1,
            ClassificationScheme::PciDss => 4.0,
            ClassificationScheme::Nist => 7.0,
        },
        ThreatLevel::Medium => match scheme {
            ClassificationScheme::Classic => 2.1,
            ClassificationScheme::PciDss => SEVERITY_MAX + 1.0,
            ClassificationScheme::Nist => 4.0,
        },
        ThreatLevel::Low => match scheme {
            ClassificationScheme::Classic => 0.1,
            ClassificationScheme::PciDss => SEVERITY_MAX + 1.0,
            ClassificationScheme::Nist => 0.1,
        },
    }
}

/// Highest score accepted by `level` under `scheme`, at 0.1 granularity.
pub fn level_max_severity(scheme: ClassificationScheme, level: ThreatLevel) -> f64 {
    match level {
        ThreatLevel::Log | ThreatLevel::None => SEVERITY_LOG,
        ThreatLevel::Debug => SEVERITY_DEBUG,
        ThreatLevel::FalsePositive => SEVERITY_FP,
        ThreatLevel::Error => SEVERITY_ERROR,
        ThreatLevel::High => SEVERITY_MAX,
        ThreatLevel::Medium => match scheme {
            ClassificationScheme::Classic => 5.0,
            ClassificationScheme::PciDss => SEVERITY_MAX,
            ClassificationScheme::Nist => 6.9,
        },
        ThreatLevel::Low => match scheme {
            ClassificationScheme::Classic => 2.0,
            ClassificationScheme::PciDss => SEVERITY_MAX,
            ClassificationScheme::Nist => 3.9,
        },
    }
}

/// Map a score to its threat level under `scheme`.
pub fn severity_to_level(scheme: ClassificationScheme, severity: f64) -> ThreatLevel {
    if severity == SEVERITY_FP {
        ThreatLevel::FalsePositive
    } else if severity == SEVERITY_DEBUG {
        ThreatLevel::Debug
    } else if severity == SEVERITY_ERROR {
        ThreatLevel::Error
    } else if severity == SEVERITY_LOG {
        ThreatLevel::None
    } else if severity_in_level(scheme, severity, ThreatLevel::High) {
        ThreatLevel::High
    } else if severity_in_level(scheme, severity, ThreatLevel::Medium) {
        ThreatLevel::Medium
    } else if severity_in_level(scheme, severity, ThreatLevel::Low) {
        ThreatLevel::Low
    } else {
        ThreatLevel::None
    }
}

/// True when a result with `severity` matches a filter by message type.
pub fn severity_matches_type(
    scheme: ClassificationScheme,
    severity: f64,
    message_type: MessageType,
) -> bool {
    match message_type {
        MessageType::ErrorMessage => severity == SEVERITY_ERROR,
        MessageType::DebugMessage => severity == SEVERITY_DEBUG,
        MessageType::FalsePositive => severity == SEVERITY_FP,
        MessageType::LogMessage => severity == SEVERITY_LOG,
        MessageType::SecurityHole => severity_in_level(scheme, severity, ThreatLevel::High),
        MessageType::SecurityWarning => {
            severity_in_level(scheme, severity, ThreatLevel::Medium)
        }
        MessageType::SecurityNote => severity_in_level(scheme, severity, ThreatLevel::Low),
    }
}
