use serde::{Deserialize, Serialize};

/// Metadata of one vulnerability-test plugin, as delivered by the scanner
/// during the handshake plugin list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvtPlugin {
    pub oid: String,
    pub name: String,
    pub category: String,
    pub copyright: String,
    pub summary: String,
    pub family: String,
    pub version: String,
    pub cve: String,
    pub bugtraq: String,
    pub xrefs: String,
    pub tags: String,
}

impl NvtPlugin {
    pub fn with_oid(oid: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            ..Self::default()
        }
    }
}

/// A scanner preference name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    pub name: String,
    pub value: String,
}

impl Preference {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
