//! Protocol version tags and their wire-level differences.

use crate::error::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// A STOMP protocol level, fixed at frame construction.
///
/// Levels are ordered: `V1_0 < V1_1 < V1_2`. The level decides the line
/// terminator, whether header values are escaped, and which headers the
/// builder treats as mandatory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V1_0,
    V1_1,
    #[default]
    V1_2,
}

impl ProtocolVersion {
    /// The version string as it appears in `accept-version`/`version` headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V1_0 => "1.0",
            ProtocolVersion::V1_1 => "1.1",
            ProtocolVersion::V1_2 => "1.2",
        }
    }

    /// Line terminator: `\n` through 1.1, `\r\n` from 1.2.
    pub fn eol(&self) -> &'static str {
        if *self > ProtocolVersion::V1_1 {
            "\r\n"
        } else {
            "\n"
        }
    }

    /// Header keys and values are backslash-escaped from 1.2.
    pub fn escapes_headers(&self) -> bool {
        *self > ProtocolVersion::V1_1
    }
}

impl FromStr for ProtocolVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.0" => Ok(ProtocolVersion::V1_0),
            "1.1" => Ok(ProtocolVersion::V1_1),
            "1.2" => Ok(ProtocolVersion::V1_2),
            other => Err(ProtocolError::UnsupportedVersion(other.to_string())),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
