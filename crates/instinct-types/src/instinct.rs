use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest confidence an instinct may carry
pub const MIN_CONFIDENCE: f64 = 0.3;
/// Highest confidence an instinct may carry
pub const MAX_CONFIDENCE: f64 = 0.85;

/// Closed set of instinct domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    CodeStyle,
    Testing,
    Git,
    Debugging,
    Workflow,
    Tooling,
    Communication,
    Security,
    Architecture,
}

impl Domain {
    pub const ALL: [Domain; 9] = [
        Domain::CodeStyle,
        Domain::Testing,
        Domain::Git,
        Domain::Debugging,
        Domain::Workflow,
        Domain::Tooling,
        Domain::Communication,
        Domain::Security,
        Domain::Architecture,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::CodeStyle => "code-style",
            Domain::Testing => "testing",
            Domain::Git => "git",
            Domain::Debugging => "debugging",
            Domain::Workflow => "workflow",
            Domain::Tooling => "tooling",
            Domain::Communication => "communication",
            Domain::Security => "security",
            Domain::Architecture => "architecture",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured header block at the top of every instinct file.
///
/// Domain is kept as a raw string so that a file with an unknown domain can
/// still be read and reported rather than rejected outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstinctHeader {
    pub id: String,
    pub trigger: String,
    pub confidence: f64,
    pub domain: String,
    #[serde(default = "default_source")]
    pub source: String,
}

/// Provenance tag for instincts mined from captured sessions
pub fn default_source() -> String {
    "session-observation".to_string()
}

impl InstinctHeader {
    /// Domain parsed against the closed set, `None` when unknown
    pub fn domain(&self) -> Option<Domain> {
        Domain::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == self.domain)
    }

    pub fn confidence_in_range(&self) -> bool {
        (MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&self.confidence)
    }
}
