//! Core domain types for second-opinion.
//!
//! The wire format (flat snake_case, see [`crate::params`]) is translated
//! into these richer types exactly once at the dispatch boundary; nothing
//! past the normalizer sees external field names.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// A position in source code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CodeLocation {
    /// Absolute path or project-relative path
    pub file: String,
    /// 1-indexed line number
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

/// The bounded region of source the caller authorizes for reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CodeScope {
    /// Files in scope (non-empty after validation)
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_points: Vec<CodeLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_names: Vec<String>,
}

/// Category of an analysis finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    Bug,
    Performance,
    Security,
    Architecture,
    Quality,
    Other,
}

/// Severity of an analysis finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Confidence value clamped to [0.0, 1.0].
///
/// The saturating constructor makes downstream arithmetic (ranking,
/// tie-breaking between hypotheses) safe without per-site bounds checks.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    /// Zero confidence.
    pub const ZERO: Self = Self(0.0);

    /// Full confidence.
    pub const MAX: Self = Self(1.0);

    /// Creates a new confidence, saturating to [0.0, 1.0] bounds.
    #[must_use]
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        Self(value.clamp(0.0, 1.0))
    }

    #[must_use]
    pub const fn as_f64(self) -> f64 {
        self.0
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self(0.5)
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// A single structured finding extracted from reasoner output.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    #[serde(rename = "type")]
    pub finding_type: FindingType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<CodeLocation>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
}

impl Finding {
    /// Wraps raw, unparseable reasoner output as a single low-severity
    /// finding so the caller still sees the text.
    #[must_use]
    pub fn from_raw_text(text: impl Into<String>) -> Self {
        Self {
            finding_type: FindingType::Other,
            severity: Severity::Low,
            location: None,
            description: text.into(),
            evidence: Vec::new(),
            confidence: Some(Confidence::ZERO),
        }
    }
}

/// What kind of deep analysis the caller is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    ExecutionTrace,
    CrossSystem,
    Performance,
    HypothesisTest,
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionTrace => f.write_str("execution_trace"),
            Self::CrossSystem => f.write_str("cross_system"),
            Self::Performance => f.write_str("performance"),
            Self::HypothesisTest => f.write_str("hypothesis_test"),
        }
    }
}

/// The universal analysis input: everything the primary caller has already
/// tried, so the deep reasoner does not repeat work.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisContext {
    pub attempted_approaches: Vec<String>,
    pub partial_findings: Vec<Finding>,
    pub stuck_points: Vec<String>,
    pub focus_area: CodeScope,
    /// Remaining budget in seconds
    pub analysis_budget_secs: u64,
}

/// Lifecycle state of a conversational session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Processing,
    AwaitingInput,
    Finalizing,
    Completed,
    Abandoned,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Processing => f.write_str("processing"),
            Self::AwaitingInput => f.write_str("awaiting_input"),
            Self::Finalizing => f.write_str("finalizing"),
            Self::Completed => f.write_str("completed"),
            Self::Abandoned => f.write_str("abandoned"),
        }
    }
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Caller,
    Reasoner,
}

/// A code excerpt attached to a turn.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CodeSnippet {
    pub file: String,
    pub excerpt: String,
}

/// One entry in a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    #[serde(with = "unix_seconds")]
    #[schemars(with = "u64")]
    pub timestamp: SystemTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_snippets: Vec<CodeSnippet>,
}

impl Turn {
    #[must_use]
    pub fn caller(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Caller,
            content: content.into(),
            timestamp: SystemTime::now(),
            code_snippets: Vec::new(),
        }
    }

    #[must_use]
    pub fn reasoner(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Reasoner,
            content: content.into(),
            timestamp: SystemTime::now(),
            code_snippets: Vec::new(),
        }
    }

    /// Approximate in-memory size used for transcript cap enforcement.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.content.len()
            + self
                .code_snippets
                .iter()
                .map(|s| s.file.len() + s.excerpt.len())
                .sum::<usize>()
    }
}

/// Remaining budget for a session or tournament.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct Budget {
    pub wall_clock_secs: u64,
    pub provider_calls: u32,
}

/// A competing explanation in a hypothesis tournament.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Hypothesis {
    pub id: String,
    pub statement: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supporting_evidence: Vec<String>,
    pub confidence: Confidence,
    pub status: HypothesisStatus,
}

/// Tournament state of one hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisStatus {
    Pending,
    Tested,
    Eliminated,
    Winner,
}

/// Final report produced by `finalize_conversation`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FinalReport {
    pub summary: String,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
}

/// Requested shape of the finalize summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SummaryFormat {
    #[default]
    Concise,
    Detailed,
    Actionable,
}

impl fmt::Display for SummaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concise => f.write_str("concise"),
            Self::Detailed => f.write_str("detailed"),
            Self::Actionable => f.write_str("actionable"),
        }
    }
}

/// Serialize SystemTime as integer Unix seconds (wire-friendly, stable).
pub(crate) mod unix_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let secs = t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        s.serialize_u64(secs)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

// Compile-time assertions for thread safety.
#[cfg(test)]
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}

    assert_send_sync::<AnalysisContext>();
    assert_send_sync::<Finding>();
    assert_send_sync::<Turn>();
    assert_send_sync::<Hypothesis>();
};
