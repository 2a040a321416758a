//! Parameter normalization: wire format to internal records.
//!
//! The hosting client flattens nested object arguments, so every tool's
//! schema is a set of top-level snake_case fields. Fields that are
//! logically arrays or objects may arrive either as native JSON or as
//! JSON-encoded strings; both are accepted here and nowhere else — the
//! rest of the crate only sees the typed records.
//!
//! Validation is composite: `normalize()` reports *every* missing or
//! ill-typed field in one error so the caller can fix all problems in a
//! single round-trip.

use crate::error::{Result, ServerError};
use crate::types::{
    AnalysisContext, AnalysisType, CodeLocation, CodeScope, Finding, SummaryFormat,
};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Collects field-level problems during normalization.
#[derive(Debug, Default)]
pub struct Issues(Vec<String>);

impl Issues {
    fn push(&mut self, issue: String) {
        self.0.push(issue);
    }

    /// Converts accumulated issues into a composite validation error.
    fn into_result<T>(self, value: T) -> Result<T> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(ServerError::Validation { issues: self.0 })
        }
    }
}

/// Decodes a field that may be native JSON or a JSON-encoded string.
///
/// Returns `None` (after recording an issue when `required`) rather than
/// failing fast, so the caller can keep collecting problems.
fn flex<T: DeserializeOwned>(
    field: &'static str,
    raw: Option<Value>,
    required: bool,
    issues: &mut Issues,
) -> Option<T> {
    let value = match raw {
        None | Some(Value::Null) => {
            if required {
                issues.push(format!("missing required field '{field}'"));
            }
            return None;
        }
        Some(v) => v,
    };

    // A string is either the target type itself or a JSON encoding of it.
    if let Value::String(ref s) = value {
        if let Ok(direct) = serde_json::from_value::<T>(value.clone()) {
            return Some(direct);
        }
        return match serde_json::from_str::<T>(s) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                issues.push(format!("field '{field}' is not valid JSON: {e}"));
                None
            }
        };
    }

    match serde_json::from_value::<T>(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            issues.push(format!("field '{field}' has the wrong type: {e}"));
            None
        }
    }
}

/// Decodes a required plain string field.
fn require_string(
    field: &'static str,
    raw: Option<String>,
    issues: &mut Issues,
) -> Option<String> {
    match raw {
        Some(s) if !s.trim().is_empty() => Some(s),
        Some(_) => {
            issues.push(format!("field '{field}' must not be empty"));
            None
        }
        None => {
            issues.push(format!("missing required field '{field}'"));
            None
        }
    }
}

fn parse_analysis_type(
    raw: Option<String>,
    issues: &mut Issues,
) -> Option<AnalysisType> {
    let s = require_string("analysis_type", raw, issues)?;
    match serde_json::from_value::<AnalysisType>(Value::String(s.clone())) {
        Ok(t) => Some(t),
        Err(_) => {
            issues.push(format!(
                "field 'analysis_type' must be one of execution_trace, cross_system, \
                 performance, hypothesis_test (got '{s}')"
            ));
            None
        }
    }
}

fn check_scope(scope: &CodeScope, field: &'static str, issues: &mut Issues) {
    if scope.files.is_empty() {
        issues.push(format!("field '{field}' must list at least one file"));
    }
}

// ─── Shared context fields ───────────────────────────────────────────────────

/// The wire fields common to every context-carrying tool.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ContextParams {
    /// Approaches already tried by the caller (array of strings, native or JSON-encoded)
    pub attempted_approaches: Option<Value>,
    /// Structured findings collected so far (array of findings, native or JSON-encoded)
    pub partial_findings: Option<Value>,
    /// Why the caller is stuck (array of strings, native or JSON-encoded)
    pub stuck_description: Option<Value>,
    /// Files and entry points in scope (object, native or JSON-encoded)
    pub code_scope: Option<Value>,
    /// Analysis time budget in seconds (default 60)
    pub time_budget_seconds: Option<u64>,
}

impl ContextParams {
    /// Builds the internal context, recording issues instead of failing fast.
    fn normalize_into(self, issues: &mut Issues) -> AnalysisContext {
        let attempted: Option<Vec<String>> =
            flex("attempted_approaches", self.attempted_approaches, true, issues);
        let findings: Option<Vec<Finding>> =
            flex("partial_findings", self.partial_findings, true, issues);
        let stuck: Option<Vec<String>> =
            flex("stuck_description", self.stuck_description, true, issues);
        let scope: Option<CodeScope> = flex("code_scope", self.code_scope, true, issues);

        if let Some(ref s) = scope {
            check_scope(s, "code_scope", issues);
        }

        AnalysisContext {
            attempted_approaches: attempted.unwrap_or_default(),
            partial_findings: findings.unwrap_or_default(),
            stuck_points: stuck.unwrap_or_default(),
            focus_area: scope.unwrap_or_default(),
            analysis_budget_secs: self.time_budget_seconds.unwrap_or(60),
        }
    }
}

// ─── escalate_analysis ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EscalateParams {
    #[serde(flatten)]
    pub context: ContextParams,
    /// Kind of deep analysis: execution_trace, cross_system, performance, hypothesis_test
    pub analysis_type: Option<String>,
    /// Reasoning depth from 1 (shallow) to 5 (exhaustive), default 3
    pub depth_level: Option<u8>,
}

/// Internal record for the general escalation tool.
#[derive(Debug)]
pub struct EscalateRequest {
    pub context: AnalysisContext,
    pub analysis_type: AnalysisType,
    pub depth_level: u8,
}

impl EscalateParams {
    pub fn normalize(self) -> Result<EscalateRequest> {
        let mut issues = Issues::default();
        let context = self.context.normalize_into(&mut issues);
        let analysis_type = parse_analysis_type(self.analysis_type, &mut issues);

        let depth_level = self.depth_level.unwrap_or(3);
        if !(1..=5).contains(&depth_level) {
            issues.push(format!(
                "field 'depth_level' must be between 1 and 5 (got {depth_level})"
            ));
        }

        issues.into_result(EscalateRequest {
            context,
            analysis_type: analysis_type.unwrap_or(AnalysisType::HypothesisTest),
            depth_level,
        })
    }
}

// ─── trace_execution_path ────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TraceParams {
    /// Where tracing starts: { file, line, function_name? } (native or JSON-encoded)
    pub entry_point: Option<Value>,
    /// Maximum call depth to follow (default 5)
    pub max_depth: Option<u8>,
    /// Track how data transforms along the path (default true)
    pub include_data_flow: Option<bool>,
}

#[derive(Debug)]
pub struct TraceRequest {
    pub entry_point: CodeLocation,
    pub max_depth: u8,
    pub include_data_flow: bool,
}

impl TraceParams {
    pub fn normalize(self) -> Result<TraceRequest> {
        let mut issues = Issues::default();
        let entry_point: Option<CodeLocation> =
            flex("entry_point", self.entry_point, true, &mut issues);

        if let Some(ref ep) = entry_point {
            if ep.line == 0 {
                issues.push("field 'entry_point.line' must be >= 1".to_string());
            }
        }

        let entry = entry_point.unwrap_or(CodeLocation {
            file: String::new(),
            line: 1,
            column: None,
            function_name: None,
        });

        issues.into_result(TraceRequest {
            entry_point: entry,
            max_depth: self.max_depth.unwrap_or(5),
            include_data_flow: self.include_data_flow.unwrap_or(true),
        })
    }
}

// ─── hypothesis_test ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HypothesisTestParams {
    /// The theory to test against the code
    pub hypothesis: Option<String>,
    /// Files in scope (object, native or JSON-encoded)
    pub code_scope: Option<Value>,
    /// How to evaluate the hypothesis
    pub test_approach: Option<String>,
}

#[derive(Debug)]
pub struct HypothesisTestRequest {
    pub hypothesis: String,
    pub code_scope: CodeScope,
    pub test_approach: String,
}

impl HypothesisTestParams {
    pub fn normalize(self) -> Result<HypothesisTestRequest> {
        let mut issues = Issues::default();
        let hypothesis = require_string("hypothesis", self.hypothesis, &mut issues);
        let test_approach = require_string("test_approach", self.test_approach, &mut issues);
        let scope: Option<CodeScope> = flex("code_scope", self.code_scope, true, &mut issues);
        if let Some(ref s) = scope {
            check_scope(s, "code_scope", &mut issues);
        }

        issues.into_result(HypothesisTestRequest {
            hypothesis: hypothesis.unwrap_or_default(),
            code_scope: scope.unwrap_or_default(),
            test_approach: test_approach.unwrap_or_default(),
        })
    }
}

// ─── cross_system_impact ─────────────────────────────────────────────────────

/// Impact dimensions for cross-system analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImpactType {
    Breaking,
    Performance,
    Behavioral,
}

/// The set of files/services a proposed change touches.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ChangeScope {
    pub files: Vec<String>,
    #[serde(default)]
    pub service_names: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CrossSystemParams {
    /// Files and services the change touches (object, native or JSON-encoded)
    pub change_scope: Option<Value>,
    /// Impact dimensions to assess: breaking, performance, behavioral (native or JSON-encoded)
    pub impact_types: Option<Value>,
}

#[derive(Debug)]
pub struct CrossSystemRequest {
    pub change_scope: ChangeScope,
    pub impact_types: Vec<ImpactType>,
}

impl CrossSystemParams {
    pub fn normalize(self) -> Result<CrossSystemRequest> {
        let mut issues = Issues::default();
        let scope: Option<ChangeScope> =
            flex("change_scope", self.change_scope, true, &mut issues);
        let impact_types: Option<Vec<ImpactType>> =
            flex("impact_types", self.impact_types, true, &mut issues);

        if let Some(ref s) = scope {
            if s.files.is_empty() {
                issues.push("field 'change_scope' must list at least one file".to_string());
            }
        }
        if let Some(ref t) = impact_types {
            if t.is_empty() {
                issues.push("field 'impact_types' must not be empty".to_string());
            }
        }

        issues.into_result(CrossSystemRequest {
            change_scope: scope.unwrap_or(ChangeScope {
                files: Vec::new(),
                service_names: Vec::new(),
            }),
            impact_types: impact_types.unwrap_or_default(),
        })
    }
}

// ─── performance_bottleneck ──────────────────────────────────────────────────

/// The suspect code path for performance analysis.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct CodePath {
    pub entry_point: CodeLocation,
    #[serde(default)]
    pub suspected_issues: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PerformanceParams {
    /// Entry point and suspected issues (object, native or JSON-encoded)
    pub code_path: Option<Value>,
    /// How deep to profile: shallow, deep, or comprehensive (default deep)
    pub profile_depth: Option<String>,
}

/// Profiling depth for bottleneck analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProfileDepth {
    Shallow,
    #[default]
    Deep,
    Comprehensive,
}

#[derive(Debug)]
pub struct PerformanceRequest {
    pub code_path: CodePath,
    pub profile_depth: ProfileDepth,
}

impl PerformanceParams {
    pub fn normalize(self) -> Result<PerformanceRequest> {
        let mut issues = Issues::default();
        let code_path: Option<CodePath> = flex("code_path", self.code_path, true, &mut issues);

        let profile_depth = match self.profile_depth {
            None => ProfileDepth::Deep,
            Some(s) => match serde_json::from_value::<ProfileDepth>(Value::String(s.clone())) {
                Ok(d) => d,
                Err(_) => {
                    issues.push(format!(
                        "field 'profile_depth' must be shallow, deep, or comprehensive (got '{s}')"
                    ));
                    ProfileDepth::Deep
                }
            },
        };

        issues.into_result(PerformanceRequest {
            code_path: code_path.unwrap_or(CodePath {
                entry_point: CodeLocation {
                    file: String::new(),
                    line: 1,
                    column: None,
                    function_name: None,
                },
                suspected_issues: Vec::new(),
            }),
            profile_depth,
        })
    }
}

// ─── start_conversation ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StartConversationParams {
    /// Approaches already tried (array of strings, native or JSON-encoded)
    pub attempted_approaches: Option<Value>,
    /// Structured findings collected so far (array, native or JSON-encoded)
    pub partial_findings: Option<Value>,
    /// Why the caller is stuck (array of strings, native or JSON-encoded)
    pub stuck_description: Option<Value>,
    /// Files in scope (array of paths, native or JSON-encoded)
    pub code_scope_files: Option<Value>,
    /// Kind of deep analysis to run
    pub analysis_type: Option<String>,
    /// Opening question for the reasoner
    pub initial_question: Option<String>,
}

#[derive(Debug)]
pub struct StartConversationRequest {
    pub context: AnalysisContext,
    pub analysis_type: AnalysisType,
    pub initial_question: Option<String>,
}

impl StartConversationParams {
    pub fn normalize(self) -> Result<StartConversationRequest> {
        let mut issues = Issues::default();
        let attempted: Option<Vec<String>> =
            flex("attempted_approaches", self.attempted_approaches, true, &mut issues);
        let findings: Option<Vec<Finding>> =
            flex("partial_findings", self.partial_findings, true, &mut issues);
        let stuck: Option<Vec<String>> =
            flex("stuck_description", self.stuck_description, true, &mut issues);
        let files: Option<Vec<String>> =
            flex("code_scope_files", self.code_scope_files, true, &mut issues);
        let analysis_type = parse_analysis_type(self.analysis_type, &mut issues);

        if let Some(ref f) = files {
            if f.is_empty() {
                issues.push("field 'code_scope_files' must list at least one file".to_string());
            }
        }

        let context = AnalysisContext {
            attempted_approaches: attempted.unwrap_or_default(),
            partial_findings: findings.unwrap_or_default(),
            stuck_points: stuck.unwrap_or_default(),
            focus_area: CodeScope {
                files: files.unwrap_or_default(),
                entry_points: Vec::new(),
                service_names: Vec::new(),
            },
            analysis_budget_secs: 60,
        };

        issues.into_result(StartConversationRequest {
            context,
            analysis_type: analysis_type.unwrap_or(AnalysisType::HypothesisTest),
            initial_question: self.initial_question.filter(|q| !q.trim().is_empty()),
        })
    }
}

// ─── continue / finalize / status ────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ContinueConversationParams {
    /// Session id returned by start_conversation
    pub session_id: Option<String>,
    /// Next message for the reasoner
    pub message: Option<String>,
    /// Attach code excerpts for files referenced in the message (default false)
    pub include_code_snippets: Option<bool>,
}

#[derive(Debug)]
pub struct ContinueConversationRequest {
    pub session_id: String,
    pub message: String,
    pub include_code_snippets: bool,
}

impl ContinueConversationParams {
    pub fn normalize(self) -> Result<ContinueConversationRequest> {
        let mut issues = Issues::default();
        let session_id = require_string("session_id", self.session_id, &mut issues);
        let message = require_string("message", self.message, &mut issues);
        issues.into_result(ContinueConversationRequest {
            session_id: session_id.unwrap_or_default(),
            message: message.unwrap_or_default(),
            include_code_snippets: self.include_code_snippets.unwrap_or(false),
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FinalizeConversationParams {
    /// Session id returned by start_conversation
    pub session_id: Option<String>,
    /// Summary shape: concise, detailed, or actionable (default concise)
    pub summary_format: Option<String>,
}

#[derive(Debug)]
pub struct FinalizeConversationRequest {
    pub session_id: String,
    pub summary_format: SummaryFormat,
}

impl FinalizeConversationParams {
    pub fn normalize(self) -> Result<FinalizeConversationRequest> {
        let mut issues = Issues::default();
        let session_id = require_string("session_id", self.session_id, &mut issues);

        let summary_format = match self.summary_format {
            None => SummaryFormat::Concise,
            Some(s) => match serde_json::from_value::<SummaryFormat>(Value::String(s.clone())) {
                Ok(f) => f,
                Err(_) => {
                    issues.push(format!(
                        "field 'summary_format' must be concise, detailed, or actionable (got '{s}')"
                    ));
                    SummaryFormat::Concise
                }
            },
        };

        issues.into_result(FinalizeConversationRequest {
            session_id: session_id.unwrap_or_default(),
            summary_format,
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConversationStatusParams {
    /// Session id returned by start_conversation
    pub session_id: Option<String>,
}

impl ConversationStatusParams {
    pub fn normalize(self) -> Result<String> {
        let mut issues = Issues::default();
        let session_id = require_string("session_id", self.session_id, &mut issues);
        issues.into_result(session_id.unwrap_or_default())
    }
}

// ─── run_hypothesis_tournament ───────────────────────────────────────────────

/// Caller-tunable tournament knobs.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema)]
pub struct TournamentConfig {
    /// Candidate hypotheses to generate (default 6)
    #[serde(default = "default_max_hypotheses")]
    pub max_hypotheses: u8,
    /// Elimination rounds to run (default 3)
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u8,
    /// Pair tests running concurrently (default 2)
    #[serde(default = "default_parallel_sessions")]
    pub parallel_sessions: u8,
}

const fn default_max_hypotheses() -> u8 {
    6
}

const fn default_max_rounds() -> u8 {
    3
}

const fn default_parallel_sessions() -> u8 {
    2
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            max_hypotheses: default_max_hypotheses(),
            max_rounds: default_max_rounds(),
            parallel_sessions: default_parallel_sessions(),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TournamentParams {
    #[serde(flatten)]
    pub context: ContextParams,
    /// The issue the tournament should explain
    pub issue: Option<String>,
    /// Tournament knobs: max_hypotheses, max_rounds, parallel_sessions (native or JSON-encoded)
    pub tournament_config: Option<Value>,
}

#[derive(Debug)]
pub struct TournamentRequest {
    pub context: AnalysisContext,
    pub issue: String,
    pub config: TournamentConfig,
}

impl TournamentParams {
    /// Wall-clock default when the caller sends no `time_budget_seconds`.
    /// Tournaments run many calls, so the single-shot 60s default is wrong.
    pub const DEFAULT_WALL_CLOCK_SECS: u64 = 300;

    pub fn normalize(self) -> Result<TournamentRequest> {
        let mut issues = Issues::default();
        let explicit_budget = self.context.time_budget_seconds.is_some();
        let mut context = self.context.normalize_into(&mut issues);
        if !explicit_budget {
            context.analysis_budget_secs = Self::DEFAULT_WALL_CLOCK_SECS;
        }
        let issue = require_string("issue", self.issue, &mut issues);
        let config: Option<TournamentConfig> =
            flex("tournament_config", self.tournament_config, false, &mut issues);

        let config = config.unwrap_or_default();
        if config.max_hypotheses == 0 {
            issues.push("field 'tournament_config.max_hypotheses' must be >= 1".to_string());
        }
        if config.parallel_sessions == 0 {
            issues.push("field 'tournament_config.parallel_sessions' must be >= 1".to_string());
        }

        issues.into_result(TournamentRequest {
            context,
            issue: issue.unwrap_or_default(),
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn escalate_value(v: Value) -> EscalateParams {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_native_arrays_accepted() {
        let params = escalate_value(json!({
            "attempted_approaches": ["static analysis"],
            "partial_findings": [],
            "stuck_description": ["cannot reproduce bug"],
            "code_scope": { "files": ["/repo/src/main.ts"] },
            "analysis_type": "hypothesis_test",
            "depth_level": 3,
        }));
        let req = params.normalize().unwrap();
        assert_eq!(req.context.attempted_approaches, vec!["static analysis"]);
        assert_eq!(req.context.focus_area.files, vec!["/repo/src/main.ts"]);
        assert_eq!(req.analysis_type, AnalysisType::HypothesisTest);
        assert_eq!(req.depth_level, 3);
    }

    #[test]
    fn test_json_encoded_strings_accepted() {
        let params = escalate_value(json!({
            "attempted_approaches": "[\"grep\", \"println debugging\"]",
            "partial_findings": "[]",
            "stuck_description": "[\"race condition?\"]",
            "code_scope": "{\"files\": [\"src/lib.rs\"]}",
            "analysis_type": "performance",
        }));
        let req = params.normalize().unwrap();
        assert_eq!(req.context.attempted_approaches.len(), 2);
        assert_eq!(req.context.focus_area.files, vec!["src/lib.rs"]);
        assert_eq!(req.analysis_type, AnalysisType::Performance);
    }

    #[test]
    fn test_composite_error_lists_all_missing_fields() {
        let params = escalate_value(json!({}));
        let err = params.normalize().unwrap_err();
        match err {
            ServerError::Validation { issues } => {
                let joined = issues.join("\n");
                assert!(joined.contains("attempted_approaches"));
                assert!(joined.contains("partial_findings"));
                assert!(joined.contains("stuck_description"));
                assert!(joined.contains("code_scope"));
                assert!(joined.contains("analysis_type"));
                assert!(issues.len() >= 5);
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_depth_level_bounds() {
        let params = escalate_value(json!({
            "attempted_approaches": [],
            "partial_findings": [],
            "stuck_description": [],
            "code_scope": { "files": ["a.rs"] },
            "analysis_type": "cross_system",
            "depth_level": 9,
        }));
        let err = params.normalize().unwrap_err();
        assert!(err.to_string().contains("depth_level"));
    }

    #[test]
    fn test_empty_code_scope_rejected() {
        let params = escalate_value(json!({
            "attempted_approaches": [],
            "partial_findings": [],
            "stuck_description": [],
            "code_scope": { "files": [] },
            "analysis_type": "performance",
        }));
        let err = params.normalize().unwrap_err();
        assert!(err.to_string().contains("at least one file"));
    }

    #[test]
    fn test_time_budget_default() {
        let params = escalate_value(json!({
            "attempted_approaches": [],
            "partial_findings": [],
            "stuck_description": [],
            "code_scope": { "files": ["a.rs"] },
            "analysis_type": "performance",
        }));
        let req = params.normalize().unwrap();
        assert_eq!(req.context.analysis_budget_secs, 60);
    }

    #[test]
    fn test_trace_entry_point_line_validated() {
        let params: TraceParams = serde_json::from_value(json!({
            "entry_point": { "file": "src/main.rs", "line": 0 },
        }))
        .unwrap();
        assert!(params.normalize().is_err());

        let params: TraceParams = serde_json::from_value(json!({
            "entry_point": "{\"file\": \"src/main.rs\", \"line\": 14}",
        }))
        .unwrap();
        let req = params.normalize().unwrap();
        assert_eq!(req.entry_point.line, 14);
        assert_eq!(req.max_depth, 5);
        assert!(req.include_data_flow);
    }

    #[test]
    fn test_tournament_config_defaults() {
        let params: TournamentParams = serde_json::from_value(json!({
            "attempted_approaches": [],
            "partial_findings": [],
            "stuck_description": [],
            "code_scope": { "files": ["a.rs"] },
            "issue": "intermittent 500s",
        }))
        .unwrap();
        let req = params.normalize().unwrap();
        assert_eq!(req.config.max_hypotheses, 6);
        assert_eq!(req.config.max_rounds, 3);
        assert_eq!(req.config.parallel_sessions, 2);
        assert_eq!(req.issue, "intermittent 500s");
    }

    #[test]
    fn test_finalize_summary_format() {
        let params: FinalizeConversationParams = serde_json::from_value(json!({
            "session_id": "s-1",
            "summary_format": "actionable",
        }))
        .unwrap();
        let req = params.normalize().unwrap();
        assert_eq!(req.summary_format, SummaryFormat::Actionable);

        let params: FinalizeConversationParams = serde_json::from_value(json!({
            "session_id": "s-1",
            "summary_format": "florid",
        }))
        .unwrap();
        assert!(params.normalize().is_err());
    }

    #[test]
    fn test_cross_system_impact_types() {
        let params: CrossSystemParams = serde_json::from_value(json!({
            "change_scope": { "files": ["svc/api.rs"], "service_names": ["billing"] },
            "impact_types": "[\"breaking\", \"behavioral\"]",
        }))
        .unwrap();
        let req = params.normalize().unwrap();
        assert_eq!(
            req.impact_types,
            vec![ImpactType::Breaking, ImpactType::Behavioral]
        );
        assert_eq!(req.change_scope.service_names, vec!["billing"]);
    }
}
