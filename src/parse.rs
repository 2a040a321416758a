//! Tolerant parsing of reasoner output into structured results.
//!
//! Model output is untrusted text. Every parser here follows the same
//! contract: try hard to recover structure (fenced JSON first, then bare
//! JSON, then line heuristics) and on failure degrade to a wrapper around
//! the raw text. Parsers never return an error and never panic.

use crate::types::{
    CodeLocation, Confidence, Finding, FindingType, Hypothesis, HypothesisStatus, Severity,
};
use serde_json::Value;
use std::sync::OnceLock;

/// Extracts the most plausible JSON value from model text.
///
/// Preference order: a ```json fenced block, any fenced block that parses,
/// the first balanced `{...}` or `[...]` region, the whole trimmed text.
#[must_use]
pub fn extract_json(text: &str) -> Option<Value> {
    static FENCE: OnceLock<regex::Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        regex::Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("static regex")
    });

    for cap in fence.captures_iter(text) {
        if let Ok(v) = serde_json::from_str::<Value>(cap[1].trim()) {
            return Some(v);
        }
    }

    for open in ['{', '['] {
        if let Some(candidate) = balanced_region(text, open) {
            if let Ok(v) = serde_json::from_str::<Value>(candidate) {
                return Some(v);
            }
        }
    }

    serde_json::from_str::<Value>(text.trim()).ok()
}

/// Finds the first balanced bracket region starting with `open`.
fn balanced_region(text: &str, open: char) -> Option<&str> {
    let close = if open == '{' { '}' } else { ']' };
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + i]);
                }
            }
            _ => {}
        }
    }
    None
}

// ─── Findings ────────────────────────────────────────────────────────────────

/// Parses model text into findings. Always returns at least one finding;
/// unparseable output degrades to a single `other` finding wrapping the
/// raw text.
#[must_use]
pub fn parse_findings(text: &str) -> Vec<Finding> {
    let Some(value) = extract_json(text) else {
        return vec![Finding::from_raw_text(text)];
    };

    let items = match &value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => match map.get("findings") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![value.clone()],
        },
        _ => return vec![Finding::from_raw_text(text)],
    };

    let findings: Vec<Finding> = items.iter().filter_map(coerce_finding).collect();
    if findings.is_empty() {
        vec![Finding::from_raw_text(text)]
    } else {
        findings
    }
}

/// Best-effort coercion of one JSON object into a Finding.
fn coerce_finding(value: &Value) -> Option<Finding> {
    let obj = value.as_object()?;

    let description = string_field(obj, &["description", "summary", "details", "finding"])?;

    let finding_type = string_field(obj, &["type", "finding_type", "category"])
        .and_then(|s| match s.to_lowercase().as_str() {
            "bug" => Some(FindingType::Bug),
            "performance" | "perf" => Some(FindingType::Performance),
            "security" => Some(FindingType::Security),
            "architecture" | "design" => Some(FindingType::Architecture),
            "quality" | "style" => Some(FindingType::Quality),
            _ => None,
        })
        .unwrap_or(FindingType::Other);

    let severity = string_field(obj, &["severity", "priority"])
        .and_then(|s| match s.to_lowercase().as_str() {
            "low" | "minor" => Some(Severity::Low),
            "medium" | "moderate" => Some(Severity::Medium),
            "high" | "major" => Some(Severity::High),
            "critical" | "blocker" => Some(Severity::Critical),
            _ => None,
        })
        .unwrap_or(Severity::Medium);

    let location = obj
        .get("location")
        .and_then(|v| serde_json::from_value::<CodeLocation>(v.clone()).ok());

    let evidence = string_array(obj.get("evidence"));

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .map(Confidence::new);

    Some(Finding {
        finding_type,
        severity,
        location,
        description,
        evidence,
        confidence,
    })
}

/// Parses a `recommendations` array out of model text, if present.
#[must_use]
pub fn parse_recommendations(text: &str) -> Vec<String> {
    extract_json(text)
        .as_ref()
        .and_then(Value::as_object)
        .map(|obj| string_array(obj.get("recommendations")))
        .unwrap_or_default()
}

// ─── Hypotheses ──────────────────────────────────────────────────────────────

/// Parses generated hypotheses, capped at `max`. Falls back to bullet-list
/// heuristics, then to a single hypothesis wrapping the raw text.
#[must_use]
pub fn parse_hypotheses(text: &str, max: usize) -> Vec<Hypothesis> {
    if let Some(value) = extract_json(text) {
        let items = match &value {
            Value::Array(items) => Some(items.clone()),
            Value::Object(map) => map
                .get("hypotheses")
                .and_then(Value::as_array)
                .cloned(),
            _ => None,
        };

        if let Some(items) = items {
            let parsed: Vec<Hypothesis> = items
                .iter()
                .enumerate()
                .filter_map(|(i, v)| coerce_hypothesis(i, v))
                .take(max)
                .collect();
            if !parsed.is_empty() {
                return parsed;
            }
        }
    }

    // Bullet / numbered list heuristic.
    let bullets: Vec<Hypothesis> = text
        .lines()
        .map(str::trim)
        .filter(|l| {
            l.starts_with("- ")
                || l.starts_with("* ")
                || l.chars().next().is_some_and(|c| c.is_ascii_digit())
        })
        .map(|l| l.trim_start_matches(['-', '*', ' ']))
        .map(|l| {
            l.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == ' ')
        })
        .filter(|l| l.len() > 8)
        .enumerate()
        .map(|(i, statement)| hypothesis(i, statement.to_string(), Vec::new(), 0.5))
        .take(max)
        .collect();

    if !bullets.is_empty() {
        return bullets;
    }

    vec![hypothesis(0, text.trim().to_string(), Vec::new(), 0.3)]
}

fn coerce_hypothesis(index: usize, value: &Value) -> Option<Hypothesis> {
    match value {
        Value::String(s) if !s.trim().is_empty() => {
            Some(hypothesis(index, s.trim().to_string(), Vec::new(), 0.5))
        }
        Value::Object(obj) => {
            let statement = string_field(obj, &["statement", "hypothesis", "description"])?;
            let evidence = string_array(obj.get("supporting_evidence").or(obj.get("evidence")));
            let confidence = obj
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.5);
            Some(hypothesis(index, statement, evidence, confidence))
        }
        _ => None,
    }
}

fn hypothesis(index: usize, statement: String, evidence: Vec<String>, confidence: f64) -> Hypothesis {
    Hypothesis {
        id: format!("h{}", index + 1),
        statement,
        supporting_evidence: evidence,
        confidence: Confidence::new(confidence),
        status: HypothesisStatus::Pending,
    }
}

// ─── Pair verdicts ───────────────────────────────────────────────────────────

/// Outcome of one tournament pair test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairWinner {
    First,
    Second,
}

/// Parsed result of a pairwise comparison call.
#[derive(Debug, Clone)]
pub struct PairVerdict {
    pub winner: PairWinner,
    pub confidence: Confidence,
    pub rationale: String,
}

/// Parses a pairwise comparison verdict. Unparseable output defaults to
/// the first hypothesis at zero confidence so the scheduler can apply its
/// own tie-breaking.
#[must_use]
pub fn parse_pair_verdict(text: &str) -> Option<PairVerdict> {
    let value = extract_json(text)?;
    let obj = value.as_object()?;

    let winner_raw = string_field(obj, &["winner", "verdict", "preferred"])?;
    let winner = match winner_raw.to_uppercase().as_str() {
        "A" | "FIRST" | "1" => PairWinner::First,
        "B" | "SECOND" | "2" => PairWinner::Second,
        _ => return None,
    };

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .map(Confidence::new)
        .unwrap_or_default();

    let rationale = string_field(obj, &["rationale", "reasoning", "explanation"])
        .unwrap_or_default();

    Some(PairVerdict {
        winner,
        confidence,
        rationale,
    })
}

// ─── Single-shot tool shapes ─────────────────────────────────────────────────

/// Verdict of a hypothesis test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TestVerdict {
    Supported,
    Refuted,
    Inconclusive,
}

/// Parses a supported/refuted/inconclusive verdict with evidence.
#[must_use]
pub fn parse_test_verdict(text: &str) -> (TestVerdict, Vec<String>, Vec<String>) {
    if let Some(value) = extract_json(text) {
        if let Some(obj) = value.as_object() {
            let verdict = string_field(obj, &["verdict", "conclusion", "result"])
                .and_then(|s| match s.to_lowercase().as_str() {
                    "supported" | "confirmed" | "true" => Some(TestVerdict::Supported),
                    "refuted" | "rejected" | "false" => Some(TestVerdict::Refuted),
                    "inconclusive" | "unknown" => Some(TestVerdict::Inconclusive),
                    _ => None,
                })
                .unwrap_or(TestVerdict::Inconclusive);
            let evidence = string_array(obj.get("evidence"));
            let counter = string_array(obj.get("counter_examples").or(obj.get("counterexamples")));
            return (verdict, evidence, counter);
        }
    }

    // Keyword fallback on free text.
    let lower = text.to_lowercase();
    let verdict = if lower.contains("refuted") || lower.contains("does not hold") {
        TestVerdict::Refuted
    } else if lower.contains("supported") || lower.contains("confirmed") {
        TestVerdict::Supported
    } else {
        TestVerdict::Inconclusive
    };
    (verdict, vec![text.trim().to_string()], Vec::new())
}

/// One step of an execution trace.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
pub struct TraceStep {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<CodeLocation>,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_flow: Option<String>,
}

/// Parses execution-trace steps. Degrades to one step per text line.
#[must_use]
pub fn parse_trace_steps(text: &str) -> Vec<TraceStep> {
    if let Some(value) = extract_json(text) {
        let items = match &value {
            Value::Array(items) => Some(items.clone()),
            Value::Object(map) => map.get("steps").and_then(Value::as_array).cloned(),
            _ => None,
        };
        if let Some(items) = items {
            let steps: Vec<TraceStep> = items
                .iter()
                .filter_map(|v| {
                    let obj = v.as_object()?;
                    Some(TraceStep {
                        location: obj
                            .get("location")
                            .and_then(|l| serde_json::from_value(l.clone()).ok()),
                        operation: string_field(obj, &["operation", "description", "step"])?,
                        data_flow: string_field(obj, &["data_flow", "dataflow"]),
                    })
                })
                .collect();
            if !steps.is_empty() {
                return steps;
            }
        }
    }

    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| TraceStep {
            location: None,
            operation: l.to_string(),
            data_flow: None,
        })
        .collect()
}

// ─── Shared helpers ──────────────────────────────────────────────────────────

fn string_field(
    obj: &serde_json::Map<String, Value>,
    names: &[&str],
) -> Option<String> {
    names
        .iter()
        .find_map(|n| obj.get(*n))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fenced_json() {
        let text = "Here is my analysis:\n```json\n{\"findings\": []}\n```\nDone.";
        let v = extract_json(text).unwrap();
        assert!(v["findings"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_extract_embedded_object() {
        let text = "Answer: {\"winner\": \"A\", \"confidence\": 0.8} as discussed";
        let v = extract_json(text).unwrap();
        assert_eq!(v["winner"], "A");
    }

    #[test]
    fn test_balanced_region_handles_nested_and_strings() {
        let text = r#"x {"a": {"b": "}"}, "c": 1} y"#;
        let v = extract_json(text).unwrap();
        assert_eq!(v["c"], 1);
    }

    #[test]
    fn test_parse_findings_well_formed() {
        let text = r#"{"findings": [
            {"type": "bug", "severity": "high", "description": "off-by-one in loop",
             "location": {"file": "src/lib.rs", "line": 42}, "confidence": 0.9}
        ]}"#;
        let findings = parse_findings(text);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].finding_type, FindingType::Bug);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].location.as_ref().unwrap().line, 42);
    }

    #[test]
    fn test_parse_findings_degrades_to_raw_text() {
        let findings = parse_findings("I could not find anything structured.");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].finding_type, FindingType::Other);
        assert!(findings[0].description.contains("structured"));
    }

    #[test]
    fn test_parse_findings_tolerates_unknown_enums() {
        let text = r#"[{"type": "weirdness", "severity": "catastrophic", "description": "d"}]"#;
        let findings = parse_findings(text);
        assert_eq!(findings[0].finding_type, FindingType::Other);
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn test_parse_hypotheses_json() {
        let text = r#"{"hypotheses": [
            {"statement": "cache invalidation lags", "confidence": 0.7},
            {"statement": "clock skew between services"}
        ]}"#;
        let hs = parse_hypotheses(text, 6);
        assert_eq!(hs.len(), 2);
        assert_eq!(hs[0].id, "h1");
        assert_eq!(hs[0].confidence.as_f64(), 0.7);
        assert_eq!(hs[1].status, HypothesisStatus::Pending);
    }

    #[test]
    fn test_parse_hypotheses_bullets() {
        let text = "Possible causes:\n- connection pool exhaustion under load\n- stale DNS entries in the sidecar\n";
        let hs = parse_hypotheses(text, 6);
        assert_eq!(hs.len(), 2);
        assert!(hs[0].statement.contains("connection pool"));
    }

    #[test]
    fn test_parse_hypotheses_caps_at_max() {
        let text = r#"["a very long hypothesis one", "a very long hypothesis two", "a very long hypothesis three"]"#;
        let hs = parse_hypotheses(text, 2);
        assert_eq!(hs.len(), 2);
    }

    #[test]
    fn test_parse_hypotheses_raw_fallback() {
        let hs = parse_hypotheses("no list here", 6);
        assert_eq!(hs.len(), 1);
        assert_eq!(hs[0].statement, "no list here");
    }

    #[test]
    fn test_parse_pair_verdict() {
        let v = parse_pair_verdict(r#"{"winner": "B", "confidence": 0.85, "rationale": "matches logs"}"#).unwrap();
        assert_eq!(v.winner, PairWinner::Second);
        assert_eq!(v.confidence.as_f64(), 0.85);

        assert!(parse_pair_verdict("no structure at all").is_none());
    }

    #[test]
    fn test_parse_test_verdict_json_and_fallback() {
        let (verdict, evidence, _) = parse_test_verdict(
            r#"{"verdict": "refuted", "evidence": ["counter trace"], "counter_examples": ["x=0"]}"#,
        );
        assert_eq!(verdict, TestVerdict::Refuted);
        assert_eq!(evidence, vec!["counter trace"]);

        let (verdict, _, _) = parse_test_verdict("The hypothesis is supported by the call graph.");
        assert_eq!(verdict, TestVerdict::Supported);
    }

    #[test]
    fn test_parse_trace_steps() {
        let text = r#"{"steps": [
            {"location": {"file": "a.rs", "line": 3}, "operation": "read config", "data_flow": "env -> Config"},
            {"operation": "spawn worker"}
        ]}"#;
        let steps = parse_trace_steps(text);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].location.as_ref().unwrap().file, "a.rs");
        assert!(steps[1].location.is_none());
    }
}
