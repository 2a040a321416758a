//! Single-shot analysis tools.
//!
//! Each tool is: validate -> read in-scope files -> one orchestrated
//! provider call under a deadline -> tolerant result shaping. None of
//! them create sessions.

use crate::error::Result;
use crate::params::{
    CrossSystemRequest, EscalateRequest, HypothesisTestRequest, ImpactType, PerformanceRequest,
    TraceRequest,
};
use crate::parse::{self, TestVerdict, TraceStep};
use crate::prompts::{self, FileBundle};
use crate::providers::GenerateOptions;
use crate::types::{CodeLocation, Confidence, Finding, Severity};
use crate::Services;
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Output of `escalate_analysis`.
#[derive(Debug, Serialize, JsonSchema)]
pub struct EscalateOutput {
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
    pub confidence: Confidence,
    /// Which provider served the call (telemetry).
    pub provider_used: String,
}

/// Output of `trace_execution_path`.
#[derive(Debug, Serialize, JsonSchema)]
pub struct TraceOutput {
    pub entry_point: CodeLocation,
    pub steps: Vec<TraceStep>,
    pub provider_used: String,
}

/// Output of `hypothesis_test`.
#[derive(Debug, Serialize, JsonSchema)]
pub struct HypothesisTestOutput {
    pub verdict: TestVerdict,
    pub evidence: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub counter_examples: Vec<String>,
    pub provider_used: String,
}

/// One entry in the cross-system impact matrix.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ImpactEntry {
    pub component: String,
    pub description: String,
    pub severity: Severity,
}

/// Output of `cross_system_impact`: a matrix keyed by impact type.
#[derive(Debug, Serialize, JsonSchema)]
pub struct CrossSystemOutput {
    pub impacts: BTreeMap<String, Vec<ImpactEntry>>,
    pub provider_used: String,
}

/// One ranked bottleneck.
#[derive(Debug, Serialize, JsonSchema)]
pub struct Bottleneck {
    pub rank: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<CodeLocation>,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Output of `performance_bottleneck`.
#[derive(Debug, Serialize, JsonSchema)]
pub struct PerformanceOutput {
    pub bottlenecks: Vec<Bottleneck>,
    pub provider_used: String,
}

/// Validates and reads every file in scope, returning owned bundles.
fn read_scope(svc: &Services, files: &[String]) -> Result<Vec<(String, String)>> {
    svc.reader
        .validate_all(files.iter().map(String::as_str))?;
    files
        .iter()
        .map(|f| Ok((f.clone(), svc.reader.read(f)?)))
        .collect()
}

fn bundles(owned: &[(String, String)]) -> Vec<FileBundle<'_>> {
    owned
        .iter()
        .map(|(path, content)| FileBundle {
            path,
            content,
        })
        .collect()
}

/// The general-purpose "reason deeply about this" tool.
pub async fn escalate_analysis(svc: &Services, req: EscalateRequest) -> Result<EscalateOutput> {
    let owned = read_scope(svc, &req.context.focus_area.files)?;
    let prompt = prompts::escalate(
        &req.context,
        req.analysis_type,
        req.depth_level,
        &bundles(&owned),
    );

    let deadline = Duration::from_secs(req.context.analysis_budget_secs.max(1));
    let outcome = svc
        .orchestrator
        .call(&prompt, &GenerateOptions::default(), deadline)
        .await?;

    let findings = parse::parse_findings(&outcome.generation.text);
    let recommendations = parse::parse_recommendations(&outcome.generation.text);
    let confidence = aggregate_confidence(&findings);

    Ok(EscalateOutput {
        findings,
        recommendations,
        confidence,
        provider_used: outcome.provider,
    })
}

/// Traces execution from one entry point.
pub async fn trace_execution_path(svc: &Services, req: TraceRequest) -> Result<TraceOutput> {
    let owned = read_scope(svc, std::slice::from_ref(&req.entry_point.file))?;
    let prompt = prompts::trace_execution(
        &req.entry_point,
        req.max_depth,
        req.include_data_flow,
        &bundles(&owned),
    );

    let outcome = svc
        .orchestrator
        .call(
            &prompt,
            &GenerateOptions::default(),
            svc.config.defaults.call_timeout,
        )
        .await?;

    Ok(TraceOutput {
        entry_point: req.entry_point,
        steps: parse::parse_trace_steps(&outcome.generation.text),
        provider_used: outcome.provider,
    })
}

/// Tests one hypothesis against the code in scope.
pub async fn hypothesis_test(
    svc: &Services,
    req: HypothesisTestRequest,
) -> Result<HypothesisTestOutput> {
    let owned = read_scope(svc, &req.code_scope.files)?;
    let prompt = prompts::hypothesis_test(&req.hypothesis, &req.test_approach, &bundles(&owned));

    let outcome = svc
        .orchestrator
        .call(
            &prompt,
            &GenerateOptions::default(),
            svc.config.defaults.call_timeout,
        )
        .await?;

    let (verdict, evidence, counter_examples) =
        parse::parse_test_verdict(&outcome.generation.text);
    Ok(HypothesisTestOutput {
        verdict,
        evidence,
        counter_examples,
        provider_used: outcome.provider,
    })
}

/// Assesses change impact across service boundaries.
pub async fn cross_system_impact(
    svc: &Services,
    req: CrossSystemRequest,
) -> Result<CrossSystemOutput> {
    let owned = read_scope(svc, &req.change_scope.files)?;
    let prompt = prompts::cross_system_impact(
        &req.change_scope.service_names,
        &req.impact_types,
        &bundles(&owned),
    );

    let outcome = svc
        .orchestrator
        .call(
            &prompt,
            &GenerateOptions::default(),
            svc.config.defaults.call_timeout,
        )
        .await?;

    Ok(CrossSystemOutput {
        impacts: parse_impact_matrix(&outcome.generation.text, &req.impact_types),
        provider_used: outcome.provider,
    })
}

/// Ranks performance bottlenecks along a code path.
pub async fn performance_bottleneck(
    svc: &Services,
    req: PerformanceRequest,
) -> Result<PerformanceOutput> {
    let owned = read_scope(svc, std::slice::from_ref(&req.code_path.entry_point.file))?;
    let depth = format!("{:?}", req.profile_depth).to_lowercase();
    let prompt = prompts::performance_bottleneck(
        &req.code_path.entry_point,
        &req.code_path.suspected_issues,
        &depth,
        &bundles(&owned),
    );

    let outcome = svc
        .orchestrator
        .call(
            &prompt,
            &GenerateOptions::default(),
            svc.config.defaults.call_timeout,
        )
        .await?;

    Ok(PerformanceOutput {
        bottlenecks: parse_bottlenecks(&outcome.generation.text),
        provider_used: outcome.provider,
    })
}

// ─── Result shaping helpers ──────────────────────────────────────────────────

fn aggregate_confidence(findings: &[Finding]) -> Confidence {
    let values: Vec<f64> = findings
        .iter()
        .filter_map(|f| f.confidence.map(Confidence::as_f64))
        .collect();
    if values.is_empty() {
        return Confidence::default();
    }
    Confidence::new(values.iter().sum::<f64>() / values.len() as f64)
}

/// Parses the per-impact-type matrix, dropping kinds the caller did not
/// request and tolerating missing keys.
fn parse_impact_matrix(
    text: &str,
    requested: &[ImpactType],
) -> BTreeMap<String, Vec<ImpactEntry>> {
    let mut matrix = BTreeMap::new();
    let parsed = parse::extract_json(text);

    for kind in requested {
        let key = format!("{kind:?}").to_lowercase();
        let entries = parsed
            .as_ref()
            .and_then(|v| v.get(&key).or_else(|| v.get("impacts").and_then(|i| i.get(&key))))
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(coerce_impact).collect())
            .unwrap_or_default();
        matrix.insert(key, entries);
    }

    // Nothing structured at all: surface the raw text under the first
    // requested kind so the caller still sees the answer.
    if matrix.values().all(Vec::is_empty) {
        if let (Some(kind), false) = (requested.first(), text.trim().is_empty()) {
            let key = format!("{kind:?}").to_lowercase();
            matrix.insert(
                key,
                vec![ImpactEntry {
                    component: "unstructured".into(),
                    description: text.trim().to_string(),
                    severity: Severity::Low,
                }],
            );
        }
    }
    matrix
}

fn coerce_impact(value: &Value) -> Option<ImpactEntry> {
    let obj = value.as_object()?;
    let component = obj
        .get("component")
        .or_else(|| obj.get("service"))
        .or_else(|| obj.get("file"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let description = obj
        .get("description")
        .or_else(|| obj.get("impact"))
        .and_then(Value::as_str)?
        .to_string();
    let severity = obj
        .get("severity")
        .and_then(Value::as_str)
        .and_then(|s| match s.to_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        })
        .unwrap_or(Severity::Medium);
    Some(ImpactEntry {
        component,
        description,
        severity,
    })
}

fn parse_bottlenecks(text: &str) -> Vec<Bottleneck> {
    if let Some(value) = parse::extract_json(text) {
        let items = match &value {
            Value::Array(items) => Some(items.clone()),
            Value::Object(map) => map.get("bottlenecks").and_then(Value::as_array).cloned(),
            _ => None,
        };
        if let Some(items) = items {
            let mut parsed: Vec<Bottleneck> = items
                .iter()
                .enumerate()
                .filter_map(|(i, v)| {
                    let obj = v.as_object()?;
                    Some(Bottleneck {
                        rank: obj
                            .get("rank")
                            .and_then(Value::as_u64)
                            .map_or(i as u32 + 1, |r| r as u32),
                        location: obj
                            .get("location")
                            .and_then(|l| serde_json::from_value(l.clone()).ok()),
                        explanation: obj
                            .get("explanation")
                            .or_else(|| obj.get("description"))
                            .and_then(Value::as_str)?
                            .to_string(),
                        suggestion: obj
                            .get("suggestion")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    })
                })
                .collect();
            if !parsed.is_empty() {
                parsed.sort_by_key(|b| b.rank);
                return parsed;
            }
        }
    }

    vec![Bottleneck {
        rank: 1,
        location: None,
        explanation: text.trim().to_string(),
        suggestion: None,
    }]
}
