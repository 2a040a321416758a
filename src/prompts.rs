//! Prompt construction for the deep reasoner.
//!
//! Each builder renders the caller's context into one self-contained
//! prompt string and pins the response shape the tolerant parsers in
//! [`crate::parse`] expect. Prompts always restate what the primary
//! caller already tried so the reasoner does not repeat that work.

use crate::params::{ImpactType, TournamentConfig};
use crate::types::{AnalysisContext, AnalysisType, CodeLocation, Hypothesis, SummaryFormat, Turn, TurnRole};
use std::fmt::Write as _;

/// File content bundled into a prompt.
pub struct FileBundle<'a> {
    pub path: &'a str,
    pub content: &'a str,
}

fn push_files(out: &mut String, files: &[FileBundle<'_>]) {
    for f in files {
        let _ = write!(
            out,
            "\n--- BEGIN FILE {} ---\n{}\n--- END FILE {} ---\n",
            f.path, f.content, f.path
        );
    }
}

/// Renders the shared context block: attempts, findings, stuck points.
fn push_context(out: &mut String, ctx: &AnalysisContext) {
    out.push_str("\n## What the calling assistant already tried\n");
    if ctx.attempted_approaches.is_empty() {
        out.push_str("(nothing recorded)\n");
    }
    for a in &ctx.attempted_approaches {
        let _ = writeln!(out, "- {a}");
    }

    if !ctx.partial_findings.is_empty() {
        out.push_str("\n## Partial findings so far\n");
        for f in &ctx.partial_findings {
            let _ = writeln!(out, "- [{:?}/{:?}] {}", f.finding_type, f.severity, f.description);
        }
    }

    out.push_str("\n## Where it is stuck\n");
    for s in &ctx.stuck_points {
        let _ = writeln!(out, "- {s}");
    }
}

const SHAPE_FINDINGS: &str = r#"
Respond with a single JSON object:
{"findings": [{"type": "bug|performance|security|architecture|quality|other",
  "severity": "low|medium|high|critical",
  "location": {"file": "...", "line": 1},
  "description": "...", "evidence": ["..."], "confidence": 0.0}],
 "recommendations": ["..."]}
"#;

/// General escalation: reason deeply about the stuck point.
#[must_use]
pub fn escalate(
    ctx: &AnalysisContext,
    analysis_type: AnalysisType,
    depth_level: u8,
    files: &[FileBundle<'_>],
) -> String {
    let mut out = format!(
        "You are a deep code reasoning engine. A coding assistant is stuck and \
         has escalated to you. Perform a {analysis_type} analysis at depth {depth_level}/5. \
         Do not repeat the approaches already tried; go deeper.\n"
    );
    push_context(&mut out, ctx);
    push_files(&mut out, files);
    out.push_str(SHAPE_FINDINGS);
    out
}

/// Execution trace from one entry point.
#[must_use]
pub fn trace_execution(
    entry: &CodeLocation,
    max_depth: u8,
    include_data_flow: bool,
    files: &[FileBundle<'_>],
) -> String {
    let mut out = format!(
        "Trace execution starting at {}:{}{} to a maximum call depth of {max_depth}.\n",
        entry.file,
        entry.line,
        entry
            .function_name
            .as_deref()
            .map(|f| format!(" (function {f})"))
            .unwrap_or_default(),
    );
    if include_data_flow {
        out.push_str("Track how data is transformed along the path.\n");
    }
    push_files(&mut out, files);
    out.push_str(
        r#"
Respond with a single JSON object:
{"steps": [{"location": {"file": "...", "line": 1}, "operation": "...", "data_flow": "..."}]}
Steps must be in execution order.
"#,
    );
    out
}

/// Test one hypothesis against the code.
#[must_use]
pub fn hypothesis_test(hypothesis: &str, test_approach: &str, files: &[FileBundle<'_>]) -> String {
    let mut out = format!(
        "Evaluate this hypothesis against the code below.\n\nHypothesis: {hypothesis}\n\
         Suggested test approach: {test_approach}\n"
    );
    push_files(&mut out, files);
    out.push_str(
        r#"
Respond with a single JSON object:
{"verdict": "supported|refuted|inconclusive", "evidence": ["..."], "counter_examples": ["..."]}
"#,
    );
    out
}

/// Cross-system impact of a proposed change.
#[must_use]
pub fn cross_system_impact(
    service_names: &[String],
    impact_types: &[ImpactType],
    files: &[FileBundle<'_>],
) -> String {
    let kinds: Vec<String> = impact_types
        .iter()
        .map(|t| format!("{t:?}").to_lowercase())
        .collect();
    let mut out = format!(
        "Assess the impact of changing the files below across service boundaries. \
         Impact dimensions to assess: {}.\n",
        kinds.join(", ")
    );
    if !service_names.is_empty() {
        let _ = writeln!(out, "Known services involved: {}.", service_names.join(", "));
    }
    push_files(&mut out, files);
    out.push_str(
        r#"
Respond with a single JSON object keyed by impact type:
{"breaking": [{"component": "...", "description": "...", "severity": "low|medium|high|critical"}],
 "performance": [...], "behavioral": [...]}
Include only the requested impact types.
"#,
    );
    out
}

/// Ranked performance bottleneck analysis.
#[must_use]
pub fn performance_bottleneck(
    entry: &CodeLocation,
    suspected: &[String],
    profile_depth: &str,
    files: &[FileBundle<'_>],
) -> String {
    let mut out = format!(
        "Find performance bottlenecks reachable from {}:{} ({} profiling).\n",
        entry.file, entry.line, profile_depth
    );
    if !suspected.is_empty() {
        out.push_str("The caller suspects:\n");
        for s in suspected {
            let _ = writeln!(out, "- {s}");
        }
    }
    push_files(&mut out, files);
    out.push_str(
        r#"
Respond with a single JSON object:
{"bottlenecks": [{"rank": 1, "location": {"file": "...", "line": 1},
  "explanation": "...", "estimated_impact": "...", "suggestion": "..."}]}
Rank 1 is the most severe.
"#,
    );
    out
}

/// First turn of a conversational analysis.
#[must_use]
pub fn conversation_opening(
    ctx: &AnalysisContext,
    analysis_type: AnalysisType,
    initial_question: Option<&str>,
) -> String {
    let mut out = format!(
        "You are in a multi-turn deep {analysis_type} analysis with a coding assistant. \
         Engage with the problem; ask for specific files or data when you need them.\n"
    );
    push_context(&mut out, ctx);
    let _ = writeln!(
        out,
        "\nFiles in scope: {}",
        ctx.focus_area.files.join(", ")
    );
    if let Some(q) = initial_question {
        let _ = write!(out, "\nOpening question: {q}\n");
    }
    out
}

/// Renders the transcript plus the newest caller message.
#[must_use]
pub fn conversation_turn(turns: &[Turn], message: &str) -> String {
    let mut out = String::from("Conversation so far:\n");
    for turn in turns {
        let who = match turn.role {
            TurnRole::Caller => "ASSISTANT",
            TurnRole::Reasoner => "YOU",
        };
        let _ = write!(out, "\n[{who}]\n{}\n", turn.content);
        for snippet in &turn.code_snippets {
            let _ = write!(
                out,
                "\n--- BEGIN FILE {} ---\n{}\n--- END FILE {} ---\n",
                snippet.file, snippet.excerpt, snippet.file
            );
        }
    }
    let _ = write!(out, "\n[ASSISTANT]\n{message}\n\nRespond to the latest message.");
    out
}

/// Final synthesis of a conversation.
#[must_use]
pub fn finalize(turns: &[Turn], format: SummaryFormat) -> String {
    let style = match format {
        SummaryFormat::Concise => "a short summary (a few sentences)",
        SummaryFormat::Detailed => "a thorough summary covering every thread discussed",
        SummaryFormat::Actionable => "an action-oriented summary: what to change, in what order",
    };
    let mut out = format!(
        "The analysis conversation below is ending. Synthesize {style}.\n"
    );
    out.push_str(&conversation_turn(turns, "(finalize)"));
    out.push_str(
        r#"
Respond with a single JSON object:
{"summary": "...", "findings": [{"type": "...", "severity": "...", "description": "..."}],
 "recommendations": ["..."]}
"#,
    );
    out
}

/// Tournament round 0: generate candidate hypotheses.
#[must_use]
pub fn tournament_generation(
    issue: &str,
    ctx: &AnalysisContext,
    config: &TournamentConfig,
) -> String {
    let mut out = format!(
        "Generate exactly {} distinct, testable hypotheses explaining this issue:\n\n{issue}\n",
        config.max_hypotheses
    );
    push_context(&mut out, ctx);
    out.push_str(
        r#"
Respond with a single JSON object:
{"hypotheses": [{"statement": "...", "supporting_evidence": ["..."], "confidence": 0.0}]}
Hypotheses must be mutually distinguishable; avoid restating the same cause twice.
"#,
    );
    out
}

/// One pairwise elimination test.
#[must_use]
pub fn tournament_pair_test(
    issue: &str,
    first: &Hypothesis,
    second: &Hypothesis,
    files: &[FileBundle<'_>],
) -> String {
    let mut out = format!(
        "Two hypotheses compete to explain this issue:\n\n{issue}\n\n\
         Hypothesis A: {}\nHypothesis B: {}\n\n\
         Judge which better explains the evidence in the code below.\n",
        first.statement, second.statement
    );
    push_files(&mut out, files);
    out.push_str(
        r#"
Respond with a single JSON object:
{"winner": "A" | "B", "confidence": 0.0, "rationale": "..."}
"#,
    );
    out
}

/// Closing synthesis over the surviving hypotheses.
#[must_use]
pub fn tournament_synthesis(issue: &str, survivors: &[Hypothesis]) -> String {
    let mut out = format!(
        "A hypothesis tournament for the issue below has finished.\n\nIssue: {issue}\n\nSurvivors, best first:\n"
    );
    for (i, h) in survivors.iter().enumerate() {
        let _ = writeln!(out, "{}. {} (confidence {})", i + 1, h.statement, h.confidence);
    }
    out.push_str(
        r#"
Respond with a single JSON object:
{"rationale": "why the leader won", "recommendations": ["next steps to confirm and fix"]}
"#,
    );
    out
}
