//! Conversational analysis runtime: start / continue / finalize / status.
//!
//! Every mutating operation runs under the session's FIFO lock, so
//! overlapping calls on one session are serialized in arrival order. The
//! lock guard releases on drop — provider failures and panics alike leave
//! the lock free and the session intact (except finalize, which destroys
//! the session before its guard drops).

use crate::error::{Result, ServerError};
use crate::parse;
use crate::prompts;
use crate::providers::GenerateOptions;
use crate::security::FileReader;
use crate::types::{
    Budget, CodeSnippet, FinalReport, Finding, SessionStatus, SummaryFormat, Turn,
};
use crate::Services;
use schemars::JsonSchema;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

/// Result of `start_conversation`.
#[derive(Debug, Serialize, JsonSchema)]
pub struct StartOutput {
    pub session_id: String,
    /// First reasoner response.
    pub reply: String,
    pub turn_count: usize,
}

/// Result of `continue_conversation`.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ContinueOutput {
    pub session_id: String,
    pub reply: String,
    pub turn_count: usize,
    pub budget_remaining: Budget,
}

/// Result of `finalize_conversation`.
#[derive(Debug, Serialize, JsonSchema)]
pub struct FinalizeOutput {
    pub session_id: String,
    #[serde(flatten)]
    pub report: FinalReport,
}

/// Starts a session: validate, mint, seed the transcript, prime with one
/// provider call.
pub async fn start_conversation(
    svc: &Services,
    req: crate::params::StartConversationRequest,
) -> Result<StartOutput> {
    svc.reader
        .validate_all(req.context.focus_area.files.iter().map(String::as_str))?;

    let budget = Budget {
        wall_clock_secs: svc.config.defaults.session_wall_clock.as_secs(),
        provider_calls: svc.config.defaults.session_provider_calls,
    };
    let opening = prompts::conversation_opening(
        &req.context,
        req.analysis_type,
        req.initial_question.as_deref(),
    );
    let session_id = svc
        .store
        .create(req.analysis_type, req.context.clone(), budget);

    // Nobody else knows this id yet, but taking the lock keeps the
    // invariant uniform: every mutation happens under the session lock.
    let _guard = svc.locks.acquire(&session_id).await;

    svc.store.append_turn(&session_id, Turn::caller(&opening))?;
    svc.store
        .set_status(&session_id, SessionStatus::Processing)?;

    let started = Instant::now();
    let outcome = svc
        .orchestrator
        .call(
            &opening,
            &GenerateOptions::default(),
            svc.config.defaults.call_timeout,
        )
        .await;

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            // Priming failed: the empty session is useless, drop it.
            svc.store.remove(&session_id);
            return Err(e);
        }
    };

    svc.store
        .record_provider_call(&session_id, &outcome.provider, started.elapsed().as_secs())?;
    let turn_count = svc
        .store
        .append_turn(&session_id, Turn::reasoner(&outcome.generation.text))?;
    svc.store
        .set_status(&session_id, SessionStatus::Active)?;

    Ok(StartOutput {
        session_id,
        reply: outcome.generation.text,
        turn_count,
    })
}

/// Continues a session with one caller message.
pub async fn continue_conversation(
    svc: &Services,
    req: crate::params::ContinueConversationRequest,
) -> Result<ContinueOutput> {
    let _guard = svc.locks.acquire(&req.session_id).await;

    let session = svc.store.snapshot(&req.session_id)?;
    check_resumable(&session)?;
    if session.budget.wall_clock_secs == 0 {
        return Err(ServerError::BudgetExhausted {
            what: "session wall-clock budget".into(),
        });
    }
    if session.budget.provider_calls == 0 {
        return Err(ServerError::BudgetExhausted {
            what: "session provider-call budget".into(),
        });
    }

    let snippets = if req.include_code_snippets {
        extract_snippets(&svc.reader, &session.context.focus_area.files, &req.message)
    } else {
        Vec::new()
    };

    // Render against the transcript as it stood before this message.
    let prompt = prompts::conversation_turn(&session.turns, &req.message);

    let mut caller_turn = Turn::caller(&req.message);
    caller_turn.code_snippets = snippets;
    svc.store.append_turn(&req.session_id, caller_turn)?;
    svc.store
        .set_status(&req.session_id, SessionStatus::Processing)?;

    let started = Instant::now();
    let outcome = svc
        .orchestrator
        .call(
            &prompt,
            &GenerateOptions::default(),
            svc.config.defaults.call_timeout,
        )
        .await;

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            // Session survives a failed turn; the caller may retry.
            svc.store
                .set_status(&req.session_id, SessionStatus::Active)?;
            return Err(e);
        }
    };

    // The budget can still run dry here if this very call was the last
    // one; the session must not be left stuck in Processing.
    if let Err(e) = svc.store.record_provider_call(
        &req.session_id,
        &outcome.provider,
        started.elapsed().as_secs(),
    ) {
        svc.store
            .set_status(&req.session_id, SessionStatus::Active)?;
        return Err(e);
    }
    let turn_count = svc
        .store
        .append_turn(&req.session_id, Turn::reasoner(&outcome.generation.text))?;
    svc.store
        .set_status(&req.session_id, SessionStatus::Active)?;

    let view = svc.store.status_view(&req.session_id)?;
    Ok(ContinueOutput {
        session_id: req.session_id,
        reply: outcome.generation.text,
        turn_count,
        budget_remaining: view.budget_remaining,
    })
}

/// Finalizes a session: one synthesis call, then destruction.
pub async fn finalize_conversation(
    svc: &Services,
    req: crate::params::FinalizeConversationRequest,
) -> Result<FinalizeOutput> {
    let _guard = svc.locks.acquire(&req.session_id).await;

    let session = svc.store.snapshot(&req.session_id)?;
    check_resumable(&session)?;
    svc.store
        .set_status(&req.session_id, SessionStatus::Finalizing)?;

    let prompt = prompts::finalize(&session.turns, req.summary_format);
    let outcome = svc
        .orchestrator
        .call(
            &prompt,
            &GenerateOptions::default(),
            svc.config.defaults.call_timeout,
        )
        .await;

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            // Leave the session resumable so the caller can retry finalize.
            svc.store
                .set_status(&req.session_id, SessionStatus::Active)?;
            return Err(e);
        }
    };

    let report = shape_report(&outcome.generation.text, req.summary_format);

    // Destroy before the lock releases: a queued waiter must observe
    // SessionNotFound, never a half-finalized session.
    svc.store.remove(&req.session_id);

    Ok(FinalizeOutput {
        session_id: req.session_id,
        report,
    })
}

/// Read-only status lookup.
pub fn conversation_status(svc: &Services, session_id: &str) -> Result<crate::session::StatusView> {
    svc.store.status_view(session_id)
}

fn check_resumable(session: &crate::session::Session) -> Result<()> {
    match session.status {
        SessionStatus::Finalizing | SessionStatus::Completed => {
            Err(ServerError::SessionFinalized {
                session_id: session.id.clone(),
            })
        }
        SessionStatus::Abandoned => Err(ServerError::SessionNotFound {
            session_id: session.id.clone(),
        }),
        _ => Ok(()),
    }
}

/// Attaches excerpts for in-scope files the message mentions. A
/// `name:line` mention centers the excerpt on that line; otherwise the
/// head of the file is attached.
fn extract_snippets(reader: &FileReader, files: &[String], message: &str) -> Vec<CodeSnippet> {
    static LINE_REF: OnceLock<regex::Regex> = OnceLock::new();
    let line_ref = LINE_REF
        .get_or_init(|| regex::Regex::new(r"([\w./\\-]+):(\d+)").expect("static regex"));

    let mut snippets = Vec::new();
    for file in files {
        let basename = std::path::Path::new(file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(file);
        if !message.contains(basename) {
            continue;
        }

        let line = line_ref
            .captures_iter(message)
            .find(|c| c[1].ends_with(basename))
            .and_then(|c| c[2].parse::<u32>().ok());

        let excerpt = match line {
            Some(line) => reader.read_excerpt(file, line, 20),
            None => reader.read_excerpt(file, 1, 40),
        };
        match excerpt {
            Ok(excerpt) if !excerpt.is_empty() => snippets.push(CodeSnippet {
                file: file.clone(),
                excerpt,
            }),
            Ok(_) => {}
            Err(e) => tracing::debug!(file = %file, error = %e, "snippet read skipped"),
        }
    }
    snippets
}

/// Shapes the synthesis text into a report, tolerating malformed output.
fn shape_report(text: &str, format: SummaryFormat) -> FinalReport {
    let summary = parse::extract_json(text)
        .as_ref()
        .and_then(|v| v.get("summary"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| text.trim().to_string());

    let findings: Vec<Finding> = parse::parse_findings(text);
    let recommendations = parse::parse_recommendations(text);

    tracing::debug!(%format, findings = findings.len(), "conversation finalized");
    FinalReport {
        summary,
        findings,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_report_structured() {
        let text = r#"{"summary": "root cause found",
            "findings": [{"type": "bug", "severity": "high", "description": "d"}],
            "recommendations": ["fix the index"]}"#;
        let report = shape_report(text, SummaryFormat::Concise);
        assert_eq!(report.summary, "root cause found");
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.recommendations, vec!["fix the index"]);
    }

    #[test]
    fn test_shape_report_degrades_to_raw() {
        let report = shape_report("plain prose, no JSON", SummaryFormat::Detailed);
        assert_eq!(report.summary, "plain prose, no JSON");
        assert_eq!(report.findings.len(), 1); // raw-text wrapper finding
    }

    #[test]
    fn test_snippets_only_for_mentioned_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cache.rs"), "fn cache() {}\n").unwrap();
        std::fs::write(dir.path().join("other.rs"), "fn other() {}\n").unwrap();
        let reader = FileReader::new(
            dir.path().to_path_buf(),
            vec![dir.path().to_path_buf()],
            1024,
        );
        let files = vec![
            dir.path().join("cache.rs").to_string_lossy().to_string(),
            dir.path().join("other.rs").to_string_lossy().to_string(),
        ];

        let snippets = extract_snippets(&reader, &files, "look at cache.rs again");
        assert_eq!(snippets.len(), 1);
        assert!(snippets[0].file.ends_with("cache.rs"));
        assert!(snippets[0].excerpt.contains("fn cache"));
    }
}
