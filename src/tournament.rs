//! Hypothesis tournament: bracketed competitive analysis.
//!
//! One generation call produces the candidate field; hypotheses are then
//! paired into a bracket (deterministically shuffled from the tournament
//! id) and eliminated through pairwise provider calls. Pair tests within
//! a round run under a tournament-local semaphore of `parallel_sessions`
//! permits — the tournament deliberately bypasses the conversational
//! session lock, which would serialize the pool to one.
//!
//! Budgets are enforced before every scheduled call: a wall-clock
//! deadline and an atomic provider-call counter. On exhaustion the
//! bracket stops where it stands and the survivors are ranked by
//! confidence into a `partial` result.

use crate::error::Result;
use crate::params::TournamentRequest;
use crate::parse::{self, PairWinner};
use crate::prompts::{self, FileBundle};
use crate::providers::orchestrator::Orchestrator;
use crate::providers::GenerateOptions;
use crate::types::{Confidence, Hypothesis, HypothesisStatus};
use crate::Services;
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Whether the bracket reached a sole winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    Complete,
    Partial,
}

/// One decided pairing.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct PairReport {
    pub first: String,
    /// Absent for a bye.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second: Option<String>,
    pub winner: String,
    pub confidence: Confidence,
    /// True when the pair was decided by prior confidence instead of a
    /// provider verdict (failed call or spent budget).
    pub defaulted: bool,
}

/// One bracket round.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RoundReport {
    pub round: u32,
    pub pairings: Vec<PairReport>,
}

/// Final tournament result.
#[derive(Debug, Serialize, JsonSchema)]
pub struct TournamentOutput {
    pub tournament_id: String,
    pub status: TournamentStatus,
    pub winner: Option<Hypothesis>,
    pub runners_up: Vec<Hypothesis>,
    pub rounds: Vec<RoundReport>,
    pub rationale: String,
    pub recommendations: Vec<String>,
    pub provider_calls_used: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Shared wall-clock + call-count budget, checked before every call.
struct TournamentBudget {
    deadline: Instant,
    calls_remaining: AtomicI64,
    calls_total: u32,
}

impl TournamentBudget {
    fn new(wall_clock: Duration, calls: u32) -> Self {
        Self {
            deadline: Instant::now() + wall_clock,
            calls_remaining: AtomicI64::new(i64::from(calls)),
            calls_total: calls,
        }
    }

    /// Reserves one provider call; false when either budget is spent.
    fn try_spend(&self) -> bool {
        if Instant::now() >= self.deadline {
            return false;
        }
        self.calls_remaining.fetch_sub(1, Ordering::SeqCst) > 0
    }

    fn remaining_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn calls_used(&self) -> u32 {
        let remaining = self.calls_remaining.load(Ordering::SeqCst).max(0) as u32;
        self.calls_total - remaining.min(self.calls_total)
    }
}

/// Runs a full tournament for the given issue.
pub async fn run_tournament(svc: &Services, req: TournamentRequest) -> Result<TournamentOutput> {
    svc.reader
        .validate_all(req.context.focus_area.files.iter().map(String::as_str))?;

    let tournament_id = Uuid::new_v4().to_string();
    let budget = Arc::new(TournamentBudget::new(
        Duration::from_secs(req.context.analysis_budget_secs.max(1)).min(
            svc.config.defaults.tournament_wall_clock.max(Duration::from_secs(1)),
        ),
        svc.config.defaults.tournament_provider_calls,
    ));
    let mut warnings = Vec::new();

    // Generation round. Failure here is fatal for the tournament.
    budget.try_spend();
    let generation_prompt = prompts::tournament_generation(&req.issue, &req.context, &req.config);
    let outcome = svc
        .orchestrator
        .call(
            &generation_prompt,
            &GenerateOptions::default(),
            per_call_deadline(svc, &budget),
        )
        .await?;

    let mut survivors =
        parse::parse_hypotheses(&outcome.generation.text, req.config.max_hypotheses as usize);
    tracing::info!(
        tournament_id = %tournament_id,
        hypotheses = survivors.len(),
        "tournament field generated"
    );

    // Deterministic bracket order, seeded from the tournament id.
    {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed_from_id(&tournament_id));
        survivors.shuffle(&mut rng);
    }

    // Read the in-scope files once; every pair test shares the bundle.
    let mut owned_files: Vec<(String, String)> = Vec::new();
    for file in &req.context.focus_area.files {
        match svc.reader.read(file) {
            Ok(content) => owned_files.push((file.clone(), content)),
            Err(e) => {
                warnings.push(format!("skipped unreadable file {file}: {e}"));
            }
        }
    }
    let owned_files = Arc::new(owned_files);

    let mut rounds = Vec::new();
    let mut budget_truncated = false;
    let semaphore = Arc::new(Semaphore::new(req.config.parallel_sessions as usize));

    for round_index in 0..req.config.max_rounds {
        if survivors.len() <= 1 {
            break;
        }
        if budget.remaining_time().is_zero() {
            budget_truncated = true;
            warnings.push("wall-clock budget exhausted before the bracket finished".into());
            break;
        }

        let (round_report, next_round, truncated) = run_round(
            svc,
            round_index as u32 + 1,
            std::mem::take(&mut survivors),
            &req.issue,
            Arc::clone(&owned_files),
            Arc::clone(&budget),
            Arc::clone(&semaphore),
            &mut warnings,
        )
        .await;

        survivors = next_round;
        rounds.push(round_report);
        if truncated {
            budget_truncated = true;
            break;
        }
    }

    // Rank survivors; co-winners are ordered by confidence.
    survivors.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for (i, h) in survivors.iter_mut().enumerate() {
        h.status = if i == 0 {
            HypothesisStatus::Winner
        } else {
            HypothesisStatus::Tested
        };
    }

    let status = if survivors.len() == 1 && !budget_truncated {
        TournamentStatus::Complete
    } else {
        TournamentStatus::Partial
    };

    // Synthesis call, skipped when the budget is gone.
    let (rationale, recommendations) = if budget.try_spend() {
        let prompt = prompts::tournament_synthesis(&req.issue, &survivors);
        match svc
            .orchestrator
            .call(
                &prompt,
                &GenerateOptions::default(),
                per_call_deadline(svc, &budget),
            )
            .await
        {
            Ok(outcome) => shape_synthesis(&outcome.generation.text),
            Err(e) => {
                warnings.push(format!("synthesis call failed: {e}"));
                (String::new(), Vec::new())
            }
        }
    } else {
        warnings.push("budget exhausted before synthesis".into());
        (String::new(), Vec::new())
    };

    let mut survivors = survivors.into_iter();
    Ok(TournamentOutput {
        tournament_id,
        status,
        winner: survivors.next(),
        runners_up: survivors.collect(),
        rounds,
        rationale,
        recommendations,
        provider_calls_used: budget.calls_used(),
        warnings,
    })
}

/// Runs one bracket round with bounded parallelism. Returns the report,
/// the surviving hypotheses, and whether the budget truncated the round.
#[allow(clippy::too_many_arguments)]
async fn run_round(
    svc: &Services,
    round: u32,
    field: Vec<Hypothesis>,
    issue: &str,
    files: Arc<Vec<(String, String)>>,
    budget: Arc<TournamentBudget>,
    semaphore: Arc<Semaphore>,
    warnings: &mut Vec<String>,
) -> (RoundReport, Vec<Hypothesis>, bool) {
    let (pairs, bye) = pair_up(field);
    let mut truncated = false;
    let mut tasks: JoinSet<(usize, Option<parse::PairVerdict>)> = JoinSet::new();
    let mut reports: Vec<Option<PairReport>> = vec![None; pairs.len()];
    let mut scheduled = Vec::new();

    for (index, (first, second)) in pairs.iter().enumerate() {
        if !budget.try_spend() {
            // Budget exhausted before this pair could be scheduled: the
            // pair stays undecided and both hypotheses survive as
            // co-winner candidates.
            truncated = true;
            continue;
        }
        scheduled.push(index);

        let orchestrator = Arc::clone(&svc.orchestrator);
        let semaphore = Arc::clone(&semaphore);
        let budget = Arc::clone(&budget);
        let files = Arc::clone(&files);
        let issue = issue.to_string();
        let first = first.clone();
        let second = second.clone();
        let call_timeout = svc.config.defaults.call_timeout;

        tasks.spawn(async move {
            let _permit = semaphore.acquire().await;
            let verdict = run_pair_test(
                &orchestrator,
                &issue,
                &first,
                &second,
                &files,
                budget.remaining_time().min(call_timeout),
            )
            .await;
            (index, verdict)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Some(verdict))) => {
                let (first, second) = &pairs[index];
                let winner = match verdict.winner {
                    PairWinner::First => first,
                    PairWinner::Second => second,
                };
                reports[index] = Some(PairReport {
                    first: first.id.clone(),
                    second: Some(second.id.clone()),
                    winner: winner.id.clone(),
                    confidence: verdict.confidence,
                    defaulted: false,
                });
            }
            Ok((index, None)) => {
                let (first, second) = &pairs[index];
                reports[index] = Some(default_pair(
                    first,
                    second,
                    "pair test failed or unparseable",
                    warnings,
                ));
            }
            Err(join_err) => {
                // A panicked pair task loses nothing but its own pair; the
                // index is unknown, so resolve any still-empty slot later.
                warnings.push(format!("pair test task failed: {join_err}"));
            }
        }
    }

    // Slots left empty by panicked tasks default by prior confidence.
    for (index, slot) in reports.iter_mut().enumerate() {
        if slot.is_none() && scheduled.contains(&index) {
            let (first, second) = &pairs[index];
            *slot = Some(default_pair(first, second, "pair task panicked", warnings));
        }
    }

    // Assemble survivors and the report. Pairs without a report were
    // never scheduled (budget); both sides advance undecided.
    let mut survivors = Vec::new();
    let mut pairings = Vec::new();
    for (index, (first, second)) in pairs.into_iter().enumerate() {
        let Some(report) = reports[index].take() else {
            survivors.push(first);
            survivors.push(second);
            continue;
        };
        let (mut winner, mut loser) = if report.winner == first.id {
            (first, second)
        } else {
            (second, first)
        };
        winner.status = HypothesisStatus::Tested;
        if report.confidence > winner.confidence {
            winner.confidence = report.confidence;
        }
        loser.status = HypothesisStatus::Eliminated;
        survivors.push(winner);
        pairings.push(report);
    }

    if let Some(mut bye) = bye {
        bye.status = HypothesisStatus::Tested;
        pairings.push(PairReport {
            first: bye.id.clone(),
            second: None,
            winner: bye.id.clone(),
            confidence: bye.confidence,
            defaulted: false,
        });
        survivors.push(bye);
    }

    (RoundReport { round, pairings }, survivors, truncated)
}

async fn run_pair_test(
    orchestrator: &Orchestrator,
    issue: &str,
    first: &Hypothesis,
    second: &Hypothesis,
    files: &[(String, String)],
    deadline: Duration,
) -> Option<parse::PairVerdict> {
    let bundles: Vec<FileBundle<'_>> = files
        .iter()
        .map(|(path, content)| FileBundle { path, content })
        .collect();
    let prompt = prompts::tournament_pair_test(issue, first, second, &bundles);

    match orchestrator
        .call(&prompt, &GenerateOptions::default(), deadline.max(Duration::from_millis(1)))
        .await
    {
        Ok(outcome) => parse::parse_pair_verdict(&outcome.generation.text),
        Err(e) => {
            tracing::warn!(error = %e, "pair test call failed");
            None
        }
    }
}

/// Resolves a pair without a verdict: higher prior confidence wins.
fn default_pair(
    first: &Hypothesis,
    second: &Hypothesis,
    reason: &str,
    warnings: &mut Vec<String>,
) -> PairReport {
    let winner = if second.confidence > first.confidence {
        second
    } else {
        first
    };
    warnings.push(format!(
        "pair {} vs {} defaulted to {} ({reason})",
        first.id, second.id, winner.id
    ));
    PairReport {
        first: first.id.clone(),
        second: Some(second.id.clone()),
        winner: winner.id.clone(),
        confidence: winner.confidence,
        defaulted: true,
    }
}

/// Splits the field into pairs; an odd field yields one bye.
fn pair_up(mut field: Vec<Hypothesis>) -> (Vec<(Hypothesis, Hypothesis)>, Option<Hypothesis>) {
    let bye = if field.len() % 2 == 1 { field.pop() } else { None };
    let mut pairs = Vec::with_capacity(field.len() / 2);
    let mut iter = field.into_iter();
    while let (Some(a), Some(b)) = (iter.next(), iter.next()) {
        pairs.push((a, b));
    }
    (pairs, bye)
}

fn seed_from_id(id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

fn per_call_deadline(svc: &Services, budget: &TournamentBudget) -> Duration {
    budget
        .remaining_time()
        .min(svc.config.defaults.call_timeout)
        .max(Duration::from_millis(1))
}

fn shape_synthesis(text: &str) -> (String, Vec<String>) {
    let parsed = parse::extract_json(text);
    let rationale = parsed
        .as_ref()
        .and_then(|v| v.get("rationale"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| text.trim().to_string());
    let recommendations = parse::parse_recommendations(text);
    (rationale, recommendations)
}
