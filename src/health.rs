//! Health checks and aggregate health reporting.

use crate::error::{Result, ServerError};
use crate::providers::breaker::BreakerState;
use crate::Services;
use schemars::JsonSchema;
use serde::Serialize;

/// Sessions at which the session-store check degrades.
const SESSION_SOFT_LIMIT: usize = 500;

/// Component health verdict. Aggregation takes the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of one named check.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct CheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub detail: String,
}

/// Aggregate view for `health_summary`.
#[derive(Debug, Serialize, JsonSchema)]
pub struct HealthSummary {
    pub overall: HealthStatus,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<Vec<CheckResult>>,
}

/// Names of the registered checks, in reporting order.
pub const CHECK_NAMES: &[&str] = &["process", "providers", "sessions"];

/// Runs one named check, or all of them.
pub async fn health_check(svc: &Services, check_name: Option<&str>) -> Result<Vec<CheckResult>> {
    match check_name {
        None => Ok(run_all(svc).await),
        Some(name) => {
            let result = match name {
                "process" => check_process(svc),
                "providers" => check_providers(svc).await,
                "sessions" => check_sessions(svc),
                other => {
                    return Err(ServerError::invalid(format!(
                        "unknown check '{other}' (available: {})",
                        CHECK_NAMES.join(", ")
                    )))
                }
            };
            Ok(vec![result])
        }
    }
}

/// Aggregate summary; overall is the worst component status.
pub async fn health_summary(svc: &Services, include_details: bool) -> HealthSummary {
    let checks = run_all(svc).await;
    let overall = checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthStatus::Healthy);
    HealthSummary {
        overall,
        healthy: count(&checks, HealthStatus::Healthy),
        degraded: count(&checks, HealthStatus::Degraded),
        unhealthy: count(&checks, HealthStatus::Unhealthy),
        checks: include_details.then_some(checks),
    }
}

async fn run_all(svc: &Services) -> Vec<CheckResult> {
    vec![
        check_process(svc),
        check_providers(svc).await,
        check_sessions(svc),
    ]
}

fn count(checks: &[CheckResult], status: HealthStatus) -> usize {
    checks.iter().filter(|c| c.status == status).count()
}

fn check_process(svc: &Services) -> CheckResult {
    let uptime = svc.started_at.elapsed().as_secs();
    let rss = resident_memory_mb();
    let detail = match rss {
        Some(mb) => format!("uptime {uptime}s, rss {mb:.1} MiB"),
        None => format!("uptime {uptime}s"),
    };
    CheckResult {
        name: "process".into(),
        status: HealthStatus::Healthy,
        detail,
    }
}

async fn check_providers(svc: &Services) -> CheckResult {
    let health = svc.orchestrator.provider_health().await;
    let total = health.len();
    let open = health
        .iter()
        .filter(|p| p.breaker.state == BreakerState::Open || !p.healthy)
        .count();

    let status = if open == 0 {
        HealthStatus::Healthy
    } else if open < total {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    };

    let names: Vec<String> = health
        .iter()
        .map(|p| format!("{}:{:?}", p.name, p.breaker.state))
        .collect();
    CheckResult {
        name: "providers".into(),
        status,
        detail: format!("{}/{} available ({})", total - open, total, names.join(", ")),
    }
}

fn check_sessions(svc: &Services) -> CheckResult {
    let active = svc.store.count();
    let status = if active < SESSION_SOFT_LIMIT {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };
    CheckResult {
        name: "sessions".into(),
        status,
        detail: format!("{active} active sessions"),
    }
}

/// Resident set size from /proc, when available.
fn resident_memory_mb() -> Option<f64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
        let kb: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
        Some(kb / 1024.0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering_worst_wins() {
        assert!(HealthStatus::Unhealthy > HealthStatus::Degraded);
        assert!(HealthStatus::Degraded > HealthStatus::Healthy);
        let worst = [HealthStatus::Healthy, HealthStatus::Degraded]
            .into_iter()
            .max()
            .unwrap();
        assert_eq!(worst, HealthStatus::Degraded);
    }

    #[test]
    fn test_check_names_stable() {
        assert_eq!(CHECK_NAMES, &["process", "providers", "sessions"]);
    }
}
