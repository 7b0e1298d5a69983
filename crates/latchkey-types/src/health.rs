//! Health report types for the lock manager and its connection pool.

use serde::{Deserialize, Serialize};

/// Three-level health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Issues make a component unhealthy; warnings alone only degrade it.
    pub fn classify(issues: &[String], warnings: &[String]) -> Self {
        if !issues.is_empty() {
            HealthStatus::Unhealthy
        } else if !warnings.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Connection pool size metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub min_connections: u32,
    pub max_connections: u32,
    /// Connections currently open (idle + in use).
    pub size: u32,
    /// Open connections not checked out.
    pub idle: u32,
}

/// Metrics gathered during a health check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub active_locks: usize,
    pub acquire_timeout_ms: u64,
    pub shutdown_requested: bool,
    pub closed: bool,
    pub pool: PoolMetrics,
}

/// Result of a health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// `false` only when `status` is `Unhealthy`.
    pub healthy: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub metrics: HealthMetrics,
}

impl HealthReport {
    /// Build a report, deriving the status from the findings.
    pub fn from_findings(issues: Vec<String>, warnings: Vec<String>, metrics: HealthMetrics) -> Self {
        let status = HealthStatus::classify(&issues, &warnings);
        Self {
            status,
            healthy: status != HealthStatus::Unhealthy,
            issues,
            warnings,
            metrics,
        }
    }
}
