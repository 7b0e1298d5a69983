//! Timeout-bounded connection pool.
//!
//! Wraps a [`SessionPool`] with eagerly validated bounds and a wall-clock
//! limit on checkout. When the limit elapses the pending checkout future is
//! dropped, so the abandoned attempt never completes later and never holds a
//! connection nobody will return.

use std::time::{Duration, Instant};

use latchkey_types::config::PoolConfig;
use latchkey_types::error::{ConfigError, DurabilityError};
use latchkey_types::health::{HealthMetrics, HealthReport, PoolMetrics};

use super::{LockSession, SessionPool};

/// Bounded pool with timeout-bounded acquisition and health probing.
pub struct ConnectionPool<P: SessionPool> {
    inner: P,
    acquire_timeout: Duration,
    min_connections: u32,
    max_connections: u32,
}

impl<P: SessionPool> ConnectionPool<P> {
    /// Wrap `inner`, validating the configured bounds first.
    pub fn new(inner: P, config: &PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner,
            acquire_timeout: config.acquire_timeout(),
            min_connections: config.min_connections,
            max_connections: config.max_connections,
        })
    }

    /// Override the checkout limit (for health probes and tests).
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::invalid("pool.acquire_timeout", "must be > 0"));
        }
        self.acquire_timeout = timeout;
        Ok(self)
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// The wrapped pool.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Check out a session within the configured timeout.
    pub async fn acquire(&self) -> Result<P::Session, DurabilityError> {
        self.acquire_within(self.acquire_timeout).await
    }

    /// Check out a session within `timeout`.
    pub async fn acquire_within(&self, timeout: Duration) -> Result<P::Session, DurabilityError> {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.inner.acquire()).await {
            Ok(Ok(session)) => {
                tracing::trace!(waited_ms = started.elapsed().as_millis() as u64, "checked out connection");
                Ok(session)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "connection pool error");
                Err(e.into())
            }
            Err(_) => {
                let metrics = self.metrics();
                tracing::error!(
                    timeout_ms = timeout.as_millis() as u64,
                    size = metrics.size,
                    idle = metrics.idle,
                    max = metrics.max_connections,
                    "connection pool timeout, pool may be exhausted"
                );
                Err(DurabilityError::ConnectionTimeout(timeout))
            }
        }
    }

    /// Size metrics with the configured bounds.
    pub fn metrics(&self) -> PoolMetrics {
        let live = self.inner.metrics();
        PoolMetrics {
            min_connections: self.min_connections,
            max_connections: self.max_connections,
            size: live.size,
            idle: live.idle,
        }
    }

    /// Round-trip probe: check out a connection and run the test query.
    pub async fn health_check(&self) -> HealthReport {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        self.probe(&mut issues, &mut warnings).await;
        let metrics = HealthMetrics {
            acquire_timeout_ms: self.acquire_timeout.as_millis() as u64,
            pool: self.metrics(),
            ..HealthMetrics::default()
        };
        HealthReport::from_findings(issues, warnings, metrics)
    }

    pub(crate) async fn probe(&self, issues: &mut Vec<String>, warnings: &mut Vec<String>) {
        match self.acquire().await {
            Ok(mut session) => match session.ping().await {
                Ok(()) => drop(session),
                Err(e) => {
                    issues.push(format!("Cannot execute test query: {e}"));
                    session.discard();
                }
            },
            Err(DurabilityError::ConnectionTimeout(_)) => {
                issues.push("Cannot acquire connection from pool (timeout)".to_string());
            }
            Err(e) => issues.push(format!("Connection pool error: {e}")),
        }

        let metrics = self.metrics();
        if metrics.size >= metrics.max_connections && metrics.idle == 0 {
            warnings.push(format!(
                "Connection pool is at capacity ({}/{} connections in use)",
                metrics.size, metrics.max_connections
            ));
        }
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}
