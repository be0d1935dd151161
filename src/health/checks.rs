//! Named health checks and the boot-sequence registry.
//!
//! # Responsibilities
//! - Define the `HealthCheck` seam (`name`, `check(request)`)
//! - Collect boot-sequence checks (served on healthz, livez, readyz)
//! - Collect readiness-only checks (served on readyz)
//! - Evaluate checks into a report and render it
//!
//! # Design Decisions
//! - Checks are registered before the endpoints are installed; later additions are rejected
//! - Check names are unique across both sets
//! - Non-verbose failures withhold reasons

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use axum::http::request::Parts;
use thiserror::Error;

use crate::lifecycle::Shutdown;

/// Error returned by a failing check.
pub type CheckError = Box<dyn std::error::Error + Send + Sync>;

/// A single named health check.
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, request: &Parts) -> Result<(), CheckError>;
}

/// A health check backed by a closure.
pub struct NamedCheck<F> {
    name: String,
    check: F,
}

impl<F> HealthCheck for NamedCheck<F>
where
    F: Fn(&Parts) -> Result<(), CheckError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, request: &Parts) -> Result<(), CheckError> {
        (self.check)(request)
    }
}

/// Wrap a closure as a named check.
pub fn named_check<F>(name: impl Into<String>, check: F) -> Arc<dyn HealthCheck>
where
    F: Fn(&Parts) -> Result<(), CheckError> + Send + Sync + 'static,
{
    Arc::new(NamedCheck {
        name: name.into(),
        check,
    })
}

/// Always healthy.
pub fn ping_check() -> Arc<dyn HealthCheck> {
    named_check("ping", |_| Ok(()))
}

/// Fails once process shutdown has begun.
pub fn shutdown_check(shutdown: Shutdown) -> Arc<dyn HealthCheck> {
    named_check("shutdown", move |_| {
        if shutdown.is_triggered() {
            Err("process is shutting down".into())
        } else {
            Ok(())
        }
    })
}

/// Which endpoint a report is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Healthz,
    Livez,
    Readyz,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Healthz => "healthz",
            Endpoint::Livez => "livez",
            Endpoint::Readyz => "readyz",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HealthRegistryError {
    #[error("health check {0:?} is already registered")]
    Duplicate(String),

    #[error("unable to add health check {0:?}: health endpoints are already installed")]
    AlreadyInstalled(String),
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub error: Option<String>,
}

/// Outcome of evaluating an endpoint's checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub endpoint: Endpoint,
    pub results: Vec<CheckResult>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.results.iter().all(|r| r.error.is_none())
    }

    pub fn failed(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.error.is_some())
    }

    /// Render the plain-text body served by the endpoint.
    pub fn render(&self, verbose: bool) -> String {
        let healthy = self.is_healthy();
        if healthy && !verbose {
            return "ok".to_string();
        }

        let mut out = String::new();
        for result in &self.results {
            match &result.error {
                None => {
                    let _ = writeln!(out, "[+]{} ok", result.name);
                }
                Some(reason) if verbose => {
                    let _ = writeln!(out, "[-]{} failed: {}", result.name, reason);
                }
                Some(_) => {
                    let _ = writeln!(out, "[-]{} failed: reason withheld", result.name);
                }
            }
        }
        let verdict = if healthy { "passed" } else { "failed" };
        let _ = writeln!(out, "{} check {}", self.endpoint.as_str(), verdict);
        out
    }
}

/// Registry of health checks served by the frontend.
#[derive(Default)]
pub struct HealthChecks {
    boot_sequence: RwLock<Vec<Arc<dyn HealthCheck>>>,
    readiness: RwLock<Vec<Arc<dyn HealthCheck>>>,
    installed: AtomicBool,
}

impl HealthChecks {
    /// A registry pre-populated with `ping`.
    pub fn new() -> Self {
        let checks = Self::default();
        checks
            .boot_sequence
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ping_check());
        checks
    }

    /// Add checks served on every health endpoint.
    pub fn add_boot_sequence_checks<I>(&self, checks: I) -> Result<(), HealthRegistryError>
    where
        I: IntoIterator<Item = Arc<dyn HealthCheck>>,
    {
        self.add(checks, false)
    }

    /// Add checks served on readyz only.
    pub fn add_readiness_checks<I>(&self, checks: I) -> Result<(), HealthRegistryError>
    where
        I: IntoIterator<Item = Arc<dyn HealthCheck>>,
    {
        self.add(checks, true)
    }

    fn add<I>(&self, checks: I, readiness_only: bool) -> Result<(), HealthRegistryError>
    where
        I: IntoIterator<Item = Arc<dyn HealthCheck>>,
    {
        let mut boot = self.boot_sequence.write().unwrap_or_else(PoisonError::into_inner);
        let mut ready = self.readiness.write().unwrap_or_else(PoisonError::into_inner);

        for check in checks {
            let name = check.name().to_string();
            if self.installed.load(Ordering::SeqCst) {
                return Err(HealthRegistryError::AlreadyInstalled(name));
            }
            if boot.iter().chain(ready.iter()).any(|c| c.name() == name) {
                return Err(HealthRegistryError::Duplicate(name));
            }
            tracing::debug!(check = %name, readiness_only, "Health check registered");
            if readiness_only {
                ready.push(check);
            } else {
                boot.push(check);
            }
        }
        Ok(())
    }

    /// Freeze the registry; called when the endpoints are mounted.
    pub fn install(&self) {
        self.installed.store(true, Ordering::SeqCst);
    }

    /// Names of the checks served on `endpoint`.
    pub fn names(&self, endpoint: Endpoint) -> Vec<String> {
        self.checks_for(endpoint)
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    fn checks_for(&self, endpoint: Endpoint) -> Vec<Arc<dyn HealthCheck>> {
        let mut checks: Vec<_> = self
            .boot_sequence
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if endpoint == Endpoint::Readyz {
            checks.extend(
                self.readiness
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .cloned(),
            );
        }
        checks
    }

    /// Run every check for `endpoint` except the excluded names.
    pub fn evaluate(&self, endpoint: Endpoint, request: &Parts, exclude: &[String]) -> HealthReport {
        let results = self
            .checks_for(endpoint)
            .into_iter()
            .filter(|c| !exclude.iter().any(|e| e == c.name()))
            .map(|c| run_check(c.as_ref(), request))
            .collect();

        let report = HealthReport { endpoint, results };
        for failed in report.failed() {
            tracing::debug!(
                endpoint = endpoint.as_str(),
                check = %failed.name,
                reason = failed.error.as_deref().unwrap_or_default(),
                "Health check failed"
            );
        }
        report
    }

    /// Run a single named check, if it is served on `endpoint`.
    pub fn evaluate_one(&self, endpoint: Endpoint, name: &str, request: &Parts) -> Option<CheckResult> {
        self.checks_for(endpoint)
            .into_iter()
            .find(|c| c.name() == name)
            .map(|c| run_check(c.as_ref(), request))
    }
}

fn run_check(check: &dyn HealthCheck, request: &Parts) -> CheckResult {
    CheckResult {
        name: check.name().to_string(),
        error: check.check(request).err().map(|e| e.to_string()),
    }
}
