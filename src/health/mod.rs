//! Health Module - environment diagnostics and self-healing
//!
//! [`SystemHealth`] owns the latest [`HealthReport`]. Running diagnostics
//! replaces the report wholesale; self-healing reads it and remediates the
//! categories it knows how to fix.

pub mod healer;
pub mod probe;
#[cfg(test)]
pub(crate) mod testing;

use crate::config::DoctorConfig;
use crate::packages::PackageManager;
use crate::platform::Platform;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

pub use healer::Healer;
pub use probe::EnvironmentProbe;

/// Identifier of a single environment check
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    InterpreterVersion,
    Directories,
    Dependencies,
    ApiKeys,
    DiskSpace,
}

impl CheckName {
    #[cfg(test)]
    pub const ALL: [CheckName; 5] = [
        CheckName::InterpreterVersion,
        CheckName::Directories,
        CheckName::Dependencies,
        CheckName::ApiKeys,
        CheckName::DiskSpace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckName::InterpreterVersion => "interpreter_version",
            CheckName::Directories => "directories",
            CheckName::Dependencies => "dependencies",
            CheckName::ApiKeys => "api_keys",
            CheckName::DiskSpace => "disk_space",
        }
    }

    /// Categories the healer knows how to fix
    pub fn is_remediable(&self) -> bool {
        matches!(self, CheckName::Directories | CheckName::Dependencies)
    }
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one check. `passed` is false as soon as a failure is recorded.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: CheckName,
    pub passed: bool,
    pub summary: String,
    pub notes: Vec<String>,
    pub failures: Vec<String>,
}

impl CheckResult {
    pub fn new(name: CheckName) -> Self {
        Self {
            name,
            passed: true,
            summary: String::new(),
            notes: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn fail(&mut self, failure: impl Into<String>) {
        self.failures.push(failure.into());
        self.passed = false;
    }
}

/// Named check results plus the derived overall verdict
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    checks: BTreeMap<CheckName, CheckResult>,
    overall: bool,
    generated_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_results(results: impl IntoIterator<Item = CheckResult>) -> Self {
        let checks: BTreeMap<CheckName, CheckResult> =
            results.into_iter().map(|r| (r.name, r)).collect();
        let overall = checks.values().all(|r| r.passed);

        Self {
            checks,
            overall,
            generated_at: Utc::now(),
        }
    }

    /// True iff every check passed
    pub fn overall(&self) -> bool {
        self.overall
    }

    pub fn passed(&self, name: CheckName) -> Option<bool> {
        self.checks.get(&name).map(|r| r.passed)
    }

    pub fn checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.values()
    }

    pub fn failing(&self) -> Vec<CheckName> {
        self.checks
            .values()
            .filter(|r| !r.passed)
            .map(|r| r.name)
            .collect()
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }
}

/// Per-category result of one self-healing pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemediationOutcome {
    pub fixed: Vec<CheckName>,
    pub failed: Vec<CheckName>,
}

impl RemediationOutcome {
    pub fn record(&mut self, name: CheckName, fixed: bool) {
        if fixed {
            self.fixed.push(name);
        } else {
            self.failed.push(name);
        }
    }

    /// True iff every attempted remediation succeeded
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> bool {
        !self.fixed.is_empty() || !self.failed.is_empty()
    }
}

/// Shared collaborators of the probe and the healer
#[derive(Clone)]
pub struct HealthContext {
    pub config: Arc<DoctorConfig>,
    pub packages: Arc<dyn PackageManager>,
    pub platform: Arc<dyn Platform>,
}

pub struct SystemHealth {
    probe: EnvironmentProbe,
    healer: Healer,
    remediate_during_inspect: bool,
    report: Option<HealthReport>,
}

impl SystemHealth {
    pub fn new(
        config: DoctorConfig,
        packages: Arc<dyn PackageManager>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        let remediate_during_inspect = config.remediate_during_inspect;
        let ctx = HealthContext {
            config: Arc::new(config),
            packages,
            platform,
        };

        Self {
            probe: EnvironmentProbe::new(ctx.clone(), process_env()),
            healer: Healer::new(ctx),
            remediate_during_inspect,
            report: None,
        }
    }

    /// Replace the environment variables the key check consults
    #[cfg(test)]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.probe.set_env(env);
        self
    }

    #[cfg(test)]
    pub fn report(&self) -> Option<&HealthReport> {
        self.report.as_ref()
    }

    /// Run every check, fixing directories and dependencies inline when configured to
    pub async fn run_self_diagnostics(&mut self) -> &HealthReport {
        self.run(self.remediate_during_inspect).await
    }

    /// Run every check without touching the environment
    pub async fn inspect(&mut self) -> &HealthReport {
        self.run(false).await
    }

    async fn run(&mut self, remediate: bool) -> &HealthReport {
        let report = self.probe.run(remediate).await;
        self.report.insert(report)
    }

    /// Remediate the failing categories of the latest report, diagnosing first if
    /// no report exists yet. Diagnostics are not re-run afterwards.
    pub async fn perform_self_healing(&mut self) -> RemediationOutcome {
        if self.report.is_none() {
            self.run_self_diagnostics().await;
        }

        match &self.report {
            Some(report) => self.healer.heal(report).await,
            None => RemediationOutcome::default(),
        }
    }
}

fn process_env() -> HashMap<String, String> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}
