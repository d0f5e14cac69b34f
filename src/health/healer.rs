//! Healer Module - remediate failing checks
//!
//! Only directories and dependencies are remediable. A category is reported as
//! fixed only after the same condition the probe checks holds again.

use super::{CheckName, HealthContext, HealthReport, RemediationOutcome};
use crate::config::PackageSpec;
use crate::error::CrisapError;
use crate::packages::install_and_verify;
use std::collections::HashSet;
use std::fs;
use tracing::{error, info, warn};

pub struct Healer {
    ctx: HealthContext,
}

impl Healer {
    pub fn new(ctx: HealthContext) -> Self {
        Self { ctx }
    }

    /// Remediate every failing remediable category of `report`.
    /// Categories missing from the report count as passing.
    pub async fn heal(&self, report: &HealthReport) -> RemediationOutcome {
        info!("Performing self-healing");
        let mut outcome = RemediationOutcome::default();

        if report.passed(CheckName::Directories) == Some(false) {
            info!("Fixing directory structure");
            outcome.record(CheckName::Directories, self.fix_directories());
        }

        if report.passed(CheckName::Dependencies) == Some(false) {
            info!("Fixing dependencies");
            outcome.record(CheckName::Dependencies, self.fix_dependencies().await);
        }

        if !outcome.fixed.is_empty() {
            info!(fixed = %join(&outcome.fixed), "Self-healing fixed");
        }
        if !outcome.failed.is_empty() {
            warn!(failed = %join(&outcome.failed), "Self-healing failed to fix");
        }

        outcome
    }

    pub fn fix_directories(&self) -> bool {
        let platform = &self.ctx.platform;
        let mut all_fixed = true;

        for path in self.ctx.config.directory_paths() {
            if !path.is_dir() {
                match fs::create_dir_all(&path) {
                    Ok(()) => info!(path = %path.display(), "Created directory"),
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "Failed to create directory");
                        all_fixed = false;
                        continue;
                    }
                }
            } else if !platform.is_writable(&path) {
                match platform.try_set_writable(&path) {
                    Ok(()) => info!(path = %path.display(), "Fixed permissions for directory"),
                    Err(CrisapError::Unsupported { platform: host, .. }) => {
                        warn!(path = %path.display(), host, "Cannot fix permissions on this platform");
                        all_fixed = false;
                        continue;
                    }
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "Failed to fix permissions");
                        all_fixed = false;
                        continue;
                    }
                }
            }

            if !platform.is_writable(&path) {
                error!(path = %path.display(), "Directory still not writable");
                all_fixed = false;
            }
        }

        all_fixed
    }

    /// Install everything on the remediation list that does not import, then make
    /// sure the packages the probe requires import. Optional packages are best-effort.
    pub async fn fix_dependencies(&self) -> bool {
        let packages = self.ctx.packages.as_ref();
        let mut all_fixed = true;

        for spec in self.remediation_plan() {
            if packages.is_importable(&spec.import_name()).await {
                continue;
            }

            info!(package = %spec.name, "Installing");
            match install_and_verify(packages, &spec).await {
                Ok(()) => info!(package = %spec.name, "Successfully installed"),
                Err(e) if spec.is_optional() => {
                    info!(package = %spec.name, error = %e, "Optional package not installed, continuing")
                }
                Err(e) => {
                    error!(package = %spec.name, error = %e, "Failed to install");
                    all_fixed = false;
                }
            }
        }

        for spec in &self.ctx.config.required_packages {
            if !spec.is_optional() && !packages.is_importable(&spec.import_name()).await {
                error!(package = %spec.name, "Required package still unavailable");
                all_fixed = false;
            }
        }

        all_fixed
    }

    /// Remediation list followed by any required package it does not already cover
    fn remediation_plan(&self) -> Vec<PackageSpec> {
        let config = &self.ctx.config;
        let mut plan = config.remediation_packages.clone();
        let covered: HashSet<String> = plan.iter().map(|s| s.import_name()).collect();

        plan.extend(
            config
                .required_packages
                .iter()
                .filter(|s| !covered.contains(&s.import_name()))
                .cloned(),
        );
        plan
    }
}

fn join(names: &[CheckName]) -> String {
    names
        .iter()
        .map(|n| n.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::super::testing::{test_config, FakePackages, FakePlatform};
    use super::super::CheckResult;
    use super::*;
    use crate::config::DoctorConfig;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn healer(config: DoctorConfig, packages: Arc<FakePackages>, platform: Arc<FakePlatform>) -> Healer {
        Healer::new(HealthContext {
            config: Arc::new(config),
            packages,
            platform,
        })
    }

    fn report_failing(failing: &[CheckName]) -> HealthReport {
        HealthReport::from_results(CheckName::ALL.map(|name| {
            let mut r = CheckResult::new(name);
            if failing.contains(&name) {
                r.fail("broken");
            }
            r
        }))
    }

    #[tokio::test]
    async fn test_passing_report_is_untouched() {
        let dir = TempDir::new().unwrap();
        let packages = Arc::new(FakePackages::new());
        let healer = healer(test_config(dir.path()), packages.clone(), Arc::new(FakePlatform::new()));

        let outcome = healer.heal(&report_failing(&[])).await;
        assert!(!outcome.attempted());
        assert!(packages.installs().is_empty());
        assert!(!dir.path().join("data").exists());
    }

    #[tokio::test]
    async fn test_unremediable_categories_ignored() {
        let dir = TempDir::new().unwrap();
        let healer = healer(
            test_config(dir.path()),
            Arc::new(FakePackages::new()),
            Arc::new(FakePlatform::new()),
        );

        let outcome = healer
            .heal(&report_failing(&[
                CheckName::InterpreterVersion,
                CheckName::ApiKeys,
                CheckName::DiskSpace,
            ]))
            .await;
        assert!(!outcome.attempted());
        assert!(outcome.succeeded());
    }

    #[tokio::test]
    async fn test_fix_permissions() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        for path in config.directory_paths() {
            fs::create_dir_all(path).unwrap();
        }
        let locked = dir.path().join("data");
        let platform = Arc::new(FakePlatform::new().with_read_only(locked.clone()));
        let healer = healer(config, Arc::new(FakePackages::new()), platform.clone());

        let outcome = healer.heal(&report_failing(&[CheckName::Directories])).await;
        assert_eq!(outcome.fixed, vec![CheckName::Directories]);
        assert_eq!(platform.permission_fixes(), vec![locked]);
    }

    #[tokio::test]
    async fn test_unsupported_permission_repair_fails() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        for path in config.directory_paths() {
            fs::create_dir_all(path).unwrap();
        }
        let platform = Arc::new(
            FakePlatform::new()
                .with_read_only(dir.path().join("logs"))
                .without_permission_repair(),
        );
        let healer = healer(config, Arc::new(FakePackages::new()), platform);

        let outcome = healer.heal(&report_failing(&[CheckName::Directories])).await;
        assert_eq!(outcome.failed, vec![CheckName::Directories]);
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn test_optional_package_failure_swallowed() {
        let dir = TempDir::new().unwrap();
        let packages = Arc::new(FakePackages::new().with_installable(&["numpy"]));
        let healer = healer(test_config(dir.path()), packages.clone(), Arc::new(FakePlatform::new()));

        let outcome = healer.heal(&report_failing(&[CheckName::Dependencies])).await;
        assert_eq!(outcome.fixed, vec![CheckName::Dependencies]);
        assert_eq!(packages.installs(), vec!["numpy".to_string(), "climada".to_string()]);
    }

    #[tokio::test]
    async fn test_required_package_failure_counts() {
        let dir = TempDir::new().unwrap();
        let packages = Arc::new(FakePackages::new().with_installable(&["climada"]));
        let healer = healer(test_config(dir.path()), packages.clone(), Arc::new(FakePlatform::new()));

        let outcome = healer.heal(&report_failing(&[CheckName::Dependencies])).await;
        assert_eq!(outcome.failed, vec![CheckName::Dependencies]);
        // the batch continued past the failed install
        assert_eq!(packages.installs(), vec!["numpy".to_string(), "climada".to_string()]);
    }

    #[tokio::test]
    async fn test_required_packages_outside_remediation_list_are_covered() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.required_packages.push(PackageSpec::required("folium"));
        let packages = Arc::new(
            FakePackages::new()
                .with_importable(&["numpy", "climada"])
                .with_installable(&["folium"]),
        );
        let healer = healer(config, packages.clone(), Arc::new(FakePlatform::new()));

        assert!(healer.fix_dependencies().await);
        assert_eq!(packages.installs(), vec!["folium".to_string()]);
    }
}
