//! Environment probe: the five independent checks behind a [`HealthReport`].
//!
//! With `remediate` set, missing directories are created, missing packages are
//! installed and a secrets template is scaffolded while checking. Without it
//! the probe only reports.

use super::{CheckName, CheckResult, HealthContext, HealthReport};
use crate::packages::install_and_verify;
use crate::secrets::{create_env_template, SecretsFile};
use std::collections::HashMap;
use std::fs;
use tracing::{error, info, warn};

const BYTES_PER_MB: u64 = 1024 * 1024;

pub struct EnvironmentProbe {
    ctx: HealthContext,
    env: HashMap<String, String>,
}

impl EnvironmentProbe {
    pub fn new(ctx: HealthContext, env: HashMap<String, String>) -> Self {
        Self { ctx, env }
    }

    #[cfg(test)]
    pub fn set_env(&mut self, env: HashMap<String, String>) {
        self.env = env;
    }

    /// Run every check in a fixed order
    pub async fn run(&self, remediate: bool) -> HealthReport {
        info!(remediate, "Running self-diagnostics");

        let results = vec![
            self.check_interpreter_version().await,
            self.check_directories(remediate),
            self.check_dependencies(remediate).await,
            self.check_api_keys(remediate),
            self.check_disk_space(),
        ];

        HealthReport::from_results(results)
    }

    pub async fn check_interpreter_version(&self) -> CheckResult {
        let required = self.ctx.config.min_interpreter_version;
        let mut result = CheckResult::new(CheckName::InterpreterVersion);

        match self.ctx.packages.interpreter_version().await {
            Ok(version) if version.satisfies(required) => {
                info!(%version, "Python version detected (meets requirements)");
                result.with_summary(format!("Python {} detected", version))
            }
            Ok(version) => {
                warn!(
                    %version,
                    required = %format!("{}.{}", required.major, required.minor),
                    "Python version below requirement"
                );
                result.fail(format!(
                    "Python {} detected, {}.{} or higher required",
                    version, required.major, required.minor
                ));
                result.with_summary(format!("Python {} is too old", version))
            }
            Err(e) => {
                error!(error = %e, "Could not determine Python version");
                result.fail(e.to_string());
                result.with_summary("Python interpreter unavailable")
            }
        }
    }

    /// Every required directory must exist and be writable. A creation failure is
    /// recorded and the remaining directories are still checked.
    pub fn check_directories(&self, remediate: bool) -> CheckResult {
        let paths = self.ctx.config.directory_paths();
        let mut result = CheckResult::new(CheckName::Directories);

        for path in &paths {
            if !path.is_dir() {
                if !remediate {
                    warn!(path = %path.display(), "Directory missing");
                    result.fail(format!("missing: {}", path.display()));
                    continue;
                }

                match fs::create_dir_all(path) {
                    Ok(()) => {
                        info!(path = %path.display(), "Created missing directory");
                        result.note(format!("created {}", path.display()));
                    }
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "Failed to create directory");
                        result.fail(format!("cannot create {}: {}", path.display(), e));
                        continue;
                    }
                }
            }

            if !self.ctx.platform.is_writable(path) {
                error!(path = %path.display(), "Directory not writable");
                result.fail(format!("not writable: {}", path.display()));
            }
        }

        let summary = if result.passed {
            format!("{} directories present and writable", paths.len())
        } else {
            format!("{} of {} directories unusable", result.failures.len(), paths.len())
        };
        result.with_summary(summary)
    }

    /// Passes when every required package imports, after any inline install has
    /// been re-verified. Optional packages never fail the check.
    pub async fn check_dependencies(&self, remediate: bool) -> CheckResult {
        let packages = &self.ctx.packages;
        let required = &self.ctx.config.required_packages;
        let mut result = CheckResult::new(CheckName::Dependencies);

        let mut missing = Vec::new();
        for spec in required {
            if !packages.is_importable(&spec.import_name()).await {
                missing.push(spec);
            }
        }

        if missing.is_empty() {
            return result.with_summary(format!("{} packages importable", required.len()));
        }

        let names: Vec<&str> = missing.iter().map(|s| s.name.as_str()).collect();
        warn!(missing = %names.join(", "), "Missing dependencies");

        if remediate {
            info!("Attempting to install missing dependencies");
        }

        for spec in missing {
            if !remediate {
                if spec.is_optional() {
                    result.note(format!("optional {} not importable", spec.name));
                } else {
                    result.fail(format!("{} not importable", spec.name));
                }
                continue;
            }

            info!(package = %spec.name, "Installing");
            match install_and_verify(packages.as_ref(), spec).await {
                Ok(()) => {
                    info!(package = %spec.name, "Successfully installed");
                    result.note(format!("installed {}", spec.name));
                }
                Err(e) if spec.is_optional() => {
                    warn!(package = %spec.name, error = %e, "Optional package unavailable");
                    result.note(format!("optional {}: {}", spec.name, e));
                }
                Err(e) => {
                    error!(package = %spec.name, error = %e, "Failed to install");
                    result.fail(e.to_string());
                }
            }
        }

        let summary = if result.passed {
            format!("{} packages importable", required.len())
        } else {
            format!("{} packages unavailable", result.failures.len())
        };
        result.with_summary(summary)
    }

    /// Keys come from the process environment first, then the secrets file. When
    /// keys are still missing and no secrets file exists, a template is written;
    /// the check fails either way.
    pub fn check_api_keys(&self, remediate: bool) -> CheckResult {
        let config = &self.ctx.config;
        let env_path = config.env_file_path();
        let mut result = CheckResult::new(CheckName::ApiKeys);

        let mut missing: Vec<&String> = config
            .required_keys
            .iter()
            .filter(|key| self.env.get(*key).is_none_or(|v| v.is_empty()))
            .collect();

        if !missing.is_empty() {
            match SecretsFile::read(&env_path) {
                Ok(Some(file)) => {
                    info!(path = %file.path().display(), "Found .env file, checking for missing keys");
                    missing.retain(|key| !file.defines(key));
                }
                Ok(None) => {}
                Err(e) => {
                    error!(path = %env_path.display(), error = %e, "Failed to read .env file");
                    result.note(format!("unreadable {}: {}", env_path.display(), e));
                }
            }
        }

        if missing.is_empty() {
            return result.with_summary(format!("{} API keys configured", config.required_keys.len()));
        }

        let names: Vec<&str> = missing.iter().map(|k| k.as_str()).collect();
        warn!(missing = %names.join(", "), "Missing API keys");
        for key in &missing {
            result.fail(format!("{} is not set", key));
        }

        if !env_path.exists() {
            if remediate {
                create_env_template(&env_path, &config.base_path, &config.required_keys);
                if env_path.exists() {
                    result.note(format!("template written to {}", env_path.display()));
                }
            } else {
                result.note(format!("no secrets file at {}", env_path.display()));
            }
        }

        result.with_summary(format!("{} API keys missing", missing.len()))
    }

    /// Free space at the base path against the configured floor (inclusive).
    /// A failed query counts as insufficient space.
    pub fn check_disk_space(&self) -> CheckResult {
        let config = &self.ctx.config;
        let min_mb = config.min_free_space_mb;
        let mut result = CheckResult::new(CheckName::DiskSpace);

        match self.ctx.platform.free_space_bytes(&config.base_path) {
            Ok(bytes) => {
                let free_mb = bytes as f64 / BYTES_PER_MB as f64;
                if bytes < min_mb.saturating_mul(BYTES_PER_MB) {
                    warn!(free_mb = %format!("{:.2}", free_mb), min_mb, "Low disk space");
                    result.fail(format!(
                        "{:.2} MB available, minimum {} MB required",
                        free_mb, min_mb
                    ));
                } else {
                    info!(free_mb = %format!("{:.2}", free_mb), "Sufficient disk space");
                }
                result.with_summary(format!("{:.2} MB free", free_mb))
            }
            Err(e) => {
                error!(path = %config.base_path.display(), error = %e, "Failed to check disk space");
                result.fail(e.to_string());
                result.with_summary("free space unknown")
            }
        }
    }
}
