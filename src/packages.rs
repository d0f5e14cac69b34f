//! Interpreter and package-manager invocation.
//!
//! Every call blocks the (single) caller until the child exits or its timeout
//! elapses. Output of the child is discarded; only the exit status matters.

use crate::config::{PackageSpec, VersionRequirement};
use crate::error::{CrisapError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

static VERSION_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("invalid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RuntimeVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl RuntimeVersion {
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self { major, minor, micro }
    }

    /// First `major.minor[.micro]` found in `text`
    pub fn parse(text: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(text)?;
        Some(Self::new(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0),
        ))
    }

    /// Lexicographic on (major, minor); the micro component is ignored
    pub fn satisfies(&self, required: VersionRequirement) -> bool {
        (self.major, self.minor) >= (required.major, required.minor)
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn interpreter_version(&self) -> Result<RuntimeVersion>;

    async fn is_importable(&self, import_name: &str) -> bool;

    /// Install a distribution by name. Success means the installer exited cleanly,
    /// not that the package can now be imported.
    async fn install(&self, package: &str) -> Result<()>;
}

/// Install `spec` and confirm it imports afterwards
pub async fn install_and_verify(manager: &dyn PackageManager, spec: &PackageSpec) -> Result<()> {
    manager.install(&spec.name).await?;

    if manager.is_importable(&spec.import_name()).await {
        Ok(())
    } else {
        Err(CrisapError::Install {
            package: spec.name.clone(),
            reason: format!("installed but `import {}` still fails", spec.import_name()),
        })
    }
}

/// Drives `<interpreter> -m pip` for installs and `<interpreter> -c` for probes
pub struct PipManager {
    program: String,
    args: Vec<String>,
    install_timeout: Duration,
}

impl PipManager {
    /// `interpreter` is a command line such as `python3` or `py -3`
    pub fn new(interpreter: &str, install_timeout: Duration) -> Result<Self> {
        let words = shell_words::split(interpreter).map_err(|e| {
            CrisapError::Configuration(format!("Invalid interpreter command '{}': {}", interpreter, e))
        })?;

        let (program, args) = words.split_first().ok_or_else(|| {
            CrisapError::Configuration("Interpreter command is empty".to_string())
        })?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            install_timeout,
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl PackageManager for PipManager {
    async fn interpreter_version(&self) -> Result<RuntimeVersion> {
        let mut cmd = self.command();
        cmd.arg("-c")
            .arg("import sys; print('%d.%d.%d' % sys.version_info[:3])")
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let output = tokio::time::timeout(PROBE_TIMEOUT, cmd.output())
            .await
            .map_err(|_| CrisapError::Interpreter(format!("{} did not answer in time", self.program)))?
            .map_err(|e| CrisapError::Interpreter(format!("Failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(CrisapError::Interpreter(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        RuntimeVersion::parse(&stdout).ok_or_else(|| {
            CrisapError::Interpreter(format!("Unrecognised version output: {}", stdout.trim()))
        })
    }

    async fn is_importable(&self, import_name: &str) -> bool {
        let mut cmd = self.command();
        cmd.arg("-c")
            .arg(format!("import {}", import_name))
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match tokio::time::timeout(PROBE_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!(module = %import_name, error = %e, "Import probe could not start");
                false
            }
            Err(_) => {
                debug!(module = %import_name, "Import probe timed out");
                false
            }
        }
    }

    async fn install(&self, package: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["-m", "pip", "install", package])
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let status = tokio::time::timeout(self.install_timeout, cmd.status())
            .await
            .map_err(|_| CrisapError::InstallTimeout {
                package: package.to_string(),
                secs: self.install_timeout.as_secs(),
            })?
            .map_err(|e| CrisapError::Install {
                package: package.to_string(),
                reason: e.to_string(),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(CrisapError::Install {
                package: package.to_string(),
                reason: format!("installer exited with {}", status),
            })
        }
    }
}
