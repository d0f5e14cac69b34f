//! Fakes for the package manager and platform capabilities.

use crate::config::{DoctorConfig, PackageSpec};
use crate::error::{CrisapError, Result};
use crate::packages::{PackageManager, RuntimeVersion};
use crate::platform::Platform;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub fn test_config(base: &Path) -> DoctorConfig {
    let mut config = DoctorConfig::rooted_at(base);
    config.required_directories = vec!["config".into(), "data".into(), "logs".into()];
    config.required_packages = vec![PackageSpec::required("numpy")];
    config.remediation_packages = vec![
        PackageSpec::required("numpy"),
        PackageSpec::optional("climada"),
    ];
    config.required_keys = vec!["OPENAI_API_KEY".into(), "SUPABASE_URL".into()];
    config.log_file = None;
    config
}

/// Package manager whose modules and installs are scripted by name
pub struct FakePackages {
    version: Option<RuntimeVersion>,
    importable: Mutex<HashSet<String>>,
    installable: HashSet<String>,
    hollow: HashSet<String>,
    installs: Mutex<Vec<String>>,
}

impl FakePackages {
    pub fn new() -> Self {
        Self {
            version: Some(RuntimeVersion::new(3, 11, 4)),
            importable: Mutex::new(HashSet::new()),
            installable: HashSet::new(),
            hollow: HashSet::new(),
            installs: Mutex::new(Vec::new()),
        }
    }

    /// `None` makes the version query fail
    pub fn with_version(mut self, version: Option<RuntimeVersion>) -> Self {
        self.version = version;
        self
    }

    pub fn with_importable(self, names: &[&str]) -> Self {
        self.importable
            .lock()
            .unwrap()
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Installs of these succeed and make the module importable
    pub fn with_installable(mut self, names: &[&str]) -> Self {
        self.installable.extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Installs of these exit cleanly but the module still fails to import
    pub fn with_hollow(mut self, names: &[&str]) -> Self {
        self.hollow.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn installs(&self) -> Vec<String> {
        self.installs.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageManager for FakePackages {
    async fn interpreter_version(&self) -> Result<RuntimeVersion> {
        self.version
            .ok_or_else(|| CrisapError::Interpreter("python3 not found".to_string()))
    }

    async fn is_importable(&self, import_name: &str) -> bool {
        self.importable.lock().unwrap().contains(import_name)
    }

    async fn install(&self, package: &str) -> Result<()> {
        self.installs.lock().unwrap().push(package.to_string());

        if self.installable.contains(package) {
            self.importable.lock().unwrap().insert(package.to_string());
            Ok(())
        } else if self.hollow.contains(package) {
            Ok(())
        } else {
            Err(CrisapError::Install {
                package: package.to_string(),
                reason: "exit status: 1".to_string(),
            })
        }
    }
}

/// Platform with a fixed free-space answer and scripted read-only directories
pub struct FakePlatform {
    free_bytes: Option<u64>,
    read_only: Mutex<HashSet<PathBuf>>,
    can_fix_permissions: bool,
    permission_fixes: Mutex<Vec<PathBuf>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            free_bytes: Some(10 * 1024 * 1024 * 1024),
            read_only: Mutex::new(HashSet::new()),
            can_fix_permissions: true,
            permission_fixes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_free_bytes(mut self, bytes: u64) -> Self {
        self.free_bytes = Some(bytes);
        self
    }

    /// Make the free-space query fail
    pub fn without_free_space(mut self) -> Self {
        self.free_bytes = None;
        self
    }

    pub fn with_read_only(self, path: PathBuf) -> Self {
        self.read_only.lock().unwrap().insert(path);
        self
    }

    /// Behave like a host where permission repair is unsupported
    pub fn without_permission_repair(mut self) -> Self {
        self.can_fix_permissions = false;
        self
    }

    pub fn permission_fixes(&self) -> Vec<PathBuf> {
        self.permission_fixes.lock().unwrap().clone()
    }
}

impl Platform for FakePlatform {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn free_space_bytes(&self, _path: &Path) -> Result<u64> {
        self.free_bytes.ok_or_else(|| {
            CrisapError::Io(std::io::Error::other("statvfs failed"))
        })
    }

    fn is_writable(&self, path: &Path) -> bool {
        path.is_dir() && !self.read_only.lock().unwrap().contains(path)
    }

    fn try_set_writable(&self, path: &Path) -> Result<()> {
        if !self.can_fix_permissions {
            return Err(CrisapError::Unsupported {
                platform: self.name(),
                operation: format!("permission repair for {}", path.display()),
            });
        }

        self.read_only.lock().unwrap().remove(path);
        self.permission_fixes.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}
