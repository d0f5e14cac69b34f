//! Host capabilities that differ between POSIX and Windows.
//!
//! The probe and the healer only talk to [`Platform`], so the disk-space and
//! permission branches live here and nowhere else.

use crate::error::Result;
use std::path::Path;
use std::sync::Arc;

pub trait Platform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Free space available to an unprivileged user on the filesystem holding `path`
    fn free_space_bytes(&self, path: &Path) -> Result<u64>;

    fn is_writable(&self, path: &Path) -> bool;

    /// Make `path` owner-writable (rwxr-xr-x on POSIX)
    fn try_set_writable(&self, path: &Path) -> Result<()>;
}

#[cfg(unix)]
pub struct PosixPlatform;

#[cfg(unix)]
impl Platform for PosixPlatform {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn free_space_bytes(&self, path: &Path) -> Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(std::io::Error::from)?;
        Ok((stat.fragment_size() as u64).saturating_mul(stat.blocks_available() as u64))
    }

    fn is_writable(&self, path: &Path) -> bool {
        use nix::unistd::{access, AccessFlags};
        access(path, AccessFlags::W_OK).is_ok()
    }

    fn try_set_writable(&self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
        Ok(())
    }
}

#[cfg(windows)]
pub struct WindowsPlatform;

#[cfg(windows)]
impl Platform for WindowsPlatform {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn free_space_bytes(&self, path: &Path) -> Result<u64> {
        Ok(fs2::available_space(path)?)
    }

    fn is_writable(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false)
    }

    fn try_set_writable(&self, path: &Path) -> Result<()> {
        Err(crate::error::CrisapError::Unsupported {
            platform: self.name(),
            operation: format!("permission repair for {}", path.display()),
        })
    }
}

/// Platform implementation for the host this binary was built for
pub fn current() -> Arc<dyn Platform> {
    #[cfg(unix)]
    {
        Arc::new(PosixPlatform)
    }
    #[cfg(windows)]
    {
        Arc::new(WindowsPlatform)
    }
}
