//! Secrets file lookup and template scaffolding.
//!
//! The secrets file is a flat `KEY=value` text file next to the application.
//! Lookups are substring matches on `KEY=` over non-comment lines; a value that
//! is still the scaffolded placeholder does not count as present.

use crate::error::Result;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Placeholder written into the template for `key`
pub fn make_placeholder(key: &str) -> String {
    format!("your_{}_here", key.to_lowercase())
}

/// Check if `value` is the untouched template placeholder for `key`
pub fn is_placeholder(key: &str, value: &str) -> bool {
    value == make_placeholder(key)
}

pub struct SecretsFile {
    path: PathBuf,
    content: String,
}

impl SecretsFile {
    /// Read the secrets file, `None` when it does not exist. Invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        Ok(Some(Self {
            path: path.to_path_buf(),
            content: String::from_utf8_lossy(&fs::read(path)?).into_owned(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether some non-comment line carries `KEY=` with a non-placeholder value
    pub fn defines(&self, key: &str) -> bool {
        let needle = format!("{}=", key);

        self.content
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .filter_map(|line| line.find(&needle).map(|idx| &line[idx + needle.len()..]))
            .any(|value| {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                !is_placeholder(key, value)
            })
    }
}

/// Template body with a placeholder for every key, derived paths under `base_path`
/// and the default feature flags
pub fn render_env_template(base_path: &Path, keys: &[String]) -> String {
    let mut out = String::new();
    out.push_str("# CRISAP Environment Variables\n");
    out.push_str(&format!(
        "# Generated on {}\n\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));

    out.push_str("# API Keys\n");
    for key in keys {
        out.push_str(&format!("{}={}\n", key, make_placeholder(key)));
    }

    out.push_str(
        "\n# Application Settings\n\
         LOG_LEVEL=INFO\n\
         DEPLOYMENT_ENV=development\n\
         ENABLE_BLOCKCHAIN=false\n\
         ENABLE_ADVANCED_ANALYTICS=true\n\
         ENABLE_REPORT_GENERATION=true\n",
    );

    out.push_str("\n# Data Storage\n");
    for (setting, dir) in [
        ("DATA_STORAGE_PATH", "data"),
        ("MODELS_PATH", "models"),
        ("EXPORTS_PATH", "exports"),
        ("CACHE_PATH", "cache"),
        ("TEMP_PATH", "temp"),
    ] {
        out.push_str(&format!("{}={}\n", setting, base_path.join(dir).display()));
    }

    out.push_str("\n# Security\nJWT_SECRET=change_this_to_a_random_string\n");
    out
}

/// Write the template to `path`, overwriting whatever is there
pub fn write_env_template(path: &Path, base_path: &Path, keys: &[String]) -> Result<()> {
    fs::write(path, render_env_template(base_path, keys))?;
    Ok(())
}

/// Scaffold the secrets template. Failures are logged and swallowed; the caller
/// is responsible for not calling this over an existing file.
pub fn create_env_template(path: &Path, base_path: &Path, keys: &[String]) {
    match write_env_template(path, base_path, keys) {
        Ok(()) => info!(path = %path.display(), "Created template .env file"),
        Err(e) => error!(path = %path.display(), error = %e, "Failed to create .env file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn keys() -> Vec<String> {
        vec!["OPENAI_API_KEY".to_string(), "SUPABASE_URL".to_string()]
    }

    fn secrets_with(content: &str) -> (TempDir, SecretsFile) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, content).unwrap();
        let file = SecretsFile::read(&path).unwrap().unwrap();
        (dir, file)
    }

    #[test]
    fn test_placeholder() {
        assert_eq!(make_placeholder("OPENAI_API_KEY"), "your_openai_api_key_here");
        assert!(is_placeholder("SUPABASE_URL", "your_supabase_url_here"));
        assert!(!is_placeholder("SUPABASE_URL", "https://x.supabase.co"));
    }

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(SecretsFile::read(&dir.path().join(".env")).unwrap().is_none());
    }

    #[test]
    fn test_defines_substring_match() {
        let (_dir, file) = secrets_with("export OPENAI_API_KEY=sk-live-123\n");
        assert!(file.defines("OPENAI_API_KEY"));
        assert!(!file.defines("SUPABASE_URL"));
    }

    #[test]
    fn test_comment_lines_ignored() {
        let (_dir, file) = secrets_with("# OPENAI_API_KEY=sk-old\nSUPABASE_URL=https://db\n");
        assert!(!file.defines("OPENAI_API_KEY"));
        assert!(file.defines("SUPABASE_URL"));
    }

    #[test]
    fn test_non_utf8_bytes_do_not_hide_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, b"# caf\xe9 notes\nOPENAI_API_KEY=sk-123\n").unwrap();

        let file = SecretsFile::read(&path).unwrap().unwrap();
        assert!(file.defines("OPENAI_API_KEY"));
        assert!(!file.defines("SUPABASE_URL"));
    }

    #[test]
    fn test_placeholder_value_not_defined() {
        let (_dir, file) = secrets_with("OPENAI_API_KEY=your_openai_api_key_here\n");
        assert!(!file.defines("OPENAI_API_KEY"));
    }

    #[test]
    fn test_template_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        create_env_template(&path, dir.path(), &keys());

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("OPENAI_API_KEY=your_openai_api_key_here\n"));
        assert!(content.contains("SUPABASE_URL=your_supabase_url_here\n"));
        assert!(content.contains(&format!(
            "DATA_STORAGE_PATH={}",
            dir.path().join("data").display()
        )));
        assert!(content.contains("ENABLE_BLOCKCHAIN=false"));
        assert!(content.contains("JWT_SECRET=change_this_to_a_random_string"));

        // a fresh template must not satisfy the key lookup
        let file = SecretsFile::read(&path).unwrap().unwrap();
        assert!(!file.defines("OPENAI_API_KEY"));
    }

    #[test]
    fn test_create_template_failure_is_swallowed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join(".env");
        create_env_template(&path, dir.path(), &keys());
        assert!(!path.exists());
    }
}
