use crate::error::{CrisapError, Result};
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name looked up in the base path before falling back to the per-user config dir
pub const LOCAL_CONFIG_FILE: &str = "crisap.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorConfig {
    pub base_path: PathBuf,
    pub interpreter: String,
    pub min_interpreter_version: VersionRequirement,
    pub required_directories: Vec<String>,
    pub required_packages: Vec<PackageSpec>,
    pub remediation_packages: Vec<PackageSpec>,
    pub required_keys: Vec<String>,
    pub env_file: String,
    pub min_free_space_mb: u64,
    pub install_timeout_secs: u64,
    pub remediate_during_inspect: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionRequirement {
    pub major: u32,
    pub minor: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_name: Option<String>,
    #[serde(default)]
    pub criticality: Criticality,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    #[default]
    Required,
    Optional,
}

impl PackageSpec {
    pub fn required(name: &str) -> Self {
        Self {
            name: name.to_string(),
            import_name: None,
            criticality: Criticality::Required,
        }
    }

    pub fn optional(name: &str) -> Self {
        Self {
            criticality: Criticality::Optional,
            ..Self::required(name)
        }
    }

    pub fn with_import(mut self, import_name: &str) -> Self {
        self.import_name = Some(import_name.to_string());
        self
    }

    /// Module name handed to `import`; defaults to the install name with dashes mapped to underscores
    pub fn import_name(&self) -> String {
        self.import_name
            .clone()
            .unwrap_or_else(|| self.name.replace('-', "_"))
    }

    pub fn is_optional(&self) -> bool {
        self.criticality == Criticality::Optional
    }
}

impl Default for DoctorConfig {
    fn default() -> Self {
        Self {
            base_path: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            interpreter: default_interpreter(),
            min_interpreter_version: VersionRequirement { major: 3, minor: 7 },
            required_directories: ["config", "data", "logs", "models", "exports", "cache", "temp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            required_packages: default_required_packages(),
            remediation_packages: default_remediation_packages(),
            required_keys: ["OPENAI_API_KEY", "SUPABASE_URL", "SUPABASE_KEY", "INFURA_PROJECT_ID"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            env_file: ".env".to_string(),
            min_free_space_mb: 500,
            install_timeout_secs: 600,
            remediate_during_inspect: true,
            log_file: Some("crisap.log".to_string()),
        }
    }
}

impl DoctorConfig {
    /// Default configuration rooted at `base_path`
    #[cfg(test)]
    pub fn rooted_at(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    pub fn env_file_path(&self) -> PathBuf {
        self.base_path.join(&self.env_file)
    }

    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.log_file
            .as_ref()
            .filter(|f| !f.is_empty())
            .map(|f| self.base_path.join(f))
    }

    pub fn directory_paths(&self) -> Vec<PathBuf> {
        self.required_directories
            .iter()
            .map(|d| self.base_path.join(d))
            .collect()
    }
}

fn default_interpreter() -> String {
    if cfg!(windows) {
        "python".to_string()
    } else {
        "python3".to_string()
    }
}

fn default_required_packages() -> Vec<PackageSpec> {
    ["numpy", "pandas", "streamlit", "openai", "supabase", "folium", "web3"]
        .iter()
        .map(|name| PackageSpec::required(name))
        .collect()
}

fn default_remediation_packages() -> Vec<PackageSpec> {
    let mut packages: Vec<PackageSpec> = [
        "numpy",
        "pandas",
        "scipy",
        "xgboost",
        "joblib",
        "tensorflow",
        "torch",
        "transformers",
        "geopandas",
        "shapely",
        "rasterio",
        "fiona",
        "pyproj",
        "folium",
        "h3",
        "requests",
        "matplotlib",
        "seaborn",
        "plotly",
        "dash",
        "streamlit",
        "streamlit_folium",
        "reportlab",
        "xlsxwriter",
        "boto3",
        "web3",
        "openai",
        "nltk",
        "spacy",
        "langchain",
        "pycountry",
    ]
    .iter()
    .map(|name| PackageSpec::required(name))
    .collect();

    // Distribution names that import under a different module
    packages.extend([
        PackageSpec::required("scikit-learn").with_import("sklearn"),
        PackageSpec::required("beautifulsoup4").with_import("bs4"),
        PackageSpec::required("python-docx").with_import("docx"),
        PackageSpec::required("azure-storage-blob").with_import("azure.storage.blob"),
        PackageSpec::required("google-cloud-storage").with_import("google.cloud.storage"),
        PackageSpec::required("supabase-py").with_import("supabase"),
        PackageSpec::required("pyjwt").with_import("jwt"),
        PackageSpec::required("python-dotenv").with_import("dotenv"),
        PackageSpec::optional("climada"),
    ]);

    packages
}

pub struct ConfigManager {
    config: DoctorConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Resolve and load the configuration.
    ///
    /// An explicit path must exist. Otherwise `<base>/crisap.toml` and then the
    /// per-user config file are tried; when neither exists the defaults apply.
    /// `CRISAP_*` environment variables are layered on top in every case.
    pub fn load(explicit: Option<&Path>, base_override: Option<&Path>) -> Result<Self> {
        let search_base = match base_override {
            Some(base) => absolutize(base)?,
            None => std::env::current_dir()?,
        };

        let config_path = match explicit {
            Some(path) if !path.exists() => {
                return Err(CrisapError::Configuration(format!(
                    "Config file {} does not exist",
                    path.display()
                )));
            }
            Some(path) => path.to_path_buf(),
            None => {
                let local = search_base.join(LOCAL_CONFIG_FILE);
                match Self::user_config_path() {
                    Some(user) if !local.exists() && user.exists() => user,
                    _ => local,
                }
            }
        };

        let mut config = Self::load_or_default(&config_path)?;

        match base_override {
            Some(_) => config.base_path = search_base,
            None => config.base_path = absolutize(&config.base_path)?,
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn from_config(config: DoctorConfig) -> Self {
        let config_path = config.base_path.join(LOCAL_CONFIG_FILE);
        Self {
            config,
            config_path,
        }
    }

    pub fn save(&self) -> Result<()> {
        let toml = toml::to_string_pretty(&self.config)?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.config_path, toml)
            .map_err(|e| CrisapError::Configuration(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    pub fn get(&self) -> &DoctorConfig {
        &self.config
    }

    pub fn into_inner(self) -> DoctorConfig {
        self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(&self.config)?)
    }

    fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "crisap", "crisap").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn load_or_default(path: &Path) -> Result<DoctorConfig> {
        let s = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix("CRISAP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| CrisapError::Configuration(format!("Failed to build config: {}", e)))?;

        let config: DoctorConfig = s.try_deserialize().map_err(|e| {
            CrisapError::Configuration(format!("Failed to deserialize config: {}", e))
        })?;

        Ok(config)
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
