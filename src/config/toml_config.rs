use crate::domain::ports::ConfigProvider;
use crate::utils::error::{Result, TelemetryError};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub datastore: DatastoreConfig,
    pub layout: LayoutConfig,
    pub query: QueryConfig,
    pub cache: CacheConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    pub project_id: Option<String>,
    pub database: String,
    pub base_url: String,
    /// Opaque bearer token, usually `${FIRESTORE_TOKEN}`.
    pub access_token: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            database: "(default)".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: None,
            timeout_seconds: 30,
        }
    }
}

impl DatastoreConfig {
    /// 未替換的 `${VAR}` 或空字串視為沒有 token
    pub fn access_token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty() && !token.starts_with("${"))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    /// One readings collection, each reading names its experiment.
    #[default]
    Flat,
    /// Experiment documents with a readings sub-collection each.
    Nested,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub kind: LayoutKind,
    pub collection: String,
    pub experiment_field: String,
    pub time_field: String,
    pub parent_collection: String,
    pub readings_collection: String,
    pub status_field: String,
    pub running_value: String,
    pub active_window_secs: u64,
    pub scan_limit: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            kind: LayoutKind::Flat,
            collection: "measurements".to_string(),
            experiment_field: "experiment_id".to_string(),
            time_field: "timestamp".to_string(),
            parent_collection: "experiments".to_string(),
            readings_collection: "readings".to_string(),
            status_field: "status".to_string(),
            running_value: "running".to_string(),
            active_window_secs: 300,
            scan_limit: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { limit: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 0 disables the query cache.
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_path: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_path: "./output".to_string(),
        }
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| TelemetryError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${FIRESTORE_TOKEN})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| TelemetryError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.into_owned())
    }

    /// Applies the conventional Google Cloud environment variables on top of the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("FIRESTORE_EMULATOR_HOST") {
            if !host.trim().is_empty() {
                tracing::info!("🧪 Using datastore emulator at {}", host);
                self.datastore.base_url = format!("http://{}", host.trim());
            }
        }

        if self
            .datastore
            .project_id
            .as_deref()
            .is_some_and(|project| project.trim().is_empty() || project.starts_with("${"))
        {
            self.datastore.project_id = None;
        }

        if self.datastore.project_id.is_none() {
            if let Ok(project) = std::env::var("GOOGLE_CLOUD_PROJECT") {
                self.datastore.project_id = Some(project);
            }
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_url("datastore.base_url", &self.datastore.base_url)?;
        validation::validate_non_empty_string("datastore.database", &self.datastore.database)?;
        validation::validate_range("datastore.timeout_seconds", self.datastore.timeout_seconds, 1, 600)?;

        let layout = &self.layout;
        match layout.kind {
            LayoutKind::Flat => {
                validation::validate_identifier("layout.collection", &layout.collection)?;
                validation::validate_identifier("layout.experiment_field", &layout.experiment_field)?;
            }
            LayoutKind::Nested => {
                validation::validate_identifier("layout.parent_collection", &layout.parent_collection)?;
                validation::validate_identifier("layout.readings_collection", &layout.readings_collection)?;
                validation::validate_identifier("layout.status_field", &layout.status_field)?;
                validation::validate_non_empty_string("layout.running_value", &layout.running_value)?;
            }
        }
        validation::validate_identifier("layout.time_field", &layout.time_field)?;
        validation::validate_positive_number("layout.scan_limit", layout.scan_limit, 1)?;

        validation::validate_positive_number("query.limit", self.query.limit, 1)?;
        validation::validate_path("export.output_path", &self.export.output_path)?;

        Ok(())
    }
}

impl ConfigProvider for TomlConfig {
    fn output_path(&self) -> &str {
        &self.export.output_path
    }

    fn query_limit(&self) -> usize {
        self.query.limit
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
