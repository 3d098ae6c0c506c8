//! Compiler configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipeError, PipeResult};
use crate::transpiler::OutputMode;

/// Main compiler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Nested subqueries or a CTE chain.
    pub mode: OutputMode,

    /// Prefix of generated CTE names.
    pub cte_prefix: String,

    pub macros: MacroConfig,

    pub enrichment: EnrichmentConfig,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::Nested,
            cte_prefix: "_pipe_".to_string(),
            macros: MacroConfig::default(),
            enrichment: EnrichmentConfig::default(),
        }
    }
}

/// Parameters of the built-in pipe macros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroConfig {
    /// SQL string literal used to format TIMEBUCKET bounds.
    pub time_format: String,

    /// LOGCATEGORY rules, tried in order.
    pub log_categories: Vec<LogCategory>,

    /// Dataset joined by `EXTEND ENRICH_IP(...)`.
    pub ip_dataset: String,

    /// Columns selected from `ip_dataset`.
    pub ip_columns: String,
}

impl Default for MacroConfig {
    fn default() -> Self {
        Self {
            time_format: "'%Y-%m-%d %H:00'".to_string(),
            log_categories: default_log_categories(),
            ip_dataset: "ip_geo".to_string(),
            ip_columns: "country, region, city, latitude, longitude".to_string(),
        }
    }
}

/// One LOGCATEGORY rule: messages matching `pattern` get `label`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogCategory {
    pub pattern: String,
    pub label: String,
}

impl LogCategory {
    pub fn new(pattern: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            label: label.into(),
        }
    }
}

fn default_log_categories() -> Vec<LogCategory> {
    vec![
        LogCategory::new(r#"\{"code":200,"message":"success"\}"#, "JSON API Response"),
        LogCategory::new(
            r"\[\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}\] \[ info\] \[output:http:http\.\d+\] .+?, HTTP status=200",
            "HTTP Output",
        ),
        LogCategory::new(
            r"action 'action-\d+-builtin:omfile' \(module 'builtin:omfile'\) message lost, could not be processed\. Check for additional error messages before this one\.",
            "Rsyslog Message Lost",
        ),
        LogCategory::new(
            r"(no space left on device|write error - see https://www\.rsyslog\.com/solving-rsyslog-write-errors/)",
            "Disk Space Error",
        ),
        LogCategory::new(
            r"(Failed password for|Invalid user|Disconnected from) .+? port \d+",
            "SSH Authentication Error",
        ),
    ]
}

/// Settings for the `CALL ENRICH_IP` side-effect pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Table holding `(enrich_type, key, value)` rows.
    pub table: String,

    /// Bound on each backend call.
    pub timeout_ms: u64,

    /// How many distinct values are sampled per call.
    pub sample_limit: u64,

    pub database_url: Option<String>,

    /// JSON geolocation table.
    pub geo_path: Option<PathBuf>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            table: "pipe_enrich".to_string(),
            timeout_ms: 5000,
            sample_limit: 100,
            database_url: None,
            geo_path: None,
        }
    }
}

impl CompilerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> CompilerConfigBuilder {
        CompilerConfigBuilder::default()
    }

    /// Default location: `<config dir>/pipesql/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pipesql").join("config.toml"))
    }

    /// Load configuration from `path`, or from [`default_path`](Self::default_path)
    /// when `path` is `None`. A missing default file yields the defaults; a
    /// missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> PipeResult<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        Self::from_toml(&text)
            .map_err(|e| PipeError::Config(format!("{}: {e}", path.display())))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> PipeResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| PipeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise produce broken SQL.
    pub fn validate(&self) -> PipeResult<()> {
        if !is_identifier(&self.cte_prefix) {
            return Err(PipeError::Config(format!(
                "cte_prefix must be an identifier, got {:?}",
                self.cte_prefix
            )));
        }
        if !is_identifier(&self.enrichment.table) {
            return Err(PipeError::Config(format!(
                "enrichment.table must be an identifier, got {:?}",
                self.enrichment.table
            )));
        }
        if self.enrichment.sample_limit == 0 {
            return Err(PipeError::Config("enrichment.sample_limit must be positive".to_string()));
        }
        Ok(())
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !s.starts_with(|c: char| c.is_ascii_digit())
}

/// Builder for CompilerConfig
#[derive(Debug, Default)]
pub struct CompilerConfigBuilder {
    config: CompilerConfig,
}

impl CompilerConfigBuilder {
    pub fn mode(mut self, mode: OutputMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn cte_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.cte_prefix = prefix.into();
        self
    }

    pub fn time_format(mut self, format: impl Into<String>) -> Self {
        self.config.macros.time_format = format.into();
        self
    }

    pub fn log_categories(mut self, categories: Vec<LogCategory>) -> Self {
        self.config.macros.log_categories = categories;
        self
    }

    pub fn ip_dataset(mut self, dataset: impl Into<String>, columns: impl Into<String>) -> Self {
        self.config.macros.ip_dataset = dataset.into();
        self.config.macros.ip_columns = columns.into();
        self
    }

    pub fn enrich_table(mut self, table: impl Into<String>) -> Self {
        self.config.enrichment.table = table.into();
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.enrichment.timeout_ms = timeout_ms;
        self
    }

    pub fn sample_limit(mut self, limit: u64) -> Self {
        self.config.enrichment.sample_limit = limit;
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.enrichment.database_url = Some(url.into());
        self
    }

    pub fn geo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.enrichment.geo_path = Some(path.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> CompilerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert_eq!(config.mode, OutputMode::Nested);
        assert_eq!(config.cte_prefix, "_pipe_");
        assert_eq!(config.enrichment.timeout_ms, 5000);
        assert_eq!(config.enrichment.sample_limit, 100);
        let labels: Vec<_> = config.macros.log_categories.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "JSON API Response",
                "HTTP Output",
                "Rsyslog Message Lost",
                "Disk Space Error",
                "SSH Authentication Error",
            ]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = CompilerConfig::from_toml(
            r#"
            mode = "cte"
            cte_prefix = "step_"

            [enrichment]
            timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, OutputMode::Cte);
        assert_eq!(config.cte_prefix, "step_");
        assert_eq!(config.enrichment.timeout_ms, 250);
        assert_eq!(config.enrichment.table, "pipe_enrich");
        assert_eq!(config.macros, MacroConfig::default());
    }

    #[test]
    fn test_invalid_values() {
        assert!(CompilerConfig::from_toml("mode = \"sideways\"").is_err());
        assert!(CompilerConfig::from_toml("cte_prefix = \"a b\"").is_err());
        let config = CompilerConfig::builder().enrich_table("x; DROP TABLE y").build();
        assert!(matches!(config.validate(), Err(PipeError::Config(_))));
    }

    #[test]
    fn test_builder() {
        let config = CompilerConfig::builder()
            .mode(OutputMode::Cte)
            .cte_prefix("s")
            .sample_limit(10)
            .build();
        assert_eq!(config.mode, OutputMode::Cte);
        assert_eq!(config.cte_prefix, "s");
        assert_eq!(config.enrichment.sample_limit, 10);
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let missing = Path::new("/nonexistent/pipesql/config.toml");
        assert!(matches!(CompilerConfig::load(Some(missing)), Err(PipeError::Io(_))));
    }
}
