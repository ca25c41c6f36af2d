use crate::profiler::ExclusionRules;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub profiler: ProfilerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Application database; the engine whose statements are profiled
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfilerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Where request and query records go. Shares the application database
    /// when unset.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_exclude_paths")]
    pub exclude_paths: Vec<String>,
    #[serde(default = "default_exclude_prefixes")]
    pub exclude_prefixes: Vec<String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_redact_headers")]
    pub redact_headers: Vec<String>,
    #[serde(default = "default_true")]
    pub filter_internal_frames: bool,
    #[serde(default)]
    pub max_stack_frames: Option<usize>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_url: None,
            exclude_paths: default_exclude_paths(),
            exclude_prefixes: default_exclude_prefixes(),
            max_body_bytes: default_max_body_bytes(),
            redact_headers: default_redact_headers(),
            filter_internal_frames: true,
            max_stack_frames: None,
        }
    }
}

impl ProfilerConfig {
    pub fn exclusions(&self) -> ExclusionRules {
        ExclusionRules {
            exact: self.exclude_paths.clone(),
            prefixes: self.exclude_prefixes.clone(),
        }
    }

    /// Database URL for profiler records
    pub fn database_url<'a>(&'a self, database: &'a DatabaseConfig) -> &'a str {
        self.database_url.as_deref().unwrap_or(&database.url)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_database_url() -> String {
    "sqlite://./profiler.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_exclude_paths() -> Vec<String> {
    ExclusionRules::default().exact
}

fn default_exclude_prefixes() -> Vec<String> {
    ExclusionRules::default().prefixes
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_redact_headers() -> Vec<String> {
    vec![
        "authorization".to_string(),
        "cookie".to_string(),
        "proxy-authorization".to_string(),
    ]
}

/// Load configuration from `path` (optional) overlaid with
/// `SQL_PROFILER__*` environment variables
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("SQL_PROFILER").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        anyhow::bail!("Server port must be non-zero");
    }

    if !matches!(cfg.server.log_format.as_str(), "text" | "json") {
        anyhow::bail!(
            "Invalid log format '{}', expected 'text' or 'json'",
            cfg.server.log_format
        );
    }

    if cfg.database.max_connections == 0 {
        anyhow::bail!("Database max_connections must be at least 1");
    }

    if cfg.profiler.max_body_bytes == 0 {
        anyhow::bail!("Profiler max_body_bytes must be at least 1");
    }

    for path in cfg
        .profiler
        .exclude_paths
        .iter()
        .chain(cfg.profiler.exclude_prefixes.iter())
    {
        if !path.starts_with('/') {
            anyhow::bail!("Excluded path '{}' must start with '/'", path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        assert!(validate_config(&cfg).is_ok());
        assert_eq!(cfg.profiler.exclusions(), ExclusionRules::default());
        assert_eq!(cfg.profiler.database_url(&cfg.database), cfg.database.url);
    }

    #[test]
    fn test_validate_config_rejects_zero_port() {
        let mut cfg = Config::default();
        cfg.server.port = 0;

        let result = validate_config(&cfg);
        assert!(result.unwrap_err().to_string().contains("port"));
    }

    #[test]
    fn test_validate_config_rejects_relative_exclusion() {
        let mut cfg = Config::default();
        cfg.profiler.exclude_prefixes.push("health".to_string());

        let result = validate_config(&cfg);
        assert!(result.unwrap_err().to_string().contains("'health'"));
    }

    #[test]
    fn test_validate_config_rejects_zero_limits() {
        let mut cfg = Config::default();
        cfg.profiler.max_body_bytes = 0;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.database.max_connections = 0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9100

[profiler]
database_url = "sqlite://./data/records.db"
exclude_prefixes = ["/health"]
max_stack_frames = 20
"#
        )
        .unwrap();

        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(
            cfg.profiler.database_url(&cfg.database),
            "sqlite://./data/records.db"
        );
        assert_eq!(cfg.profiler.exclude_prefixes, vec!["/health".to_string()]);
        assert_eq!(cfg.profiler.exclude_paths, vec!["/all_request".to_string()]);
        assert_eq!(cfg.profiler.max_stack_frames, Some(20));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.server.port, 8000);
        assert!(cfg.profiler.enabled);
    }
}
