use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "lumi-rail.yaml";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Root directory holding `TC<id>_*.yaml` flows
    pub flows_root: PathBuf,

    /// Root directory for per-device artifacts
    pub artifacts_root: PathBuf,

    /// Output directory for batch reports
    pub output_dir: PathBuf,

    /// Android package of the app under test
    pub app_package: String,

    /// Case run once on every device before the batch; a failure aborts the batch
    pub preflight_case: Option<String>,

    pub tool: ToolConfig,
    pub capture: CaptureConfig,
    pub store: StoreConfig,
    pub testrail: Option<TestRailConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flows_root: PathBuf::from("maestro_flows"),
            artifacts_root: PathBuf::from("artifacts"),
            output_dir: PathBuf::from("output"),
            app_package: "net.cj.cjhv.gs.tving".to_string(),
            preflight_case: Some("00000".to_string()),
            tool: ToolConfig::default(),
            capture: CaptureConfig::default(),
            store: StoreConfig::default(),
            testrail: None,
        }
    }
}

/// UI-automation tool settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolConfig {
    /// Explicit path to the maestro binary (resolved automatically if absent)
    pub binary: Option<PathBuf>,

    /// Wall-clock limit for one invocation
    pub timeout_secs: u64,

    /// Extra arguments inserted before the flow path
    pub extra_args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: None,
            timeout_secs: 300,
            extra_args: Vec::new(),
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Traffic capture settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureConfig {
    pub enabled: bool,
    pub binary: Option<PathBuf>,
    pub port: u16,
    /// Delay after spawning the proxy so TLS interception is ready
    pub warmup_ms: u64,
    /// Time allowed for the proxy to flush its dump before it is killed
    pub grace_secs: u64,
    /// Only calls whose URL contains this domain are kept
    pub domain: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            binary: None,
            port: 8080,
            warmup_ms: 2000,
            grace_secs: 5,
            domain: Some("tving.com".to_string()),
        }
    }
}

/// Local execution-log database
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("artifacts/test_log.db"),
        }
    }
}

/// TestRail connection
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct TestRailConfig {
    pub url: String,
    pub username: String,
    pub api_key: String,
    pub run_id: Option<u64>,
}

impl TestRailConfig {
    pub fn is_complete(&self) -> bool {
        !self.url.is_empty() && !self.username.is_empty() && !self.api_key.is_empty()
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `lumi-rail.yaml` in the working
    /// directory and then `<config dir>/lumi-rail/config.yaml` are tried, falling
    /// back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_locations().into_iter().find(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content, path)
    }

    pub fn from_yaml(content: &str, source_path: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: source_path.to_path_buf(),
            source,
        })
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("lumi-rail").join("config.yaml"));
        }
        paths
    }

    /// TestRail credentials from `TESTRAIL_URL`, `TESTRAIL_USER`, `TESTRAIL_API_KEY`
    /// and `TESTRAIL_RUN_ID` override the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let url = lookup("TESTRAIL_URL");
        let user = lookup("TESTRAIL_USER");
        let key = lookup("TESTRAIL_API_KEY");
        let run = lookup("TESTRAIL_RUN_ID").and_then(|r| r.parse().ok());

        if url.is_none() && user.is_none() && key.is_none() && run.is_none() {
            return;
        }

        let tr = self.testrail.get_or_insert_with(TestRailConfig::default);
        if let Some(url) = url {
            tr.url = url;
        }
        if let Some(user) = user {
            tr.username = user;
        }
        if let Some(key) = key {
            tr.api_key = key;
        }
        if run.is_some() {
            tr.run_id = run;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tool.timeout_secs, 300);
        assert_eq!(config.capture.port, 8080);
        assert_eq!(config.flows_root, PathBuf::from("maestro_flows"));
        assert!(config.testrail.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
appPackage: com.example.app
tool:
  timeoutSecs: 120
capture:
  enabled: true
  domain: example.com
testrail:
  url: https://example.testrail.io
  username: qa@example.com
  apiKey: secret
  runId: 42
"#;
        let config = Config::from_yaml(yaml, Path::new("lumi-rail.yaml")).unwrap();
        assert_eq!(config.app_package, "com.example.app");
        assert_eq!(config.tool.timeout_secs, 120);
        assert!(config.capture.enabled);
        assert_eq!(config.capture.port, 8080);
        assert_eq!(config.capture.domain.as_deref(), Some("example.com"));
        let tr = config.testrail.unwrap();
        assert!(tr.is_complete());
        assert_eq!(tr.run_id, Some(42));
    }

    #[test]
    fn test_env_overrides_testrail() {
        let env: HashMap<&str, &str> = [
            ("TESTRAIL_URL", "https://tr.local"),
            ("TESTRAIL_USER", "bot"),
            ("TESTRAIL_API_KEY", "k"),
            ("TESTRAIL_RUN_ID", "7"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        let tr = config.testrail.unwrap();
        assert_eq!(tr.url, "https://tr.local");
        assert_eq!(tr.run_id, Some(7));
    }

    #[test]
    fn test_invalid_yaml_reports_path() {
        let err = Config::from_yaml("tool: [1, 2", Path::new("bad.yaml")).unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
    }
}
