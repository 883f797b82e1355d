//! Configuration for auditrun.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (applied by the CLI)
//! 2. Environment variables (AUDITRUN_ROOT, AUDITRUN_BIND,
//!    AUDITRUN_MAX_CONNECTIONS, AUDITRUN_STEP_TIMEOUT)
//! 3. Config file (.auditrun/config.yaml)
//! 4. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .auditrun/config.yaml
//! - Falls back to the user config dir (e.g. ~/.config/auditrun/config.yaml)
//! - Paths in the config file are relative to the directory holding .auditrun/

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::{WorkerCatalog, WorkerSpec, DEFAULT_MAX_CONNECTIONS};
use crate::domain::{RunConfig, StepName};

const CONFIG_DIR_NAME: &str = ".auditrun";
const CONFIG_FILE_NAME: &str = "config.yaml";

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    /// Directory the workers run in (relative to the config's base directory)
    #[serde(default)]
    pub project_root: Option<String>,
    #[serde(default)]
    pub server: ServerConfig,
    /// Per-step worker overrides
    #[serde(default)]
    pub workers: BTreeMap<StepName, WorkerSpec>,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub max_connections: Option<usize>,
    pub cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsConfig {
    pub niche: Option<String>,
    pub max_sites: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitsConfig {
    /// Kill a worker after this many seconds (no limit when absent)
    pub step_timeout_seconds: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Working directory for workers; relative script paths resolve against it
    pub project_root: PathBuf,
    /// Address the HTTP/WebSocket server binds to
    pub bind: String,
    /// Observer capacity of the event hub
    pub max_connections: usize,
    /// Origins allowed by CORS
    pub cors_origins: Vec<String>,
    /// Step → worker mapping
    pub workers: WorkerCatalog,
    /// Run config used when the caller supplies none
    pub defaults: RunConfig,
    pub step_timeout: Option<Duration>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:5173".to_string(),
        "http://localhost:5174".to_string(),
        "http://127.0.0.1:5174".to_string(),
    ]
}

impl ResolvedConfig {
    /// Defaults rooted at `root`, with no config file
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: root.into(),
            bind: DEFAULT_BIND.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            cors_origins: default_cors_origins(),
            workers: WorkerCatalog::default(),
            defaults: RunConfig::default(),
            step_timeout: None,
            config_file: None,
        }
    }

    /// Resolve a parsed config file. `config_path` is where it was read from;
    /// `cwd` is the fallback base when there is no file.
    pub fn from_file(file: ConfigFile, config_path: Option<&Path>, cwd: &Path) -> Self {
        let base_dir = config_path.map(config_base_dir).unwrap_or_else(|| cwd.to_path_buf());

        let project_root = file
            .project_root
            .as_deref()
            .map(|p| resolve_path(&base_dir, p))
            .unwrap_or_else(|| base_dir.clone());

        let fallback = RunConfig::default();
        let defaults = RunConfig {
            niche: file.defaults.niche.unwrap_or(fallback.niche),
            max_sites: file.defaults.max_sites.unwrap_or(fallback.max_sites),
        };

        Self {
            project_root,
            bind: file.server.bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
            max_connections: file
                .server
                .max_connections
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            cors_origins: file.server.cors_origins.unwrap_or_else(default_cors_origins),
            workers: WorkerCatalog::default().with_overrides(file.workers),
            defaults,
            step_timeout: file.limits.step_timeout_seconds.map(Duration::from_secs),
            config_file: config_path.map(Path::to_path_buf),
        }
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("AUDITRUN_ROOT") {
            self.project_root = PathBuf::from(root);
        }
        if let Some(bind) = lookup("AUDITRUN_BIND") {
            self.bind = bind;
        }
        if let Some(max) = lookup("AUDITRUN_MAX_CONNECTIONS") {
            self.max_connections = max
                .parse()
                .with_context(|| format!("Invalid AUDITRUN_MAX_CONNECTIONS: {}", max))?;
        }
        if let Some(secs) = lookup("AUDITRUN_STEP_TIMEOUT") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("Invalid AUDITRUN_STEP_TIMEOUT: {}", secs))?;
            self.step_timeout = Some(Duration::from_secs(secs));
        }
        Ok(())
    }
}

/// Directory that config-relative paths resolve against: the parent of
/// `.auditrun/`, or the file's own directory for a config stored elsewhere
fn config_base_dir(config_path: &Path) -> PathBuf {
    let parent = config_path.parent().unwrap_or(Path::new("."));
    if parent.file_name().is_some_and(|name| name == CONFIG_DIR_NAME) {
        parent.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}

/// Find config file by searching `start` and its parents, then the user config dir
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let user_config = dirs::config_dir()?.join("auditrun").join(CONFIG_FILE_NAME);
    user_config.exists().then_some(user_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(&path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources.
///
/// `explicit` bypasses discovery and must point at an existing file.
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    let config_path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(&cwd),
    };

    let file = match config_path {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let mut config = ResolvedConfig::from_file(file, config_path.as_deref(), &cwd);
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &Path, yaml: &str) -> PathBuf {
        let config_dir = dir.join(CONFIG_DIR_NAME);
        std::fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join(CONFIG_FILE_NAME);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", yaml).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let cwd = PathBuf::from("/srv/audit");
        let config = ResolvedConfig::from_file(ConfigFile::default(), None, &cwd);

        assert_eq!(config.project_root, cwd);
        assert_eq!(config.bind, DEFAULT_BIND);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.defaults, RunConfig::default());
        assert!(config.step_timeout.is_none());
        assert_eq!(config.workers, WorkerCatalog::default());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            r#"
version: "1.0"
project_root: ./pipeline
server:
  bind: 0.0.0.0:9000
  max_connections: 5
  cors_origins: ["http://example.test"]
workers:
  analysis:
    script: tools/analyze.sh
    interpreter: sh
    args: ["--niche", "{niche}"]
defaults:
  niche: fitness
limits:
  step_timeout_seconds: 900
"#,
        );

        let file = load_config_file(&path).unwrap();
        assert_eq!(file.version.as_deref(), Some("1.0"));

        let config = ResolvedConfig::from_file(file, Some(&path), Path::new("/elsewhere"));
        assert_eq!(config.project_root, temp.path().join("pipeline"));
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.cors_origins, vec!["http://example.test".to_string()]);
        assert_eq!(config.defaults.niche, "fitness");
        assert_eq!(config.defaults.max_sites, 10);
        assert_eq!(config.step_timeout, Some(Duration::from_secs(900)));
        assert_eq!(
            config.workers.spec(StepName::Analysis).script,
            PathBuf::from("tools/analyze.sh")
        );
        // Steps not overridden keep their built-in worker
        assert_eq!(
            config.workers.spec(StepName::Audit),
            WorkerSpec::default_for(StepName::Audit)
        );
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "version: \"1.0\"");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(path));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("AUDITRUN_ROOT", "/data/project"),
            ("AUDITRUN_BIND", "127.0.0.1:7000"),
            ("AUDITRUN_MAX_CONNECTIONS", "3"),
            ("AUDITRUN_STEP_TIMEOUT", "60"),
        ]
        .into_iter()
        .collect();

        let mut config = ResolvedConfig::with_root("/tmp");
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.project_root, PathBuf::from("/data/project"));
        assert_eq!(config.bind, "127.0.0.1:7000");
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.step_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_invalid_env_value_is_error() {
        let mut config = ResolvedConfig::with_root("/tmp");
        let result = config.apply_env(|key| {
            (key == "AUDITRUN_MAX_CONNECTIONS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn test_config_base_dir() {
        assert_eq!(
            config_base_dir(Path::new("/proj/.auditrun/config.yaml")),
            PathBuf::from("/proj")
        );
        assert_eq!(
            config_base_dir(Path::new("/etc/auditrun.yaml")),
            PathBuf::from("/etc")
        );
    }
}
