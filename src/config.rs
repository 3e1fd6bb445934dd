//! Configuration for labflow paths and settings.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (LABFLOW_HOME, LABFLOW_SHARED)
//! 2. Config file (.labflow/config.yaml)
//! 3. Defaults (~/.labflow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .labflow/config.yaml
//! - Paths in the config file are relative to the config file's parent
//!   directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub watcher: Option<WatcherSection>,
    #[serde(default)]
    pub retention: Option<RetentionSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to config file)
    pub home: Option<String>,
    /// Shared task-folder root
    pub shared: Option<String>,
    /// Rule table CSV
    pub rules: Option<String>,
    /// Roster CSV
    pub roster: Option<String>,
    /// Export drop directory
    pub inbox: Option<String>,
    /// Digest output directory
    pub outbox: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherSection {
    pub stability_delay_secs: Option<u64>,
    pub extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionSection {
    pub backup_days: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state directory (database, backups)
    pub home: PathBuf,
    /// Shared task-folder root
    pub shared: PathBuf,
    /// Rule table CSV
    pub rules: PathBuf,
    /// Roster CSV
    pub roster: PathBuf,
    /// Export drop directory
    pub inbox: PathBuf,
    /// Digest output directory
    pub outbox: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Watcher settings
    pub watcher: WatcherSettings,
    /// Retention settings
    pub retention: RetentionSettings,
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub stability_delay_secs: u64,
    pub extensions: Vec<String>,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            stability_delay_secs: 5,
            extensions: vec!["csv".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetentionSettings {
    pub backup_days: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self { backup_days: 30 }
    }
}

impl ResolvedConfig {
    /// Ledger database path ($home/storage/lab.db)
    pub fn db_path(&self) -> PathBuf {
        self.home.join("storage").join("lab.db")
    }

    /// Backup directory ($home/storage/backups)
    pub fn backups_dir(&self) -> PathBuf {
        self.home.join("storage").join("backups")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".labflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".labflow");

    let config_file = find_config_file();

    let (mut home, mut shared, mut rules, mut roster, mut inbox, mut outbox) =
        (None, None, None, None, None, None);
    let mut watcher = WatcherSettings::default();
    let mut retention = RetentionSettings::default();

    if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        // Base directory is the parent of .labflow/ (the project root).
        let labflow_dir = config_path.parent().unwrap_or(Path::new("."));
        let base_dir = labflow_dir.parent().unwrap_or(Path::new("."));

        // home is relative to the .labflow/ directory itself.
        home = config
            .paths
            .home
            .as_deref()
            .map(|p| resolve_path(labflow_dir, p));
        shared = config
            .paths
            .shared
            .as_deref()
            .map(|p| resolve_path(base_dir, p));
        rules = config
            .paths
            .rules
            .as_deref()
            .map(|p| resolve_path(base_dir, p));
        roster = config
            .paths
            .roster
            .as_deref()
            .map(|p| resolve_path(base_dir, p));
        inbox = config
            .paths
            .inbox
            .as_deref()
            .map(|p| resolve_path(base_dir, p));
        outbox = config
            .paths
            .outbox
            .as_deref()
            .map(|p| resolve_path(base_dir, p));

        if let Some(w) = config.watcher {
            if let Some(secs) = w.stability_delay_secs {
                watcher.stability_delay_secs = secs;
            }
            if let Some(exts) = w.extensions {
                watcher.extensions = exts;
            }
        }
        if let Some(r) = config.retention {
            if let Some(days) = r.backup_days {
                retention.backup_days = days;
            }
        }
    }

    // Environment variables win over the config file.
    let home = std::env::var("LABFLOW_HOME")
        .map(PathBuf::from)
        .ok()
        .or(home)
        .unwrap_or(default_home);

    let shared = std::env::var("LABFLOW_SHARED")
        .map(PathBuf::from)
        .ok()
        .or(shared)
        .unwrap_or_else(|| home.join("shared"));

    let rules = rules.unwrap_or_else(|| home.join("rules").join("item_rules.csv"));
    let roster = roster.unwrap_or_else(|| home.join("rules").join("researchers.csv"));
    let inbox = inbox.unwrap_or_else(|| home.join("inbox"));
    let outbox = outbox.unwrap_or_else(|| home.join("outbox"));

    Ok(ResolvedConfig {
        home,
        shared,
        rules,
        roster,
        inbox,
        outbox,
        config_file,
        watcher,
        retention,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let labflow_dir = temp.path().join(".labflow");
        std::fs::create_dir_all(&labflow_dir).unwrap();

        let config_path = labflow_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
  shared: ./shared
  rules: ./rules/item_rules.csv
watcher:
  stability_delay_secs: 10
retention:
  backup_days: 14
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./".to_string()));
        assert_eq!(config.paths.shared, Some("./shared".to_string()));
        assert_eq!(config.watcher.unwrap().stability_delay_secs, Some(10));
        assert_eq!(config.retention.unwrap().backup_days, Some(14));
    }

    #[test]
    fn test_derived_paths() {
        let config = ResolvedConfig {
            home: PathBuf::from("/test/.labflow"),
            shared: PathBuf::from("/test/shared"),
            rules: PathBuf::from("/test/rules/item_rules.csv"),
            roster: PathBuf::from("/test/rules/researchers.csv"),
            inbox: PathBuf::from("/test/inbox"),
            outbox: PathBuf::from("/test/outbox"),
            config_file: None,
            watcher: WatcherSettings::default(),
            retention: RetentionSettings::default(),
        };

        assert_eq!(config.db_path(), PathBuf::from("/test/.labflow/storage/lab.db"));
        assert_eq!(
            config.backups_dir(),
            PathBuf::from("/test/.labflow/storage/backups")
        );
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn test_defaults_without_config_file() {
        let settings = WatcherSettings::default();
        assert_eq!(settings.stability_delay_secs, 5);
        assert_eq!(settings.extensions, vec!["csv".to_string()]);
        assert_eq!(RetentionSettings::default().backup_days, 30);
    }
}
