//! Configuration loading and root folder resolution
//!
//! Config file resolution order:
//! 1. Command-line argument (highest priority)
//! 2. `DJLM_CONFIG` environment variable
//! 3. `<config dir>/djlm/config.toml`
//! 4. Compiled defaults (a missing file is not an error)
//!
//! Root folder resolution order: command line, `DJLM_ROOT`, `root_folder` in
//! the config file, OS-dependent default.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::AnalyzerKind;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DJLM_CONFIG";

/// Environment variable naming the root folder
pub const ROOT_ENV_VAR: &str = "DJLM_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "djlm.db";

/// Default per-job analyzer timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Default number of concurrent analyzer processes
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Default duplicate similarity threshold (scores must exceed it)
pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.7;

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            // ~/.local/share/djlm
            dirs::data_local_dir()
                .map(|d| d.join("djlm"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/djlm"))
        } else if cfg!(target_os = "macos") {
            // ~/Library/Application Support/djlm
            dirs::data_dir()
                .map(|d| d.join("djlm"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/djlm"))
        } else if cfg!(target_os = "windows") {
            // %LOCALAPPDATA%\djlm
            dirs::data_local_dir()
                .map(|d| d.join("djlm"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\djlm"))
        } else {
            PathBuf::from("./djlm_data")
        };

        Self {
            root_folder,
            log_level: "info".to_string(),
        }
    }
}

/// Logging section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter directive (overridden by `RUST_LOG`)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Per-analyzer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerSettings {
    pub enabled: bool,
    /// Parameter bag handed to the analyzer process
    pub parameters: Map<String, Value>,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            parameters: Map::new(),
        }
    }
}

/// Analysis section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Directory containing the analyzer scripts
    pub workers_dir: PathBuf,
    /// Interpreter the scripts are run with; `None` executes them directly
    pub interpreter: Option<String>,
    pub timeout_ms: u64,
    /// Maximum concurrently running analyzer processes
    pub max_workers: usize,
    /// Write analyzed attributes back into audio file tags
    pub write_tags: bool,
    /// Explicit analyzer overrides; analyzers not listed use built-in defaults
    pub analyzers: BTreeMap<String, AnalyzerSettings>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            workers_dir: PathBuf::from("packages/workers/src"),
            interpreter: Some("python3".to_string()),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_workers: DEFAULT_MAX_WORKERS,
            write_tags: true,
            analyzers: BTreeMap::new(),
        }
    }
}

impl AnalysisConfig {
    /// Whether `analyzer` may run
    ///
    /// Explicit entries win. Otherwise tempo, key, energy and metadata are
    /// enabled; duplicate (a catalog-wide analyzer) and unknown names are not.
    pub fn is_enabled(&self, analyzer: &str) -> bool {
        match self.analyzers.get(analyzer) {
            Some(settings) => settings.enabled,
            None => matches!(
                analyzer.parse::<AnalyzerKind>(),
                Ok(AnalyzerKind::Tempo | AnalyzerKind::Key | AnalyzerKind::Energy | AnalyzerKind::Metadata)
            ),
        }
    }

    /// Parameter bag for `analyzer` (empty when not configured)
    pub fn parameters_for(&self, analyzer: &str) -> Map<String, Value> {
        self.analyzers
            .get(analyzer)
            .map(|s| s.parameters.clone())
            .unwrap_or_default()
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// How derived cues are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CueWritePolicy {
    /// Keep existing cues and add the new ones
    #[default]
    Append,
    /// Delete the track's existing cues first
    Replace,
}

/// Cue derivation section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CueConfig {
    pub write_policy: CueWritePolicy,
}

/// Duplicate clustering section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    pub threshold: f64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DUPLICATE_THRESHOLD,
        }
    }
}

/// Full TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub analysis: AnalysisConfig,
    pub cues: CueConfig,
    pub duplicates: DuplicateConfig,
}

impl TomlConfig {
    /// Parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config: TomlConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load the resolved config file, falling back to defaults when none exists
    ///
    /// A file that exists but fails to parse is still an error.
    pub fn load_or_default(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Using configuration file");
                Self::load(&path)
            }
            Some(path) => {
                if cli_path.is_some() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            None => {
                warn!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.analysis.max_workers == 0 {
            return Err(Error::Config("analysis.max_workers must be at least 1".to_string()));
        }
        if self.analysis.timeout_ms == 0 {
            return Err(Error::Config("analysis.timeout_ms must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.duplicates.threshold) {
            return Err(Error::Config(format!(
                "duplicates.threshold must be within [0, 1], got {}",
                self.duplicates.threshold
            )));
        }
        Ok(())
    }
}

/// Locate the config file following the documented priority
///
/// Returns the first candidate named by CLI or environment even if it does
/// not exist, so the caller can report it; the per-user file is only
/// returned when present.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("djlm").join("config.toml"))
        .filter(|p| p.exists())
}

/// Root folder resolution
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    config_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            config_root: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_config(mut self, config: &TomlConfig) -> Self {
        self.config_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.config_root {
            return path.clone();
        }

        let defaults = CompiledDefaults::for_current_platform();
        debug!(
            module = %self.module_name,
            root = %defaults.root_folder.display(),
            "Using compiled default root folder"
        );
        defaults.root_folder
    }
}

/// Root folder preparation
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder if missing (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!(root = %self.root_folder.display(), "Created root folder");
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}
