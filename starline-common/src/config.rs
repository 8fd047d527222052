//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`STARLINE_ROOT_FOLDER`)
//! 3. TOML config file (`root_folder`)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file is never fatal: a warning is logged and
//! compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "STARLINE_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "starline.db";

/// Compiled defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub port: u16,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
            port: 5740,
        }
    }
}

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// External evaluator section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Evaluation endpoint URL (POST)
    pub endpoint: Option<String>,
    /// Bearer API key (ENV `STARLINE_EVALUATOR_API_KEY` takes priority)
    pub api_key: Option<String>,
    /// Model identifier forwarded to the evaluator
    pub model: Option<String>,
    /// Hard timeout for one evaluation call
    pub timeout_ms: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: None,
            timeout_ms: 30_000,
        }
    }
}

/// Answer text length bounds (characters, after trimming)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnswerLimits {
    pub min_chars: usize,
    pub max_chars: usize,
}

impl Default for AnswerLimits {
    fn default() -> Self {
        Self {
            min_chars: 10,
            max_chars: 5_000,
        }
    }
}

/// Tier prices used to build upgrade hints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PricingConfig {
    pub starter_price_cents: i64,
    pub premium_price_cents: i64,
    pub currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            starter_price_cents: 4_900,
            premium_price_cents: 14_900,
            currency: "EUR".to_string(),
        }
    }
}

/// Contents of `starline-ip.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<String>,
    pub port: Option<u16>,
    pub logging: LoggingConfig,
    pub evaluator: EvaluatorConfig,
    pub answers: AnswerLimits,
    pub pricing: PricingConfig,
    /// Days of access granted by a starter purchase
    pub starter_access_days: Option<i64>,
}

impl TomlConfig {
    /// Load a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    /// Load from `explicit` or the platform default location.
    ///
    /// Missing files fall back to defaults with a warning; a file that exists
    /// but fails to parse is an error.
    pub fn load_or_default(explicit: Option<&Path>, module_name: &str) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match default_config_path(module_name) {
                Some(p) => p,
                None => {
                    warn!("Could not determine config directory, using compiled defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            warn!(
                "Config file not found at {}, using compiled defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let config = Self::load(&path)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

/// Platform config path: `<config_dir>/starline/<module_name>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("starline").join(format!("{}.toml", module_name)))
}

/// Resolves the root folder following the priority order in the module docs
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml_root: None,
        }
    }

    pub fn with_cli_arg(mut self, arg: Option<PathBuf>) -> Self {
        self.cli_arg = arg;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.as_ref().map(PathBuf::from);
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("{}: root folder from command line: {}", self.module_name, path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!("{}: root folder from {}: {}", self.module_name, ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            info!("{}: root folder from TOML config: {}", self.module_name, path.display());
            return path.clone();
        }

        let path = CompiledDefaults::for_current_platform().root_folder;
        info!("{}: root folder from compiled default: {}", self.module_name, path.display());
        path
    }
}

/// Creates the root folder and locates the database inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/starline (or /var/lib/starline for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("starline"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/starline"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/starline
        dirs::data_dir()
            .map(|d| d.join("starline"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/starline"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\starline
        dirs::data_local_dir()
            .map(|d| d.join("starline"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\starline"))
    } else {
        PathBuf::from("./starline_data")
    }
}
