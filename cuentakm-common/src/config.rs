//! Configuration loading and root folder resolution
//!
//! Two layers, resolved once at process start:
//! 1. **TOML bootstrap**: paths, listener, upload limit, logging, upstream
//!    service settings and the agent seed list. Every key is optional; a
//!    missing file is not fatal.
//! 2. **Overrides**: command-line arguments and environment variables win
//!    over the TOML file. Secrets (API keys) are read from the environment
//!    first.
//!
//! The resulting [`AppConfig`] is passed by reference into the components
//! that need it.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "CUENTAKM_ROOT_FOLDER";
/// Environment variables checked (in order) for the vision API key
pub const EXTRACTION_KEY_ENV: [&str; 2] = ["CUENTAKM_OPENAI_API_KEY", "OPENAI_API_KEY"];
/// Environment variable checked for the mail API key
pub const MAIL_KEY_ENV: [&str; 1] = ["CUENTAKM_MAIL_API_KEY"];

const DEFAULT_PORT: u16 = 5780;
const DEFAULT_BIND: &str = "127.0.0.1";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 15 * 1024 * 1024;
const DEFAULT_EXTRACTION_ENDPOINT: &str = "https://api.openai.com/v1/responses";
const DEFAULT_EXTRACTION_MODEL: &str = "gpt-4.1-mini";
const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAIL_ENDPOINT: &str = "https://api.brevo.com/v3/smtp/email";
const DEFAULT_SENDER_EMAIL: &str = "no-reply@localhost";
const DEFAULT_SENDER_NAME: &str = "Cuentakm";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Root folder holding the database, media and static assets
    pub root_folder: Option<PathBuf>,
    /// SQLite database file (relative paths resolve against the root folder)
    pub database_path: Option<PathBuf>,
    /// Upload namespace for reading photos
    pub media_root: Option<PathBuf>,
    /// Static assets; the SPA shell lives at `<static_dir>/dist/index.html`
    pub static_dir: Option<PathBuf>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    /// Development mode: expose `/media/*`
    pub serve_media: bool,
    pub max_upload_bytes: Option<usize>,
    pub logging: LoggingConfig,
    pub extraction: ExtractionToml,
    pub notifications: NotificationsToml,
    /// Agent display names inserted at startup if missing
    pub agents: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[extraction]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractionToml {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// `[notifications]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsToml {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
    pub week_close_recipients: Vec<String>,
    pub mismatch_recipients: Vec<String>,
}

impl Default for NotificationsToml {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            endpoint: None,
            sender_email: None,
            sender_name: None,
            week_close_recipients: Vec::new(),
            mismatch_recipients: Vec::new(),
        }
    }
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load the file if present, otherwise warn and fall back to defaults
    ///
    /// A malformed file is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Config file not found at {}, using built-in defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        let config = Self::load(path)?;
        info!("Loaded config file {}", path.display());
        Ok(config)
    }
}

/// Values supplied on the command line (clap fills them from env too)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub root_folder: Option<PathBuf>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
}

impl ConfigOverrides {
    /// Explicit config file, else `<config_dir>/cuentakm/config.toml`
    pub fn config_file(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => default_config_path(),
        }
    }
}

/// Upstream vision model settings
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
}

/// Administrative mail settings
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub endpoint: String,
    pub sender_email: String,
    pub sender_name: String,
    pub week_close_recipients: Vec<String>,
    pub mismatch_recipients: Vec<String>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub root_folder: PathBuf,
    pub database_path: PathBuf,
    pub media_root: PathBuf,
    pub static_dir: PathBuf,
    pub bind_address: String,
    pub port: u16,
    pub serve_media: bool,
    pub max_upload_bytes: usize,
    pub logging: LoggingConfig,
    pub extraction: ExtractionConfig,
    pub notifications: NotificationConfig,
    pub agents: Vec<String>,
}

impl AppConfig {
    /// Resolve configuration from overrides, environment and TOML
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self> {
        let toml_config = TomlConfig::load_or_default(&overrides.config_file()?)?;
        Ok(Self::from_parts(overrides, toml_config))
    }

    /// Logging level from the config file, read without logging
    ///
    /// Used before the tracing subscriber exists; any problem with the file
    /// yields `None` and is reported later by [`AppConfig::resolve`].
    pub fn peek_log_level(overrides: &ConfigOverrides) -> Option<String> {
        let path = overrides.config_file().ok()?;
        TomlConfig::load(&path).ok().map(|t| t.logging.level)
    }

    /// Combine an already-parsed TOML config with overrides and environment
    pub fn from_parts(overrides: &ConfigOverrides, toml_config: TomlConfig) -> Self {
        let root_folder = resolve_root_folder(
            overrides.root_folder.as_deref(),
            ROOT_FOLDER_ENV,
            toml_config.root_folder.as_deref(),
        );

        let database_path = under_root(
            &root_folder,
            toml_config.database_path,
            "cuentakm.db",
        );
        let media_root = under_root(&root_folder, toml_config.media_root, "media");
        let static_dir = under_root(&root_folder, toml_config.static_dir, "static");

        let extraction = ExtractionConfig {
            api_key: resolve_secret(
                "vision API key",
                &EXTRACTION_KEY_ENV,
                toml_config.extraction.api_key.as_deref(),
            ),
            endpoint: toml_config
                .extraction
                .endpoint
                .unwrap_or_else(|| DEFAULT_EXTRACTION_ENDPOINT.to_string()),
            model: toml_config
                .extraction
                .model
                .unwrap_or_else(|| DEFAULT_EXTRACTION_MODEL.to_string()),
            timeout: Duration::from_secs(
                toml_config
                    .extraction
                    .timeout_secs
                    .unwrap_or(DEFAULT_EXTRACTION_TIMEOUT_SECS),
            ),
        };

        let mail = toml_config.notifications;
        let notifications = NotificationConfig {
            enabled: mail.enabled,
            api_key: resolve_secret("mail API key", &MAIL_KEY_ENV, mail.api_key.as_deref()),
            endpoint: mail
                .endpoint
                .unwrap_or_else(|| DEFAULT_MAIL_ENDPOINT.to_string()),
            sender_email: mail
                .sender_email
                .unwrap_or_else(|| DEFAULT_SENDER_EMAIL.to_string()),
            sender_name: mail
                .sender_name
                .unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string()),
            week_close_recipients: mail.week_close_recipients,
            mismatch_recipients: mail.mismatch_recipients,
        };

        Self {
            root_folder,
            database_path,
            media_root,
            static_dir,
            bind_address: overrides
                .bind_address
                .clone()
                .or(toml_config.bind_address)
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            port: overrides.port.or(toml_config.port).unwrap_or(DEFAULT_PORT),
            serve_media: toml_config.serve_media,
            max_upload_bytes: toml_config
                .max_upload_bytes
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            logging: toml_config.logging,
            extraction,
            notifications,
            agents: toml_config.agents,
        }
    }
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    default_root_folder()
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cuentakm"))
        .unwrap_or_else(|| PathBuf::from("./cuentakm_data"))
}

/// Default configuration file location for the platform
fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("cuentakm").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

fn under_root(root: &Path, configured: Option<PathBuf>, default_name: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => path,
        Some(path) => root.join(path),
        None => root.join(default_name),
    }
}

/// Check a secret is non-empty and not only whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve a secret: environment variables (in order) → TOML
///
/// Warns when more than one source carries a value.
pub fn resolve_secret(label: &str, env_names: &[&str], toml_value: Option<&str>) -> Option<String> {
    let env_value = env_names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .filter(|v| is_valid_key(v))
            .map(|v| (*name, v))
    });
    let toml_value = toml_value.filter(|v| is_valid_key(v));

    match (env_value, toml_value) {
        (Some((name, value)), Some(_)) => {
            warn!(
                "{} found in both environment ({}) and TOML. Using environment.",
                label, name
            );
            Some(value)
        }
        (Some((name, value)), None) => {
            info!("{} loaded from environment variable {}", label, name);
            Some(value)
        }
        (None, Some(value)) => {
            info!("{} loaded from TOML config", label);
            Some(value.to_string())
        }
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_root_keeps_absolute_paths() {
        let root = Path::new("/srv/cuentakm");
        assert_eq!(
            under_root(root, Some(PathBuf::from("/data/km.db")), "cuentakm.db"),
            PathBuf::from("/data/km.db")
        );
        assert_eq!(
            under_root(root, Some(PathBuf::from("db/km.db")), "cuentakm.db"),
            PathBuf::from("/srv/cuentakm/db/km.db")
        );
        assert_eq!(
            under_root(root, None, "media"),
            PathBuf::from("/srv/cuentakm/media")
        );
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("sk-123"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("   "));
    }
}
