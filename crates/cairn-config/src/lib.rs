//! Configuration for the cairn cache, file access and search layers.
//!
//! Configuration lives in a TOML file (`cairn.toml` or `.cairn.toml`) that is
//! discovered by walking up from a starting directory. Every field has a
//! default, so an empty (or missing) file yields a fully usable config.
//!
//! ```toml
//! [cache]
//! root = "/var/tmp/cairn"
//!
//! [cache.namespaces.files]
//! ttl_millis = 3600000
//! max_size_bytes = 10485760
//!
//! [locks]
//! max_wait_millis = 5000
//!
//! [search]
//! rg_path = "rg"
//! max_disk_results = 500
//!
//! [logging]
//! level = "debug"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

mod logging;

pub use logging::{init_tracing, LoggingConfig};

/// Overrides the cache root regardless of what the config file says.
pub const CACHE_DIR_ENV_VAR: &str = "CAIRN_CACHE_DIR";

/// Points at an explicit config file, absolute or relative to the discovery start.
pub const CONFIG_PATH_ENV_VAR: &str = "CAIRN_CONFIG_PATH";

const CONFIG_FILE_NAMES: [&str; 2] = ["cairn.toml", ".cairn.toml"];

const MIB: u64 = 1024 * 1024;
const HOUR_MILLIS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CairnConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-namespace expiry and size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Time-to-live applied to entries written without an explicit TTL.
    #[serde(default = "NamespaceConfig::default_ttl_millis")]
    pub ttl_millis: u64,
    /// Largest serialized value the namespace accepts.
    #[serde(default = "NamespaceConfig::default_max_size_bytes")]
    pub max_size_bytes: u64,
}

impl NamespaceConfig {
    fn default_ttl_millis() -> u64 {
        HOUR_MILLIS
    }

    fn default_max_size_bytes() -> u64 {
        5 * MIB
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_millis)
    }

    /// Built-in limits for the namespaces the cairn layers use themselves.
    pub fn builtin(namespace: &str) -> Option<Self> {
        let config = match namespace {
            "files" => Self {
                ttl_millis: HOUR_MILLIS,
                max_size_bytes: 10 * MIB,
            },
            "search" => Self {
                ttl_millis: 5 * 60 * 1000,
                max_size_bytes: 5 * MIB,
            },
            "config" => Self {
                ttl_millis: 24 * HOUR_MILLIS,
                max_size_bytes: MIB,
            },
            _ => return None,
        };
        Some(config)
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            ttl_millis: Self::default_ttl_millis(),
            max_size_bytes: Self::default_max_size_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache root directory. `CAIRN_CACHE_DIR` takes precedence when set.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Limits for namespaces that have neither an explicit nor a built-in entry.
    #[serde(default)]
    pub default: NamespaceConfig,
    #[serde(default)]
    pub namespaces: BTreeMap<String, NamespaceConfig>,
}

impl CacheConfig {
    /// A config rooted at `root`, with built-in namespace limits.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Effective limits for `namespace`: explicit entry, then built-in, then `default`.
    pub fn namespace(&self, namespace: &str) -> NamespaceConfig {
        self.namespaces
            .get(namespace)
            .copied()
            .or_else(|| NamespaceConfig::builtin(namespace))
            .unwrap_or(self.default)
    }

    /// Resolve the cache root directory.
    ///
    /// Order: `CAIRN_CACHE_DIR`, `cache.root`, then `~/.cairn/cache`.
    pub fn resolve_root(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = std::env::var_os(CACHE_DIR_ENV_VAR).filter(|dir| !dir.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        default_cache_root()
    }
}

fn default_cache_root() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .ok_or(ConfigError::MissingHomeDir)?;

    Ok(home.join(".cairn").join("cache"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long a writer waits for a held path before giving up with `LockTimeout`.
    #[serde(default = "LockConfig::default_max_wait_millis")]
    pub max_wait_millis: u64,
}

impl LockConfig {
    fn default_max_wait_millis() -> u64 {
        5_000
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_millis)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_wait_millis: Self::default_max_wait_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Directory searched by the disk phase. Defaults to the current directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Cache namespace scanned by the cache phase.
    #[serde(default = "SearchConfig::default_namespace")]
    pub namespace: String,
    /// ripgrep executable, looked up on `PATH` when not absolute.
    #[serde(default = "SearchConfig::default_rg_path")]
    pub rg_path: PathBuf,
    #[serde(default = "SearchConfig::default_max_matches_per_file")]
    pub max_matches_per_file: usize,
    #[serde(default = "SearchConfig::default_max_disk_results")]
    pub max_disk_results: usize,
    #[serde(default = "SearchConfig::default_case_sensitive")]
    pub case_sensitive: bool,
    /// Store combined responses in the `search` namespace.
    #[serde(default)]
    pub cache_results: bool,
}

impl SearchConfig {
    fn default_namespace() -> String {
        "files".to_owned()
    }

    fn default_rg_path() -> PathBuf {
        PathBuf::from("rg")
    }

    fn default_max_matches_per_file() -> usize {
        100
    }

    fn default_max_disk_results() -> usize {
        500
    }

    fn default_case_sensitive() -> bool {
        true
    }

    /// Search root, falling back to the process working directory.
    pub fn resolve_root(&self) -> PathBuf {
        match &self.root {
            Some(root) => root.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            root: None,
            namespace: Self::default_namespace(),
            rg_path: Self::default_rg_path(),
            max_matches_per_file: Self::default_max_matches_per_file(),
            max_disk_results: Self::default_max_disk_results(),
            case_sensitive: Self::default_case_sensitive(),
            cache_results: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("failed to determine home directory for default cache path")]
    MissingHomeDir,
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` includes a snippet of the source text; keep only the message.
        ConfigError::Toml(redact_quoted(err.message()))
    }
}

fn redact_quoted(message: &str) -> String {
    static QUOTED_STRING_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    let re = QUOTED_STRING_RE.get_or_init(|| regex::Regex::new(r#""(?:\\.|[^"\\])*""#).ok());
    match re {
        Some(re) => re.replace_all(message, r#""<redacted>""#).into_owned(),
        None => message.to_owned(),
    }
}

impl CairnConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Find and load the config that applies to `start_dir`.
    ///
    /// Returns the default config and `None` when no config file exists.
    pub fn discover(start_dir: &Path) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let Some(path) = discover_config_path(start_dir) else {
            tracing::debug!(
                target: "cairn.config",
                start = %start_dir.display(),
                "no config file found; using defaults"
            );
            return Ok((Self::default(), None));
        };

        let config = Self::load_from_path(&path)?;
        tracing::debug!(target: "cairn.config", path = %path.display(), "loaded config");
        Ok((config, Some(path)))
    }
}

/// Locate the config file for `start_dir`.
///
/// Search order:
/// 1) `CAIRN_CONFIG_PATH` (absolute or relative to `start_dir`)
/// 2) `cairn.toml` / `.cairn.toml` in `start_dir` and each of its ancestors
pub fn discover_config_path(start_dir: &Path) -> Option<PathBuf> {
    if let Some(value) = std::env::var_os(CONFIG_PATH_ENV_VAR).filter(|v| !v.is_empty()) {
        let candidate = PathBuf::from(value);
        let path = if candidate.is_absolute() {
            candidate
        } else {
            start_dir.join(candidate)
        };
        return Some(path);
    }

    start_dir.ancestors().find_map(|dir| {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    })
}
