//! Workspace configuration (`bcp.toml`) and tracing setup.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod logging;

pub use logging::{init_tracing, LoggingConfig};

/// Environment variable naming an explicit config file.
pub const BCP_CONFIG_ENV_VAR: &str = "BCP_CONFIG";

const CONFIG_FILE_NAMES: [&str; 2] = ["bcp.toml", ".bcp.toml"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BcpConfig {
    #[serde(default)]
    pub bazel: BazelConfig,
    #[serde(default)]
    pub structure: StructureConfig,
    #[serde(default)]
    pub classpath: ClasspathConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// IDE projects mapped onto the workspace, used to attribute sources to
    /// projects during classpath assembly.
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BazelConfig {
    #[serde(default = "BazelConfig::default_executable")]
    pub executable: String,

    /// Run Bazel through the user's login shell so rc-file `PATH` tweaks apply.
    /// Unset means "on, except on Windows".
    #[serde(default)]
    pub shell_wrapping: Option<bool>,

    /// Per-command timeout. No timeout when unset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default = "BazelConfig::default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Extra environment for every Bazel invocation.
    #[serde(default = "BazelConfig::default_env")]
    pub env: BTreeMap<String, String>,

    /// Directory holding the classpath aspect; relative paths are resolved
    /// against the workspace root.
    #[serde(default)]
    pub aspect_directory: Option<PathBuf>,

    #[serde(default)]
    pub aspect_label: Option<String>,

    /// Overrides `--explicit_java_test_deps` from the workspace rc files.
    #[serde(default)]
    pub explicit_java_test_deps: Option<bool>,
}

impl BazelConfig {
    fn default_executable() -> String {
        "bazel".to_owned()
    }

    fn default_max_output_bytes() -> usize {
        64 * 1024 * 1024
    }

    fn default_env() -> BTreeMap<String, String> {
        BTreeMap::from([("PULLER_TIMEOUT".to_owned(), "3000".to_owned())])
    }

    pub fn shell_wrapping(&self) -> bool {
        self.shell_wrapping.unwrap_or(!cfg!(windows))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for BazelConfig {
    fn default() -> Self {
        Self {
            executable: Self::default_executable(),
            shell_wrapping: None,
            timeout_ms: None,
            max_output_bytes: Self::default_max_output_bytes(),
            env: Self::default_env(),
            aspect_directory: None,
            aspect_label: None,
            explicit_java_test_deps: None,
        }
    }
}

/// A project-structure strategy that can be switched on in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Maven,
    Query,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureConfig {
    /// Path segments marking a source root as test code.
    #[serde(default = "StructureConfig::default_test_folder_markers")]
    pub test_folder_markers: Vec<String>,

    /// Test source roots, relative to a package, used to guess params-file
    /// locations from a test class name.
    #[serde(default = "StructureConfig::default_test_source_dirs")]
    pub test_source_dirs: Vec<String>,

    /// Strategies to try, in order. `query` always runs last when enabled.
    #[serde(default = "StructureConfig::default_strategies")]
    pub strategies: Vec<StrategyKind>,
}

impl StructureConfig {
    fn default_test_folder_markers() -> Vec<String> {
        vec!["test".to_owned(), "tests".to_owned()]
    }

    fn default_test_source_dirs() -> Vec<String> {
        vec!["src/test/java".to_owned()]
    }

    fn default_strategies() -> Vec<StrategyKind> {
        vec![StrategyKind::Maven, StrategyKind::Query]
    }

    pub fn is_enabled(&self, kind: StrategyKind) -> bool {
        self.strategies.contains(&kind)
    }
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            test_folder_markers: Self::default_test_folder_markers(),
            test_source_dirs: Self::default_test_source_dirs(),
            strategies: Self::default_strategies(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClasspathConfig {
    /// Keep `*_deploy.jar` aggregates when reading params files.
    #[serde(default)]
    pub include_deploy_jars: bool,

    /// Glob over external repository names considered for jar discovery.
    #[serde(default = "ClasspathConfig::default_external_repository_filter")]
    pub external_repository_filter: String,

    #[serde(default = "ClasspathConfig::default_params_cache_ttl_ms")]
    pub params_cache_ttl_ms: u64,
}

impl ClasspathConfig {
    fn default_external_repository_filter() -> String {
        "*".to_owned()
    }

    fn default_params_cache_ttl_ms() -> u64 {
        60_000
    }

    pub fn params_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.params_cache_ttl_ms)
    }
}

impl Default for ClasspathConfig {
    fn default() -> Self {
        Self {
            include_deploy_jars: false,
            external_repository_filter: Self::default_external_repository_filter(),
            params_cache_ttl_ms: Self::default_params_cache_ttl_ms(),
        }
    }
}

/// `[[projects]]`: one IDE project and the Bazel targets it is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub source_roots: Vec<SourceRootConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRootConfig {
    /// Workspace-relative directory.
    pub path: String,
    /// Globs relative to `path`; empty admits everything.
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
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
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` quotes the offending source line.
        ConfigError::Toml(redact_quoted_values(err.message()))
    }
}

/// Replace quoted values in a TOML error message so config contents never reach logs.
fn redact_quoted_values(message: &str) -> String {
    static QUOTED: OnceLock<Option<regex::Regex>> = OnceLock::new();
    let quoted = QUOTED.get_or_init(|| regex::Regex::new(r#""(?:\\.|[^"\\])*"|'(?:\\.|[^'\\])*'"#).ok());
    match quoted {
        Some(re) => re.replace_all(message, "\"<redacted>\"").into_owned(),
        None => message.to_owned(),
    }
}

impl BcpConfig {
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(Self::load_from_str_with_unknown_keys(text)?.0)
    }

    /// Parse and also report keys that were ignored (typos, removed options).
    pub fn load_from_str_with_unknown_keys(text: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut unknown = Vec::new();
        let deserializer = toml::Deserializer::new(text);
        let config: BcpConfig = serde_ignored::deserialize(deserializer, |path| {
            unknown.push(path.to_string());
        })?;
        Ok((config, unknown))
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let (config, unknown) = Self::load_from_str_with_unknown_keys(&text)?;
        for key in unknown {
            tracing::warn!(target = "bcp.config", path = %path.display(), key = %key, "ignoring unknown config key");
        }
        Ok(config)
    }

    /// Make relative paths absolute against `root`.
    pub fn resolve_paths(&mut self, root: &Path) {
        for path in [&mut self.bazel.aspect_directory, &mut self.logging.file]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
    }
}

/// Find the config file for a workspace: `$BCP_CONFIG`, then `bcp.toml`, then `.bcp.toml`.
pub fn discover_config_path(workspace_root: &Path) -> Option<PathBuf> {
    if let Some(value) = std::env::var_os(BCP_CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(value);
        return Some(if candidate.is_absolute() {
            candidate
        } else {
            workspace_root.join(candidate)
        });
    }

    CONFIG_FILE_NAMES
        .into_iter()
        .map(|name| workspace_root.join(name))
        .find(|path| path.is_file())
}

/// Load the configuration for a workspace root.
///
/// If no config is present, returns [`BcpConfig::default`] and `None`.
pub fn load_for_workspace(
    workspace_root: &Path,
) -> Result<(BcpConfig, Option<PathBuf>), ConfigError> {
    let Some(path) = discover_config_path(workspace_root) else {
        return Ok((BcpConfig::default(), None));
    };

    let mut config = BcpConfig::load_from_path(&path)?;
    config.resolve_paths(workspace_root);
    Ok((config, Some(path)))
}
