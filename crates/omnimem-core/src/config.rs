//! Configuration and path resolution.
//!
//! The home directory is the single piece of ambient state: it comes from an
//! explicit config path, the `OMNIMEM_HOME` environment variable, or the
//! platform home directory, in that order. Everything under it is derived.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Config/envelope schema version
pub const SCHEMA_VERSION: &str = "0.1.0";

const CONFIG_FILE_NAME: &str = "omnimem.config.json";

// ============================================================================
// PATHS
// ============================================================================

/// Resolved on-disk layout of one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPaths {
    /// Home directory (git repo root for sync)
    pub root: PathBuf,
    /// Layer-partitioned markdown tree
    pub markdown_root: PathBuf,
    /// Monthly-partitioned JSONL event log
    pub jsonl_root: PathBuf,
    /// Indexed relational view
    pub sqlite_path: PathBuf,
}

impl MemoryPaths {
    /// Standard layout under a home directory.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            markdown_root: root.join("data").join("markdown"),
            jsonl_root: root.join("data").join("jsonl"),
            sqlite_path: root.join("data").join("omnimem.db"),
            root,
        }
    }

    /// Per-process transient state directory.
    pub fn runtime_dir(&self) -> PathBuf {
        self.root.join("runtime")
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub markdown: Option<PathBuf>,
    #[serde(default)]
    pub jsonl: Option<PathBuf>,
    #[serde(default)]
    pub sqlite: Option<PathBuf>,
}

/// Git transport settings for the sync daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSyncConfig {
    #[serde(default = "default_remote_name")]
    pub remote_name: String,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Layer subtrees staged on push; empty means all content.
    #[serde(default)]
    pub include_layers: Vec<String>,
    /// Whether the event log is staged on push.
    #[serde(default = "default_true")]
    pub include_jsonl: bool,
}

impl Default for GithubSyncConfig {
    fn default() -> Self {
        Self {
            remote_name: default_remote_name(),
            remote_url: None,
            branch: default_branch(),
            include_layers: Vec::new(),
            include_jsonl: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub github: GithubSyncConfig,
}

/// Core-merge policy knobs. Boundary-only: recognized and carried so external
/// surfaces share one config file, not interpreted by this crate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreMergeConfig {
    #[serde(default)]
    pub default_merge_mode: Option<String>,
    #[serde(default)]
    pub default_max_merged_lines: Option<u32>,
    #[serde(default)]
    pub default_min_apply_quality: Option<f64>,
    #[serde(default)]
    pub default_loser_action: Option<String>,
}

/// Dashboard sidecar knobs. Boundary-only, same as [`CoreMergeConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebuiConfig {
    #[serde(default)]
    pub approval_required: Option<bool>,
    #[serde(default)]
    pub maintenance_preview_only_until: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Top-level configuration (`<home>/omnimem.config.json`).
///
/// Unknown keys are tolerated so older and newer processes can share a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmniMemConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub home: Option<PathBuf>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub daemon: crate::sync::DaemonConfig,
    #[serde(default)]
    pub core_merge: CoreMergeConfig,
    #[serde(default)]
    pub webui: WebuiConfig,
}

impl Default for OmniMemConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            home: None,
            storage: StorageConfig::default(),
            sync: SyncConfig::default(),
            daemon: crate::sync::DaemonConfig::default(),
            core_merge: CoreMergeConfig::default(),
            webui: WebuiConfig::default(),
        }
    }
}

fn default_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn default_remote_name() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

pub(crate) fn default_true() -> bool {
    true
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Default home: `$OMNIMEM_HOME`, else `<platform home>/.omnimem`.
pub fn default_home() -> Result<PathBuf> {
    if let Ok(env_home) = std::env::var("OMNIMEM_HOME") {
        if !env_home.trim().is_empty() {
            return Ok(PathBuf::from(env_home));
        }
    }
    let base = directories::BaseDirs::new().ok_or_else(|| {
        MemoryError::InvalidArgument("could not determine a home directory".to_string())
    })?;
    Ok(base.home_dir().join(".omnimem"))
}

/// Default config file location.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_home()?.join(CONFIG_FILE_NAME))
}

/// Load config from an explicit path, the default location, or defaults.
pub fn load_config(path: Option<&Path>) -> Result<OmniMemConfig> {
    let candidate = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };
    if candidate.exists() {
        let raw = std::fs::read_to_string(&candidate)?;
        let cfg: OmniMemConfig = serde_json::from_str(&raw)?;
        return Ok(cfg);
    }
    let mut cfg = OmniMemConfig::default();
    cfg.home = Some(
        candidate
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or(default_home()?),
    );
    Ok(cfg)
}

/// Persist config as pretty JSON with a trailing newline.
pub fn save_config(path: &Path, cfg: &OmniMemConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut body = serde_json::to_string_pretty(cfg)?;
    body.push('\n');
    std::fs::write(path, body)?;
    Ok(())
}

/// Resolve the on-disk layout for a loaded config.
pub fn resolve_paths(cfg: &OmniMemConfig) -> Result<MemoryPaths> {
    let root = match &cfg.home {
        Some(h) => h.clone(),
        None => default_home()?,
    };
    let defaults = MemoryPaths::under(&root);
    Ok(MemoryPaths {
        markdown_root: cfg
            .storage
            .markdown
            .clone()
            .unwrap_or(defaults.markdown_root),
        jsonl_root: cfg.storage.jsonl.clone().unwrap_or(defaults.jsonl_root),
        sqlite_path: cfg.storage.sqlite.clone().unwrap_or(defaults.sqlite_path),
        root,
    })
}

// ============================================================================
// TESTS
// ============================================================================
