//! Git CLI transport with output-based error classification.
//!
//! The contract is the standard git CLI: stderr and stdout are part of the
//! interface and drive retry/remediation decisions. Selective-layer sync
//! stages only the configured subtrees plus (optionally) the event log.

use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::config::{GithubSyncConfig, MemoryPaths};

// ============================================================================
// MODES / SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    #[serde(rename = "noop")]
    Noop,
    #[serde(rename = "github-status")]
    Status,
    #[serde(rename = "github-pull")]
    Pull,
    #[serde(rename = "github-push")]
    Push,
    #[serde(rename = "github-bootstrap")]
    Bootstrap,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Noop => "noop",
            SyncMode::Status => "github-status",
            SyncMode::Pull => "github-pull",
            SyncMode::Push => "github-push",
            SyncMode::Bootstrap => "github-bootstrap",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub remote_name: String,
    pub branch: String,
    pub remote_url: Option<String>,
    /// Layer subtrees staged on push; empty stages everything.
    pub include_layers: Vec<String>,
    pub include_jsonl: bool,
    pub commit_message: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            remote_name: "origin".to_string(),
            branch: "main".to_string(),
            remote_url: None,
            include_layers: Vec::new(),
            include_jsonl: true,
            commit_message: "chore(memory): sync snapshot".to_string(),
        }
    }
}

impl From<&GithubSyncConfig> for SyncSettings {
    fn from(cfg: &GithubSyncConfig) -> Self {
        Self {
            remote_name: cfg.remote_name.clone(),
            branch: cfg.branch.clone(),
            remote_url: cfg.remote_url.clone(),
            include_layers: cfg.include_layers.clone(),
            include_jsonl: cfg.include_jsonl,
            ..SyncSettings::default()
        }
    }
}

// ============================================================================
// ERROR CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncErrorKind {
    /// No failure
    #[default]
    None,
    /// Credentials/permissions; manual action required
    Auth,
    /// Connectivity; worth retrying
    Network,
    /// Divergent histories; manual resolution required
    Conflict,
    Unknown,
}

impl SyncErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorKind::None => "none",
            SyncErrorKind::Auth => "auth",
            SyncErrorKind::Network => "network",
            SyncErrorKind::Conflict => "conflict",
            SyncErrorKind::Unknown => "unknown",
        }
    }
}

const AUTH_HINTS: &[&str] = &[
    "authentication failed",
    "fatal: authentication",
    "bad credentials",
    "permission denied (publickey)",
    "could not read username",
    "access denied",
    "unauthorized",
];

const NETWORK_HINTS: &[&str] = &[
    "could not resolve host",
    "network is unreachable",
    "connection timed out",
    "connection reset",
    "failed to connect",
    "temporary failure",
    "name or service not known",
    "proxy error",
    "tls",
    "ssl",
];

const CONFLICT_HINTS: &[&str] = &[
    "conflict",
    "merge conflict",
    "could not apply",
    "non-fast-forward",
    "fetch first",
    "needs merge",
    "would be overwritten",
    "rebase",
];

/// Classify a failed sync from its combined message and detail text.
pub fn classify_sync_error(message: &str, detail: &str) -> SyncErrorKind {
    let text = format!("{message}\n{detail}").to_lowercase();
    if AUTH_HINTS.iter().any(|h| text.contains(h)) {
        return SyncErrorKind::Auth;
    }
    if NETWORK_HINTS.iter().any(|h| text.contains(h)) {
        return SyncErrorKind::Network;
    }
    if CONFLICT_HINTS.iter().any(|h| text.contains(h)) {
        return SyncErrorKind::Conflict;
    }
    SyncErrorKind::Unknown
}

/// Auth and conflict failures require manual action; everything else retries.
pub fn should_retry_sync_error(kind: SyncErrorKind) -> bool {
    matches!(kind, SyncErrorKind::Network | SyncErrorKind::Unknown)
}

pub fn sync_error_hint(kind: SyncErrorKind) -> Option<&'static str> {
    match kind {
        SyncErrorKind::None => None,
        SyncErrorKind::Auth => {
            Some("Authentication failed. Verify credential refs/token/SSH key and run sync again.")
        }
        SyncErrorKind::Network => {
            Some("Network issue detected. Check connectivity/DNS/proxy, then retry sync.")
        }
        SyncErrorKind::Conflict => Some(
            "Sync conflict detected. Run a status sync, resolve Git conflicts, then pull and push.",
        ),
        SyncErrorKind::Unknown => Some(
            "Unknown sync failure. Inspect logs and Git status, then retry with conservative settings.",
        ),
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub ok: bool,
    pub mode: SyncMode,
    pub message: String,
    pub detail: String,
    pub error_kind: SyncErrorKind,
    pub retryable: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_hint: Option<String>,
}

impl SyncOutcome {
    pub fn success(mode: SyncMode, message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            mode,
            message: message.into(),
            detail: detail.into(),
            error_kind: SyncErrorKind::None,
            retryable: false,
            attempts: 1,
            remediation_hint: None,
        }
    }

    pub fn failure(mode: SyncMode, message: impl Into<String>, detail: impl Into<String>) -> Self {
        let message = message.into();
        let detail = detail.into();
        let kind = classify_sync_error(&message, &detail);
        Self {
            ok: false,
            mode,
            message,
            detail,
            error_kind: kind,
            retryable: should_retry_sync_error(kind),
            attempts: 1,
            remediation_hint: sync_error_hint(kind).map(str::to_string),
        }
    }
}

/// Seam for the git transport; tests substitute a scripted runner.
pub trait SyncRunner: Send + Sync {
    fn run_mode(&self, mode: SyncMode, settings: &SyncSettings) -> SyncOutcome;

    /// Whether the working tree has pending changes (push trigger input).
    fn is_dirty(&self) -> bool {
        false
    }
}

// ============================================================================
// GIT IMPLEMENTATION
// ============================================================================

/// Real git transport over the home directory.
pub struct GitSync {
    root: PathBuf,
    markdown_root: PathBuf,
    jsonl_root: PathBuf,
}

struct GitOutput {
    ok: bool,
    stdout: String,
    stderr: String,
}

impl GitOutput {
    fn combined(&self) -> String {
        format!("{}\n{}", self.stderr, self.stdout)
    }
}

impl GitSync {
    pub fn new(paths: &MemoryPaths) -> Self {
        Self {
            root: paths.root.clone(),
            markdown_root: paths.markdown_root.clone(),
            jsonl_root: paths.jsonl_root.clone(),
        }
    }

    fn git(&self, args: &[&str]) -> GitOutput {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output();
        match output {
            Ok(out) => GitOutput {
                ok: out.status.success(),
                stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            },
            Err(err) => GitOutput {
                ok: false,
                stdout: String::new(),
                stderr: format!("failed to spawn git: {err}"),
            },
        }
    }

    fn ensure_repo(&self) -> Option<GitOutput> {
        if self.root.join(".git").exists() {
            return None;
        }
        let out = self.git(&["init"]);
        if out.ok {
            None
        } else {
            Some(out)
        }
    }

    fn ensure_remote(&self, settings: &SyncSettings) -> Option<GitOutput> {
        let Some(url) = &settings.remote_url else {
            return None;
        };
        let remotes = self.git(&["remote"]);
        let exists = remotes
            .stdout
            .split_whitespace()
            .any(|r| r == settings.remote_name);
        let out = if exists {
            self.git(&["remote", "set-url", &settings.remote_name, url])
        } else {
            self.git(&["remote", "add", &settings.remote_name, url])
        };
        if out.ok {
            None
        } else {
            Some(out)
        }
    }

    fn has_remote(&self, settings: &SyncSettings) -> bool {
        settings.remote_url.is_some()
            || self
                .git(&["remote"])
                .stdout
                .split_whitespace()
                .any(|r| r == settings.remote_name)
    }

    /// Paths staged on push under selective-layer sync.
    fn staged_paths(&self, settings: &SyncSettings) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for layer in &settings.include_layers {
            let p = self.markdown_root.join(layer);
            if p.exists() {
                paths.push(p);
            }
        }
        if settings.include_jsonl && self.jsonl_root.exists() {
            paths.push(self.jsonl_root.clone());
        }
        paths
    }

    fn run_status(&self, settings: &SyncSettings) -> SyncOutcome {
        if let Some(err) = self.ensure_repo() {
            return SyncOutcome::failure(SyncMode::Status, "git init failed", err.combined());
        }
        let _ = settings;
        let out = self.git(&["status", "--short"]);
        if out.ok {
            SyncOutcome::success(SyncMode::Status, "github status ok", out.stdout.trim())
        } else {
            SyncOutcome::failure(SyncMode::Status, "github status failed", out.combined())
        }
    }

    fn run_pull(&self, settings: &SyncSettings) -> SyncOutcome {
        if let Some(err) = self.ensure_repo() {
            return SyncOutcome::failure(SyncMode::Pull, "git init failed", err.combined());
        }
        if let Some(err) = self.ensure_remote(settings) {
            return SyncOutcome::failure(SyncMode::Pull, "git remote setup failed", err.combined());
        }
        if !self.has_remote(settings) {
            return SyncOutcome::success(SyncMode::Pull, "remote not configured; nothing to pull", "");
        }
        let fetch = self.git(&["fetch", &settings.remote_name, &settings.branch]);
        if !fetch.ok {
            return SyncOutcome::failure(SyncMode::Pull, "github fetch failed", fetch.combined());
        }
        let pull = self.git(&[
            "pull",
            "--rebase",
            &settings.remote_name,
            &settings.branch,
        ]);
        if pull.ok {
            let status = self.git(&["status", "--short"]);
            SyncOutcome::success(SyncMode::Pull, "github pull ok", status.stdout.trim())
        } else {
            SyncOutcome::failure(SyncMode::Pull, "github pull failed", pull.combined())
        }
    }

    fn run_push(&self, settings: &SyncSettings) -> SyncOutcome {
        if let Some(err) = self.ensure_repo() {
            return SyncOutcome::failure(SyncMode::Push, "git init failed", err.combined());
        }
        if let Some(err) = self.ensure_remote(settings) {
            return SyncOutcome::failure(SyncMode::Push, "git remote setup failed", err.combined());
        }

        let staged = self.staged_paths(settings);
        let add = if settings.include_layers.is_empty() {
            self.git(&["add", "-A"])
        } else {
            let mut last = GitOutput {
                ok: true,
                stdout: String::new(),
                stderr: String::new(),
            };
            for path in &staged {
                let rendered = path.to_string_lossy().to_string();
                let out = self.git(&["add", "--", rendered.as_str()]);
                if !out.ok {
                    last = out;
                    break;
                }
            }
            last
        };
        if !add.ok {
            return SyncOutcome::failure(SyncMode::Push, "git add failed", add.combined());
        }

        let commit = self.git(&["commit", "-m", &settings.commit_message]);
        if !commit.ok && !commit.combined().contains("nothing to commit") {
            return SyncOutcome::failure(SyncMode::Push, "git commit failed", commit.combined());
        }

        if !self.has_remote(settings) {
            let status = self.git(&["status", "--short"]);
            return SyncOutcome::success(
                SyncMode::Push,
                "local commit ok; remote not configured",
                status.stdout.trim(),
            );
        }
        let push = self.git(&["push", "-u", &settings.remote_name, &settings.branch]);
        if push.ok {
            let status = self.git(&["status", "--short"]);
            SyncOutcome::success(SyncMode::Push, "github push ok", status.stdout.trim())
        } else {
            SyncOutcome::failure(SyncMode::Push, "github push failed", push.combined())
        }
    }
}

impl SyncRunner for GitSync {
    fn run_mode(&self, mode: SyncMode, settings: &SyncSettings) -> SyncOutcome {
        match mode {
            SyncMode::Noop => SyncOutcome::success(SyncMode::Noop, "sync noop", ""),
            SyncMode::Status => self.run_status(settings),
            SyncMode::Pull => self.run_pull(settings),
            SyncMode::Push => self.run_push(settings),
            // Bootstrap is orchestrated above the transport (pull, reindex, push).
            SyncMode::Bootstrap => SyncOutcome::failure(
                SyncMode::Bootstrap,
                "bootstrap is not a transport mode",
                "use bootstrap_sync",
            ),
        }
    }

    fn is_dirty(&self) -> bool {
        let out = self.git(&["status", "--porcelain"]);
        out.ok && !out.stdout.trim().is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            classify_sync_error("permission denied (publickey)", ""),
            SyncErrorKind::Auth
        );
        assert_eq!(
            classify_sync_error("could not resolve host: github.com", ""),
            SyncErrorKind::Network
        );
        assert_eq!(
            classify_sync_error("non-fast-forward update rejected", ""),
            SyncErrorKind::Conflict
        );
        assert_eq!(
            classify_sync_error("unexpected failure", ""),
            SyncErrorKind::Unknown
        );
        // Detail text participates too.
        assert_eq!(
            classify_sync_error("github pull failed", "fatal: Authentication failed"),
            SyncErrorKind::Auth
        );
    }

    #[test]
    fn test_retry_policy_per_class() {
        assert!(!should_retry_sync_error(SyncErrorKind::Auth));
        assert!(!should_retry_sync_error(SyncErrorKind::Conflict));
        assert!(should_retry_sync_error(SyncErrorKind::Network));
        assert!(should_retry_sync_error(SyncErrorKind::Unknown));
    }

    #[test]
    fn test_hints_exist_for_failures() {
        assert!(sync_error_hint(SyncErrorKind::Auth)
            .unwrap()
            .contains("Authentication failed"));
        assert!(sync_error_hint(SyncErrorKind::Network)
            .unwrap()
            .contains("Network issue"));
        assert!(sync_error_hint(SyncErrorKind::Conflict)
            .unwrap()
            .contains("Sync conflict"));
        assert!(sync_error_hint(SyncErrorKind::Unknown)
            .unwrap()
            .contains("Unknown sync failure"));
        assert!(sync_error_hint(SyncErrorKind::None).is_none());
    }

    #[test]
    fn test_failure_outcome_carries_classification() {
        let out = SyncOutcome::failure(SyncMode::Pull, "github pull failed", "merge conflict in x");
        assert!(!out.ok);
        assert_eq!(out.error_kind, SyncErrorKind::Conflict);
        assert!(!out.retryable);
        assert!(out.remediation_hint.unwrap().contains("Sync conflict"));
    }

    #[test]
    fn test_settings_from_config() {
        let cfg = GithubSyncConfig {
            remote_name: "backup".to_string(),
            remote_url: Some("git@example.com:m.git".to_string()),
            branch: "memory".to_string(),
            include_layers: vec!["long".to_string(), "archive".to_string()],
            include_jsonl: false,
        };
        let settings = SyncSettings::from(&cfg);
        assert_eq!(settings.remote_name, "backup");
        assert_eq!(settings.branch, "memory");
        assert_eq!(settings.include_layers.len(), 2);
        assert!(!settings.include_jsonl);
    }

    #[test]
    fn test_mode_wire_names() {
        assert_eq!(SyncMode::Pull.as_str(), "github-pull");
        let json = serde_json::to_string(&SyncMode::Bootstrap).unwrap();
        assert_eq!(json, "\"github-bootstrap\"");
    }
}
