use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub github: GithubConfig,
    pub storage: StorageConfig,
    pub ratelimit: RateLimitConfig,
    pub scan: ScanConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `VETBOT_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("VETBOT_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            github: GithubConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
            ratelimit: RateLimitConfig::from_env_profiled(p),
            scan: ScanConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  github:     api={}, findings={}/{}, token={}",
            self.github.api_url,
            self.github.findings_owner,
            self.github.findings_repo,
            if self.github.token.is_some() { "set" } else { "(none)" }
        );
        tracing::info!(
            "  storage:    backlog={}, visited={}, reported={}, logs={}",
            self.storage.backlog_path.display(),
            self.storage.visited_path.display(),
            self.storage.reported_path.display(),
            self.storage.log_dir.display()
        );
        tracing::info!(
            "  ratelimit:  max_attempts={}, base_backoff={}ms, max_backoff={}s",
            self.ratelimit.max_attempts,
            self.ratelimit.base_backoff_ms,
            self.ratelimit.max_backoff_secs
        );
        tracing::info!(
            "  scan:       stop_policy={}, analyzer={}",
            self.scan.stop_policy,
            self.scan.analyzer_cmd.as_deref().unwrap_or("(none)")
        );
    }
}

// ── GitHub ────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub api_url: String,
    /// Repository that receives one issue per finding.
    pub findings_owner: String,
    pub findings_repo: String,
    pub labels: Vec<String>,
    pub timeout_secs: u64,
}

// Keeps the token out of `{:?}` output.
impl std::fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .field("findings_owner", &self.findings_owner)
            .field("findings_repo", &self.findings_repo)
            .field("labels", &self.labels)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl GithubConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            token: profiled_env_opt(p, "GITHUB_TOKEN"),
            api_url: profiled_env_or(p, "GITHUB_API_URL", "https://api.github.com"),
            findings_owner: profiled_env_or(p, "FINDINGS_OWNER", "github-vet"),
            findings_repo: profiled_env_or(p, "FINDINGS_REPO", "rangeclosure-findings"),
            labels: profiled_env_opt(p, "FINDINGS_LABELS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            timeout_secs: profiled_env_u64(p, "GITHUB_TIMEOUT_SECS", 30),
        }
    }

    /// The API token. Its absence is fatal: no call can succeed without it.
    pub fn token(&self) -> Result<&str, ConfigError> {
        self.token
            .as_deref()
            .ok_or(ConfigError::MissingCredential("GITHUB_TOKEN"))
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backlog_path: PathBuf,
    pub visited_path: PathBuf,
    pub reported_path: PathBuf,
    pub log_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            backlog_path: PathBuf::from(profiled_env_or(p, "BACKLOG_PATH", "repos.jsonl")),
            visited_path: PathBuf::from(profiled_env_or(p, "VISITED_PATH", "visited.jsonl")),
            reported_path: PathBuf::from(profiled_env_or(p, "REPORTED_PATH", "issues.jsonl")),
            log_dir: PathBuf::from(profiled_env_or(p, "LOG_DIR", "logs")),
        }
    }
}

// ── Rate limiting ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Attempts per request before a throttled or failing call is surfaced.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 1000,
            max_backoff_secs: 300,
        }
    }
}

impl RateLimitConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            max_attempts: profiled_env_u32(p, "RATELIMIT_MAX_ATTEMPTS", d.max_attempts).max(1),
            base_backoff_ms: profiled_env_u64(p, "RATELIMIT_BASE_BACKOFF_MS", d.base_backoff_ms),
            max_backoff_secs: profiled_env_u64(p, "RATELIMIT_MAX_BACKOFF_SECS", d.max_backoff_secs),
        }
    }
}

// ── Scan ──────────────────────────────────────────────────────

/// What the scan loop does when analysing one repository fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopPolicy {
    /// Stop requesting new items and drain.
    #[default]
    Halt,
    /// Log the failure and move on to the next item.
    Skip,
}

impl FromStr for StopPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "halt" | "stop" => Ok(StopPolicy::Halt),
            "skip" | "continue" => Ok(StopPolicy::Skip),
            other => Err(ConfigError::Invalid {
                key: "STOP_POLICY",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for StopPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopPolicy::Halt => f.write_str("halt"),
            StopPolicy::Skip => f.write_str("skip"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub stop_policy: StopPolicy,
    /// External analysis command, run once per repository.
    pub analyzer_cmd: Option<String>,
}

impl ScanConfig {
    fn from_env_profiled(p: &str) -> Self {
        let stop_policy = profiled_env_opt(p, "STOP_POLICY")
            .and_then(|v| match v.parse() {
                Ok(policy) => Some(policy),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring STOP_POLICY, using default");
                    None
                }
            })
            .unwrap_or_default();
        Self {
            stop_policy,
            analyzer_cmd: profiled_env_opt(p, "ANALYZER_CMD"),
        }
    }
}
