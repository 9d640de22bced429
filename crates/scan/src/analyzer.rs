//! The analysis step and its external-command implementation.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};
use vetbot_core::{Finding, Location, WorkItem};
use vetbot_ratelimit::{AccessError, ApiRequest, RateLimitedClient};
use vetbot_sampler::ItemError;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("analysis failed: {0}")]
    Failed(String),

    #[error("failed to run analyzer: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// True when no later item can succeed either.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AnalysisError::Access(e) if e.is_fatal())
    }
}

impl ItemError for AnalysisError {
    // A rejected credential or an API that never answered says nothing
    // about the repository.
    fn marks_visited(&self) -> bool {
        match self {
            AnalysisError::Access(e) => !(e.is_fatal() || e.is_transient()),
            AnalysisError::Failed(_) | AnalysisError::Io(_) => true,
        }
    }
}

/// Examines one repository for the target pattern.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Push every finding for `item` into `findings`. Findings pushed before
    /// an error is returned are still reported.
    async fn analyze(
        &self,
        item: &WorkItem,
        client: &RateLimitedClient,
        findings: &mut Vec<Finding>,
    ) -> Result<(), AnalysisError>;
}

#[derive(Debug, Deserialize)]
struct RepoMeta {
    default_branch: String,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    disabled: bool,
    /// `https://api.github.com/repos/o/r/{archive_format}{/ref}`
    #[serde(default)]
    archive_url: Option<String>,
}

impl RepoMeta {
    fn tarball_url(&self, item: &WorkItem, git_ref: &str) -> String {
        match &self.archive_url {
            Some(template) => template
                .replace("{archive_format}", "tarball")
                .replace("{/ref}", &format!("/{git_ref}")),
            None => format!(
                "https://api.github.com/repos/{}/{}/tarball/{git_ref}",
                item.repo.owner, item.repo.name
            ),
        }
    }
}

/// One line of analyzer output.
#[derive(Debug, Deserialize)]
struct FindingLine {
    path: String,
    start_line: u32,
    #[serde(default)]
    end_line: Option<u32>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    pattern: String,
}

/// Runs an external program per repository.
///
/// The program gets `VETBOT_OWNER`, `VETBOT_REPO`, `VETBOT_REF` and
/// `VETBOT_TARBALL_URL` in its environment and prints one JSON object per
/// finding on stdout (`path`, `start_line`, optional `end_line`, `snippet`,
/// `pattern`). A non-zero exit fails the item.
#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
}

impl CommandAnalyzer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line. `None` if it is blank.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl Analyzer for CommandAnalyzer {
    async fn analyze(
        &self,
        item: &WorkItem,
        client: &RateLimitedClient,
        findings: &mut Vec<Finding>,
    ) -> Result<(), AnalysisError> {
        let path = format!("/repos/{}/{}", item.repo.owner, item.repo.name);
        let meta: RepoMeta = match client.call_json(ApiRequest::get(path)).await {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => {
                info!(repo = %item.repo, "repository no longer exists, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if meta.archived || meta.disabled {
            info!(repo = %item.repo, archived = meta.archived, disabled = meta.disabled, "repository inactive, skipping");
            return Ok(());
        }

        let git_ref = item.cursor.as_deref().unwrap_or(&meta.default_branch);
        let output = Command::new(&self.program)
            .args(&self.args)
            .env("VETBOT_OWNER", &item.repo.owner)
            .env("VETBOT_REPO", &item.repo.name)
            .env("VETBOT_REF", git_ref)
            .env("VETBOT_TARBALL_URL", meta.tarball_url(item, git_ref))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut parse_error = None;
        for (n, line) in stdout.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<FindingLine>(line) {
                Ok(f) => findings.push(Finding {
                    repo: item.repo.clone(),
                    location: Location {
                        end_line: f.end_line.unwrap_or(f.start_line),
                        start_line: f.start_line,
                        path: f.path,
                    },
                    snippet: f.snippet,
                    pattern: f.pattern,
                }),
                Err(e) => {
                    parse_error = Some(format!("bad output line {}: {e}", n + 1));
                    break;
                }
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalysisError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        if let Some(message) = parse_error {
            return Err(AnalysisError::Failed(message));
        }

        debug!(repo = %item.repo, git_ref, findings = findings.len(), "analyzer finished");
        Ok(())
    }
}
