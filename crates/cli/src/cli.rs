use std::path::PathBuf;

use clap::Parser;
use vetbot_core::{Config, StopPolicy};

/// Scan GitHub repositories for a static-analysis pattern and file an issue
/// per finding.
///
/// Settings come from the environment (and `.env`); flags override them.
#[derive(Parser, Debug)]
#[command(name = "vetbot", version, about)]
pub struct CliArgs {
    /// Config profile: every key resolves as `{PROFILE}_{KEY}` first
    #[arg(long, env = "VETBOT_PROFILE")]
    pub profile: Option<String>,

    /// Backlog of repositories to scan (JSON lines)
    #[arg(long)]
    pub backlog: Option<PathBuf>,

    /// Visited-repository table
    #[arg(long)]
    pub visited: Option<PathBuf>,

    /// Reported-finding table
    #[arg(long)]
    pub reported: Option<PathBuf>,

    /// Directory for the daily-rotated log file
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// What to do when one repository fails: halt or skip
    #[arg(long)]
    pub stop_policy: Option<StopPolicy>,

    /// Analyzer command run once per repository
    #[arg(long)]
    pub analyzer_cmd: Option<String>,

    /// Log reports instead of filing issues; nothing is written to the
    /// visited or reported tables
    #[arg(long)]
    pub dry_run: bool,

    /// Mirror logs to stderr
    #[arg(long)]
    pub stderr: bool,
}

impl CliArgs {
    /// Resolve the config for the selected profile and apply flag overrides.
    pub fn config(&self) -> Config {
        let mut config = match self.profile.as_deref() {
            Some(profile) => Config::for_profile(profile),
            None => Config::from_env(),
        };

        let storage = &mut config.storage;
        if let Some(path) = &self.backlog {
            storage.backlog_path = path.clone();
        }
        if let Some(path) = &self.visited {
            storage.visited_path = path.clone();
        }
        if let Some(path) = &self.reported {
            storage.reported_path = path.clone();
        }
        if let Some(dir) = &self.log_dir {
            storage.log_dir = dir.clone();
        }
        if let Some(policy) = self.stop_policy {
            config.scan.stop_policy = policy;
        }
        if let Some(cmd) = &self.analyzer_cmd {
            config.scan.analyzer_cmd = Some(cmd.clone());
        }
        config
    }
}
