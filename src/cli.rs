//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::CacheBackend;
use crate::models::ConventionRules;
use clap::Parser;
use std::path::PathBuf;

/// Otterlens - concurrent pull request analysis
///
/// Asks the analysis producers for a title, reviewers and review priorities
/// for a change, with per-producer fallbacks and a result cache.
///
/// Examples:
///   otterlens --repo-id 42 --user-id 7 --source feature/login --repo-path .
///   otterlens --mode summary --repo-id 42 --user-id 7 --source feature/login --diff-file pr.diff
///   otterlens --mode convention --repo-id 42 --user-id 7 --source feature/login --function-names camelCase
///   otterlens --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Which analysis to run
    #[arg(long, default_value = "all", value_name = "MODE")]
    pub mode: Mode,

    /// Repository the pull request belongs to
    #[arg(long, value_name = "ID", required_unless_present = "init_config")]
    pub repo_id: Option<u64>,

    /// User requesting the analysis
    #[arg(long, value_name = "ID", env = "OTTERLENS_USER_ID", required_unless_present = "init_config")]
    pub user_id: Option<u64>,

    /// Source branch of the pull request
    #[arg(long, value_name = "BRANCH", required_unless_present = "init_config")]
    pub source: Option<String>,

    /// Target branch of the pull request
    #[arg(long, default_value = "main", value_name = "BRANCH")]
    pub target: String,

    /// File containing the unified diff of the change
    #[arg(long, value_name = "FILE", conflicts_with = "repo_path")]
    pub diff_file: Option<PathBuf>,

    /// Local git repository to compute the diff from
    ///
    /// The diff is taken between the target and source branches.
    #[arg(long, value_name = "DIR")]
    pub repo_path: Option<PathBuf>,

    /// Base URL of the analysis producers
    #[arg(long, value_name = "URL", env = "OTTERLENS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Overall analysis timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Cache backend (memory, file)
    #[arg(long, value_name = "BACKEND")]
    pub cache: Option<CacheBackend>,

    /// Share producer calls between identical concurrent requests
    #[arg(long)]
    pub coalesce: bool,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Write the result to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .otterlens.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Naming rule for file names (convention mode)
    #[arg(long, value_name = "RULE")]
    pub file_names: Option<String>,

    /// Naming rule for function names (convention mode)
    #[arg(long, value_name = "RULE")]
    pub function_names: Option<String>,

    /// Naming rule for variable names (convention mode)
    #[arg(long, value_name = "RULE")]
    pub variable_names: Option<String>,

    /// Naming rule for class names (convention mode)
    #[arg(long, value_name = "RULE")]
    pub class_names: Option<String>,

    /// Naming rule for constant names (convention mode)
    #[arg(long, value_name = "RULE")]
    pub constant_names: Option<String>,

    /// Merged pull request number (archive mode)
    #[arg(long, value_name = "ID")]
    pub pr_id: Option<u64>,

    /// Merged pull request title (archive mode)
    #[arg(long, value_name = "TEXT")]
    pub title: Option<String>,

    /// Merged pull request description (archive mode)
    #[arg(long, value_name = "TEXT")]
    pub body: Option<String>,

    /// Generate a default .otterlens.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Analysis to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    /// Title, reviewers and priority together (cached)
    #[default]
    All,
    Title,
    Reviewers,
    Priority,
    Summary,
    Convention,
    /// Store a merged pull request for future analyses
    Archive,
}

/// Output format for the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.source.as_deref().map_or(true, |s| s.trim().is_empty()) {
            return Err("Source branch must not be empty".to_string());
        }
        if self.target.trim().is_empty() {
            return Err("Target branch must not be empty".to_string());
        }

        if let Some(ref endpoint) = self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err("Endpoint URL must start with 'http://' or 'https://'".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(ref diff_file) = self.diff_file {
            if !diff_file.is_file() {
                return Err(format!("Diff file does not exist: {}", diff_file.display()));
            }
        }

        if let Some(ref repo_path) = self.repo_path {
            if !repo_path.is_dir() {
                return Err(format!(
                    "Repository path is not a directory: {}",
                    repo_path.display()
                ));
            }
        }

        if self.mode == Mode::Archive && (self.pr_id.is_none() || self.title.is_none()) {
            return Err("Archive mode requires --pr-id and --title".to_string());
        }

        Ok(())
    }

    /// Naming rules given on the command line.
    pub fn convention_rules(&self) -> ConventionRules {
        ConventionRules {
            file_names: self.file_names.clone(),
            function_names: self.function_names.clone(),
            variable_names: self.variable_names.clone(),
            class_names: self.class_names.clone(),
            constant_names: self.constant_names.clone(),
        }
    }
}
