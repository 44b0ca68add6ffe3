//! CLI argument structs for all subcommands.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::error::SearchError;
use crate::types::{SearchMode, SearchOptions};

/// Where to find (or put) a project's daemon.
#[derive(Parser, Debug, Clone)]
pub struct ProjectArgs {
    /// Project root
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,

    /// Socket path (default: /tmp/codescout-<project hash>.sock)
    #[arg(long)]
    pub socket: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// State directory (default: <dir>/.codescout)
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Memory budget of the file cache in MiB
    #[arg(long, default_value = "250")]
    pub cache_budget_mb: u64,

    /// Debounce delay in ms for the file watcher
    #[arg(long, default_value = "50")]
    pub debounce_ms: u64,

    /// Index every file by content tokens only, without symbol parsing
    #[arg(long)]
    pub no_parser: bool,

    /// Do not watch the project for changes
    #[arg(long)]
    pub no_watch: bool,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log line format on stderr
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Parser, Debug)]
#[command(after_long_help = r#"EXAMPLES:
  Symbol or text:   codescout search handleLogin
  Any of:           codescout search "login logout"
  All of:           codescout search -a "token,refresh"
  Regex:            codescout search -E "func\s+handle\w+"
  Whole words:      codescout search -w cache
  Only Go files:    codescout search retry --include "*.go"
  Skip tests:       codescout search retry --exclude-dir "*test*"
  With context:     codescout search retry -C 2
  Changed lately:   codescout search retry --since 1700000000

NOTES:
  - Output is file:line:text, symbol hits first
  - Exit code 1 when nothing matched (like grep)"#)]
pub struct SearchArgs {
    /// Query: tokens are OR-ed; with -a, comma-separated terms are AND-ed
    pub query: String,

    #[command(flatten)]
    pub project: ProjectArgs,

    /// Treat the query as a regular expression
    #[arg(short = 'E', long)]
    pub regex: bool,

    /// Case-insensitive
    #[arg(short = 'i', long)]
    pub ignore_case: bool,

    /// Every comma-separated term must match
    #[arg(short = 'a', long = "and")]
    pub and_mode: bool,

    /// Match whole words only
    #[arg(short = 'w', long)]
    pub word: bool,

    /// Select non-matching lines
    #[arg(short = 'v', long)]
    pub invert: bool,

    /// Print only the number of matches
    #[arg(short = 'c', long)]
    pub count: bool,

    /// No output; exit status only
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Maximum hits (default 20)
    #[arg(short = 'm', long, default_value = "0")]
    pub max_count: i64,

    /// Only files whose name matches this glob
    #[arg(long)]
    pub include: Option<String>,

    /// Skip files whose name matches this glob
    #[arg(long)]
    pub exclude: Option<String>,

    /// Skip files under directories matching this glob
    #[arg(long)]
    pub exclude_dir: Option<String>,

    /// Only files modified at or after this unix time
    #[arg(long, default_value = "0")]
    pub since: i64,

    /// Only files modified before this unix time
    #[arg(long, default_value = "0")]
    pub before: i64,

    /// Print only the matched part of each line
    #[arg(short = 'o', long)]
    pub only_matching: bool,

    /// List files without any match
    #[arg(short = 'L', long)]
    pub files_without_match: bool,

    /// Lines of context after each content hit
    #[arg(short = 'A', long, default_value = "0")]
    pub after_context: usize,

    /// Lines of context before each content hit
    #[arg(short = 'B', long, default_value = "0")]
    pub before_context: usize,

    /// Lines of context around each content hit
    #[arg(short = 'C', long, default_value = "0")]
    pub context: usize,

    /// Print the raw JSON result
    #[arg(long)]
    pub json: bool,
}

impl SearchArgs {
    pub fn to_options(&self) -> Result<SearchOptions, SearchError> {
        if self.regex && self.ignore_case {
            return Err(SearchError::InvalidArgs("--regex and --ignore-case are mutually exclusive; use (?i) in the pattern".to_string()));
        }
        if self.count && self.quiet {
            return Err(SearchError::InvalidArgs("--count and --quiet are mutually exclusive".to_string()));
        }
        let mode = if self.regex {
            SearchMode::Regex
        } else if self.ignore_case {
            SearchMode::CaseInsensitive
        } else {
            SearchMode::Literal
        };
        Ok(SearchOptions {
            mode,
            and_mode: self.and_mode,
            word_boundary: self.word,
            invert_match: self.invert,
            count_only: self.count,
            quiet: self.quiet,
            max_count: self.max_count,
            include_glob: self.include.clone().unwrap_or_default(),
            exclude_glob: self.exclude.clone().unwrap_or_default(),
            exclude_dir_glob: self.exclude_dir.clone().unwrap_or_default(),
            since: self.since,
            before: self.before,
            only_matching: self.only_matching,
            files_without_match: self.files_without_match,
            after_context: self.after_context,
            before_context: self.before_context,
            context: self.context,
        })
    }
}

#[derive(Parser, Debug)]
pub struct FilesArgs {
    /// Glob matched against the file name or the whole path
    #[arg(short, long)]
    pub glob: Option<String>,

    /// Case-insensitive file name substring
    #[arg(short, long)]
    pub name: Option<String>,

    #[command(flatten)]
    pub project: ProjectArgs,
}
