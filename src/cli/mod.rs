//! CLI layer: argument parsing, command dispatch and the thin client
//! commands that talk to a running daemon.

pub mod args;
mod serve;

pub use args::*;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::app::DaemonConfig;
use crate::error::SearchError;
use crate::server::Client;
use crate::server::protocol::*;
use crate::types::{Hit, HitKind};

// ─── CLI ─────────────────────────────────────────────────────────────

/// Per-project code search daemon with symbol indexing and adaptive domain learning
#[derive(Parser, Debug)]
#[command(
    name = "codescout",
    version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_DATETIME"), ")"),
    about,
    after_help = "\
Start a daemon with 'codescout serve -d <DIR>', then query it from the same directory.\n\
Run 'codescout <COMMAND> --help' for options and examples."
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Run the daemon for a project in the foreground
    Serve(ServeArgs),

    /// Search symbols and file contents (grep-style output)
    Search(SearchArgs),

    /// Daemon status, index size and cache usage
    Health(ProjectArgs),

    /// List indexed files
    Files(FilesArgs),

    /// Learned domains with their atlas terms
    Domains(ProjectArgs),

    /// Learned bigrams and co-hit maps
    Bigrams(ProjectArgs),

    /// Learner counters and index size
    Stats(ProjectArgs),

    /// Recorded agent sessions
    Sessions(ProjectArgs),

    /// Rebuild the index from disk
    Reindex(ProjectArgs),

    /// Forget everything learned and indexed for the project
    Wipe(ProjectArgs),

    /// Stop the daemon
    Stop(ProjectArgs),
}

// ─── Main entry point ───────────────────────────────────────────────

pub fn run() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => serve::cmd_serve(args).map(|()| 0),
        Commands::Search(args) => cmd_search(&args),
        Commands::Health(p) => print_simple(&p, METHOD_HEALTH),
        Commands::Files(args) => cmd_files(&args),
        Commands::Domains(p) => print_simple(&p, METHOD_DOMAINS),
        Commands::Bigrams(p) => print_simple(&p, METHOD_BIGRAMS),
        Commands::Stats(p) => print_simple(&p, METHOD_STATS),
        Commands::Sessions(p) => print_simple(&p, METHOD_SESSIONS),
        Commands::Reindex(p) => print_simple(&p, METHOD_REINDEX),
        Commands::Wipe(p) => client_for(&p).and_then(|c| c.simple(METHOD_WIPE)).map(|_| {
            eprintln!("Project wiped.");
            0
        }),
        Commands::Stop(p) => client_for(&p).and_then(|c| c.shutdown()).map(|()| {
            eprintln!("Daemon stopping.");
            0
        }),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

// ─── Client commands ────────────────────────────────────────────────

fn socket_for(project: &ProjectArgs) -> Result<PathBuf, SearchError> {
    if let Some(socket) = &project.socket {
        return Ok(socket.clone());
    }
    Ok(DaemonConfig::new(&project.dir)?.socket_path)
}

fn client_for(project: &ProjectArgs) -> Result<Client, SearchError> {
    let socket = socket_for(project)?;
    let client = Client::new(&socket);
    if !client.ping() {
        return Err(SearchError::Transient(format!(
            "no daemon listening on {} (start one with 'codescout serve -d {}')",
            socket.display(),
            project.dir.display()
        )));
    }
    Ok(client)
}

fn print_simple(project: &ProjectArgs, method: &str) -> Result<i32, SearchError> {
    let value = client_for(project)?.simple(method)?;
    print_json(&value)?;
    Ok(0)
}

fn print_json(value: &Value) -> Result<(), SearchError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_files(args: &FilesArgs) -> Result<i32, SearchError> {
    let value = client_for(&args.project)?.files(args.glob.as_deref(), args.name.as_deref())?;
    if let Some(files) = value["files"].as_array() {
        for f in files {
            if let Some(path) = f["path"].as_str() {
                println!("{}", path);
            }
        }
    }
    eprintln!("{} files", value["count"].as_u64().unwrap_or(0));
    Ok(0)
}

/// Exit code follows grep: 0 on a match, 1 on none.
fn cmd_search(args: &SearchArgs) -> Result<i32, SearchError> {
    let options = args.to_options()?;
    let client = client_for(&args.project)?;
    let response = client.search(&args.query, &options)?;

    if args.json {
        print_json(&serde_json::to_value(&response)?)?;
    } else if options.quiet {
        return Ok(response.exit_code);
    } else if options.count_only {
        println!("{}", response.count);
        return Ok(if response.count > 0 { 0 } else { 1 });
    } else {
        for hit in &response.hits {
            for line in format_hit(hit) {
                println!("{}", line);
            }
        }
        eprintln!("{} hits in {:.3}ms", response.hits.len(), response.elapsed_us as f64 / 1000.0);
    }

    Ok(if response.hits.is_empty() && response.count == 0 { 1 } else { 0 })
}

/// `file:line:text` for the hit itself, `file-line-text` for context lines.
fn format_hit(hit: &Hit) -> Vec<String> {
    match hit.kind {
        HitKind::File => vec![hit.file.clone()],
        HitKind::Symbol => vec![format!("{}:{}:{}", hit.file, hit.line, hit.symbol)],
        HitKind::Content => {
            let mut lines = Vec::with_capacity(hit.context_lines.len() + 1);
            for (n, text) in hit.context_lines.range(..hit.line) {
                lines.push(format!("{}-{}-{}", hit.file, n, text));
            }
            lines.push(format!("{}:{}:{}", hit.file, hit.line, hit.content));
            for (n, text) in hit.context_lines.range(hit.line + 1..) {
                lines.push(format!("{}-{}-{}", hit.file, n, text));
            }
            lines
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn hit(kind: HitKind) -> Hit {
        Hit {
            file: "src/auth.go".to_string(),
            line: 12,
            symbol: "handleLogin".to_string(),
            kind,
            content: "func handleLogin() {".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_format_symbol_and_file_hits() {
        assert_eq!(format_hit(&hit(HitKind::Symbol)), vec!["src/auth.go:12:handleLogin"]);
        assert_eq!(format_hit(&hit(HitKind::File)), vec!["src/auth.go"]);
    }

    #[test]
    fn test_format_content_hit_with_context() {
        let mut h = hit(HitKind::Content);
        h.context_lines = BTreeMap::from([(11, "// entry".to_string()), (13, "\treturn nil".to_string())]);
        assert_eq!(
            format_hit(&h),
            vec![
                "src/auth.go-11-// entry",
                "src/auth.go:12:func handleLogin() {",
                "src/auth.go-13-\treturn nil",
            ]
        );
    }

    #[test]
    fn test_explicit_socket_skips_root_lookup() {
        let p = ProjectArgs {
            dir: PathBuf::from("/definitely/not/here"),
            socket: Some(PathBuf::from("/tmp/cs.sock")),
        };
        assert_eq!(socket_for(&p).unwrap(), PathBuf::from("/tmp/cs.sock"));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["codescout", "search", "login", "-w"]).unwrap();
        assert!(matches!(cli.command, Commands::Search(ref a) if a.query == "login" && a.word));
        let cli = Cli::try_parse_from(["codescout", "stop", "-d", "/tmp"]).unwrap();
        assert!(matches!(cli.command, Commands::Stop(_)));
    }
}
