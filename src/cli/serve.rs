//! `codescout serve`: run the daemon in the foreground until `stop`,
//! SIGINT or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::{App, DaemonConfig};
use crate::error::SearchError;
use crate::server::{Server, ShutdownSignal};

use super::args::{LogFormat, ServeArgs};

pub fn cmd_serve(args: ServeArgs) -> Result<(), SearchError> {
    init_logging(&args.log_level, args.log_format);

    let config = daemon_config(&args)?;
    info!(
        root = %config.root.display(),
        socket = %config.socket_path.display(),
        cache_budget_mb = args.cache_budget_mb,
        parser = config.use_parser,
        "Starting daemon"
    );

    let app = App::start(config)?;
    if !args.no_watch {
        if let Err(e) = app.start_watcher() {
            warn!(error = %e, "File watcher unavailable, changes will need a reindex");
        }
    }

    let shutdown = ShutdownSignal::new();
    let server = match Server::bind(Arc::clone(&app), &app.config().socket_path, Arc::clone(&shutdown)) {
        Ok(server) => server,
        Err(e) => {
            app.shutdown();
            return Err(e);
        }
    };

    let on_signal = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || on_signal.trigger()) {
        warn!(error = %e, "Failed to install signal handler");
    }

    app.reindex_in_background_if_needed();

    shutdown.wait();
    info!("Shutting down");
    server.stop();
    app.shutdown();
    Ok(())
}

fn daemon_config(args: &ServeArgs) -> Result<DaemonConfig, SearchError> {
    let mut config = DaemonConfig::new(&args.project.dir)?;
    if let Some(state_dir) = &args.state_dir {
        config.state_dir = state_dir.clone();
    }
    if let Some(socket) = &args.project.socket {
        config.socket_path = socket.clone();
    }
    config.cache_budget_bytes = args.cache_budget_mb * 1024 * 1024;
    config.debounce = Duration::from_millis(args.debounce_ms);
    config.use_parser = !args.no_parser;
    Ok(config)
}

/// stderr only; stdout stays free for command output. `RUST_LOG` wins over
/// `--log-level`.
fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_daemon_config_from_flags() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();
        let args = ServeArgs::try_parse_from([
            "serve",
            "--dir",
            root,
            "--socket",
            "/tmp/x.sock",
            "--state-dir",
            "/tmp/state",
            "--cache-budget-mb",
            "8",
            "--debounce-ms",
            "200",
            "--no-parser",
        ])
        .unwrap();
        let config = daemon_config(&args).unwrap();
        assert_eq!(config.root, std::fs::canonicalize(dir.path()).unwrap());
        assert_eq!(config.socket_path.to_str(), Some("/tmp/x.sock"));
        assert_eq!(config.state_dir.to_str(), Some("/tmp/state"));
        assert_eq!(config.cache_budget_bytes, 8 * 1024 * 1024);
        assert_eq!(config.debounce, Duration::from_millis(200));
        assert!(!config.use_parser);
    }

    #[test]
    fn test_daemon_config_defaults() {
        let dir = TempDir::new().unwrap();
        let args = ServeArgs::try_parse_from(["serve", "-d", dir.path().to_str().unwrap()]).unwrap();
        let config = daemon_config(&args).unwrap();
        assert_eq!(config.state_dir, config.root.join(crate::app::STATE_DIR_NAME));
        assert!(config.socket_path.to_string_lossy().starts_with("/tmp/codescout-"));
        assert!(config.use_parser);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let args = ServeArgs::try_parse_from(["serve", "-d", "/definitely/not/here"]).unwrap();
        assert!(daemon_config(&args).is_err());
    }
}
