//! CLI argument definitions for ironlog-daemon.

use std::path::PathBuf;

use clap::Parser;

/// Ironlog netfilter event logging daemon.
///
/// Receives ULOG datagrams, runs them through the configured plugin
/// stacks and writes the results to syslog and database sinks.
#[derive(Parser, Debug)]
#[command(name = "ironlog-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to ironlog.toml configuration file.
    #[arg(short, long, default_value = "/etc/ironlog/ironlog.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate the configuration, build every stack, and exit.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path.
    #[arg(long)]
    pub pid_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = DaemonCli::parse_from(["ironlog-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/ironlog/ironlog.toml"));
        assert!(!cli.validate);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn overrides() {
        let cli = DaemonCli::parse_from([
            "ironlog-daemon",
            "-c",
            "/tmp/ironlog.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--validate",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/ironlog.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert!(cli.validate);
    }
}
