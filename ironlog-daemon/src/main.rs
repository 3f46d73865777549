use anyhow::Result;
use clap::Parser;

use ironlog_core::config::IronlogConfig;
use ironlog_daemon::cli::DaemonCli;
use ironlog_daemon::logging::init_tracing;
use ironlog_daemon::orchestrator::Orchestrator;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = IronlogConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;

    // CLI flags take precedence over the file and IRONLOG_* variables
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    if let Some(pid_file) = cli.pid_file {
        config.general.pid_file = pid_file;
    }

    init_tracing(&config.general)?;
    ironlog_core::metrics::describe_all();

    let mut orchestrator = Orchestrator::build_from_config(config)?;

    if cli.validate {
        tracing::info!(
            stacks = orchestrator.stack_count(),
            "configuration is valid"
        );
        return Ok(());
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ironlog-daemon starting");
    orchestrator.run().await?;
    tracing::info!("ironlog-daemon shut down");
    Ok(())
}
