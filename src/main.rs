//! polyexec daemon
//!
//! MCP server that compiles and runs code snippets in several guest
//! languages. Configuration comes from `POLYEXEC_CONFIG` (JSON), an optional
//! toolchain directory, and the flags below.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use polyexec_daemon::config::Config;
use polyexec_daemon::mcp;
use polyexec_daemon::pipeline::{Executor, ExecutorSettings};
use polyexec_daemon::process::HostProcessRunner;

#[derive(Parser, Debug)]
#[command(name = "polyexec-daemon")]
#[command(about = "MCP server that compiles and runs code snippets")]
struct Args {
    /// Run in stdio mode (for MCP clients)
    #[arg(long)]
    stdio: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory of extra toolchain descriptors (*.json)
    #[arg(long, env = "POLYEXEC_TOOLCHAIN_DIR")]
    toolchain_dir: Option<PathBuf>,

    /// Wall-clock limit for running a program, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Virtual-memory ceiling for running a program, in MiB
    #[arg(long)]
    memory_mb: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for MCP protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    config.apply_overrides(args.timeout, args.memory_mb);

    if let Some(dir) = &args.toolchain_dir {
        let discovered = Config::scan_toolchain_dir(dir);
        config.merge_toolchains(discovered);
    }

    let registry = Arc::new(config.build_registry());
    let settings = ExecutorSettings::from_config(&config);
    let executor = Arc::new(Executor::new(registry, HostProcessRunner::new(), settings));

    let settings = executor.settings();
    info!(
        languages = ?executor.registry().languages(),
        timeout = ?settings.run_limits.timeout,
        memory_bytes = ?settings.run_limits.memory_bytes,
        compile_timeout = ?settings.compile_timeout,
        workspace_root = %settings.workspace_root.display(),
        "Loaded configuration"
    );

    if args.stdio {
        mcp::serve_stdio(executor).await?;
    } else {
        anyhow::bail!("Only --stdio mode is currently supported");
    }

    Ok(())
}
