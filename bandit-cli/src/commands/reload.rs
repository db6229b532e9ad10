//! Reload command: SIGHUP a running server through its pidfile

use std::path::PathBuf;

use anyhow::{Context, Result};
use bandit_core::{PidFileReload, ReloadSignal};
use clap::Args;

use super::serve::DEFAULT_PIDFILE;

/// Arguments for the reload command
#[derive(Debug, Args)]
pub struct ReloadArgs {
    /// Pidfile written by `bandit serve`
    #[arg(long, env = "PIDFILE", default_value = DEFAULT_PIDFILE)]
    pub pidfile: PathBuf,
}

/// Run the reload command
pub fn run(args: ReloadArgs) -> Result<()> {
    PidFileReload::new(&args.pidfile)
        .signal()
        .with_context(|| format!("Failed to reload server from {}", args.pidfile.display()))?;
    println!("Reload requested");
    Ok(())
}
