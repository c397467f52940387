// CLI module - command-line argument parsing and handlers
//
// Subcommands:
// - replay FILE: run a recorded JSONL conversation through the engine
// - config --show / --path / --init: inspect or create the config file

use crate::config::{Config, VERSION};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tether - multi-session streaming core
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version = VERSION)]
#[command(about = "Routes interleaved backend streams to per-session views", long_about = None)]
pub struct Cli {
    /// Config file to use instead of ~/.config/tether/config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a JSON Lines file of backend messages
    Replay {
        /// Input file ("-" for stdin)
        file: PathBuf,

        /// Session that is active when the replay starts
        #[arg(long)]
        active: Option<String>,

        /// Sleep through `advance` lines and tick on a timer
        #[arg(long)]
        realtime: bool,
    },
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,

        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

impl Cli {
    /// Resolve configuration for this invocation
    pub fn load_config(&self) -> Result<Config> {
        let config = match &self.config {
            Some(path) => Config::load_from(path),
            None => Config::load(),
        };
        config.context("failed to load configuration")
    }

    fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Config::config_path)
    }
}

/// Handle `tether config`
pub fn handle_config(cli: &Cli, show: bool, path: bool, init: bool) -> Result<()> {
    if path {
        let path = cli
            .config_path()
            .context("could not determine config path")?;
        println!("{}", path.display());
    } else if init {
        let path = cli
            .config_path()
            .context("could not determine config path")?;
        if Config::write_default(&path)? {
            println!("Wrote default config to {}", path.display());
        } else {
            println!("Config already exists at {}", path.display());
        }
    } else if show {
        let config = cli.load_config()?;
        println!("# Effective configuration (env > file > defaults)");
        print!("{}", config.to_toml());
    } else {
        println!("Usage: tether config [--show|--path|--init]");
        println!();
        println!("Options:");
        println!("  --show    Display effective configuration");
        println!("  --path    Show config file path");
        println!("  --init    Write a default config file if none exists");
    }
    Ok(())
}
