//! Clap derive structures for the `cuelink` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// cuelink -- share show-control workspaces between many sessions
#[derive(Debug, Parser)]
#[command(
    name = "cuelink",
    version,
    about = "Bridge OSC show-control workspaces to WebSocket sessions",
    long_about = "Keeps one connection to a show-control device, shares each open\n\
        workspace between every attached session, and pushes cue state to\n\
        sessions as it changes.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Device address as host[:port] (overrides config and discovery)
    #[arg(long, short = 'd', global = true, value_name = "HOST[:PORT]")]
    pub device: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the WebSocket session server
    Serve(ServeArgs),

    /// Browse the network for devices
    Discover(ListArgs),

    /// List the workspaces open on the device
    #[command(alias = "ws")]
    Workspaces(ListArgs),

    /// Show or initialise the configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen address (overrides server.bind)
    #[arg(long, short = 'b', value_name = "ADDR")]
    pub bind: Option<String>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Print JSON instead of one line per entry
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Write a default config file if none exists
    #[arg(long)]
    pub init: bool,

    /// Print the config file path only
    #[arg(long, conflicts_with = "init")]
    pub path: bool,
}
