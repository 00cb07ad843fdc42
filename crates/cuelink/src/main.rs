mod cli;
mod error;
mod server;

use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cuelink_api::Discovery;
use cuelink_config::Config;
use cuelink_core::{Bridge, BridgeConfig, DeviceAddress};

use crate::cli::{Cli, Command, ConfigArgs, GlobalOpts, ListArgs};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let Cli { global, command } = cli;

    // `config` must work even when the file on disk is invalid.
    if let Command::Config(args) = &command {
        return config_cmd(args, &global);
    }

    let config = cuelink_config::load_config(global.config.as_deref())?;
    let bridge_config = bridge_config(&config, &global)?;

    match command {
        Command::Serve(args) => {
            let bind: SocketAddr = match args.bind {
                Some(bind) => bind.parse().map_err(|e| CliError::Validation {
                    field: "bind".into(),
                    reason: format!("{e}"),
                })?,
                None => config.bind_address()?,
            };
            let bridge = Bridge::start(bridge_config).await;
            server::run(bridge, bind).await
        }
        Command::Discover(args) => {
            let instances = Discovery::new(bridge_config.discovery).discover().await;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&instances)?);
            } else {
                for instance in &instances {
                    println!("{}\t{}:{}", instance.name, instance.address, instance.port);
                }
            }
            Ok(())
        }
        Command::Workspaces(args) => {
            let bridge = Bridge::start(bridge_config).await;
            let workspaces = bridge.list_workspaces().await;
            bridge.shutdown().await;
            print_workspaces(&workspaces, &args)
        }
        Command::Config(_) => Ok(()),
    }
}

/// Config file values plus CLI overrides.
fn bridge_config(config: &Config, global: &GlobalOpts) -> Result<BridgeConfig, CliError> {
    let mut bridge = config.to_bridge_config();
    if let Some(device) = &global.device {
        let address: DeviceAddress = device.parse().map_err(|e| CliError::Validation {
            field: "device".into(),
            reason: format!("{e}"),
        })?;
        tracing::debug!(device = %address, "device overridden on the command line");
        bridge.device = Some(address);
    }
    Ok(bridge)
}

fn print_workspaces(
    workspaces: &[cuelink_core::Workspace],
    args: &ListArgs,
) -> Result<(), CliError> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(workspaces)?);
        return Ok(());
    }
    for workspace in workspaces {
        let id = if workspace.is_default() {
            "-"
        } else {
            workspace.id.as_str()
        };
        let lock = if workspace.has_passcode { " (passcode)" } else { "" };
        println!("{id}\t{}{lock}", workspace.display_name);
    }
    Ok(())
}

fn config_cmd(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(cuelink_config::config_path);

    if args.path {
        println!("{}", path.display());
        return Ok(());
    }
    if args.init {
        if cuelink_config::write_default_config(&path)? {
            println!("Wrote {}", path.display());
        } else {
            println!("{} already exists; left unchanged", path.display());
        }
        return Ok(());
    }

    let config = cuelink_config::load_config(Some(&path))?;
    print!("{}", config.to_toml()?);
    Ok(())
}
