mod commands;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "vmspawn")]
#[command(about = "Per-user notebook servers on OpenStack", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the usual search locations)
    #[arg(short, long, global = true, env = "VMSPAWN_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Log provisioning progress at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SessionArgs {
    /// User the notebook server belongs to
    #[arg(short, long)]
    user: String,

    /// URL prefix of the notebook server (default: /user/<user>/)
    #[arg(long)]
    base_path: Option<String>,

    /// Environment for the notebook server, repeatable
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = utils::parse_env)]
    envs: Vec<(String, String)>,

    /// Also pass variables from this process's environment
    #[arg(long)]
    inherit_env: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a notebook server
    Start(SessionArgs),
    /// Check whether a user's notebook server is up
    Poll {
        #[arg(short, long)]
        user: String,
        /// Base path used for the health check
        #[arg(long)]
        base_path: Option<String>,
    },
    /// Delete a user's notebook server
    Stop {
        #[arg(short, long)]
        user: String,
    },
    /// Show saved session state
    State {
        /// Only this user's session
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Print the user data a server would boot with
    RenderUserdata(SessionArgs),
    /// Verify the openstack CLI and credentials
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries command output; logs go to stderr
    let mut filter = EnvFilter::from_default_env();
    if cli.verbose {
        filter = filter.add_directive(tracing::Level::DEBUG.into());
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Start(args) => {
            let config = utils::load_config(config_path)?;
            let session = utils::session(&config, &args);
            commands::start::handle(&config, session).await?;
        }
        Commands::Poll { user, base_path } => {
            let config = utils::load_config(config_path)?;
            let session = utils::session_for(&user, base_path.as_deref());
            commands::poll::handle(&config, session).await?;
        }
        Commands::Stop { user } => {
            let config = utils::load_config(config_path)?;
            commands::stop::handle(&config, vmspawn_core::UserSession::new(user)).await?;
        }
        Commands::State { user } => {
            commands::state::handle(user.as_deref()).await?;
        }
        Commands::RenderUserdata(args) => {
            let config = utils::load_config(config_path)?;
            let session = utils::session(&config, &args);
            commands::userdata::handle(&config, &session)?;
        }
        Commands::Check => {
            let config = utils::load_config(config_path)?;
            commands::check::handle(&config).await?;
        }
    }

    Ok(())
}
