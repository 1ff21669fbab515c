use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "taskbox")]
#[command(about = "Background task runner for file batches and gallery downloads", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $TASKBOX_CONFIG or config/taskbox.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the task service and its HTTP API
    Server(ServerArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (defaults to server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_address() {
        let cli = Cli::parse_from(["taskbox", "server", "--address", "0.0.0.0:9000"]);
        match cli.command {
            Commands::Server(args) => {
                assert_eq!(args.address, Some("0.0.0.0:9000".parse().unwrap()));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_with_global_path() {
        let cli = Cli::parse_from(["taskbox", "config", "--config", "custom.toml"]);
        assert!(matches!(cli.command, Commands::Config));
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
    }
}
