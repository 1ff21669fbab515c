mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use taskbox::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Server(args) => {
            taskbox::observability::init_tracing(&config.telemetry.log_filter);
            taskbox::api::run(args.address, config).await?
        }
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}
