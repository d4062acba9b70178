mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use proxybox::api;
use proxybox::config::Config;
use proxybox::observability;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Api(args) => {
            let config = match args.config {
                Some(path) => Config::load_from_path(path)?,
                None => Config::load()?,
            };
            observability::init_tracing(&config.app.log_level);
            api::server::run(config).await?;
        }
        Commands::Check(args) => {
            let config = Config::load()?;
            observability::init_tracing("warn");
            cli::run_check(args, config).await?;
        }
    }

    Ok(())
}
