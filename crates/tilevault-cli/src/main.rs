use clap::Parser;
use tracing::Level;

mod cli;
mod commands;
mod config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    if !commands::run_command(cli).await? {
        std::process::exit(1);
    }
    Ok(())
}
