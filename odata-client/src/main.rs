use clap::Parser;
use colored::*;

use odata_client::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = match cli.global.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if let Err(e) = cli::run(cli).await {
        eprintln!("{} {:#}", "Error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}
