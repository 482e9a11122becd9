mod analysis;
mod auth;
mod cli;
mod config;
mod error;
mod insights;
mod models;
mod providers;
mod report;
mod snapshot;

use std::process::ExitCode;

use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting CIPulse - CI pipeline performance analytics");

    ExitCode::from(cli.run().await)
}
