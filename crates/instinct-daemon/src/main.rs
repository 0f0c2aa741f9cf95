mod capture;
mod cli;
mod config;
mod controller;
mod registry;
mod scheduler;
mod service;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    Cli::parse().run().await
}
