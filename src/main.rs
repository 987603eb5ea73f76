use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod bridge;
mod cli;
mod commands;
mod config;
mod error;
mod events;
mod lm;
mod pipeline;
mod sanitize;
mod selector;
mod synthesizer;
mod templates;
#[cfg(test)]
mod test_support;
mod util;

use cli::{Command, RootArgs};

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing(args.global.verbose);

    match args.command {
        Command::Generate(generate) => commands::run_generate(&args.global, generate),
        Command::Select(select) => commands::run_select(&args.global, select),
        Command::Sanitize(sanitize) => commands::run_sanitize(sanitize),
        Command::Templates(templates) => commands::run_templates(&args.global, templates),
        Command::Config => commands::run_config(),
    }
}

/// Diagnostics go to stderr; stdout carries command output only.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
