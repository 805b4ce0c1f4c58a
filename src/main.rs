mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = xwinsys::SystemConfig {
        display: cli.display,
        ..Default::default()
    };

    let (name, result) = match cli.command {
        Command::Probe => ("probe", commands::probe(config)),
        Command::Settings { watch } => ("settings", commands::settings(config, watch).await),
        Command::Atom { names, create } => ("atom", commands::atom(config, &names, create)),
        Command::Clipboard { action } => ("clipboard", commands::clipboard(config, action).await),
        Command::Window { title, transparent } => {
            ("window", commands::window(config, &title, transparent).await)
        }
    };

    if let Err(e) = result {
        tracing::error!(command = name, error = %e, "command failed");
        eprintln!("xwinsys {name}: {e}");
        std::process::exit(1);
    }
}
