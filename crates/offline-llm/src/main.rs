mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Commands;
use crate::config::AppConfig;

/// Logs go to stderr; stdout carries only generated text.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,offline_llm=debug"));
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if std::env::var("OFFLINE_LLM_LOG_FORMAT").is_ok_and(|v| v == "json") {
        fmt.json().init();
    } else {
        fmt.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let args = cli::Cli::parse();

    match args.command {
        Commands::Run(run_args) => cli::run::execute(run_args, AppConfig::load_or_default()?).await,
        Commands::Generate(gen_args) => {
            cli::generate::execute(gen_args, AppConfig::load_or_default()?).await
        }
        Commands::Models(m) => cli::models::execute(m, AppConfig::load_or_default()?).await,
        Commands::Config(c) => cli::config_cmd::execute(c).await,
    }
}
