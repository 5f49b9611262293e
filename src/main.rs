use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use idx_tape::cli::Cli;
use idx_tape::config::Config;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    let cli = Cli::parse();
    if let Err(e) = idx_tape::cli::dispatch(cli, cfg).await {
        error!("fatal error: {e}");
        std::process::exit(1);
    }
}
