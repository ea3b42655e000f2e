use clap::Parser;

use veneer::cli::{self, Args};
use veneer::repo::{RepoConfig, Repository};
use veneer::store::FileStore;

#[tokio::main]
async fn main() {
    // The launch contract is strict: exactly two positional arguments, and
    // anything else is a usage failure with status 255.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(_) => {
            eprintln!("{}", cli::USAGE);
            std::process::exit(255);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("VENEER_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    match run(args).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> veneer::Result<()> {
    cli::validate_roots(&args)?;

    let repo = Repository::open(RepoConfig {
        source_root: args.source_root,
        overlay_root: args.overlay_root,
    })?;
    let _store = FileStore::new(repo);

    // The network dispatch layer attaches to the store surface; the
    // launcher itself just holds the repository open until interrupted.
    tracing::info!("repository ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
