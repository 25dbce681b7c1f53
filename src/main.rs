use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use keyvault_fetch::{config, logging, ConfigError, KeyVaultClient, TokenCache};

#[derive(Parser, Debug)]
#[command(name = "keyvault-fetch", version, about = "Fetch secrets from Azure Key Vault")]
struct Cli {
    /// Dotenv file merged into the environment before reading configuration
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // The env file may itself set LOG_LEVEL, so load it before the logger.
    let env_loaded = config::load_env_file(&cli.env_file);
    logging::init(logging::level_from(
        std::env::var(logging::LOG_LEVEL).ok().as_deref(),
    ));

    match fetch(env_loaded).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn fetch(env_loaded: Result<(), ConfigError>) -> Result<()> {
    env_loaded.context("failed to parse args")?;

    let http = reqwest::Client::new();
    let cache = TokenCache::system();
    let mut stdout = std::io::stdout().lock();
    let report = keyvault_fetch::execute(
        |key| std::env::var(key).ok(),
        &cache,
        |config, credential| {
            KeyVaultClient::new(http.clone(), config.vault_base_url().clone(), credential)
        },
        &mut stdout,
    )
    .await
    .context("failed to get secrets")?;

    info!("Done. fetched={} failed={}", report.fetched, report.failed);
    Ok(())
}
