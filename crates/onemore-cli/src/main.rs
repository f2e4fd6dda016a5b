use std::sync::Arc;

use tracing::info;

use onemore_api::{BackendConfig, LocalBackend};
use onemore_client::{ClientConfig, Repo};

mod commands;

use commands::Command;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "onemore=info,onemore_client=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, commands::USAGE);
            std::process::exit(2);
        }
    };

    // Config
    let backend_config = BackendConfig::from_env();
    let client_config = ClientConfig::from_env();

    let backend = LocalBackend::open(&backend_config)?;
    info!(db = %backend_config.db_path.display(), "Store opened");

    let repo = Repo::new(Arc::new(backend), client_config);
    command.run(&repo).await
}
