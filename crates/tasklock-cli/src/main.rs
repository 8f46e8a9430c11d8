mod cli;
mod config;
mod storage;
mod tasks;

use clap::Parser;
use color_eyre::Result;
use tasklock_core::{storage::SecureStore, TaskStore};
use tasklock_storage::{key_provider::KeyringProvider, secure_prefs::EncryptedPrefsStore};
use tasklock_task::{StoreTaskRepo, TaskCoordinator};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::ConfigCommand;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command.unwrap_or(cli::Command::Task(cli::TaskCommand::List)) {
        cli::Command::Version => print_version(),
        cli::Command::Health => run_health_check(&config).await?,
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        cli::Command::Task(cmd) => {
            let store = storage::open_store(&config).await?;
            let coordinator = TaskCoordinator::new(StoreTaskRepo::from_shared(store)).await?;
            tasks::handle(cmd, &coordinator).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("tasklock {}", env!("CARGO_PKG_VERSION"));
}

/// Open the database through the full key chain, then probe the secure prefs.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let store = storage::open_store(config).await?;
    let task_count = store.query_all().latest().len();

    let keyring = config.keyring();
    let prefs = EncryptedPrefsStore::new(
        storage::store_config(config)?.prefs_path(),
        KeyringProvider::new(keyring.service, keyring.account),
    );
    run_prefs_health(&prefs).await?;

    println!("Storage: ok ({task_count} task(s), {})", store.path().display());
    Ok(())
}

async fn run_prefs_health<S: SecureStore>(store: &S) -> Result<()> {
    let probe_key = "health/probe";
    let payload = b"ok";
    store.put(probe_key, payload).await?;
    let round_trip = store.get(probe_key).await?;
    store.delete(probe_key).await?;

    if round_trip != payload {
        color_eyre::eyre::bail!("secure prefs round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklock_storage::key_provider::InMemoryKeyProvider;

    #[tokio::test]
    async fn prefs_health_check_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let prefs = EncryptedPrefsStore::new(
            dir.path().join("secret_shared_prefs"),
            InMemoryKeyProvider::default(),
        );
        run_prefs_health(&prefs)
            .await
            .expect("health check should succeed");
    }
}
