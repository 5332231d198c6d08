//! Static strategy pattern for CLI commands.
//!
//! Each command is a separate strategy with its own input type, so dispatch
//! in `main` is monomorphized and needs no trait objects.

use parley_config::Config;
use parley_core::ErrorClassifier;
use parley_providers::OpenAiCompatProvider;
use parley_store::SqliteTranscriptStore;
use std::sync::Arc;
use tracing::info;

mod chat;
mod info;
mod init;
mod sessions;
mod version;

pub use chat::{ChatInput, ChatStrategy};
pub use info::InfoStrategy;
pub use init::InitStrategy;
pub use sessions::{SessionsInput, SessionsStrategy};
pub use version::VersionStrategy;

/// Everything a chat-facing command needs, built from the config.
struct CommonComponents {
    config: Config,
    /// Shared by the provider's backoff and the conversation's reporting.
    classifier: ErrorClassifier,
    provider: Arc<OpenAiCompatProvider>,
    store: SqliteTranscriptStore,
}

async fn init_common_components() -> anyhow::Result<CommonComponents> {
    let config = Config::load()?;
    info!("Loaded config from ~/parley/config.json");

    let classifier = ErrorClassifier::new();
    let provider = Arc::new(build_provider(&config, classifier.clone()));

    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!("Database path: {}", db_path.display());
    let store = SqliteTranscriptStore::new(&db_path).await?;

    Ok(CommonComponents {
        config,
        classifier,
        provider,
        store,
    })
}

fn build_provider(config: &Config, classifier: ErrorClassifier) -> OpenAiCompatProvider {
    OpenAiCompatProvider::new(config.provider.api_key.clone())
        .with_base_url(config.provider.base_url.clone())
        .with_default_model(config.provider.model.clone())
        .with_retry_delays(config.provider.retry_delays())
        .with_classifier(classifier)
}

/// Core trait defining the contract for all command strategies.
pub trait CommandStrategy: Send + Sync + 'static {
    /// The input type this strategy accepts.
    type Input;

    /// Execute the command with the given input.
    ///
    /// # Errors
    /// Returns an error if command execution fails.
    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}
