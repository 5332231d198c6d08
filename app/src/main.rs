#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use parley_config::Config;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod command;

use command::{
    ChatInput, ChatStrategy, CommandStrategy, InfoStrategy, InitStrategy, SessionsInput,
    SessionsStrategy, VersionStrategy,
};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Streaming study-chat assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat on a surface, interactively or with a single message
    Chat {
        /// Surface to chat on (defaults to the config's default_surface)
        #[arg(short = 's', long)]
        surface: Option<String>,

        /// Conversation ID to resume
        #[arg(long)]
        session: Option<Uuid>,

        /// User the transcript is stored under
        #[arg(short = 'u', long, default_value = "default")]
        user: String,

        /// Single message to send
        #[arg(short = 'm', long)]
        message: Option<String>,

        /// Image to attach to the single message
        #[arg(short = 'i', long, requires = "message")]
        image: Option<PathBuf>,

        /// Model to use
        #[arg(short = 'M', long)]
        model: Option<String>,
    },
    /// List stored conversations of a user
    Sessions {
        #[arg(short = 'u', long, default_value = "default")]
        user: String,

        /// Delete this conversation instead of listing
        #[arg(long)]
        delete: Option<Uuid>,
    },
    /// Initialize configuration
    Init,
    /// Show resolved configuration
    Info,
    /// Show version
    Version,
}

/// `RUST_LOG` wins; otherwise the config's `logging.level`, else `info`.
/// Logs go to stderr so streamed replies on stdout stay clean.
fn init_logging() {
    let default_level = Config::load().map_or_else(|_| "info".to_string(), |c| c.logging.level);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            surface,
            session,
            user,
            message,
            image,
            model,
        } => {
            ChatStrategy
                .execute(ChatInput {
                    surface,
                    session_id: session,
                    user,
                    message,
                    image,
                    model,
                })
                .await
        }
        Commands::Sessions { user, delete } => {
            SessionsStrategy.execute(SessionsInput { user, delete }).await
        }
        Commands::Init => InitStrategy.execute(()).await,
        Commands::Info => InfoStrategy.execute(()).await,
        Commands::Version => VersionStrategy.execute(()).await,
    }
}
