//! Streaming chat on one surface, persisted per user and conversation.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use parley_conversation::{Conversation, ModelSummarizer, ReplyEvent, ReplyStream};
use parley_core::{Attachment, ClassifiedError, Summarizer, TranscriptKey, Turn};
use parley_providers::OpenAiCompatProvider;
use tracing::info;
use uuid::Uuid;

use super::init_common_components;

type ChatConversation = Conversation<Arc<OpenAiCompatProvider>>;

/// Input parameters for the Chat command strategy.
#[derive(Debug, Clone)]
pub struct ChatInput {
    /// Surface name; the config's default when absent
    pub surface: Option<String>,
    /// Conversation to resume (a new one is started if not provided)
    pub session_id: Option<Uuid>,
    pub user: String,
    /// Single message to send (non-interactive mode)
    pub message: Option<String>,
    /// Image attached to the single message
    pub image: Option<PathBuf>,
    /// Optional model override
    pub model: Option<String>,
}

/// Strategy for executing the Chat command.
///
/// - Resumes the stored transcript or starts from the surface greeting
/// - Prints reply deltas as they stream in
/// - Offers `/retry` after a retryable failure
/// - Saves the transcript when the session ends
#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

impl super::CommandStrategy for ChatStrategy {
    type Input = ChatInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let common = init_common_components().await?;

        let surface = input
            .surface
            .unwrap_or_else(|| common.config.default_surface.clone());
        let mut profile = common.config.surface(&surface)?;
        if let Some(model) = input.model {
            profile = profile.with_model(model);
        }

        let summarizer: Arc<dyn Summarizer> = Arc::new(ModelSummarizer::new(
            common.provider.clone(),
            common.config.provider.summary_model(),
        ));

        let key = TranscriptKey::new(
            input.user,
            input.session_id.unwrap_or_else(Uuid::now_v7),
        );
        let mut conversation =
            Conversation::resume(&common.store, &key, common.provider, summarizer, profile)
                .await?
                .with_classifier(common.classifier);
        info!(
            "Starting conversation {} on surface '{}'",
            key.conversation_id, surface
        );

        let outcome = match input.message {
            Some(message) => single_message(&mut conversation, message, input.image).await,
            None => run_interactive(&mut conversation).await,
        };

        conversation.persist(&common.store, &key).await?;
        outcome
    }
}

async fn single_message(
    conversation: &mut ChatConversation,
    message: String,
    image: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut turn = Turn::user(message);
    if let Some(path) = image {
        turn = turn.with_attachment(Attachment::from_path(&path)?);
    }

    let reply = conversation.send(turn).await?;
    stream_to_stdout(reply).await?;
    Ok(())
}

async fn run_interactive(conversation: &mut ChatConversation) -> anyhow::Result<()> {
    println!(
        "=== {} · conversation {} ===",
        conversation.profile().name,
        conversation.id()
    );
    println!("Type 'exit' to end the session, '/retry' to resend a failed message.\n");

    if let Some(last) = conversation.buffer().last() {
        println!("{}\n", last.text);
    }

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if matches!(input, "exit" | "quit" | "q") {
            break;
        }
        if input.is_empty() {
            continue;
        }

        let reply = if input == "/retry" {
            conversation.retry().await
        } else {
            conversation.send(Turn::user(input)).await
        };
        let result = match reply {
            Ok(reply) => stream_to_stdout(reply).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            match err.downcast_ref::<ClassifiedError>() {
                Some(classified) => report(classified),
                None => return Err(err),
            }
        }
        println!();
    }

    println!(
        "Session ended. {} turns in conversation {}",
        conversation.buffer().len(),
        conversation.id()
    );
    Ok(())
}

async fn stream_to_stdout(reply: ReplyStream<'_>) -> anyhow::Result<()> {
    write_reply(reply, &mut std::io::stdout()).await
}

/// Write deltas as they arrive. A classified failure is returned as is so
/// the caller can report it; write errors propagate as I/O errors.
async fn write_reply<R, W>(mut reply: R, out: &mut W) -> anyhow::Result<()>
where
    R: Stream<Item = Result<ReplyEvent, ClassifiedError>> + Unpin,
    W: Write,
{
    let mut printed = false;
    while let Some(event) = reply.next().await {
        match event {
            Ok(ReplyEvent::Delta(text)) => {
                write!(out, "{text}")?;
                out.flush()?;
                printed = true;
            }
            Ok(ReplyEvent::Committed(_)) => writeln!(out)?,
            Err(err) => {
                // The partial text was discarded; end its line.
                if printed {
                    writeln!(out)?;
                }
                return Err(err.into());
            }
        }
    }
    Ok(())
}

fn report(err: &ClassifiedError) {
    println!("⚠️  {}", err.message);
    if err.retryable {
        println!("   Type '/retry' to try again.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use parley_core::ErrorKind;

    /// Accepts writes but fails every flush.
    struct BrokenPipe(Vec<u8>);

    impl Write for BrokenPipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[tokio::test]
    async fn writes_deltas_then_newline() {
        let reply = stream::iter(vec![
            Ok(ReplyEvent::Delta("Hel".to_string())),
            Ok(ReplyEvent::Delta("lo".to_string())),
            Ok(ReplyEvent::Committed(Turn::assistant("Hello"))),
        ]);
        let mut out = Vec::new();

        write_reply(reply, &mut out).await.unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "Hello\n");
    }

    #[tokio::test]
    async fn flush_failure_is_an_io_error() {
        let reply = stream::iter(vec![Ok(ReplyEvent::Delta("Hi".to_string()))]);
        let mut out = BrokenPipe(Vec::new());

        let err = write_reply(reply, &mut out).await.unwrap_err();

        assert!(err.downcast_ref::<std::io::Error>().is_some());
        assert!(err.downcast_ref::<ClassifiedError>().is_none());
    }

    #[tokio::test]
    async fn classified_failure_passes_through() {
        let failure = ClassifiedError::new(ErrorKind::ServerError, "down", "503");
        let reply = stream::iter(vec![
            Ok(ReplyEvent::Delta("par".to_string())),
            Err(failure.clone()),
        ]);
        let mut out = Vec::new();

        let err = write_reply(reply, &mut out).await.unwrap_err();

        assert_eq!(err.downcast_ref::<ClassifiedError>(), Some(&failure));
        assert_eq!(String::from_utf8(out).unwrap(), "par\n");
    }
}
