use parley_core::TranscriptKey;
use uuid::Uuid;

use super::init_common_components;

#[derive(Debug, Clone)]
pub struct SessionsInput {
    pub user: String,
    /// Conversation to delete instead of listing
    pub delete: Option<Uuid>,
}

/// Strategy for listing or deleting a user's stored conversations.
#[derive(Debug, Clone, Copy)]
pub struct SessionsStrategy;

impl super::CommandStrategy for SessionsStrategy {
    type Input = SessionsInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let common = init_common_components().await?;

        if let Some(conversation_id) = input.delete {
            let key = TranscriptKey::new(input.user, conversation_id);
            if common.store.delete(&key).await? {
                println!("Deleted conversation {conversation_id}");
            } else {
                println!("No conversation {conversation_id} for user '{}'", key.user);
            }
            return Ok(());
        }

        let transcripts = common.store.list(&input.user).await?;
        if transcripts.is_empty() {
            println!("No stored conversations for user '{}'", input.user);
            return Ok(());
        }

        println!("Conversations for '{}':", input.user);
        for transcript in transcripts {
            println!(
                "  {}  {:>3} turns  updated {}",
                transcript.conversation_id,
                transcript.turn_count,
                transcript.updated_at.format("%Y-%m-%d %H:%M")
            );
        }
        Ok(())
    }
}
