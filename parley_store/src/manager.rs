use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::{TranscriptKey, TranscriptStore, Turn};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbErr, EntityTrait, QueryFilter, QueryOrder, Schema, Set,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::entity::transcripts;

fn is_table_already_exists_error(err: &DbErr) -> bool {
    err.to_string().contains("table") && err.to_string().contains("already exists")
}

/// Listing entry for a stored conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSummary {
    pub conversation_id: Uuid,
    pub turn_count: usize,
    pub updated_at: DateTime<Utc>,
}

pub struct SqliteTranscriptStore {
    db: DatabaseConnection,
}

impl SqliteTranscriptStore {
    pub async fn new(db_path: &Path) -> anyhow::Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        info!("Connecting to database: {}", db_url);

        let db = Database::connect(&db_url).await?;
        Self::init(db).await
    }

    /// A private database that lives as long as the store.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let mut options = ConnectOptions::new("sqlite::memory:");
        // Each pooled connection would otherwise see its own empty database.
        options.max_connections(1).min_connections(1);

        let db = Database::connect(options).await?;
        Self::init(db).await
    }

    async fn init(db: DatabaseConnection) -> anyhow::Result<Self> {
        let backend = db.get_database_backend();
        let schema = Schema::new(backend);
        let stmt = schema.create_table_from_entity(transcripts::Entity);
        match db.execute_unprepared(&backend.build(&stmt).to_string()).await {
            Ok(_) => {}
            Err(e) if is_table_already_exists_error(&e) => {
                info!("Table already exists, skipping creation");
            }
            Err(e) => return Err(e.into()),
        }

        info!("SqliteTranscriptStore initialized");
        Ok(Self { db })
    }

    /// Conversations stored for `user`, most recently updated first.
    pub async fn list(&self, user: &str) -> anyhow::Result<Vec<TranscriptSummary>> {
        let models = transcripts::Entity::find()
            .filter(transcripts::Column::UserId.eq(user))
            .order_by_desc(transcripts::Column::UpdatedAt)
            .all(&self.db)
            .await?;

        Ok(models
            .into_iter()
            .map(|model| TranscriptSummary {
                conversation_id: model.conversation_id,
                turn_count: usize::try_from(model.turn_count).unwrap_or(0),
                updated_at: model.updated_at.and_utc(),
            })
            .collect())
    }

    /// Remove a transcript. Returns whether one existed.
    pub async fn delete(&self, key: &TranscriptKey) -> anyhow::Result<bool> {
        let result = transcripts::Entity::delete_by_id(key.storage_key())
            .exec(&self.db)
            .await?;

        info!("Deleted transcript: {}", key.storage_key());
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl TranscriptStore for SqliteTranscriptStore {
    async fn load(&self, key: &TranscriptKey) -> anyhow::Result<Option<Vec<Turn>>> {
        let Some(model) = transcripts::Entity::find_by_id(key.storage_key())
            .one(&self.db)
            .await?
        else {
            debug!("No transcript stored for {}", key.storage_key());
            return Ok(None);
        };

        let turns: Vec<Turn> = serde_json::from_str(&model.turns)?;
        debug!("Loaded {} turns for {}", turns.len(), model.key);
        Ok(Some(turns))
    }

    async fn save(&self, key: &TranscriptKey, turns: &[Turn]) -> anyhow::Result<()> {
        let storage_key = key.storage_key();
        let turns_json = serde_json::to_string(turns)?;
        let turn_count = i32::try_from(turns.len())?;
        let now = Utc::now().naive_utc();

        let existing = transcripts::Entity::find_by_id(storage_key.clone())
            .one(&self.db)
            .await?;

        if let Some(model) = existing {
            transcripts::Entity::update(transcripts::ActiveModel {
                key: Set(model.key),
                user_id: Set(model.user_id),
                conversation_id: Set(model.conversation_id),
                turns: Set(turns_json),
                turn_count: Set(turn_count),
                created_at: Set(model.created_at),
                updated_at: Set(now),
            })
            .exec(&self.db)
            .await?;
        } else {
            transcripts::ActiveModel {
                key: Set(storage_key.clone()),
                user_id: Set(key.user.clone()),
                conversation_id: Set(key.conversation_id),
                turns: Set(turns_json),
                turn_count: Set(turn_count),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&self.db)
            .await?;
        }

        info!("Saved {} turns to transcript: {}", turns.len(), storage_key);
        Ok(())
    }
}
