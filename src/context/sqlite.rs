//! SQLite-backed context store.
//!
//! One row per channel holds the summaries and the summarization flag; turns
//! live in a child table ordered by insertion. `save` replaces the turn list
//! wholesale inside a transaction, which keeps the store trivially consistent
//! with whatever compaction left in memory.

use super::{ChannelContext, ContextStore, ConversationTurn, Role};
use crate::ChannelId;
use crate::error::StoreError;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS channel_contexts (
    channel_id TEXT PRIMARY KEY,
    user_summary TEXT NOT NULL DEFAULT '',
    conversation_summary TEXT NOT NULL DEFAULT '',
    needs_summarization INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS conversation_turns (
    channel_id TEXT NOT NULL REFERENCES channel_contexts(channel_id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    PRIMARY KEY (channel_id, seq)
);
"#;

pub struct SqliteContextStore {
    pool: SqlitePool,
}

impl SqliteContextStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub async fn open(path: &Path) -> crate::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory() -> crate::Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        // A single connection: every handle must see the same memory db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ContextStore for SqliteContextStore {
    async fn load(&self, channel_id: &ChannelId) -> Result<ChannelContext, StoreError> {
        let load_err = |error: sqlx::Error| StoreError::Load {
            channel_id: channel_id.to_string(),
            message: error.to_string(),
        };

        let mut context = ChannelContext::new(channel_id.clone());

        let header = sqlx::query(
            "SELECT user_summary, conversation_summary, needs_summarization
             FROM channel_contexts WHERE channel_id = ?",
        )
        .bind(channel_id.as_ref())
        .fetch_optional(&self.pool)
        .await
        .map_err(load_err)?;

        let Some(header) = header else {
            return Ok(context);
        };
        context.user_summary = header.try_get("user_summary").map_err(load_err)?;
        context.conversation_summary =
            header.try_get("conversation_summary").map_err(load_err)?;
        context.needs_summarization =
            header.try_get::<i64, _>("needs_summarization").map_err(load_err)? != 0;

        let rows = sqlx::query(
            "SELECT role, content, timestamp FROM conversation_turns
             WHERE channel_id = ? ORDER BY seq",
        )
        .bind(channel_id.as_ref())
        .fetch_all(&self.pool)
        .await
        .map_err(load_err)?;

        for row in rows {
            let role: String = row.try_get("role").map_err(load_err)?;
            let role = match role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                other => {
                    return Err(StoreError::Serialize(format!("unknown role '{other}'")));
                }
            };
            context.turns.push(ConversationTurn {
                role,
                content: row.try_get("content").map_err(load_err)?,
                timestamp: row.try_get("timestamp").map_err(load_err)?,
            });
        }

        context.recompute_tokens();
        Ok(context)
    }

    async fn save(&self, context: &ChannelContext) -> Result<(), StoreError> {
        let save_err = |error: sqlx::Error| StoreError::Save {
            channel_id: context.channel_id.to_string(),
            message: error.to_string(),
        };

        let mut tx = self.pool.begin().await.map_err(save_err)?;

        sqlx::query(
            "INSERT INTO channel_contexts
                 (channel_id, user_summary, conversation_summary, needs_summarization)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (channel_id) DO UPDATE SET
                 user_summary = excluded.user_summary,
                 conversation_summary = excluded.conversation_summary,
                 needs_summarization = excluded.needs_summarization",
        )
        .bind(context.channel_id.as_ref())
        .bind(&context.user_summary)
        .bind(&context.conversation_summary)
        .bind(context.needs_summarization as i64)
        .execute(&mut *tx)
        .await
        .map_err(save_err)?;

        sqlx::query("DELETE FROM conversation_turns WHERE channel_id = ?")
            .bind(context.channel_id.as_ref())
            .execute(&mut *tx)
            .await
            .map_err(save_err)?;

        for (seq, turn) in context.turns.iter().enumerate() {
            sqlx::query(
                "INSERT INTO conversation_turns (channel_id, seq, role, content, timestamp)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(context.channel_id.as_ref())
            .bind(seq as i64)
            .bind(turn.role.to_string())
            .bind(&turn.content)
            .bind(turn.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(save_err)?;
        }

        tx.commit().await.map_err(save_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_turns_and_summaries() {
        let store = SqliteContextStore::open_in_memory().await.unwrap();
        let channel: ChannelId = ChannelId::from("chan-42");

        let mut context = ChannelContext::new(channel.clone());
        context.push_turn(ConversationTurn::new(Role::User, "what's up?"));
        context.push_turn(ConversationTurn::new(Role::Assistant, "not much"));
        context.conversation_summary = "small talk".into();
        context.needs_summarization = true;
        store.save(&context).await.unwrap();

        let loaded = store.load(&channel).await.unwrap();
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.turns[0].role, Role::User);
        assert_eq!(loaded.turns[1].content, "not much");
        assert_eq!(loaded.conversation_summary, "small talk");
        assert!(loaded.needs_summarization);
        assert_eq!(loaded.total_tokens, context.total_tokens);
    }

    #[tokio::test]
    async fn save_replaces_previous_turns() {
        let store = SqliteContextStore::open_in_memory().await.unwrap();
        let channel: ChannelId = ChannelId::from("chan");

        let mut context = ChannelContext::new(channel.clone());
        context.push_turn(ConversationTurn::new(Role::User, "one"));
        context.push_turn(ConversationTurn::new(Role::Assistant, "two"));
        store.save(&context).await.unwrap();

        // Compaction drops the oldest turn; the store must reflect that.
        context.turns.remove(0);
        context.recompute_tokens();
        store.save(&context).await.unwrap();

        let loaded = store.load(&channel).await.unwrap();
        assert_eq!(loaded.turns.len(), 1);
        assert_eq!(loaded.turns[0].content, "two");
    }

    #[tokio::test]
    async fn unknown_channel_loads_empty() {
        let store = SqliteContextStore::open_in_memory().await.unwrap();
        let loaded = store.load(&ChannelId::from("nope")).await.unwrap();
        assert!(loaded.turns.is_empty());
        assert!(!loaded.needs_summarization);
    }
}
