use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Error as SqlxError, Row};
use std::time::Duration;
use tracing::{debug, error, info};

use super::store::{ChatStore, StoreError};
use crate::models::{ChatKind, Conversation, Message, MessageStatus, NewMessage};

const SCHEMA_SQL: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        conversation_id VARCHAR(128) PRIMARY KEY,
        type VARCHAR(10) NOT NULL,
        participant_a VARCHAR(64),
        participant_b VARCHAR(64),
        group_id VARCHAR(64),
        last_message_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id BIGSERIAL PRIMARY KEY,
        message_id VARCHAR(36) NOT NULL UNIQUE,
        conversation_id VARCHAR(128) NOT NULL,
        sender_id VARCHAR(64) NOT NULL,
        receiver_id VARCHAR(64),
        group_id VARCHAR(64),
        type VARCHAR(10) NOT NULL,
        content TEXT NOT NULL,
        message_type VARCHAR(32) NOT NULL,
        status VARCHAR(10) NOT NULL DEFAULT 'sent',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS messages_conversation_idx ON messages (conversation_id, id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_members (
        group_id VARCHAR(64) NOT NULL,
        user_id VARCHAR(64) NOT NULL,
        joined_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (group_id, user_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS conversations_participants_idx ON conversations (participant_a, participant_b)
    "#,
];

/// Postgres backed chat storage
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    pub async fn new(database_url: &str) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Create the tables the chat core reads and writes
    pub async fn ensure_schema(&self) -> Result<(), SqlxError> {
        for statement in SCHEMA_SQL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema ready");
        Ok(())
    }

    fn log_pool_state(&self, action: &str) {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        debug!(
            "{}. Pool connections: {} idle, {} in use",
            action,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );
    }
}

fn conversation_from_row(row: &PgRow) -> Result<Conversation, StoreError> {
    let kind: String = row.try_get("type")?;
    Ok(Conversation {
        conversation_id: row.try_get("conversation_id")?,
        kind: ChatKind::parse(&kind).ok_or_else(|| StoreError::Corrupt(format!("conversation type '{}'", kind)))?,
        participant_a: row.try_get("participant_a")?,
        participant_b: row.try_get("participant_b")?,
        group_id: row.try_get("group_id")?,
        last_message_at: row.try_get("last_message_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn create_message(&self, msg: NewMessage) -> Result<Message, StoreError> {
        self.log_pool_state(&format!("Storing message {} in {}", msg.message_id, msg.conversation_id));

        let query_sql = r#"
            INSERT INTO messages(message_id, conversation_id, sender_id, receiver_id, group_id, type, content, message_type, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id;
        "#;
        let row = sqlx::query(query_sql)
            .bind(&msg.message_id)
            .bind(&msg.conversation_id)
            .bind(&msg.sender_id)
            .bind(&msg.receiver_id)
            .bind(&msg.group_id)
            .bind(msg.kind.as_str())
            .bind(&msg.content)
            .bind(&msg.message_type)
            .bind(MessageStatus::Sent.as_str())
            .bind(msg.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                let duplicate = matches!(&e, SqlxError::Database(db_err) if db_err.is_unique_violation());
                if duplicate {
                    StoreError::DuplicateMessage(msg.message_id.clone())
                } else {
                    error!("Failed to insert message {}: {}", msg.message_id, e);
                    StoreError::Database(e)
                }
            })?;

        let id: i64 = row.try_get("id")?;
        Ok(Message::from_new(id, msg))
    }

    async fn find_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError> {
        let query_sql = r#"
            SELECT conversation_id, type, participant_a, participant_b, group_id, last_message_at, created_at
            FROM conversations
            WHERE conversation_id = $1;
        "#;
        let row = sqlx::query(query_sql)
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn create_conversation_if_absent(
        &self,
        conversation_id: &str,
        participant_a: &str,
        participant_b: &str,
    ) -> Result<Conversation, StoreError> {
        self.log_pool_state(&format!("Creating conversation {}", conversation_id));

        let mut tx = self.pool.begin().await?;

        // The primary key decides the race, the loser inserts nothing
        let insert_sql = r#"
            INSERT INTO conversations(conversation_id, type, participant_a, participant_b)
            VALUES ($1, 'private', $2, $3)
            ON CONFLICT (conversation_id) DO NOTHING;
        "#;
        let inserted = sqlx::query(insert_sql)
            .bind(conversation_id)
            .bind(participant_a)
            .bind(participant_b)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let select_sql = r#"
            SELECT conversation_id, type, participant_a, participant_b, group_id, last_message_at, created_at
            FROM conversations
            WHERE conversation_id = $1;
        "#;
        let row = sqlx::query(select_sql)
            .bind(conversation_id)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;

        match row {
            Some(row) => {
                if inserted == 0 {
                    debug!("Conversation {} already existed", conversation_id);
                } else {
                    info!("Conversation {} created", conversation_id);
                }
                conversation_from_row(&row)
            }
            None => Err(StoreError::ConversationNotFound(conversation_id.to_string())),
        }
    }

    async fn mark_messages_read_up_to(&self, conversation_id: &str, max_id: i64) -> Result<u64, StoreError> {
        let query_sql = r#"
            UPDATE messages
            SET status = 'read'
            WHERE conversation_id = $1
                AND status = 'sent'
                AND id <= $2;
        "#;
        let result = sqlx::query(query_sql)
            .bind(conversation_id)
            .bind(max_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn touch_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        let now: DateTime<Utc> = Utc::now();
        sqlx::query("UPDATE conversations SET last_message_at = $1 WHERE conversation_id = $2")
            .bind(now)
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT user_id FROM group_members WHERE group_id = $1 ORDER BY joined_at")
            .bind(group_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("user_id").map_err(StoreError::from))
            .collect()
    }
}
