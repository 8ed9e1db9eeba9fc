//! SQLite-backed `ConversationStore` implementation with durable persistence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;

use coral_channels::{ChannelCredentials, Platform};

use crate::records::{
    AgentRecord, ChannelRecord, Conversation, ConversationStatus, MessageRecord, MessageSender,
    RecordStatus,
};
use crate::store::{ConversationStore, StoreError};

/// Persistent SQLite store backend for channel, agent, conversation, and
/// message rows.
#[derive(Debug)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    fn open_connection(&self) -> Result<Connection, StoreError> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> Result<(), StoreError> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                channel_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                external_ref TEXT NOT NULL,
                status TEXT NOT NULL,
                credentials_json TEXT NOT NULL,
                created_unix_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_channels_platform
                ON channels (platform, status, external_ref);

            CREATE TABLE IF NOT EXISTS agents (
                agent_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                persona TEXT NOT NULL,
                traits_json TEXT NOT NULL,
                tone TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                temperature REAL NULL,
                max_tokens INTEGER NULL,
                document_scope_json TEXT NOT NULL,
                created_unix_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_agents_tenant ON agents (tenant_id, status);

            CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                customer_name TEXT NULL,
                customer_email TEXT NULL,
                metadata_json TEXT NOT NULL,
                created_unix_ms INTEGER NOT NULL,
                updated_unix_ms INTEGER NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_active_identity
                ON conversations (channel_id, external_id)
                WHERE status = 'active';

            CREATE TABLE IF NOT EXISTS messages (
                message_id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                content TEXT NOT NULL,
                sender TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                created_unix_ms INTEGER NOT NULL,
                FOREIGN KEY(conversation_id)
                    REFERENCES conversations(conversation_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages (conversation_id, created_unix_ms);
            "#,
        )?;
        Ok(())
    }
}

impl ConversationStore for SqliteStore {
    fn insert_channel(&self, channel: &ChannelRecord) -> Result<(), StoreError> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO channels
                (channel_id, tenant_id, platform, external_ref, status, credentials_json, created_unix_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                channel.id,
                channel.tenant_id,
                channel.platform.as_str(),
                channel.external_ref,
                channel.status.as_str(),
                serde_json::to_string(&channel.credentials)?,
                channel.created_unix_ms,
            ],
        )?;
        Ok(())
    }

    fn insert_agent(&self, agent: &AgentRecord) -> Result<(), StoreError> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO agents
                (agent_id, tenant_id, name, status, persona, traits_json, tone,
                 provider, model, temperature, max_tokens, document_scope_json, created_unix_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                agent.id,
                agent.tenant_id,
                agent.name,
                agent.status.as_str(),
                agent.persona,
                serde_json::to_string(&agent.traits)?,
                agent.tone,
                agent.provider,
                agent.model,
                agent.temperature,
                agent.max_tokens,
                serde_json::to_string(&agent.document_scope)?,
                agent.created_unix_ms,
            ],
        )?;
        Ok(())
    }

    fn find_active_channel(
        &self,
        platform: Platform,
        external_ref: Option<&str>,
    ) -> Result<Option<ChannelRecord>, StoreError> {
        let connection = self.open_connection()?;
        if let Some(external_ref) = external_ref.map(str::trim).filter(|value| !value.is_empty()) {
            let row = connection
                .query_row(
                    r#"
                    SELECT channel_id, tenant_id, platform, external_ref, status,
                           credentials_json, created_unix_ms
                    FROM channels
                    WHERE platform = ?1 AND status = 'active' AND external_ref = ?2
                    "#,
                    params![platform.as_str(), external_ref],
                    channel_from_row,
                )
                .optional()?;
            if let Some(row) = row {
                return row.map(Some);
            }
        }

        connection
            .query_row(
                r#"
                SELECT channel_id, tenant_id, platform, external_ref, status,
                       credentials_json, created_unix_ms
                FROM channels
                WHERE platform = ?1 AND status = 'active'
                ORDER BY created_unix_ms ASC
                LIMIT 1
                "#,
                params![platform.as_str()],
                channel_from_row,
            )
            .optional()?
            .transpose()
    }

    fn find_active_agent(&self, tenant_id: &str) -> Result<Option<AgentRecord>, StoreError> {
        let connection = self.open_connection()?;
        connection
            .query_row(
                r#"
                SELECT agent_id, tenant_id, name, status, persona, traits_json, tone,
                       provider, model, temperature, max_tokens, document_scope_json,
                       created_unix_ms
                FROM agents
                WHERE tenant_id = ?1 AND status = 'active'
                ORDER BY created_unix_ms ASC
                LIMIT 1
                "#,
                params![tenant_id],
                agent_from_row,
            )
            .optional()?
            .transpose()
    }

    fn agent_by_id(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError> {
        let connection = self.open_connection()?;
        connection
            .query_row(
                r#"
                SELECT agent_id, tenant_id, name, status, persona, traits_json, tone,
                       provider, model, temperature, max_tokens, document_scope_json,
                       created_unix_ms
                FROM agents
                WHERE agent_id = ?1
                "#,
                params![agent_id],
                agent_from_row,
            )
            .optional()?
            .transpose()
    }

    fn find_active_conversation(
        &self,
        channel_id: &str,
        external_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let connection = self.open_connection()?;
        connection
            .query_row(
                r#"
                SELECT conversation_id, tenant_id, channel_id, agent_id, external_id,
                       status, priority, customer_name, customer_email, metadata_json,
                       created_unix_ms, updated_unix_ms
                FROM conversations
                WHERE channel_id = ?1 AND external_id = ?2 AND status = 'active'
                "#,
                params![channel_id, external_id],
                conversation_from_row,
            )
            .optional()?
            .transpose()
    }

    fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let connection = self.open_connection()?;
        let result = connection.execute(
            r#"
            INSERT INTO conversations
                (conversation_id, tenant_id, channel_id, agent_id, external_id, status,
                 priority, customer_name, customer_email, metadata_json,
                 created_unix_ms, updated_unix_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                conversation.id,
                conversation.tenant_id,
                conversation.channel_id,
                conversation.agent_id,
                conversation.external_id,
                conversation.status.as_str(),
                conversation.priority,
                conversation.customer_name,
                conversation.customer_email,
                serde_json::to_string(&conversation.metadata)?,
                conversation.created_unix_ms,
                conversation.updated_unix_ms,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(error, _))
                if error.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::UniqueViolation {
                    channel_id: conversation.channel_id.clone(),
                    external_id: conversation.external_id.clone(),
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    fn touch_conversation(
        &self,
        conversation_id: &str,
        now_unix_ms: u64,
    ) -> Result<(), StoreError> {
        let connection = self.open_connection()?;
        let updated = connection.execute(
            r#"
            UPDATE conversations
            SET updated_unix_ms = ?1, status = 'active'
            WHERE conversation_id = ?2
            "#,
            params![now_unix_ms, conversation_id],
        )?;
        if updated == 0 {
            return Err(StoreError::ConversationNotFound(
                conversation_id.to_string(),
            ));
        }
        Ok(())
    }

    fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO messages
                (message_id, conversation_id, content, sender, metadata_json, created_unix_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                message.id,
                message.conversation_id,
                message.content,
                message.sender.as_str(),
                serde_json::to_string(&message.metadata)?,
                message.created_unix_ms,
            ],
        )?;
        Ok(())
    }

    fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT message_id, conversation_id, content, sender, metadata_json, created_unix_ms
            FROM messages
            WHERE conversation_id = ?1
            ORDER BY created_unix_ms DESC, message_id DESC
            LIMIT ?2
            "#,
        )?;
        let rows = statement.query_map(params![conversation_id, limit as i64], message_from_row)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row??);
        }
        // Query returns newest-first; callers expect original order.
        messages.reverse();
        Ok(messages)
    }
}

type RowResult<T> = rusqlite::Result<Result<T, StoreError>>;

fn channel_from_row(row: &rusqlite::Row<'_>) -> RowResult<ChannelRecord> {
    let platform_raw: String = row.get(2)?;
    let status_raw: String = row.get(4)?;
    let credentials_raw: String = row.get(5)?;

    Ok((|| {
        let platform = Platform::parse(&platform_raw).ok_or(StoreError::InvalidPersistedValue {
            field: "channels.platform",
            value: platform_raw.clone(),
        })?;
        let status = RecordStatus::parse(&status_raw).ok_or(StoreError::InvalidPersistedValue {
            field: "channels.status",
            value: status_raw.clone(),
        })?;
        let credentials: ChannelCredentials = serde_json::from_str(&credentials_raw)?;
        Ok(ChannelRecord {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            platform,
            external_ref: row.get(3)?,
            status,
            credentials,
            created_unix_ms: row.get::<_, i64>(6)? as u64,
        })
    })())
}

fn agent_from_row(row: &rusqlite::Row<'_>) -> RowResult<AgentRecord> {
    let status_raw: String = row.get(3)?;
    let traits_raw: String = row.get(5)?;
    let scope_raw: String = row.get(11)?;

    Ok((|| {
        let status = RecordStatus::parse(&status_raw).ok_or(StoreError::InvalidPersistedValue {
            field: "agents.status",
            value: status_raw.clone(),
        })?;
        let traits: Vec<String> = serde_json::from_str(&traits_raw)?;
        let document_scope: Vec<String> = serde_json::from_str(&scope_raw)?;
        Ok(AgentRecord {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            status,
            persona: row.get(4)?,
            traits,
            tone: row.get(6)?,
            provider: row.get(7)?,
            model: row.get(8)?,
            temperature: row.get(9)?,
            max_tokens: row.get(10)?,
            document_scope,
            created_unix_ms: row.get::<_, i64>(12)? as u64,
        })
    })())
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> RowResult<Conversation> {
    let status_raw: String = row.get(5)?;
    let metadata_raw: String = row.get(9)?;

    Ok((|| {
        let status =
            ConversationStatus::parse(&status_raw).ok_or(StoreError::InvalidPersistedValue {
                field: "conversations.status",
                value: status_raw.clone(),
            })?;
        let metadata: BTreeMap<String, Value> = serde_json::from_str(&metadata_raw)?;
        Ok(Conversation {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            channel_id: row.get(2)?,
            agent_id: row.get(3)?,
            external_id: row.get(4)?,
            status,
            priority: row.get(6)?,
            customer_name: row.get(7)?,
            customer_email: row.get(8)?,
            metadata,
            created_unix_ms: row.get::<_, i64>(10)? as u64,
            updated_unix_ms: row.get::<_, i64>(11)? as u64,
        })
    })())
}

fn message_from_row(row: &rusqlite::Row<'_>) -> RowResult<MessageRecord> {
    let sender_raw: String = row.get(3)?;
    let metadata_raw: String = row.get(4)?;

    Ok((|| {
        let sender = MessageSender::parse(&sender_raw).ok_or(StoreError::InvalidPersistedValue {
            field: "messages.sender",
            value: sender_raw.clone(),
        })?;
        let metadata: BTreeMap<String, Value> = serde_json::from_str(&metadata_raw)?;
        Ok(MessageRecord {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            content: row.get(2)?,
            sender,
            metadata,
            created_unix_ms: row.get::<_, i64>(5)? as u64,
        })
    })())
}
