//! SQLite-backed durable store.

use chat_types::{
    Conversation, ConversationStore, Message, MessageStore, Role, StoreError, User, UserStore,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        external_hash TEXT UNIQUE,
        username TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL,
        last_login INTEGER
    );

    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL REFERENCES users(id),
        title TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        last_activity INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS conversation_participants (
        conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id),
        PRIMARY KEY (conversation_id, user_id)
    );

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        author_user_id TEXT REFERENCES users(id),
        body TEXT NOT NULL,
        role TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
        timestamp INTEGER NOT NULL,
        CHECK ((role = 'user') = (author_user_id IS NOT NULL))
    );

    CREATE INDEX IF NOT EXISTS idx_conversations_owner ON conversations(owner_id);
    CREATE INDEX IF NOT EXISTS idx_participants_user ON conversation_participants(user_id);
    CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, timestamp);
"#;

const USER_COLUMNS: &str = "id, external_hash, username, email, created_at, last_login";

/// SQLite-backed durable store. Timestamps are stored as UTC microseconds.
///
/// Every statement runs on the blocking pool, so a locked database never
/// stalls an async worker and callers can bound the wait with a timeout.
pub struct SqliteStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path and apply the schema.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(path).map_err(map_err)?;
        Self::init(conn)
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(map_err)?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(map_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Other(format!("failed to acquire lock: {}", e)))?;
            f(&conn).map_err(map_err)
        })
        .await
        .map_err(|e| StoreError::Other(format!("sqlite task failed: {}", e)))?
    }

    async fn find_user_where(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
        let value = value.to_string();
        self.with_conn(move |conn| conn.query_row(&sql, [value], user_from_row).optional())
            .await
    }

    fn load_participants(
        conn: &rusqlite::Connection,
        conversation_id: &str,
    ) -> Result<Vec<String>, rusqlite::Error> {
        let mut stmt = conn.prepare(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([conversation_id], |row| row.get::<_, String>(0))?;
        rows.collect()
    }
}

fn map_err(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref code, ref msg)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            let detail = msg.clone().unwrap_or_else(|| e.to_string());
            // Foreign-key failures mean a referenced row is missing, not a duplicate.
            if detail.contains("FOREIGN KEY") {
                StoreError::NotFound(detail)
            } else {
                StoreError::Conflict(detail)
            }
        }
        other => StoreError::Other(other.to_string()),
    }
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::from_timestamp_micros(micros).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, micros))
}

fn user_from_row(row: &rusqlite::Row) -> Result<User, rusqlite::Error> {
    let last_login: Option<i64> = row.get(5)?;
    Ok(User {
        id: row.get(0)?,
        external_hash: row.get(1)?,
        username: row.get(2)?,
        email: row.get(3)?,
        created_at: from_micros(row.get(4)?)?,
        last_login: last_login.map(from_micros).transpose()?,
    })
}

fn conversation_from_row(row: &rusqlite::Row) -> Result<Conversation, rusqlite::Error> {
    Ok(Conversation {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        created_at: from_micros(row.get(3)?)?,
        last_activity: from_micros(row.get(4)?)?,
        participants: Vec::new(),
    })
}

fn message_from_row(row: &rusqlite::Row) -> Result<Message, rusqlite::Error> {
    let role: String = row.get(4)?;
    let role = Role::parse(&role).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown role {}", role).into(),
        )
    })?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        author_user_id: row.get(2)?,
        body: row.get(3)?,
        role,
        timestamp: from_micros(row.get(5)?)?,
    })
}

#[async_trait::async_trait]
impl UserStore for SqliteStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let user = user.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, external_hash, username, email, created_at, last_login) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id,
                    user.external_hash,
                    user.username,
                    user.email,
                    to_micros(user.created_at),
                    user.last_login.map(to_micros),
                ],
            )
        })
        .await?;
        Ok(())
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.find_user_where("id", id).await
    }

    async fn find_user_by_external_hash(&self, hash: &str) -> Result<Option<User>, StoreError> {
        self.find_user_where("external_hash", hash).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_user_where("email", email).await
    }

    async fn set_external_hash(&self, user_id: &str, hash: &str) -> Result<(), StoreError> {
        let (id, hash) = (user_id.to_string(), hash.to_string());
        let updated = self
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE users SET external_hash = ?1 WHERE id = ?2",
                    params![hash, id],
                )
            })
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }

    async fn touch_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let id = user_id.to_string();
        let updated = self
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE users SET last_login = ?1 WHERE id = ?2",
                    params![to_micros(at), id],
                )
            })
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConversationStore for SqliteStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let conversation = conversation.clone();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, owner_id, title, created_at, last_activity) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    conversation.id,
                    conversation.owner_id,
                    conversation.title,
                    to_micros(conversation.created_at),
                    to_micros(conversation.last_activity),
                ],
            )?;
            for participant in &conversation.participants {
                tx.execute(
                    "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
                    params![conversation.id, participant],
                )?;
            }
            tx.commit()
        })
        .await
    }

    async fn find_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let conv = conn
                .query_row(
                    "SELECT id, owner_id, title, created_at, last_activity FROM conversations WHERE id = ?1",
                    [id.as_str()],
                    conversation_from_row,
                )
                .optional()?;
            match conv {
                Some(mut conv) => {
                    conv.participants = Self::load_participants(conn, &conv.id)?;
                    Ok(Some(conv))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn list_conversations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT c.id, c.owner_id, c.title, c.created_at, c.last_activity
                 FROM conversations c
                 LEFT JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE c.owner_id = ?1 OR p.user_id = ?1
                 ORDER BY c.last_activity DESC",
            )?;
            let rows = stmt.query_map([user_id.as_str()], conversation_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                let mut conv = row?;
                conv.participants = Self::load_participants(conn, &conv.id)?;
                out.push(conv);
            }
            Ok(out)
        })
        .await
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let deleted = self
            .with_conn(move |conn| conn.execute("DELETE FROM conversations WHERE id = ?1", [id]))
            .await?;
        Ok(deleted > 0)
    }

    async fn add_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        let (conversation_id, user_id) = (conversation_id.to_string(), user_id.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
                params![conversation_id, user_id],
            )
        })
        .await?;
        Ok(())
    }

    async fn remove_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<bool, StoreError> {
        let (conversation_id, user_id) = (conversation_id.to_string(), user_id.to_string());
        let removed = self
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
                    params![conversation_id, user_id],
                )
            })
            .await?;
        Ok(removed > 0)
    }
}

#[async_trait::async_trait]
impl MessageStore for SqliteStore {
    async fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        let now = to_micros(Utc::now());
        let row = message.clone();
        let touched = self
            .with_conn(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let touched = tx.execute(
                    "UPDATE conversations SET last_activity = ?1 WHERE id = ?2",
                    params![now, row.conversation_id],
                )?;
                if touched == 0 {
                    // Nothing committed; the transaction rolls back on drop.
                    return Ok(0);
                }
                tx.execute(
                    "INSERT INTO messages (id, conversation_id, author_user_id, body, role, timestamp) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        row.id,
                        row.conversation_id,
                        row.author_user_id,
                        row.body,
                        row.role.as_str(),
                        to_micros(row.timestamp),
                    ],
                )?;
                tx.commit()?;
                Ok(touched)
            })
            .await?;
        if touched == 0 {
            tracing::debug!(conversation_id = %message.conversation_id, "append to missing conversation");
            return Err(StoreError::NotFound(format!(
                "conversation {}",
                message.conversation_id
            )));
        }
        Ok(())
    }

    async fn find_messages_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, author_user_id, body, role, timestamp
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY timestamp ASC, rowid ASC",
            )?;
            let rows = stmt.query_map([conversation_id.as_str()], message_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn count_messages(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let conversation_id = conversation_id.to_string();
        let count: i64 = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                    [conversation_id],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(count as usize)
    }
}
