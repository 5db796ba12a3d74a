#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tandem_core::protocol::{PrincipalKind, WireMessage};
use uuid::Uuid;

pub mod postgres;

pub use postgres::PostgresStorage;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
}

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// A persisted chat message. Core fields are immutable; only the
/// delivery/read status fields are ever mutated after creation, and a
/// flag is always set together with its timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub user_id: i64,
    pub partner_id: i64,
    pub sender_role: PrincipalKind,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

impl From<StoredMessage> for WireMessage {
    fn from(message: StoredMessage) -> Self {
        Self {
            id: message.id,
            user_id: message.user_id,
            partner_id: message.partner_id,
            sender_role: message.sender_role,
            body: message.body,
            created_at: message.created_at,
            is_delivered: message.is_delivered,
            delivered_at: message.delivered_at,
            is_read: message.is_read,
            read_at: message.read_at,
        }
    }
}

/// The conversation coordinates of a message whose status changed.
/// Enough to route a `message_status` broadcast to the sender's
/// presence group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRow {
    pub id: Uuid,
    pub user_id: i64,
    pub partner_id: i64,
    pub sender_role: PrincipalKind,
}

/// One inbox row before display metadata is merged in.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxRow {
    pub counterpart_id: i64,
    pub last_message: StoredMessage,
    pub unread_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: i64,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerProfile {
    pub id: i64,
    pub display_name: String,
    pub company_name: Option<String>,
    pub logo_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Domain-specific storage traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn ping(&self) -> Result<(), StorageError>;

    /// Persists a message with a server-assigned id and timestamp. The
    /// stored timestamp is the ordering authority for the conversation.
    async fn create_message(
        &self,
        user_id: i64,
        partner_id: i64,
        sender_role: PrincipalKind,
        body: &str,
    ) -> Result<StoredMessage, StorageError>;

    /// One page of a conversation, newest first, stable tiebreak on id.
    async fn conversation_page(
        &self,
        user_id: i64,
        partner_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, StorageError>;

    async fn conversation_message_count(
        &self,
        user_id: i64,
        partner_id: i64,
    ) -> Result<i64, StorageError>;

    /// Marks the given messages delivered, restricted to rows where
    /// the requester is the recipient (the sender can never transition
    /// its own messages). Returns only the rows actually updated.
    async fn mark_delivered(
        &self,
        ids: &[Uuid],
        recipient: PrincipalKind,
        recipient_id: i64,
    ) -> Result<Vec<StatusRow>, StorageError>;

    /// Same authorization rule as `mark_delivered`; marking a message
    /// read also promotes it to delivered so the two flags never
    /// diverge.
    async fn mark_read(
        &self,
        ids: &[Uuid],
        recipient: PrincipalKind,
        recipient_id: i64,
    ) -> Result<Vec<StatusRow>, StorageError>;

    /// Bulk-reads every unread counterpart message in one conversation.
    async fn mark_conversation_read(
        &self,
        user_id: i64,
        partner_id: i64,
        reader: PrincipalKind,
    ) -> Result<Vec<StatusRow>, StorageError>;

    /// Bulk-delivers every undelivered counterpart message in one
    /// conversation (the "seen this thread" operation).
    async fn mark_conversation_delivered(
        &self,
        user_id: i64,
        partner_id: i64,
        recipient: PrincipalKind,
    ) -> Result<Vec<StatusRow>, StorageError>;

    /// One row per distinct counterpart: the latest message plus the
    /// count of unread counterpart-sent messages.
    async fn inbox(&self, kind: PrincipalKind, id: i64) -> Result<Vec<InboxRow>, StorageError>;
}

/// Identity Directory collaborator: exact token lookup, no fuzzy
/// matching. Also serves the display metadata merged into inbox rows.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn resolve_user_token(&self, token: &str) -> Result<Option<UserProfile>, StorageError>;
    async fn resolve_partner_token(
        &self,
        token: &str,
    ) -> Result<Option<PartnerProfile>, StorageError>;
    async fn user_profile(&self, id: i64) -> Result<Option<UserProfile>, StorageError>;
    async fn partner_profile(&self, id: i64) -> Result<Option<PartnerProfile>, StorageError>;
}

/// Unified supertrait for code that needs both storage domains.
pub trait Storage: MessageStore + DirectoryStore {}

impl<T> Storage for T where T: MessageStore + DirectoryStore {}

// ---------------------------------------------------------------------------
// Migration helpers
// ---------------------------------------------------------------------------

pub async fn migrate() -> Result<(), StorageError> {
    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| StorageError::MissingDatabaseUrl)?;
    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .map_err(|error| StorageError::Database(error.to_string()))?;
    migrate_with_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_with_pool(pool: &sqlx::PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|error| StorageError::Migration(error.to_string()))?;
    Ok(())
}
