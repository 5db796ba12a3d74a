use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tandem_core::protocol::PrincipalKind;
use uuid::Uuid;

use super::{db_error, parse_role, PostgresStorage};
use crate::{InboxRow, MessageStore, StatusRow, StorageError, StoredMessage};

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    user_id: i64,
    partner_id: i64,
    sender_role: String,
    body: String,
    created_at: DateTime<Utc>,
    is_delivered: bool,
    delivered_at: Option<DateTime<Utc>>,
    is_read: bool,
    read_at: Option<DateTime<Utc>>,
}

impl MessageRow {
    fn into_message(self) -> Result<StoredMessage, StorageError> {
        Ok(StoredMessage {
            id: self.id,
            user_id: self.user_id,
            partner_id: self.partner_id,
            sender_role: parse_role(&self.sender_role)?,
            body: self.body,
            created_at: self.created_at,
            is_delivered: self.is_delivered,
            delivered_at: self.delivered_at,
            is_read: self.is_read,
            read_at: self.read_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct StatusUpdateRow {
    id: Uuid,
    user_id: i64,
    partner_id: i64,
    sender_role: String,
}

impl StatusUpdateRow {
    fn into_status(self) -> Result<StatusRow, StorageError> {
        Ok(StatusRow {
            id: self.id,
            user_id: self.user_id,
            partner_id: self.partner_id,
            sender_role: parse_role(&self.sender_role)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct InboxQueryRow {
    counterpart_id: i64,
    unread_count: i64,
    id: Uuid,
    user_id: i64,
    partner_id: i64,
    sender_role: String,
    body: String,
    created_at: DateTime<Utc>,
    is_delivered: bool,
    delivered_at: Option<DateTime<Utc>>,
    is_read: bool,
    read_at: Option<DateTime<Utc>>,
}

const MESSAGE_COLUMNS: &str = "id, user_id, partner_id, sender_role, body, created_at, \
     is_delivered, delivered_at, is_read, read_at";

fn collect_messages(rows: Vec<MessageRow>) -> Result<Vec<StoredMessage>, StorageError> {
    rows.into_iter().map(MessageRow::into_message).collect()
}

fn collect_statuses(rows: Vec<StatusUpdateRow>) -> Result<Vec<StatusRow>, StorageError> {
    rows.into_iter().map(StatusUpdateRow::into_status).collect()
}

#[async_trait]
impl MessageStore for PostgresStorage {
    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn create_message(
        &self,
        user_id: i64,
        partner_id: i64,
        sender_role: PrincipalKind,
        body: &str,
    ) -> Result<StoredMessage, StorageError> {
        let row: MessageRow = sqlx::query_as(&format!(
            "INSERT INTO messages (id, user_id, partner_id, sender_role, body) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(partner_id)
        .bind(sender_role.as_str())
        .bind(body)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        row.into_message()
    }

    async fn conversation_page(
        &self,
        user_id: i64,
        partner_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE user_id = $1 AND partner_id = $2 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3 OFFSET $4"
        ))
        .bind(user_id)
        .bind(partner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        collect_messages(rows)
    }

    async fn conversation_message_count(
        &self,
        user_id: i64,
        partner_id: i64,
    ) -> Result<i64, StorageError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE user_id = $1 AND partner_id = $2")
            .bind(user_id)
            .bind(partner_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn mark_delivered(
        &self,
        ids: &[Uuid],
        recipient: PrincipalKind,
        recipient_id: i64,
    ) -> Result<Vec<StatusRow>, StorageError> {
        // The recipient-side column is user_id when the counterpart
        // (sender) is the partner, and vice versa.
        let rows: Vec<StatusUpdateRow> = sqlx::query_as(
            "UPDATE messages \
             SET is_delivered = TRUE, delivered_at = NOW() \
             WHERE id = ANY($1) \
               AND is_delivered = FALSE \
               AND sender_role = $2 \
               AND CASE WHEN $2 = 'partner' THEN user_id ELSE partner_id END = $3 \
             RETURNING id, user_id, partner_id, sender_role",
        )
        .bind(ids)
        .bind(recipient.counterpart().as_str())
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        collect_statuses(rows)
    }

    async fn mark_read(
        &self,
        ids: &[Uuid],
        recipient: PrincipalKind,
        recipient_id: i64,
    ) -> Result<Vec<StatusRow>, StorageError> {
        // Reading promotes delivery so the flags never diverge.
        let rows: Vec<StatusUpdateRow> = sqlx::query_as(
            "UPDATE messages \
             SET is_read = TRUE, read_at = NOW(), \
                 is_delivered = TRUE, delivered_at = COALESCE(delivered_at, NOW()) \
             WHERE id = ANY($1) \
               AND is_read = FALSE \
               AND sender_role = $2 \
               AND CASE WHEN $2 = 'partner' THEN user_id ELSE partner_id END = $3 \
             RETURNING id, user_id, partner_id, sender_role",
        )
        .bind(ids)
        .bind(recipient.counterpart().as_str())
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        collect_statuses(rows)
    }

    async fn mark_conversation_read(
        &self,
        user_id: i64,
        partner_id: i64,
        reader: PrincipalKind,
    ) -> Result<Vec<StatusRow>, StorageError> {
        let rows: Vec<StatusUpdateRow> = sqlx::query_as(
            "UPDATE messages \
             SET is_read = TRUE, read_at = NOW(), \
                 is_delivered = TRUE, delivered_at = COALESCE(delivered_at, NOW()) \
             WHERE user_id = $1 AND partner_id = $2 \
               AND sender_role = $3 \
               AND is_read = FALSE \
             RETURNING id, user_id, partner_id, sender_role",
        )
        .bind(user_id)
        .bind(partner_id)
        .bind(reader.counterpart().as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        collect_statuses(rows)
    }

    async fn mark_conversation_delivered(
        &self,
        user_id: i64,
        partner_id: i64,
        recipient: PrincipalKind,
    ) -> Result<Vec<StatusRow>, StorageError> {
        let rows: Vec<StatusUpdateRow> = sqlx::query_as(
            "UPDATE messages \
             SET is_delivered = TRUE, delivered_at = NOW() \
             WHERE user_id = $1 AND partner_id = $2 \
               AND sender_role = $3 \
               AND is_delivered = FALSE \
             RETURNING id, user_id, partner_id, sender_role",
        )
        .bind(user_id)
        .bind(partner_id)
        .bind(recipient.counterpart().as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        collect_statuses(rows)
    }

    async fn inbox(&self, kind: PrincipalKind, id: i64) -> Result<Vec<InboxRow>, StorageError> {
        // Rank 1 per counterpart by descending timestamp, joined with
        // the per-counterpart unread count of counterpart-sent rows.
        let rows: Vec<InboxQueryRow> = sqlx::query_as(
            "SELECT \
                 CASE WHEN $1 = 'user' THEN latest.partner_id ELSE latest.user_id END \
                     AS counterpart_id, \
                 COALESCE(unread.unread_count, 0) AS unread_count, \
                 latest.id, latest.user_id, latest.partner_id, latest.sender_role, \
                 latest.body, latest.created_at, latest.is_delivered, latest.delivered_at, \
                 latest.is_read, latest.read_at \
             FROM ( \
                 SELECT *, ROW_NUMBER() OVER ( \
                     PARTITION BY CASE WHEN $1 = 'user' THEN partner_id ELSE user_id END \
                     ORDER BY created_at DESC, id DESC) AS rn \
                 FROM messages \
                 WHERE CASE WHEN $1 = 'user' THEN user_id ELSE partner_id END = $2 \
             ) latest \
             LEFT JOIN ( \
                 SELECT CASE WHEN $1 = 'user' THEN partner_id ELSE user_id END \
                            AS counterpart_id, \
                        COUNT(*) AS unread_count \
                 FROM messages \
                 WHERE CASE WHEN $1 = 'user' THEN user_id ELSE partner_id END = $2 \
                   AND sender_role <> $1 \
                   AND is_read = FALSE \
                 GROUP BY 1 \
             ) unread ON unread.counterpart_id = \
                 CASE WHEN $1 = 'user' THEN latest.partner_id ELSE latest.user_id END \
             WHERE latest.rn = 1 \
             ORDER BY latest.created_at DESC",
        )
        .bind(kind.as_str())
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(InboxRow {
                    counterpart_id: row.counterpart_id,
                    unread_count: row.unread_count,
                    last_message: MessageRow {
                        id: row.id,
                        user_id: row.user_id,
                        partner_id: row.partner_id,
                        sender_role: row.sender_role,
                        body: row.body,
                        created_at: row.created_at,
                        is_delivered: row.is_delivered,
                        delivered_at: row.delivered_at,
                        is_read: row.is_read,
                        read_at: row.read_at,
                    }
                    .into_message()?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tandem_core::protocol::PrincipalKind;

    use super::super::test_support::*;

    #[tokio::test]
    async fn message_lifecycle_and_status_invariants() {
        let Some(storage) = test_storage().await else {
            return;
        };
        let user_id = create_user(&storage, "tok-user-1").await;
        let partner_id = create_partner(&storage, "tok-partner-1").await;

        let message = storage
            .create_message(user_id, partner_id, PrincipalKind::User, "hello")
            .await
            .expect("create message");
        assert_eq!(message.body, "hello");
        assert!(!message.is_delivered);
        assert!(message.delivered_at.is_none());
        assert!(!message.is_read);

        // The sender must not be able to transition its own message.
        let denied = storage
            .mark_delivered(&[message.id], PrincipalKind::User, user_id)
            .await
            .expect("sender mark_delivered");
        assert!(denied.is_empty());

        // The recipient can.
        let updated = storage
            .mark_delivered(&[message.id], PrincipalKind::Partner, partner_id)
            .await
            .expect("recipient mark_delivered");
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id, message.id);
        assert_eq!(updated[0].sender_role, PrincipalKind::User);

        // Idempotent: a second delivery matches zero rows.
        let again = storage
            .mark_delivered(&[message.id], PrincipalKind::Partner, partner_id)
            .await
            .expect("repeat mark_delivered");
        assert!(again.is_empty());

        let read = storage
            .mark_read(&[message.id], PrincipalKind::Partner, partner_id)
            .await
            .expect("recipient mark_read");
        assert_eq!(read.len(), 1);

        let page = storage
            .conversation_page(user_id, partner_id, 0, 10)
            .await
            .expect("conversation page");
        assert_eq!(page.len(), 1);
        assert!(page[0].is_read);
        assert!(page[0].read_at.is_some());
        assert!(page[0].is_delivered);
    }

    #[tokio::test]
    async fn mark_read_promotes_undelivered_to_delivered() {
        let Some(storage) = test_storage().await else {
            return;
        };
        let user_id = create_user(&storage, "tok-user-2").await;
        let partner_id = create_partner(&storage, "tok-partner-2").await;

        let message = storage
            .create_message(user_id, partner_id, PrincipalKind::Partner, "ping")
            .await
            .expect("create message");

        let read = storage
            .mark_read(&[message.id], PrincipalKind::User, user_id)
            .await
            .expect("mark_read");
        assert_eq!(read.len(), 1);

        let page = storage
            .conversation_page(user_id, partner_id, 0, 10)
            .await
            .expect("conversation page");
        assert!(page[0].is_delivered);
        assert!(page[0].delivered_at.is_some());
        assert!(page[0].is_read);
    }

    #[tokio::test]
    async fn conversation_page_orders_newest_first() {
        let Some(storage) = test_storage().await else {
            return;
        };
        let user_id = create_user(&storage, "tok-user-3").await;
        let partner_id = create_partner(&storage, "tok-partner-3").await;

        for body in ["one", "two", "three"] {
            storage
                .create_message(user_id, partner_id, PrincipalKind::User, body)
                .await
                .expect("create message");
        }

        let count = storage
            .conversation_message_count(user_id, partner_id)
            .await
            .expect("count");
        assert_eq!(count, 3);

        let first_page = storage
            .conversation_page(user_id, partner_id, 0, 2)
            .await
            .expect("first page");
        assert_eq!(first_page.len(), 2);
        assert!(first_page[0].created_at >= first_page[1].created_at);

        let second_page = storage
            .conversation_page(user_id, partner_id, 2, 2)
            .await
            .expect("second page");
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].body, "one");
    }

    #[tokio::test]
    async fn inbox_ranks_latest_message_and_counts_unread() {
        let Some(storage) = test_storage().await else {
            return;
        };
        let user_id = create_user(&storage, "tok-user-4").await;
        let partner_a = create_partner(&storage, "tok-partner-4a").await;
        let partner_b = create_partner(&storage, "tok-partner-4b").await;

        storage
            .create_message(user_id, partner_a, PrincipalKind::Partner, "hi")
            .await
            .expect("a1");
        storage
            .create_message(user_id, partner_a, PrincipalKind::Partner, "are you there?")
            .await
            .expect("a2");
        storage
            .create_message(user_id, partner_b, PrincipalKind::User, "booking question")
            .await
            .expect("b1");

        let inbox = storage
            .inbox(PrincipalKind::User, user_id)
            .await
            .expect("user inbox");
        assert_eq!(inbox.len(), 2);

        let row_a = inbox
            .iter()
            .find(|row| row.counterpart_id == partner_a)
            .expect("partner a row");
        assert_eq!(row_a.last_message.body, "are you there?");
        assert_eq!(row_a.unread_count, 2);

        let row_b = inbox
            .iter()
            .find(|row| row.counterpart_id == partner_b)
            .expect("partner b row");
        // Own outgoing message never counts as unread.
        assert_eq!(row_b.unread_count, 0);

        // Partner A's inbox sees one conversation with no unread rows
        // of its own sending.
        let partner_inbox = storage
            .inbox(PrincipalKind::Partner, partner_a)
            .await
            .expect("partner inbox");
        assert_eq!(partner_inbox.len(), 1);
        assert_eq!(partner_inbox[0].counterpart_id, user_id);
        assert_eq!(partner_inbox[0].unread_count, 0);
    }

    #[tokio::test]
    async fn conversation_read_clears_unread_and_reports_ids() {
        let Some(storage) = test_storage().await else {
            return;
        };
        let user_id = create_user(&storage, "tok-user-5").await;
        let partner_id = create_partner(&storage, "tok-partner-5").await;

        for body in ["hello", "still there?"] {
            storage
                .create_message(user_id, partner_id, PrincipalKind::User, body)
                .await
                .expect("create message");
        }

        let updated = storage
            .mark_conversation_read(user_id, partner_id, PrincipalKind::Partner)
            .await
            .expect("mark conversation read");
        assert_eq!(updated.len(), 2);

        let inbox = storage
            .inbox(PrincipalKind::Partner, partner_id)
            .await
            .expect("partner inbox");
        assert_eq!(inbox[0].unread_count, 0);

        // The reader's own unsent direction is untouched.
        let repeat = storage
            .mark_conversation_read(user_id, partner_id, PrincipalKind::Partner)
            .await
            .expect("repeat mark conversation read");
        assert!(repeat.is_empty());
    }

    #[tokio::test]
    async fn conversation_delivered_targets_counterpart_messages_only() {
        let Some(storage) = test_storage().await else {
            return;
        };
        let user_id = create_user(&storage, "tok-user-6").await;
        let partner_id = create_partner(&storage, "tok-partner-6").await;

        storage
            .create_message(user_id, partner_id, PrincipalKind::Partner, "offer")
            .await
            .expect("partner message");
        storage
            .create_message(user_id, partner_id, PrincipalKind::User, "thanks")
            .await
            .expect("user message");

        // The user has "seen the thread": only the partner's message
        // becomes delivered.
        let updated = storage
            .mark_conversation_delivered(user_id, partner_id, PrincipalKind::User)
            .await
            .expect("mark conversation delivered");
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].sender_role, PrincipalKind::Partner);
    }
}
