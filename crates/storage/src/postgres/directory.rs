use async_trait::async_trait;
use sqlx::FromRow;

use super::{db_error, PostgresStorage};
use crate::{DirectoryStore, PartnerProfile, StorageError, UserProfile};

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    display_name: String,
    avatar_url: Option<String>,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
        }
    }
}

#[derive(Debug, FromRow)]
struct PartnerRow {
    id: i64,
    display_name: String,
    company_name: Option<String>,
    logo_url: Option<String>,
}

impl From<PartnerRow> for PartnerProfile {
    fn from(row: PartnerRow) -> Self {
        Self {
            id: row.id,
            display_name: row.display_name,
            company_name: row.company_name,
            logo_url: row.logo_url,
        }
    }
}

#[async_trait]
impl DirectoryStore for PostgresStorage {
    async fn resolve_user_token(&self, token: &str) -> Result<Option<UserProfile>, StorageError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, display_name, avatar_url FROM users WHERE token = $1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(row.map(Into::into))
    }

    async fn resolve_partner_token(
        &self,
        token: &str,
    ) -> Result<Option<PartnerProfile>, StorageError> {
        let row: Option<PartnerRow> = sqlx::query_as(
            "SELECT id, display_name, company_name, logo_url FROM partners WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(Into::into))
    }

    async fn user_profile(&self, id: i64) -> Result<Option<UserProfile>, StorageError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, display_name, avatar_url FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(row.map(Into::into))
    }

    async fn partner_profile(&self, id: i64) -> Result<Option<PartnerProfile>, StorageError> {
        let row: Option<PartnerRow> = sqlx::query_as(
            "SELECT id, display_name, company_name, logo_url FROM partners WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(Into::into))
    }
}
