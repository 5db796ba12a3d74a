mod directory;
mod messages;

#[cfg(test)]
mod test_support;

use sqlx::PgPool;

use crate::StorageError;
use tandem_core::protocol::PrincipalKind;

#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|error| StorageError::Database(error.to_string()))?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

// ---------------------------------------------------------------------------
// Shared row helpers used across domain modules
// ---------------------------------------------------------------------------

pub(crate) fn parse_role(role: &str) -> Result<PrincipalKind, StorageError> {
    match role {
        "user" => Ok(PrincipalKind::User),
        "partner" => Ok(PrincipalKind::Partner),
        other => Err(StorageError::Database(format!(
            "unexpected sender_role: {other}"
        ))),
    }
}

pub(crate) fn db_error(error: sqlx::Error) -> StorageError {
    StorageError::Database(error.to_string())
}
