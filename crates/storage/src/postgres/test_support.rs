use sqlx::postgres::PgPoolOptions;

use super::PostgresStorage;

// Re-export all domain traits so test modules can `use super::super::test_support::*`
// and have every trait method available on PostgresStorage.
#[allow(unused_imports)]
pub(super) use crate::{DirectoryStore, MessageStore, Storage, StorageError};

pub(super) async fn test_storage() -> Option<PostgresStorage> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(value) => value,
        Err(_) => return None,
    };

    // Each test gets its own schema for full isolation when running in parallel.
    let schema = format!("test_{}", uuid::Uuid::new_v4().simple());
    let mut opts: sqlx::postgres::PgConnectOptions =
        database_url.parse().expect("parse DATABASE_URL");
    opts = opts.options([("search_path", schema.as_str())]);
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect_with(opts)
        .await
        .expect("connect test database");
    sqlx::query(&format!("CREATE SCHEMA \"{schema}\""))
        .execute(&pool)
        .await
        .expect("create test schema");

    crate::migrate_with_pool(&pool)
        .await
        .expect("apply migrations");
    Some(PostgresStorage::from_pool(pool))
}

pub(super) async fn create_user(storage: &PostgresStorage, token: &str) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO users (token, display_name) VALUES ($1, $2) RETURNING id",
    )
    .bind(token)
    .bind(format!("User {token}"))
    .fetch_one(storage.pool())
    .await
    .expect("create user")
}

pub(super) async fn create_partner(storage: &PostgresStorage, token: &str) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO partners (token, display_name, company_name) \
         VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(token)
    .bind(format!("Partner {token}"))
    .bind("Acme Travel")
    .fetch_one(storage.pool())
    .await
    .expect("create partner")
}
