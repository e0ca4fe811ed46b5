use std::time::Duration;

use sqlx::{error::ErrorKind, PgPool};
use time::OffsetDateTime;
use tokio::time::timeout;

use crate::{
    errors::StoreError,
    tokens::model::{hash_plaintext, Scope},
};

use super::model::User;

const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Classifies a duplicate-email insert/update by the structured constraint
/// violation, not the error string.
fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if matches!(db_err.kind(), ErrorKind::UniqueViolation)
            && db_err.constraint() == Some("users_email_key")
        {
            return StoreError::DuplicateEmail;
        }
    }
    StoreError::Database(err)
}

pub async fn insert(
    db: &PgPool,
    name: &str,
    email: &str,
    password_hash: &str,
) -> Result<User, StoreError> {
    let query = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (name, email, password_hash, activated)
        VALUES ($1, $2, $3, false)
        RETURNING id, created_at, name, email, password_hash, activated, version
        "#,
    )
    .bind(name)
    .bind(email)
    .bind(password_hash);

    timeout(QUERY_TIMEOUT, query.fetch_one(db))
        .await?
        .map_err(classify)
}

pub async fn get_by_email(db: &PgPool, email: &str) -> Result<User, StoreError> {
    let query = sqlx::query_as::<_, User>(
        r#"
        SELECT id, created_at, name, email, password_hash, activated, version
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(email);

    match timeout(QUERY_TIMEOUT, query.fetch_optional(db)).await?? {
        Some(user) => Ok(user),
        None => Err(StoreError::NotFound),
    }
}

/// Optimistic-concurrency update: conditioned on the version the caller read,
/// bumping it atomically. No row matched means another writer got there first.
pub async fn update(db: &PgPool, user: &mut User) -> Result<(), StoreError> {
    let query = sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE users
        SET name = $1, email = $2, password_hash = $3, activated = $4, version = version + 1
        WHERE id = $5 AND version = $6
        RETURNING version
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.activated)
    .bind(user.id)
    .bind(user.version);

    match timeout(QUERY_TIMEOUT, query.fetch_optional(db))
        .await?
        .map_err(classify)?
    {
        Some(version) => {
            user.version = version;
            Ok(())
        }
        None => Err(StoreError::EditConflict),
    }
}

/// Resolves a claimed token plaintext to its owning user, for one scope. An
/// expired, revoked, or never-issued token all fail identically.
pub async fn get_for_token(
    db: &PgPool,
    scope: Scope,
    plaintext: &str,
) -> Result<User, StoreError> {
    let hash = hash_plaintext(plaintext);

    let query = sqlx::query_as::<_, User>(
        r#"
        SELECT users.id, users.created_at, users.name, users.email,
               users.password_hash, users.activated, users.version
        FROM users
        INNER JOIN tokens ON users.id = tokens.user_id
        WHERE tokens.hash = $1
        AND tokens.scope = $2
        AND tokens.expiry > $3
        "#,
    )
    .bind(hash)
    .bind(scope.as_str())
    .bind(OffsetDateTime::now_utc());

    match timeout(QUERY_TIMEOUT, query.fetch_optional(db)).await?? {
        Some(user) => Ok(user),
        None => Err(StoreError::NotFound),
    }
}
