use std::time::Duration as StdDuration;

use sqlx::PgPool;
use time::Duration;
use tokio::time::timeout;

use crate::errors::StoreError;

use super::model::{Scope, Token};

const QUERY_TIMEOUT: StdDuration = StdDuration::from_secs(3);

/// Generates a token and persists its hashed form in one step.
pub async fn new(
    db: &PgPool,
    user_id: i64,
    ttl: Duration,
    scope: Scope,
) -> Result<Token, StoreError> {
    let token = Token::generate(user_id, ttl, scope)?;
    insert(db, &token).await?;
    Ok(token)
}

pub async fn insert(db: &PgPool, token: &Token) -> Result<(), StoreError> {
    let query = sqlx::query(
        r#"
        INSERT INTO tokens (hash, user_id, expiry, scope)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(&token.hash)
    .bind(token.user_id)
    .bind(token.expiry)
    .bind(token.scope.as_str());

    timeout(QUERY_TIMEOUT, query.execute(db)).await??;
    Ok(())
}

/// Revokes every token a user holds for the given scope.
pub async fn delete_all_for_user(
    db: &PgPool,
    scope: Scope,
    user_id: i64,
) -> Result<(), StoreError> {
    let query = sqlx::query("DELETE FROM tokens WHERE scope = $1 AND user_id = $2")
        .bind(scope.as_str())
        .bind(user_id);

    timeout(QUERY_TIMEOUT, query.execute(db)).await??;
    Ok(())
}
