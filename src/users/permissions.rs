use std::time::Duration;

use sqlx::PgPool;
use tokio::time::timeout;

use crate::errors::StoreError;

const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

pub const MOVIES_READ: &str = "movies:read";
pub const MOVIES_WRITE: &str = "movies:write";

/// The permission codes held by one user.
#[derive(Debug, Clone, Default)]
pub struct Permissions(Vec<String>);

impl Permissions {
    pub fn include(&self, code: &str) -> bool {
        self.0.iter().any(|held| held == code)
    }
}

pub async fn all_for_user(db: &PgPool, user_id: i64) -> Result<Permissions, StoreError> {
    let query = sqlx::query_scalar::<_, String>(
        r#"
        SELECT permissions.code
        FROM permissions
        INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id
        WHERE users_permissions.user_id = $1
        "#,
    )
    .bind(user_id);

    let codes = timeout(QUERY_TIMEOUT, query.fetch_all(db)).await??;
    Ok(Permissions(codes))
}

pub async fn add_for_user(db: &PgPool, user_id: i64, codes: &[&str]) -> Result<(), StoreError> {
    let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
    let query = sqlx::query(
        r#"
        INSERT INTO users_permissions (user_id, permission_id)
        SELECT $1, permissions.id FROM permissions WHERE permissions.code = ANY($2)
        "#,
    )
    .bind(user_id)
    .bind(codes);

    timeout(QUERY_TIMEOUT, query.execute(db)).await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_matches_exact_codes_only() {
        let perms = Permissions(vec![MOVIES_READ.to_string()]);
        assert!(perms.include("movies:read"));
        assert!(!perms.include("movies:write"));
        assert!(!perms.include("movies"));
    }

    #[test]
    fn empty_permissions_include_nothing() {
        assert!(!Permissions::default().include(MOVIES_READ));
    }
}
