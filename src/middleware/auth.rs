use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::{
    errors::{ApiError, StoreError},
    state::AppState,
    tokens::model::{validate_token_plaintext, Scope},
    users::{model::User, permissions, repo as users_repo},
    validator::Validator,
};

/// Authentication state of a request. Requests without an Authorization header
/// proceed as `Anonymous`; a valid bearer token resolves to the owning user.
#[derive(Debug, Clone)]
pub enum AuthUser {
    Anonymous,
    Authenticated(User),
}

pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut response = match resolve_user(&state, &mut request).await {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    };

    // Caches must partition by credential.
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

async fn resolve_user(state: &AppState, request: &mut Request) -> Result<(), ApiError> {
    let Some(header_value) = request.headers().get(header::AUTHORIZATION) else {
        request.extensions_mut().insert(AuthUser::Anonymous);
        return Ok(());
    };

    let token = parse_bearer(header_value.to_str().map_err(|_| ApiError::InvalidCredentials)?)
        .ok_or(ApiError::InvalidCredentials)?;

    let mut v = Validator::new();
    validate_token_plaintext(&mut v, token);
    if !v.valid() {
        return Err(ApiError::InvalidAuthenticationToken);
    }

    let user = match users_repo::get_for_token(&state.db, Scope::Authentication, token).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => return Err(ApiError::InvalidAuthenticationToken),
        Err(err) => return Err(err.into()),
    };

    debug!(user_id = user.id, "request authenticated");
    request.extensions_mut().insert(AuthUser::Authenticated(user));
    Ok(())
}

/// Accepts exactly `Bearer <token>`.
fn parse_bearer(value: &str) -> Option<&str> {
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

/// Rejects anonymous requests.
pub fn authenticated(auth: &AuthUser) -> Result<&User, ApiError> {
    match auth {
        AuthUser::Anonymous => Err(ApiError::AuthenticationRequired),
        AuthUser::Authenticated(user) => Ok(user),
    }
}

/// Rejects anonymous and unactivated users. Implies `authenticated`.
pub fn activated(auth: &AuthUser) -> Result<&User, ApiError> {
    let user = authenticated(auth)?;
    if !user.activated {
        return Err(ApiError::InactiveAccount);
    }
    Ok(user)
}

/// Rejects users lacking `code`. Implies `activated`.
pub async fn permitted<'a>(
    state: &AppState,
    auth: &'a AuthUser,
    code: &str,
) -> Result<&'a User, ApiError> {
    let user = activated(auth)?;

    let perms = permissions::all_for_user(&state.db, user.id).await?;
    if !perms.include(code) {
        return Err(ApiError::NotPermitted);
    }

    Ok(user)
}

/// Per-route gate, applied with `Handler::layer` so it runs before any body
/// decoding. The authentication state must already be attached; a route that
/// reaches this without it is a server bug, not a client error.
pub async fn permission_gate(
    State((state, code)): State<(AppState, &'static str)>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::invariant("missing auth user in request extensions"))?;

    permitted(&state, &auth, code).await?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn user(activated: bool) -> User {
        User {
            id: 1,
            created_at: OffsetDateTime::UNIX_EPOCH,
            name: "Ann".into(),
            email: "ann@example.com".into(),
            password_hash: "hash".into(),
            activated,
            version: 1,
        }
    }

    #[test]
    fn parse_bearer_accepts_well_formed_header() {
        assert_eq!(
            parse_bearer("Bearer ABCDEFGHIJKLMNOPQRSTUVWXYZ"),
            Some("ABCDEFGHIJKLMNOPQRSTUVWXYZ")
        );
    }

    #[test]
    fn parse_bearer_rejects_malformed_headers() {
        assert_eq!(parse_bearer("ABCDEF"), None);
        assert_eq!(parse_bearer("Basic dXNlcjpwYXNz"), None);
        assert_eq!(parse_bearer("Bearer"), None);
        assert_eq!(parse_bearer("Bearer a b"), None);
        assert_eq!(parse_bearer("bearer TOKEN"), None);
    }

    #[test]
    fn anonymous_user_is_not_authenticated() {
        assert!(matches!(
            authenticated(&AuthUser::Anonymous),
            Err(ApiError::AuthenticationRequired)
        ));
    }

    #[test]
    fn unactivated_user_is_authenticated_but_not_activated() {
        let auth = AuthUser::Authenticated(user(false));
        assert!(authenticated(&auth).is_ok());
        assert!(matches!(activated(&auth), Err(ApiError::InactiveAccount)));
    }

    #[test]
    fn activated_user_passes_both_gates() {
        let auth = AuthUser::Authenticated(user(true));
        assert!(authenticated(&auth).is_ok());
        assert!(activated(&auth).is_ok());
    }
}
