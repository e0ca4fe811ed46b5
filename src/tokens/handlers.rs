use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use time::Duration;
use tracing::{error, info, instrument, warn};

use crate::{
    errors::{ApiError, StoreError},
    json::JsonBody,
    state::AppState,
    users::{
        model::{validate_email, validate_password_plaintext},
        password::verify_password,
        repo as users_repo,
    },
    validator::Validator,
};

use super::{model::Scope, repo};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsInput {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResendActivationInput {
    email: String,
}

/// POST /v1/tokens/authentication
#[instrument(skip(state, input))]
pub async fn create_authentication_token(
    State(state): State<AppState>,
    JsonBody(mut input): JsonBody<CredentialsInput>,
) -> Result<impl IntoResponse, ApiError> {
    input.email = input.email.trim().to_lowercase();

    let mut v = Validator::new();
    validate_email(&mut v, &input.email);
    validate_password_plaintext(&mut v, &input.password);
    if !v.valid() {
        return Err(ApiError::Validation(v.into_errors()));
    }

    // Which factor failed is deliberately not disclosed.
    let user = match users_repo::get_by_email(&state.db, &input.email).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            warn!(email = %input.email, "authentication for unknown email");
            return Err(ApiError::InvalidCredentials);
        }
        Err(err) => return Err(err.into()),
    };

    if !verify_password(&input.password, &user.password_hash)? {
        warn!(user_id = user.id, "authentication with invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    let token = repo::new(&state.db, user.id, Duration::hours(24), Scope::Authentication).await?;

    info!(user_id = user.id, "authentication token issued");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "authentication_token": token })),
    ))
}

/// POST /v1/tokens/activation
#[instrument(skip(state, input))]
pub async fn create_activation_token(
    State(state): State<AppState>,
    JsonBody(mut input): JsonBody<ResendActivationInput>,
) -> Result<impl IntoResponse, ApiError> {
    input.email = input.email.trim().to_lowercase();

    let mut v = Validator::new();
    validate_email(&mut v, &input.email);
    if !v.valid() {
        return Err(ApiError::Validation(v.into_errors()));
    }

    let user = match users_repo::get_by_email(&state.db, &input.email).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            v.add_error("email", "no matching email address found");
            return Err(ApiError::Validation(v.into_errors()));
        }
        Err(err) => return Err(err.into()),
    };

    if user.activated {
        v.add_error("email", "user has already been activated");
        return Err(ApiError::Validation(v.into_errors()));
    }

    let token = repo::new(&state.db, user.id, Duration::minutes(45), Scope::Activation).await?;

    let mailer = Arc::clone(&state.mailer);
    let recipient = user.email.clone();
    let data = json!({ "activation_token": token.plaintext });
    state.background(async move {
        if let Err(err) = mailer.send(&recipient, "token_activation", &data).await {
            error!(error = %err, recipient, "sending activation email failed");
        }
    });

    info!(user_id = user.id, "activation token reissued");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "an email will be sent to you containing activation instructions"
        })),
    ))
}
