use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use time::Duration;
use tracing::{error, info, instrument};

use crate::{
    errors::{ApiError, StoreError},
    json::JsonBody,
    state::AppState,
    tokens::{
        model::{validate_token_plaintext, Scope},
        repo as tokens_repo,
    },
    validator::Validator,
};

use super::{
    model::{validate_email, validate_name, validate_password_plaintext},
    password::hash_password,
    permissions, repo,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterInput {
    name: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivateInput {
    token: String,
}

/// POST /v1/users
#[instrument(skip(state, input))]
pub async fn register_user(
    State(state): State<AppState>,
    JsonBody(mut input): JsonBody<RegisterInput>,
) -> Result<impl IntoResponse, ApiError> {
    input.email = input.email.trim().to_lowercase();

    let mut v = Validator::new();
    validate_name(&mut v, &input.name);
    validate_email(&mut v, &input.email);
    validate_password_plaintext(&mut v, &input.password);
    if !v.valid() {
        return Err(ApiError::Validation(v.into_errors()));
    }

    // The plaintext does not outlive this call.
    let password_hash = hash_password(&input.password)?;

    let user = match repo::insert(&state.db, &input.name, &input.email, &password_hash).await {
        Ok(user) => user,
        Err(StoreError::DuplicateEmail) => {
            v.add_error("email", "a user with this email address already exists");
            return Err(ApiError::Validation(v.into_errors()));
        }
        Err(err) => return Err(err.into()),
    };

    permissions::add_for_user(&state.db, user.id, &[permissions::MOVIES_READ]).await?;

    let token = tokens_repo::new(&state.db, user.id, Duration::days(3), Scope::Activation).await?;

    // The response does not wait on mail delivery; a terminal send failure is
    // only logged.
    let mailer = Arc::clone(&state.mailer);
    let recipient = user.email.clone();
    let data = json!({ "activation_token": token.plaintext, "user_id": user.id });
    state.background(async move {
        if let Err(err) = mailer.send(&recipient, "user_welcome", &data).await {
            error!(error = %err, recipient, "sending welcome email failed");
        }
    });

    info!(user_id = user.id, email = %user.email, "user registered");
    Ok((StatusCode::ACCEPTED, Json(json!({ "user": user }))))
}

/// PUT /v1/users/activated
#[instrument(skip(state, input))]
pub async fn activate_user(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<ActivateInput>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    validate_token_plaintext(&mut v, &input.token);
    if !v.valid() {
        return Err(ApiError::Validation(v.into_errors()));
    }

    let mut user = match repo::get_for_token(&state.db, Scope::Activation, &input.token).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            v.add_error("token", "invalid or expired activation token");
            return Err(ApiError::Validation(v.into_errors()));
        }
        Err(err) => return Err(err.into()),
    };

    user.activated = true;
    repo::update(&state.db, &mut user).await?;

    // One-time use: a successful activation revokes the whole scope.
    tokens_repo::delete_all_for_user(&state.db, Scope::Activation, user.id).await?;

    info!(user_id = user.id, "user activated");
    Ok(Json(json!({ "user": user })))
}
