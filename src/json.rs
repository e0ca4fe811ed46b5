use axum::{
    async_trait,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use crate::errors::ApiError;

/// Request bodies larger than this are rejected outright.
pub const MAX_BODY_BYTES: usize = 1_048_576;

/// JSON request-body extractor with classified decode diagnostics: the client
/// is told whether the body was oversized, empty, syntactically broken, of the
/// wrong shape, or followed by trailing garbage. All of these are 400s.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let bytes = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|_| {
                ApiError::BadRequest(format!(
                    "body must not be larger than {MAX_BODY_BYTES} bytes"
                ))
            })?;
        Ok(JsonBody(decode_json(&bytes)?))
    }
}

/// Decodes a single JSON value out of `bytes`, mapping every serde_json
/// failure mode to a specific client-facing message.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("body must not be empty".to_string()));
    }

    let mut de = serde_json::Deserializer::from_slice(bytes);
    let value = match serde_path_to_error::deserialize::<_, T>(&mut de) {
        Ok(value) => value,
        Err(err) => return Err(classify(err)),
    };

    // A valid value followed by more content is still a malformed body.
    if de.end().is_err() {
        return Err(ApiError::BadRequest(
            "body must only contain a single JSON value".to_string(),
        ));
    }

    Ok(value)
}

fn classify(err: serde_path_to_error::Error<serde_json::Error>) -> ApiError {
    let path = err.path().to_string();
    let inner = err.into_inner();

    let message = match inner.classify() {
        Category::Eof => "body contains badly-formed JSON".to_string(),
        Category::Syntax | Category::Io => format!(
            "body contains badly-formed JSON (at line {} column {})",
            inner.line(),
            inner.column()
        ),
        Category::Data => {
            let detail = inner.to_string();
            if let Some(field) = backticked(&detail, "unknown field `") {
                format!("body contains unknown key \"{field}\"")
            } else if path != "." {
                format!("body contains incorrect JSON type for field \"{path}\"")
            } else {
                format!(
                    "body contains incorrect JSON type (at line {} column {})",
                    inner.line(),
                    inner.column()
                )
            }
        }
    };

    ApiError::BadRequest(message)
}

fn backticked<'a>(message: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = message.strip_prefix(prefix)?;
    rest.split('`').next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Input {
        title: String,
        year: i32,
    }

    fn message(err: ApiError) -> String {
        match err {
            ApiError::BadRequest(message) => message,
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[test]
    fn decodes_a_well_formed_body() {
        let input: Input = decode_json(br#"{"title":"Moana","year":2016}"#).unwrap();
        assert_eq!(input.title, "Moana");
        assert_eq!(input.year, 2016);
    }

    #[test]
    fn empty_body_is_rejected() {
        let err = decode_json::<Input>(b"").unwrap_err();
        assert_eq!(message(err), "body must not be empty");
    }

    #[test]
    fn syntax_errors_carry_a_position() {
        let err = decode_json::<Input>(br#"{"title": "Moana",}"#).unwrap_err();
        assert!(message(err).starts_with("body contains badly-formed JSON (at line"));
    }

    #[test]
    fn truncated_body_is_badly_formed() {
        let err = decode_json::<Input>(br#"{"title": "Moana""#).unwrap_err();
        assert!(message(err).starts_with("body contains badly-formed JSON"));
    }

    #[test]
    fn type_mismatch_names_the_field() {
        let err = decode_json::<Input>(br#"{"title":"Moana","year":"2016"}"#).unwrap_err();
        assert_eq!(
            message(err),
            "body contains incorrect JSON type for field \"year\""
        );
    }

    #[test]
    fn unknown_field_is_named() {
        let err = decode_json::<Input>(br#"{"title":"Moana","year":2016,"rating":5}"#)
            .unwrap_err();
        assert_eq!(message(err), "body contains unknown key \"rating\"");
    }

    #[test]
    fn trailing_values_are_rejected() {
        let err =
            decode_json::<Input>(br#"{"title":"Moana","year":2016}{"x":1}"#).unwrap_err();
        assert_eq!(message(err), "body must only contain a single JSON value");
    }
}
