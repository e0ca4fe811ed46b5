use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::{
    errors::ApiError,
    json::JsonBody,
    state::AppState,
    validator::Validator,
};

use super::{
    filters::{validate_filters, Filters},
    model::{validate_movie, Runtime},
    repo,
};

pub const SORT_SAFELIST: &[&str] = &[
    "id", "title", "year", "runtime", "-id", "-title", "-year", "-runtime",
];

/// Path ids must be positive integers; anything else is a 404, the same as an
/// id that points at nothing.
fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .ok()
        .filter(|&id| id >= 1)
        .ok_or(ApiError::NotFound)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateMovieInput {
    title: String,
    year: i32,
    runtime: Runtime,
    genres: Vec<String>,
}

/// Absent fields mean "leave unchanged"; only keys present in the body are
/// applied to the loaded record.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMovieInput {
    title: Option<String>,
    year: Option<i32>,
    runtime: Option<Runtime>,
    genres: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    title: Option<String>,
    genres: Option<String>,
    page: Option<String>,
    page_size: Option<String>,
    sort: Option<String>,
}

// An absent parameter and an empty one (`?page=`) both mean the default.

fn read_int(raw: Option<&str>, key: &str, default: i64, v: &mut Validator) -> i64 {
    match raw {
        None | Some("") => default,
        Some(value) => match value.parse() {
            Ok(n) => n,
            Err(_) => {
                v.add_error(key, "must be an integer value");
                default
            }
        },
    }
}

fn read_string(raw: Option<String>, default: &str) -> String {
    match raw {
        Some(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn read_csv(raw: Option<String>) -> Vec<String> {
    match raw.as_deref() {
        None | Some("") => Vec::new(),
        Some(csv) => csv.split(',').map(str::to_string).collect(),
    }
}

/// POST /v1/movies
#[instrument(skip(state, input))]
pub async fn create_movie(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<CreateMovieInput>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    validate_movie(&mut v, &input.title, input.year, input.runtime, &input.genres);
    if !v.valid() {
        return Err(ApiError::Validation(v.into_errors()));
    }

    let movie =
        repo::insert(&state.db, &input.title, input.year, input.runtime, &input.genres).await?;

    info!(movie_id = movie.id, "movie created");
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/v1/movies/{}", movie.id))],
        Json(json!({ "movie": movie })),
    ))
}

/// GET /v1/movies/:id
#[instrument(skip(state))]
pub async fn show_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let movie = repo::get(&state.db, parse_id(&id)?).await?;
    Ok(Json(json!({ "movie": movie })))
}

/// PATCH /v1/movies/:id
#[instrument(skip(state, input))]
pub async fn update_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(input): JsonBody<UpdateMovieInput>,
) -> Result<impl IntoResponse, ApiError> {
    let mut movie = repo::get(&state.db, parse_id(&id)?).await?;

    if let Some(title) = input.title {
        movie.title = title;
    }
    if let Some(year) = input.year {
        movie.year = year;
    }
    if let Some(runtime) = input.runtime {
        movie.runtime = runtime;
    }
    if let Some(genres) = input.genres {
        movie.genres = genres;
    }

    let mut v = Validator::new();
    validate_movie(&mut v, &movie.title, movie.year, movie.runtime, &movie.genres);
    if !v.valid() {
        return Err(ApiError::Validation(v.into_errors()));
    }

    repo::update(&state.db, &mut movie).await?;

    info!(movie_id = movie.id, version = movie.version, "movie updated");
    Ok(Json(json!({ "movie": movie })))
}

/// DELETE /v1/movies/:id
#[instrument(skip(state))]
pub async fn delete_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    repo::delete(&state.db, parse_id(&id)?).await?;
    Ok(Json(json!({ "message": "movie successfully deleted" })))
}

/// GET /v1/movies
#[instrument(skip(state))]
pub async fn list_movies(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();

    let title = read_string(params.title, "");
    let genres = read_csv(params.genres);

    let filters = Filters {
        page: read_int(params.page.as_deref(), "page", 1, &mut v),
        page_size: read_int(params.page_size.as_deref(), "page_size", 20, &mut v),
        sort: read_string(params.sort, "id"),
        sort_safelist: SORT_SAFELIST,
    };

    validate_filters(&mut v, &filters);
    if !v.valid() {
        return Err(ApiError::Validation(v.into_errors()));
    }

    let (movies, metadata) = repo::get_all(&state.db, &title, &genres, &filters).await?;
    Ok(Json(json!({ "movies": movies, "metadata": metadata })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_accepts_positive_integers_only() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert!(matches!(parse_id("0"), Err(ApiError::NotFound)));
        assert!(matches!(parse_id("-3"), Err(ApiError::NotFound)));
        assert!(matches!(parse_id("abc"), Err(ApiError::NotFound)));
    }

    #[test]
    fn read_int_records_a_validation_error_on_garbage() {
        let mut v = Validator::new();
        assert_eq!(read_int(Some("7"), "page", 1, &mut v), 7);
        assert_eq!(read_int(None, "page", 1, &mut v), 1);
        assert!(v.valid());

        assert_eq!(read_int(Some("seven"), "page", 1, &mut v), 1);
        assert!(!v.valid());
    }

    #[test]
    fn empty_query_values_mean_the_default() {
        let mut v = Validator::new();
        assert_eq!(read_int(Some(""), "page", 1, &mut v), 1);
        assert!(v.valid());

        assert_eq!(read_string(Some(String::new()), "id"), "id");
        assert_eq!(read_string(Some("-year".into()), "id"), "-year");

        assert!(read_csv(Some(String::new())).is_empty());
        assert!(read_csv(None).is_empty());
        assert_eq!(read_csv(Some("drama,comedy".into())), vec!["drama", "comedy"]);
    }

    #[test]
    fn partial_update_input_distinguishes_absent_fields() {
        let input: UpdateMovieInput = serde_json::from_str(r#"{"year": 2020}"#).unwrap();
        assert_eq!(input.year, Some(2020));
        assert!(input.title.is_none());
        assert!(input.runtime.is_none());
        assert!(input.genres.is_none());
    }

    #[test]
    fn create_input_rejects_unknown_keys() {
        let result = serde_json::from_str::<CreateMovieInput>(
            r#"{"title":"Moana","year":2016,"runtime":"107 mins","genres":["animation"],"rating":5}"#,
        );
        assert!(result.is_err());
    }
}
