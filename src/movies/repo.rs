use std::time::Duration;

use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tokio::time::timeout;

use crate::errors::StoreError;

use super::{
    filters::{calculate_metadata, Filters, Metadata},
    model::{Movie, Runtime},
};

const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn insert(
    db: &PgPool,
    title: &str,
    year: i32,
    runtime: Runtime,
    genres: &[String],
) -> Result<Movie, StoreError> {
    let query = sqlx::query_as::<_, Movie>(
        r#"
        INSERT INTO movies (title, year, runtime, genres)
        VALUES ($1, $2, $3, $4)
        RETURNING id, created_at, title, year, runtime, genres, version
        "#,
    )
    .bind(title)
    .bind(year)
    .bind(runtime)
    .bind(genres);

    Ok(timeout(QUERY_TIMEOUT, query.fetch_one(db)).await??)
}

pub async fn get(db: &PgPool, id: i64) -> Result<Movie, StoreError> {
    // Identifiers start at 1; skip the round trip for anything below.
    if id < 1 {
        return Err(StoreError::NotFound);
    }

    let query = sqlx::query_as::<_, Movie>(
        r#"
        SELECT id, created_at, title, year, runtime, genres, version
        FROM movies
        WHERE id = $1
        "#,
    )
    .bind(id);

    match timeout(QUERY_TIMEOUT, query.fetch_optional(db)).await?? {
        Some(movie) => Ok(movie),
        None => Err(StoreError::NotFound),
    }
}

/// Optimistic-concurrency update: the WHERE clause carries the version the
/// caller read, and the version bump is atomic with the write. No matched row
/// means a concurrent writer updated the record first.
pub async fn update(db: &PgPool, movie: &mut Movie) -> Result<(), StoreError> {
    let query = sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE movies
        SET title = $1, year = $2, runtime = $3, genres = $4, version = version + 1
        WHERE id = $5 AND version = $6
        RETURNING version
        "#,
    )
    .bind(&movie.title)
    .bind(movie.year)
    .bind(movie.runtime)
    .bind(&movie.genres)
    .bind(movie.id)
    .bind(movie.version);

    match timeout(QUERY_TIMEOUT, query.fetch_optional(db)).await?? {
        Some(version) => {
            movie.version = version;
            Ok(())
        }
        None => Err(StoreError::EditConflict),
    }
}

pub async fn delete(db: &PgPool, id: i64) -> Result<(), StoreError> {
    if id < 1 {
        return Err(StoreError::NotFound);
    }

    let query = sqlx::query("DELETE FROM movies WHERE id = $1").bind(id);
    let result = timeout(QUERY_TIMEOUT, query.execute(db)).await??;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

#[derive(FromRow)]
struct CountedMovieRow {
    total_records: i64,
    id: i64,
    created_at: OffsetDateTime,
    title: String,
    year: i32,
    runtime: Runtime,
    genres: Vec<String>,
    version: i32,
}

/// Filtered, paginated listing. The matching total rides along as a window
/// function so one round trip yields both the page and its metadata. The sort
/// column comes from the safelist; the trailing `id ASC` keeps pagination
/// stable under ties.
pub async fn get_all(
    db: &PgPool,
    title: &str,
    genres: &[String],
    filters: &Filters,
) -> Result<(Vec<Movie>, Metadata), StoreError> {
    let sql = format!(
        r#"
        SELECT count(*) OVER() AS total_records,
               id, created_at, title, year, runtime, genres, version
        FROM movies
        WHERE (to_tsvector('simple', title) @@ plainto_tsquery('simple', $1) OR $1 = '')
        AND (genres @> $2 OR cardinality($2) = 0)
        ORDER BY {} {}, id ASC
        LIMIT $3 OFFSET $4
        "#,
        filters.sort_column()?,
        filters.sort_direction(),
    );

    let query = sqlx::query_as::<_, CountedMovieRow>(&sql)
        .bind(title)
        .bind(genres)
        .bind(filters.limit())
        .bind(filters.offset());

    let rows = timeout(QUERY_TIMEOUT, query.fetch_all(db)).await??;

    let total_records = rows.first().map_or(0, |row| row.total_records);
    let movies = rows
        .into_iter()
        .map(|row| Movie {
            id: row.id,
            created_at: row.created_at,
            title: row.title,
            year: row.year,
            runtime: row.runtime,
            genres: row.genres,
            version: row.version,
        })
        .collect();

    let metadata = calculate_metadata(total_records, filters.page, filters.page_size);
    Ok((movies, metadata))
}
