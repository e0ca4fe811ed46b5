use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::validator::{unique, Validator};

/// Movie runtime in minutes. Rendered in JSON as `"<n> mins"` and parsed back
/// from the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(transparent)]
pub struct Runtime(pub i32);

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{} mins", self.0))
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)
            .map_err(|_| de::Error::custom("invalid runtime format"))?;

        let minutes = match value.split_once(' ') {
            Some((number, "mins")) => number.parse::<i32>().ok(),
            _ => None,
        };

        minutes
            .map(Runtime)
            .ok_or_else(|| de::Error::custom("invalid runtime format"))
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Movie {
    pub id: i64,
    #[serde(skip)]
    pub created_at: OffsetDateTime,
    pub title: String,
    pub year: i32,
    pub runtime: Runtime,
    pub genres: Vec<String>,
    pub version: i32,
}

pub fn validate_movie(
    v: &mut Validator,
    title: &str,
    year: i32,
    runtime: Runtime,
    genres: &[String],
) {
    v.check(!title.is_empty(), "title", "must be provided");
    v.check(title.len() <= 500, "title", "must not be more than 500 bytes long");

    let current_year = OffsetDateTime::now_utc().year();
    v.check(year != 0, "year", "must be provided");
    v.check(year >= 1888, "year", "must be greater than 1888");
    v.check(year <= current_year, "year", "must not be in the future");

    v.check(runtime.0 != 0, "runtime", "must be provided");
    v.check(runtime.0 > 0, "runtime", "must be a positive integer");

    v.check(!genres.is_empty(), "genres", "must contain at least 1 genre");
    v.check(genres.len() <= 5, "genres", "must not contain more than 5 genres");
    v.check(unique(genres), "genres", "must not contain duplicate values");
}
