use serde::Serialize;

use crate::{
    errors::StoreError,
    validator::{in_list, Validator},
};

/// Query-derived pagination and sort state. `sort_safelist` closes the set of
/// sortable columns against injection; a leading hyphen selects descending
/// order.
#[derive(Debug, Clone)]
pub struct Filters {
    pub page: i64,
    pub page_size: i64,
    pub sort: String,
    pub sort_safelist: &'static [&'static str],
}

impl Filters {
    /// The column name for the ORDER BY clause. Validation guarantees the sort
    /// value is safelisted before query construction; a value that slips
    /// through anyway must never reach the SQL string.
    pub fn sort_column(&self) -> Result<&str, StoreError> {
        for safe in self.sort_safelist {
            if self.sort == *safe {
                return Ok(self.sort.trim_start_matches('-'));
            }
        }
        Err(StoreError::UnsafeSort(self.sort.clone()))
    }

    pub fn sort_direction(&self) -> &'static str {
        if self.sort.starts_with('-') {
            "DESC"
        } else {
            "ASC"
        }
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

pub fn validate_filters(v: &mut Validator, filters: &Filters) {
    v.check(filters.page > 0, "page", "must be greater than zero");
    v.check(filters.page <= 10_000_000, "page", "must be a maximum of 10 million");
    v.check(filters.page_size > 0, "page_size", "must be greater than zero");
    v.check(filters.page_size <= 100, "page_size", "must be a maximum of 100");
    v.check(
        in_list(&filters.sort, filters.sort_safelist),
        "sort",
        "invalid sort value",
    );
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// Pagination metadata derived from the windowed total. All-zero (and thus an
/// empty JSON object) when nothing matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "is_zero")]
    pub current_page: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub page_size: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub first_page: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub last_page: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub total_records: i64,
}

pub fn calculate_metadata(total_records: i64, page: i64, page_size: i64) -> Metadata {
    if total_records == 0 {
        return Metadata::default();
    }

    Metadata {
        current_page: page,
        page_size,
        first_page: 1,
        last_page: (total_records + page_size - 1) / page_size,
        total_records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAFELIST: &[&str] = &["id", "title", "-id", "-title"];

    fn filters(page: i64, page_size: i64, sort: &str) -> Filters {
        Filters {
            page,
            page_size,
            sort: sort.to_string(),
            sort_safelist: SAFELIST,
        }
    }

    #[test]
    fn sort_column_strips_descending_prefix() {
        assert_eq!(filters(1, 20, "title").sort_column().unwrap(), "title");
        assert_eq!(filters(1, 20, "-title").sort_column().unwrap(), "title");
    }

    #[test]
    fn sort_direction_follows_prefix() {
        assert_eq!(filters(1, 20, "title").sort_direction(), "ASC");
        assert_eq!(filters(1, 20, "-title").sort_direction(), "DESC");
    }

    #[test]
    fn unsafe_sort_never_reaches_query_construction() {
        let err = filters(1, 20, "year; DROP TABLE movies").sort_column().unwrap_err();
        assert!(matches!(err, StoreError::UnsafeSort(_)));
    }

    #[test]
    fn filter_validation_bounds_page_and_size() {
        let mut v = Validator::new();
        validate_filters(&mut v, &filters(0, 20, "id"));
        assert!(!v.valid());

        let mut v = Validator::new();
        validate_filters(&mut v, &filters(1, 101, "id"));
        assert!(!v.valid());

        let mut v = Validator::new();
        validate_filters(&mut v, &filters(1, 20, "rating"));
        assert_eq!(
            v.into_errors().get("sort").map(String::as_str),
            Some("invalid sort value")
        );

        let mut v = Validator::new();
        validate_filters(&mut v, &filters(1, 20, "id"));
        assert!(v.valid());
    }

    #[test]
    fn offset_derives_from_page() {
        let f = filters(3, 20, "id");
        assert_eq!(f.limit(), 20);
        assert_eq!(f.offset(), 40);
    }

    #[test]
    fn metadata_for_zero_records_is_the_zero_value() {
        assert_eq!(calculate_metadata(0, 1, 20), Metadata::default());
        let json = serde_json::to_string(&calculate_metadata(0, 1, 20)).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn metadata_rounds_last_page_up() {
        let metadata = calculate_metadata(41, 2, 20);
        assert_eq!(metadata.current_page, 2);
        assert_eq!(metadata.first_page, 1);
        assert_eq!(metadata.last_page, 3);
        assert_eq!(metadata.total_records, 41);
    }
}
