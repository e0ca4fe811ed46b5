use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    pub static ref EMAIL_RE: Regex = Regex::new(
        "^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    )
    .expect("email regex");
}

/// Accumulates field-level validation failures. The first message recorded for a
/// key wins; later failures for the same key are dropped.
#[derive(Debug, Default)]
pub struct Validator {
    errors: HashMap<String, String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, key: &str, message: &str) {
        if !self.errors.contains_key(key) {
            self.errors.insert(key.to_string(), message.to_string());
        }
    }

    /// Records a failure for `key` iff `ok` is false.
    pub fn check(&mut self, ok: bool, key: &str, message: &str) {
        if !ok {
            self.add_error(key, message);
        }
    }

    pub fn into_errors(self) -> HashMap<String, String> {
        self.errors
    }
}

pub fn in_list(value: &str, list: &[&str]) -> bool {
    list.contains(&value)
}

pub fn matches(value: &str, re: &Regex) -> bool {
    re.is_match(value)
}

pub fn unique(values: &[String]) -> bool {
    let mut seen = std::collections::HashSet::new();
    values.iter().all(|v| seen.insert(v.as_str()))
}
