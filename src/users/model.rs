use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::validator::{matches, Validator, EMAIL_RE};

/// A registered account. The password never leaves the argon2 hash once it is
/// persisted, and neither the hash nor the version counter is serialized.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub activated: bool,
    #[serde(skip)]
    pub version: i32,
}

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(matches(email, &EMAIL_RE), "email", "must be a valid email address");
}

pub fn validate_password_plaintext(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(password.len() >= 8, "password", "must be at least 8 bytes long");
    v.check(password.len() <= 72, "password", "must not be more than 72 bytes long");
}

pub fn validate_name(v: &mut Validator, name: &str) {
    v.check(!name.is_empty(), "name", "must be provided");
    v.check(name.len() <= 500, "name", "must not be more than 500 bytes long");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_registration_fields_pass() {
        let mut v = Validator::new();
        validate_name(&mut v, "Ann");
        validate_email(&mut v, "ann@example.com");
        validate_password_plaintext(&mut v, "longenough1");
        assert!(v.valid());
    }

    #[test]
    fn short_password_is_rejected() {
        let mut v = Validator::new();
        validate_password_plaintext(&mut v, "short");
        assert_eq!(
            v.into_errors().get("password").map(String::as_str),
            Some("must be at least 8 bytes long")
        );
    }

    #[test]
    fn bad_email_is_rejected() {
        let mut v = Validator::new();
        validate_email(&mut v, "not-an-email");
        assert!(!v.valid());
    }

    #[test]
    fn serialization_hides_password_hash_and_version() {
        let user = User {
            id: 1,
            created_at: OffsetDateTime::UNIX_EPOCH,
            name: "Ann".into(),
            email: "ann@example.com".into(),
            password_hash: "secret-hash".into(),
            activated: false,
            version: 3,
        };
        let value = serde_json::to_value(&user).unwrap();
        let object = value.as_object().unwrap();
        assert!(!object.contains_key("password_hash"));
        assert!(!object.contains_key("version"));
        assert_eq!(object["activated"], false);
        assert_eq!(object["email"], "ann@example.com");
    }
}
