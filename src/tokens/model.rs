use data_encoding::BASE32_NOPAD;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::validator::Validator;

/// The privilege class a token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Activation,
    Authentication,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Activation => "activation",
            Scope::Authentication => "authentication",
        }
    }
}

/// A bearer credential. The plaintext is shown to the client exactly once;
/// only the SHA-256 hash is ever persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub plaintext: String,
    #[serde(skip)]
    pub hash: Vec<u8>,
    #[serde(skip)]
    pub user_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
    #[serde(skip)]
    pub scope: Scope,
}

impl Token {
    /// 16 bytes from the OS CSPRNG, base32-encoded (no padding) into a
    /// 26-character plaintext. An RNG failure propagates; it is never papered
    /// over with a default.
    pub fn generate(user_id: i64, ttl: Duration, scope: Scope) -> anyhow::Result<Token> {
        let mut random_bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut random_bytes)
            .map_err(|err| anyhow::anyhow!("reading random bytes: {err}"))?;

        let plaintext = BASE32_NOPAD.encode(&random_bytes);
        let hash = hash_plaintext(&plaintext);

        Ok(Token {
            plaintext,
            hash,
            user_id,
            expiry: OffsetDateTime::now_utc() + ttl,
            scope,
        })
    }
}

pub fn hash_plaintext(plaintext: &str) -> Vec<u8> {
    Sha256::digest(plaintext.as_bytes()).to_vec()
}

/// Cheap shape check, run before any store lookup.
pub fn validate_token_plaintext(v: &mut Validator, plaintext: &str) {
    v.check(!plaintext.is_empty(), "token", "must be provided");
    v.check(plaintext.len() == 26, "token", "must be 26 bytes long");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_plaintext_is_26_chars_of_base32() {
        let token = Token::generate(1, Duration::days(1), Scope::Activation).unwrap();
        assert_eq!(token.plaintext.len(), 26);
        assert!(BASE32_NOPAD.decode(token.plaintext.as_bytes()).is_ok());
    }

    #[test]
    fn hash_matches_plaintext_digest() {
        let token = Token::generate(1, Duration::hours(1), Scope::Authentication).unwrap();
        assert_eq!(token.hash.len(), 32);
        assert_eq!(token.hash, hash_plaintext(&token.plaintext));
    }

    #[test]
    fn expiry_is_now_plus_ttl() {
        let before = OffsetDateTime::now_utc();
        let token = Token::generate(1, Duration::hours(24), Scope::Authentication).unwrap();
        let after = OffsetDateTime::now_utc();
        assert!(token.expiry >= before + Duration::hours(24));
        assert!(token.expiry <= after + Duration::hours(24));
    }

    #[test]
    fn consecutive_tokens_differ() {
        let a = Token::generate(1, Duration::hours(1), Scope::Activation).unwrap();
        let b = Token::generate(1, Duration::hours(1), Scope::Activation).unwrap();
        assert_ne!(a.plaintext, b.plaintext);
    }

    #[test]
    fn plaintext_validation_enforces_length() {
        let mut v = Validator::new();
        validate_token_plaintext(&mut v, "ABCDEFGHIJKLMNOPQRSTUVWXYZ");
        assert!(v.valid());

        let mut v = Validator::new();
        validate_token_plaintext(&mut v, "too-short");
        assert!(!v.valid());

        let mut v = Validator::new();
        validate_token_plaintext(&mut v, "");
        assert!(!v.valid());
    }

    #[test]
    fn token_serializes_plaintext_and_expiry_only() {
        let token = Token::generate(42, Duration::hours(1), Scope::Authentication).unwrap();
        let value = serde_json::to_value(&token).unwrap();
        let object = value.as_object().unwrap();
        assert!(object.contains_key("token"));
        assert!(object.contains_key("expiry"));
        assert_eq!(object.len(), 2);
    }
}
