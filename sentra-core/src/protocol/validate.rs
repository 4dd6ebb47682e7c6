//! Field validators shared by the client and the coordinator.
//!
//! Kept tight so identifiers are safe in logs and indexes.

use regex::Regex;
use std::sync::OnceLock;

pub const MAX_MACHINE_ID_LEN: usize = 64;
pub const MAX_MACHINE_NAME_LEN: usize = 128;
pub const MAX_DEVICE_PUB_KEY_LEN: usize = 256;
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 80;
pub const MAX_ENV_PATH_LEN: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("{0} too long")]
    TooLong(&'static str),
    #[error("invalid {0}")]
    Invalid(&'static str),
}

/// Match against a lazily compiled pattern. A pattern that fails to compile matches nothing.
pub fn pattern_matches(cell: &'static OnceLock<Option<Regex>>, pattern: &str, value: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

fn is_machine_id(value: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    pattern_matches(&RE, r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$", value)
}

fn is_idempotency_key(value: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    pattern_matches(&RE, r"^[A-Za-z0-9][A-Za-z0-9._-]{0,79}$", value)
}

fn is_env_path(value: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    pattern_matches(
        &RE,
        r"^(?:[A-Za-z0-9._-]+/)*\.env(?:\.[A-Za-z0-9._-]+)*$",
        value,
    )
}

/// Relative path of a `.env`-family file, e.g. `api/.env.local`.
pub fn env_file_path(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Missing("path"));
    }
    if value.len() > MAX_ENV_PATH_LEN {
        return Err(ValidationError::TooLong("path"));
    }
    if !is_env_path(value) || value.split('/').any(|seg| seg == "." || seg == "..") {
        return Err(ValidationError::Invalid("path"));
    }
    Ok(())
}

pub fn machine_id(value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Missing("machine_id"));
    }
    if value.len() > MAX_MACHINE_ID_LEN {
        return Err(ValidationError::TooLong("machine_id"));
    }
    if !is_machine_id(value) {
        return Err(ValidationError::Invalid("machine_id"));
    }
    Ok(())
}

pub fn machine_name(value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Missing("machine_name"));
    }
    if value.len() > MAX_MACHINE_NAME_LEN {
        return Err(ValidationError::TooLong("machine_name"));
    }
    if value.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(ValidationError::Invalid("machine_name"));
    }
    Ok(())
}

pub fn device_pub_key(value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Missing("device_pub_key"));
    }
    if value.len() > MAX_DEVICE_PUB_KEY_LEN {
        return Err(ValidationError::TooLong("device_pub_key"));
    }
    if !value
        .bytes()
        .all(|c| c.is_ascii_alphanumeric() || c == b'-' || c == b'_')
    {
        return Err(ValidationError::Invalid("device_pub_key"));
    }
    Ok(())
}

pub fn idempotency_key(value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Missing("idempotency key"));
    }
    if value.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ValidationError::TooLong("idempotency key"));
    }
    if !is_idempotency_key(value) {
        return Err(ValidationError::Invalid("idempotency key"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_id() {
        assert!(machine_id("3f2b8c1e-1111-4222-8333-444455556666").is_ok());
        assert!(machine_id("laptop.home_1").is_ok());
        assert_eq!(machine_id("  "), Err(ValidationError::Missing("machine_id")));
        assert_eq!(machine_id("-leading"), Err(ValidationError::Invalid("machine_id")));
        assert_eq!(machine_id("has space"), Err(ValidationError::Invalid("machine_id")));
        assert_eq!(machine_id(&"a".repeat(65)), Err(ValidationError::TooLong("machine_id")));
        assert!(machine_id(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_machine_name() {
        assert!(machine_name("Ana's MacBook Pro").is_ok());
        assert_eq!(machine_name("line\nbreak"), Err(ValidationError::Invalid("machine_name")));
        assert_eq!(machine_name("del\u{7f}"), Err(ValidationError::Invalid("machine_name")));
        assert_eq!(machine_name(&"n".repeat(129)), Err(ValidationError::TooLong("machine_name")));
    }

    #[test]
    fn test_device_pub_key() {
        assert!(device_pub_key("abcDEF012-_").is_ok());
        assert_eq!(device_pub_key("abc+/="), Err(ValidationError::Invalid("device_pub_key")));
        assert_eq!(
            device_pub_key(&"k".repeat(257)),
            Err(ValidationError::TooLong("device_pub_key"))
        );
    }

    #[test]
    fn test_env_file_path() {
        assert!(env_file_path(".env").is_ok());
        assert!(env_file_path("api/.env.local").is_ok());
        assert!(env_file_path("apps/web/.env.production").is_ok());
        assert_eq!(env_file_path("api/config.json"), Err(ValidationError::Invalid("path")));
        assert_eq!(env_file_path("/etc/.env"), Err(ValidationError::Invalid("path")));
        assert_eq!(env_file_path("../.env"), Err(ValidationError::Invalid("path")));
        assert_eq!(env_file_path("api/.envrc"), Err(ValidationError::Invalid("path")));
    }

    #[test]
    fn test_idempotency_key() {
        assert!(idempotency_key("0b7e2c1a-5d4f-5a3b-9c8d-112233445566").is_ok());
        assert_eq!(idempotency_key(""), Err(ValidationError::Missing("idempotency key")));
        assert_eq!(idempotency_key("bad key"), Err(ValidationError::Invalid("idempotency key")));
        assert_eq!(
            idempotency_key(&"k".repeat(81)),
            Err(ValidationError::TooLong("idempotency key"))
        );
    }
}
