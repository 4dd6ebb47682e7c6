//! Strict validation of `POST /push` bodies.
//!
//! Unknown fields and wrong types are rejected while decoding; the remaining
//! bounds and formats are checked here. Errors carry the reason for the log
//! only, clients get a generic message.

use sentra_core::crypto::CipherKind;
use sentra_core::models::{PushFile, PushRequest, StorageRef, PUSH_VERSION, STORAGE_PROVIDER_S3};
use sentra_core::protocol::validate;
use std::collections::HashSet;
use std::fmt;

pub const MAX_FILES: usize = 200;
pub const MAX_ROOT_LEN: usize = 300;
pub const MAX_MACHINE_NAME_LEN: usize = 255;
pub const MAX_MESSAGE_LEN: usize = 500;
pub const MAX_PLAINTEXT_SIZE: u64 = 1 << 20;
pub const MAX_BLOB_LEN: usize = 8_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError(pub String);

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SchemaError {}

fn fail<T>(msg: impl Into<String>) -> Result<T, SchemaError> {
    Err(SchemaError(msg.into()))
}

fn is_uuid(value: &str) -> bool {
    uuid::Uuid::parse_str(value.trim()).is_ok()
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), SchemaError> {
    let n = value.chars().count();
    if n < min || n > max {
        return fail(format!("{}: length {} outside {}..={}", field, n, min, max));
    }
    Ok(())
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn check_storage(i: usize, storage: &StorageRef) -> Result<(), SchemaError> {
    if storage.provider != STORAGE_PROVIDER_S3 {
        return fail(format!("files[{}].storage.provider: unsupported", i));
    }
    check_len("storage.bucket", &storage.bucket, 1, 255)?;
    check_len("storage.key", &storage.key, 1, 1024)?;
    if let Some(endpoint) = &storage.endpoint {
        check_len("storage.endpoint", endpoint, 1, 500)?;
    }
    if let Some(region) = &storage.region {
        check_len("storage.region", region, 1, 100)?;
    }
    Ok(())
}

fn check_file(i: usize, file: &PushFile) -> Result<(), SchemaError> {
    if validate::env_file_path(&file.path).is_err() {
        return fail(format!("files[{}].path: not a .env file path", i));
    }
    if !is_sha256_hex(&file.sha256) {
        return fail(format!("files[{}].sha256: not lowercase hex sha256", i));
    }
    if file.size == 0 || file.size > MAX_PLAINTEXT_SIZE {
        return fail(format!("files[{}].size: {} out of range", i, file.size));
    }
    if !file.encrypted {
        return fail(format!("files[{}].encrypted must be true", i));
    }
    if CipherKind::parse(&file.cipher).is_none() {
        return fail(format!("files[{}].cipher: unknown", i));
    }
    match (&file.blob, &file.storage) {
        (Some(blob), None) => check_len("blob", blob, 1, MAX_BLOB_LEN),
        (None, Some(storage)) => check_storage(i, storage),
        _ => fail(format!("files[{}]: exactly one of blob or storage required", i)),
    }
}

/// Decode and validate a push body.
pub fn validate_push(body: &[u8]) -> Result<PushRequest, SchemaError> {
    let req: PushRequest =
        serde_json::from_slice(body).map_err(|e| SchemaError(format!("decode: {}", e)))?;

    if req.v != PUSH_VERSION {
        return fail(format!("v: unsupported version {}", req.v));
    }

    match (&req.project.id, &req.project.root) {
        (Some(id), None) if is_uuid(id) => {}
        (None, Some(root)) => check_len("project.root", root, 1, MAX_ROOT_LEN)?,
        _ => return fail("project: exactly one of id (uuid) or root required"),
    }

    if !is_uuid(&req.machine.id) {
        return fail("machine.id: not a uuid");
    }
    if let Some(name) = &req.machine.name {
        check_len("machine.name", name, 1, MAX_MACHINE_NAME_LEN)?;
    }

    if !is_uuid(&req.commit.client_id) {
        return fail("commit.client_id: not a uuid");
    }
    check_len("commit.message", &req.commit.message, 1, MAX_MESSAGE_LEN)?;
    if let Some(parent) = &req.commit.parent_client_id {
        if !is_uuid(parent) {
            return fail("commit.parent_client_id: not a uuid");
        }
    }

    if req.files.is_empty() || req.files.len() > MAX_FILES {
        return fail(format!("files: {} entries outside 1..={}", req.files.len(), MAX_FILES));
    }
    let mut seen = HashSet::with_capacity(req.files.len());
    for (i, file) in req.files.iter().enumerate() {
        check_file(i, file)?;
        if !seen.insert(file.path.as_str()) {
            return fail(format!("files[{}].path: duplicate", i));
        }
    }

    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn valid() -> Value {
        json!({
            "v": 1,
            "project": {"root": "api"},
            "machine": {"id": "3f2b8c1e-1111-4222-8333-444455556666", "name": "laptop"},
            "commit": {"client_id": "11111111-1111-4111-8111-111111111111", "message": "sync"},
            "files": [{
                "path": "api/.env",
                "sha256": "a".repeat(64),
                "size": 12,
                "encrypted": true,
                "cipher": "sentra-v1",
                "blob": "AAAA"
            }]
        })
    }

    fn check(value: &Value) -> Result<PushRequest, SchemaError> {
        validate_push(&serde_json::to_vec(value).unwrap())
    }

    #[test]
    fn test_valid_payload() {
        let req = check(&valid()).unwrap();
        assert_eq!(req.files.len(), 1);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let mut v = valid();
        v["extra"] = json!(1);
        assert!(check(&v).is_err());

        let mut v = valid();
        v["files"][0]["mode"] = json!("0600");
        assert!(check(&v).is_err());
    }

    #[test]
    fn test_project_exactly_one() {
        let mut v = valid();
        v["project"] = json!({"root": "api", "id": "3f2b8c1e-1111-4222-8333-444455556666"});
        assert!(check(&v).is_err());

        v["project"] = json!({});
        assert!(check(&v).is_err());

        v["project"] = json!({"id": "not-a-uuid"});
        assert!(check(&v).is_err());

        v["project"] = json!({"id": "3f2b8c1e-1111-4222-8333-444455556666"});
        assert!(check(&v).is_ok());
    }

    #[test]
    fn test_blob_xor_storage() {
        let mut v = valid();
        v["files"][0]["storage"] = json!({"provider": "s3", "bucket": "b", "key": "k"});
        assert!(check(&v).is_err());

        v["files"][0].as_object_mut().unwrap().remove("blob");
        assert!(check(&v).is_ok());

        v["files"][0]["storage"]["provider"] = json!("gcs");
        assert!(check(&v).is_err());
    }

    #[test]
    fn test_file_constraints() {
        let cases: Vec<(&str, Value)> = vec![
            ("path", json!("api/config.json")),
            ("sha256", json!("A".repeat(64))),
            ("size", json!(0)),
            ("size", json!(1_048_577)),
            ("encrypted", json!(false)),
            ("cipher", json!("aes-cbc")),
        ];
        for (field, bad) in cases {
            let mut v = valid();
            v["files"][0][field] = bad;
            assert!(check(&v).is_err(), "{} should be rejected", field);
        }

        let mut v = valid();
        v["files"][0]["size"] = json!(1_048_576);
        v["files"][0]["cipher"] = json!("ed25519+aes-256-gcm-v1");
        assert!(check(&v).is_ok());
    }

    #[test]
    fn test_files_count_and_version() {
        let mut v = valid();
        v["files"] = json!([]);
        assert!(check(&v).is_err());

        let mut v = valid();
        let file = v["files"][0].clone();
        v["files"] = Value::Array(vec![file; 201]);
        assert!(check(&v).is_err());

        let mut v = valid();
        v["v"] = json!(2);
        assert!(check(&v).is_err());
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let mut v = valid();
        let file = v["files"][0].clone();
        v["files"] = Value::Array(vec![file.clone(), file.clone()]);
        assert!(check(&v).is_err());

        let mut other = file;
        other["path"] = json!("api/.env.local");
        v["files"][1] = other;
        assert!(check(&v).is_ok());
    }

    #[test]
    fn test_commit_fields() {
        let mut v = valid();
        v["commit"]["message"] = json!("");
        assert!(check(&v).is_err());

        let mut v = valid();
        v["commit"]["message"] = json!("m".repeat(501));
        assert!(check(&v).is_err());

        let mut v = valid();
        v["commit"]["parent_client_id"] = json!("legacy-1");
        assert!(check(&v).is_err());
    }

    #[test]
    fn test_not_json() {
        assert!(validate_push(b"not json").is_err());
    }
}
