//! SQLite backend for every coordinator repository.

use super::{
    CommitStore, ExportStore, IdempotencyRecord, IdempotencyStatus, IdempotencyStore,
    MachineStore, ProjectStore, PushStore, StoreError, StoreResult, VaultKeyStore,
};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sentra_core::models::{
    CommitInfo, ExportFile, ProjectInfo, PushRequest, PushResponse, STORAGE_PROVIDER_S3,
};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_MAX_MACHINES: usize = 10;

/// Thread-safe coordinator storage.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    max_machines: usize,
}

impl SqliteStore {
    pub fn open(path: &Path, max_machines: usize) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::from_connection(conn, max_machines)
    }

    #[cfg(test)]
    pub fn in_memory(max_machines: usize) -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, max_machines)
    }

    fn from_connection(conn: Connection, max_machines: usize) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            max_machines: max_machines.max(1),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS machines (
                user_id TEXT NOT NULL,
                machine_id TEXT NOT NULL,
                machine_name TEXT NOT NULL,
                device_pub_key TEXT NOT NULL,
                device_key_type TEXT NOT NULL DEFAULT 'ed25519',
                registered_at INTEGER NOT NULL,
                last_seen_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, machine_id)
            );

            CREATE TABLE IF NOT EXISTS projects (
                project_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                root_path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, root_path)
            );

            CREATE TABLE IF NOT EXISTS commits (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                commit_id TEXT NOT NULL UNIQUE,
                project_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                parent_client_id TEXT,
                message TEXT NOT NULL,
                machine_id TEXT NOT NULL,
                machine_name TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                UNIQUE (project_id, client_id),
                FOREIGN KEY (project_id) REFERENCES projects(project_id)
            );

            CREATE TABLE IF NOT EXISTS commit_files (
                commit_id TEXT NOT NULL,
                file_path TEXT NOT NULL,
                sha256 TEXT NOT NULL,
                size INTEGER NOT NULL,
                cipher TEXT NOT NULL,
                blob_b64 TEXT,
                storage_provider TEXT,
                storage_bucket TEXT,
                storage_key TEXT,
                storage_endpoint TEXT,
                storage_region TEXT,
                PRIMARY KEY (commit_id, file_path),
                FOREIGN KEY (commit_id) REFERENCES commits(commit_id)
            );

            CREATE TABLE IF NOT EXISTS vault_keys (
                user_id TEXT PRIMARY KEY,
                doc TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS idempotency_keys (
                user_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                idem_key TEXT NOT NULL,
                status TEXT NOT NULL,
                response_json TEXT,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, scope, idem_key)
            );

            CREATE INDEX IF NOT EXISTS idx_commits_project_seq
                ON commits(project_id, seq);
            CREATE INDEX IF NOT EXISTS idx_commit_files_path
                ON commit_files(file_path);
            CREATE INDEX IF NOT EXISTS idx_idempotency_expires
                ON idempotency_keys(expires_at);",
        )?;
        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Database(format!("lock error: {}", e)))
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Project id for `(user, root)`, creating the project on first push.
fn ensure_project(conn: &Connection, user_id: &str, root: &str) -> StoreResult<String> {
    conn.execute(
        "INSERT OR IGNORE INTO projects (project_id, user_id, root_path, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![Uuid::new_v4().to_string(), user_id, root, now_rfc3339()],
    )?;
    Ok(conn.query_row(
        "SELECT project_id FROM projects WHERE user_id = ?1 AND root_path = ?2",
        params![user_id, root],
        |row| row.get(0),
    )?)
}

fn find_project_by_root(
    conn: &Connection,
    user_id: &str,
    root: &str,
) -> StoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT project_id FROM projects WHERE user_id = ?1 AND root_path = ?2",
            params![user_id, root],
            |row| row.get(0),
        )
        .optional()?)
}

impl MachineStore for SqliteStore {
    fn register(
        &self,
        user_id: &str,
        machine_id: &str,
        machine_name: &str,
        device_pub_key: &str,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT device_pub_key FROM machines WHERE user_id = ?1 AND machine_id = ?2",
                params![user_id, machine_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(bound) = &existing {
            if bound.trim() != device_pub_key.trim() {
                return Err(StoreError::KeyMismatch);
            }
        } else {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM machines WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            if count as usize >= self.max_machines {
                return Err(StoreError::TooManyMachines);
            }
        }

        let now = Utc::now().timestamp();
        conn.execute(
            "INSERT INTO machines (user_id, machine_id, machine_name, device_pub_key, registered_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(user_id, machine_id) DO UPDATE SET
                machine_name = excluded.machine_name,
                last_seen_at = excluded.last_seen_at",
            params![user_id, machine_id, machine_name, device_pub_key, now],
        )?;
        Ok(())
    }

    fn device_pub_key(&self, user_id: &str, machine_id: &str) -> StoreResult<Option<String>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT device_pub_key FROM machines WHERE user_id = ?1 AND machine_id = ?2",
                params![user_id, machine_id],
                |row| row.get(0),
            )
            .optional()?)
    }
}

impl PushStore for SqliteStore {
    fn push(&self, user_id: &str, request: &PushRequest) -> StoreResult<PushResponse> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let (project_id, project_root) = match (&request.project.id, &request.project.root) {
            (Some(id), _) => tx
                .query_row(
                    "SELECT project_id, root_path FROM projects WHERE user_id = ?1 AND project_id = ?2",
                    params![user_id, id.trim()],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?
                .ok_or(StoreError::NotFound("project"))?,
            (None, Some(root)) => {
                let root = root.trim();
                (ensure_project(&tx, user_id, root)?, root.to_string())
            }
            (None, None) => return Err(StoreError::NotFound("project")),
        };

        let client_id = request.commit.client_id.trim();
        let existing = tx
            .query_row(
                "SELECT c.commit_id,
                        (SELECT COUNT(*) FROM commit_files f WHERE f.commit_id = c.commit_id)
                 FROM commits c WHERE c.project_id = ?1 AND c.client_id = ?2",
                params![project_id, client_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        if let Some((commit_id, files)) = existing {
            return Ok(PushResponse {
                commit_id,
                project_id,
                project_root,
                files: files as usize,
                deduplicated: true,
            });
        }

        let machine_id = request.machine.id.trim();
        let machine_name = match request.machine.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => tx
                .query_row(
                    "SELECT machine_name FROM machines WHERE user_id = ?1 AND machine_id = ?2",
                    params![user_id, machine_id],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or_default(),
        };

        let commit_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO commits (commit_id, project_id, client_id, parent_client_id, message, machine_id, machine_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                commit_id,
                project_id,
                client_id,
                request.commit.parent_client_id.as_deref().map(str::trim),
                request.commit.message,
                machine_id,
                machine_name,
                now_rfc3339(),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO commit_files (commit_id, file_path, sha256, size, cipher, blob_b64,
                    storage_provider, storage_bucket, storage_key, storage_endpoint, storage_region)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for file in &request.files {
                let storage = file.storage.as_ref();
                stmt.execute(params![
                    commit_id,
                    file.path,
                    file.sha256,
                    file.size as i64,
                    file.cipher,
                    file.blob,
                    storage.map(|s| s.provider.as_str()),
                    storage.map(|s| s.bucket.as_str()),
                    storage.map(|s| s.key.as_str()),
                    storage.and_then(|s| s.endpoint.as_deref()),
                    storage.and_then(|s| s.region.as_deref()),
                ])?;
            }
        }
        tx.commit()?;

        Ok(PushResponse {
            commit_id,
            project_id,
            project_root,
            files: request.files.len(),
            deduplicated: false,
        })
    }
}

impl ExportStore for SqliteStore {
    fn export(&self, user_id: &str, root: &str, at: Option<&str>) -> StoreResult<Vec<ExportFile>> {
        let conn = self.conn()?;
        let Some(project_id) = find_project_by_root(&conn, user_id, root)? else {
            return Ok(Vec::new());
        };

        let upto: i64 = match at.map(str::trim).filter(|a| !a.is_empty()) {
            Some(at) => conn
                .query_row(
                    "SELECT seq FROM commits WHERE project_id = ?1 AND (commit_id = ?2 OR client_id = ?2)",
                    params![project_id, at],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(StoreError::NotFound("commit"))?,
            None => i64::MAX,
        };

        let mut stmt = conn.prepare(
            "SELECT c.commit_id, f.file_path, f.sha256, f.size, f.cipher, f.blob_b64,
                    f.storage_provider, f.storage_bucket, f.storage_key, f.storage_endpoint, f.storage_region
             FROM commit_files f
             JOIN commits c ON c.commit_id = f.commit_id
             WHERE c.project_id = ?1
               AND c.seq = (
                   SELECT MAX(c2.seq) FROM commits c2
                   JOIN commit_files f2 ON f2.commit_id = c2.commit_id
                   WHERE c2.project_id = ?1 AND c2.seq <= ?2 AND f2.file_path = f.file_path
               )
             ORDER BY f.file_path",
        )?;
        let files = stmt
            .query_map(params![project_id, upto], |row| {
                let provider: Option<String> = row.get(6)?;
                let bucket: Option<String> = row.get(7)?;
                Ok(ExportFile {
                    commit_id: row.get(0)?,
                    file_path: row.get(1)?,
                    sha256: row.get(2)?,
                    size: row.get::<_, i64>(3)? as u64,
                    cipher: row.get(4)?,
                    blob_b64: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    storage_provider: provider.or_else(|| {
                        bucket.as_ref().map(|_| STORAGE_PROVIDER_S3.to_string())
                    }),
                    storage_bucket: bucket,
                    storage_key: row.get(8)?,
                    storage_endpoint: row.get(9)?,
                    storage_region: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }
}

impl CommitStore for SqliteStore {
    fn list_commits(&self, user_id: &str, root: &str) -> StoreResult<Vec<CommitInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.commit_id, c.created_at, c.message, c.machine_name, c.machine_id,
                    p.project_id, p.root_path
             FROM commits c
             JOIN projects p ON p.project_id = c.project_id
             WHERE p.user_id = ?1 AND p.root_path = ?2
             ORDER BY c.seq DESC",
        )?;
        let mut commits = stmt
            .query_map(params![user_id, root], |row| {
                let project_root: String = row.get(6)?;
                Ok(CommitInfo {
                    commit_id: row.get(0)?,
                    created_at: row.get(1)?,
                    message: row.get(2)?,
                    machine_name: row.get(3)?,
                    machine_id: row.get(4)?,
                    files: Vec::new(),
                    project_id: row.get(5)?,
                    project_name: project_root.clone(),
                    project_root,
                    file_count: 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut files_stmt =
            conn.prepare("SELECT file_path FROM commit_files WHERE commit_id = ?1 ORDER BY file_path")?;
        for commit in &mut commits {
            commit.files = files_stmt
                .query_map([&commit.commit_id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            commit.file_count = commit.files.len();
        }
        Ok(commits)
    }
}

impl ProjectStore for SqliteStore {
    fn list_projects(&self, user_id: &str) -> StoreResult<Vec<ProjectInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT p.root_path,
                    (SELECT c.commit_id FROM commits c WHERE c.project_id = p.project_id ORDER BY c.seq DESC LIMIT 1),
                    (SELECT c.message FROM commits c WHERE c.project_id = p.project_id ORDER BY c.seq DESC LIMIT 1),
                    (SELECT COUNT(DISTINCT f.file_path) FROM commit_files f
                        JOIN commits c ON c.commit_id = f.commit_id
                        WHERE c.project_id = p.project_id)
             FROM projects p
             WHERE p.user_id = ?1
             ORDER BY p.root_path",
        )?;
        let projects = stmt
            .query_map([user_id], |row| {
                Ok(ProjectInfo {
                    root_path: row.get(0)?,
                    last_commit_id: row.get(1)?,
                    last_commit_message: row.get(2)?,
                    file_count: row.get::<_, i64>(3)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(projects)
    }
}

impl VaultKeyStore for SqliteStore {
    fn get(&self, user_id: &str) -> StoreResult<Option<String>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row("SELECT doc FROM vault_keys WHERE user_id = ?1", [user_id], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn upsert(&self, user_id: &str, doc: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO vault_keys (user_id, doc, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET doc = excluded.doc, updated_at = excluded.updated_at",
            params![user_id, doc, Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

impl IdempotencyStore for SqliteStore {
    fn create(&self, user_id: &str, scope: &str, key: &str, ttl: Duration) -> StoreResult<bool> {
        let conn = self.conn()?;
        let now = Utc::now().timestamp();
        conn.execute(
            "DELETE FROM idempotency_keys
             WHERE user_id = ?1 AND scope = ?2 AND idem_key = ?3 AND expires_at <= ?4",
            params![user_id, scope, key, now],
        )?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO idempotency_keys (user_id, scope, idem_key, status, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                scope,
                key,
                IdempotencyStatus::InProgress.as_str(),
                now,
                now + ttl.as_secs() as i64,
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get(&self, user_id: &str, scope: &str, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT status, response_json FROM idempotency_keys
                 WHERE user_id = ?1 AND scope = ?2 AND idem_key = ?3",
                params![user_id, scope, key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((status, response_json)) => {
                let status = IdempotencyStatus::parse(&status).ok_or_else(|| {
                    StoreError::Database(format!("unknown idempotency status: {}", status))
                })?;
                Ok(Some(IdempotencyRecord {
                    status,
                    response_json,
                }))
            }
        }
    }

    fn set_done(
        &self,
        user_id: &str,
        scope: &str,
        key: &str,
        response_json: &str,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE idempotency_keys SET status = ?4, response_json = ?5
             WHERE user_id = ?1 AND scope = ?2 AND idem_key = ?3",
            params![
                user_id,
                scope,
                key,
                IdempotencyStatus::Done.as_str(),
                response_json
            ],
        )?;
        Ok(())
    }

    fn delete(&self, user_id: &str, scope: &str, key: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM idempotency_keys WHERE user_id = ?1 AND scope = ?2 AND idem_key = ?3",
            params![user_id, scope, key],
        )?;
        Ok(())
    }

    fn purge_expired(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM idempotency_keys WHERE expires_at <= ?1",
            [Utc::now().timestamp()],
        )?)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use sentra_core::models::StorageRef;

    const C1: &str = "11111111-1111-4111-8111-111111111111";
    const C2: &str = "22222222-2222-4222-8222-222222222222";

    fn store() -> SqliteStore {
        SqliteStore::in_memory(DEFAULT_MAX_MACHINES).unwrap()
    }

    #[test]
    fn test_push_deduplicates_client_id() {
        let store = store();
        let first = store.push("u1", &push_request("api", C1, &["api/.env"])).unwrap();
        assert!(!first.deduplicated);
        assert_eq!(first.project_root, "api");
        assert_eq!(first.files, 1);

        let again = store.push("u1", &push_request("api", C1, &["api/.env"])).unwrap();
        assert!(again.deduplicated);
        assert_eq!(again.commit_id, first.commit_id);
        assert_eq!(again.project_id, first.project_id);

        assert_eq!(store.list_commits("u1", "api").unwrap().len(), 1);
    }

    #[test]
    fn test_users_are_isolated() {
        let store = store();
        store.push("u1", &push_request("api", C1, &["api/.env"])).unwrap();
        let other = store.push("u2", &push_request("api", C1, &["api/.env"])).unwrap();
        assert!(!other.deduplicated);
        assert!(store.export("u3", "api", None).unwrap().is_empty());
        assert_eq!(store.list_projects("u2").unwrap().len(), 1);
    }

    #[test]
    fn test_push_by_project_id() {
        let store = store();
        let first = store.push("u1", &push_request("api", C1, &["api/.env"])).unwrap();

        let mut req = push_request("api", C2, &["api/.env"]);
        req.project = sentra_core::models::PushProject {
            id: Some(first.project_id.clone()),
            root: None,
        };
        let second = store.push("u1", &req).unwrap();
        assert_eq!(second.project_root, "api");

        req.project.id = Some(Uuid::new_v4().to_string());
        req.commit.client_id = Uuid::new_v4().to_string();
        assert!(matches!(store.push("u1", &req), Err(StoreError::NotFound("project"))));
    }

    #[test]
    fn test_export_latest_and_at() {
        let store = store();
        let first = store
            .push("u1", &push_request("api", C1, &["api/.env", "api/.env.local"]))
            .unwrap();
        let second = store.push("u1", &push_request("api", C2, &["api/.env"])).unwrap();

        let latest = store.export("u1", "api", None).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].file_path, "api/.env");
        assert_eq!(latest[0].commit_id, second.commit_id);
        assert_eq!(latest[0].blob_b64, format!("blob-{}", C2));
        assert_eq!(latest[1].file_path, "api/.env.local");
        assert_eq!(latest[1].commit_id, first.commit_id);

        let at_first = store.export("u1", "api", Some(C1)).unwrap();
        assert!(at_first.iter().all(|f| f.commit_id == first.commit_id));
        let by_server_id = store.export("u1", "api", Some(&first.commit_id)).unwrap();
        assert_eq!(by_server_id, at_first);

        assert!(matches!(
            store.export("u1", "api", Some("nope")),
            Err(StoreError::NotFound("commit"))
        ));
    }

    #[test]
    fn test_export_storage_reference() {
        let store = store();
        let mut req = push_request("web", C1, &["web/.env"]);
        req.files[0].blob = None;
        req.files[0].storage = Some(StorageRef {
            provider: "s3".into(),
            bucket: "b".into(),
            key: "sentra/v1/u1/web/x.bin".into(),
            endpoint: None,
            region: Some("auto".into()),
        });
        store.push("u1", &req).unwrap();

        let files = store.export("u1", "web", None).unwrap();
        assert_eq!(files[0].blob_b64, "");
        let r = files[0].storage_ref().unwrap();
        assert_eq!(r.key, "sentra/v1/u1/web/x.bin");
        assert_eq!(r.region.as_deref(), Some("auto"));
    }

    #[test]
    fn test_commits_newest_first() {
        let store = store();
        store.push("u1", &push_request("api", C1, &["api/.env"])).unwrap();
        let second = store
            .push("u1", &push_request("api", C2, &["api/.env", "api/.env.test"]))
            .unwrap();

        let commits = store.list_commits("u1", "api").unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].commit_id, second.commit_id);
        assert_eq!(commits[0].file_count, 2);
        assert_eq!(commits[0].files, vec!["api/.env", "api/.env.test"]);
        assert_eq!(commits[0].machine_name, "laptop");

        let projects = store.list_projects("u1").unwrap();
        assert_eq!(projects[0].root_path, "api");
        assert_eq!(projects[0].last_commit_id.as_deref(), Some(second.commit_id.as_str()));
        assert_eq!(projects[0].file_count, 2);
    }

    #[test]
    fn test_machine_limit() {
        let store = SqliteStore::in_memory(2).unwrap();
        store.register("u1", "m1", "one", "k1").unwrap();
        store.register("u1", "m2", "two", "k2").unwrap();
        assert!(matches!(
            store.register("u1", "m3", "three", "k3"),
            Err(StoreError::TooManyMachines)
        ));
        // Re-registering a known machine is not a new slot.
        store.register("u1", "m1", "renamed", "k1").unwrap();
        store.register("u2", "m3", "three", "k3").unwrap();

        assert_eq!(store.device_pub_key("u1", "m2").unwrap().as_deref(), Some("k2"));
        assert_eq!(store.device_pub_key("u2", "m1").unwrap(), None);
    }

    #[test]
    fn test_bound_device_key_is_immutable() {
        let store = store();
        store.register("u", "m", "laptop", "KEY_A").unwrap();
        assert!(matches!(
            store.register("u", "m", "laptop", "KEY_B"),
            Err(StoreError::KeyMismatch)
        ));
        assert_eq!(store.device_pub_key("u", "m").unwrap().as_deref(), Some("KEY_A"));

        store.register("u", "m", "renamed", "KEY_A").unwrap();
        assert_eq!(store.device_pub_key("u", "m").unwrap().as_deref(), Some("KEY_A"));
    }

    #[test]
    fn test_idempotency_lifecycle() {
        let store = store();
        let ttl = Duration::from_secs(3600);
        assert!(store.create("u1", "push", "k", ttl).unwrap());
        assert!(!store.create("u1", "push", "k", ttl).unwrap());
        assert!(store.create("u2", "push", "k", ttl).unwrap());

        let rec = IdempotencyStore::get(&store, "u1", "push", "k").unwrap().unwrap();
        assert_eq!(rec.status, IdempotencyStatus::InProgress);
        assert_eq!(rec.response_json, None);

        store.set_done("u1", "push", "k", r#"{"ok":true}"#).unwrap();
        let rec = IdempotencyStore::get(&store, "u1", "push", "k").unwrap().unwrap();
        assert_eq!(rec.status, IdempotencyStatus::Done);
        assert_eq!(rec.response_json.as_deref(), Some(r#"{"ok":true}"#));

        store.delete("u1", "push", "k").unwrap();
        assert!(IdempotencyStore::get(&store, "u1", "push", "k").unwrap().is_none());
    }

    #[test]
    fn test_expired_idempotency_rows_reclaimed() {
        let store = store();
        assert!(store.create("u1", "push", "k", Duration::ZERO).unwrap());
        // An expired row does not block a new claim.
        assert!(store.create("u1", "push", "k", Duration::ZERO).unwrap());
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert!(IdempotencyStore::get(&store, "u1", "push", "k").unwrap().is_none());
    }

    #[test]
    fn test_vault_key_upsert() {
        let store = store();
        assert_eq!(VaultKeyStore::get(&store, "u1").unwrap(), None);
        store.upsert("u1", r#"{"v":1,"a":1}"#).unwrap();
        store.upsert("u1", r#"{"v":1,"a":2}"#).unwrap();
        assert_eq!(
            VaultKeyStore::get(&store, "u1").unwrap().as_deref(),
            Some(r#"{"v":1,"a":2}"#)
        );
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentra.db");
        {
            let store = SqliteStore::open(&path, DEFAULT_MAX_MACHINES).unwrap();
            store.push("u1", &push_request("api", C1, &["api/.env"])).unwrap();
        }
        let reopened = SqliteStore::open(&path, DEFAULT_MAX_MACHINES).unwrap();
        assert_eq!(reopened.export("u1", "api", None).unwrap().len(), 1);
    }
}
