//! Server-side user and session registry.
//!
//! The registry is the single source of truth for "is this credential still
//! usable right now": a token that passes signature verification is still
//! rejected unless it appears as an active, unexpired entry in its user's
//! session list. Logout and forced revocation flip `is_active` — entries are
//! never deleted within a request lifetime, so a revoked token stays
//! revoked even if presented again before its natural expiry.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::error::StoreError;
use crate::password;

/// One issued credential. A user may hold several at once (multi-device);
/// each is independently revocable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Session {
    pub fn new(token: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Session {
            token,
            issued_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::days(7)),
            is_active: true,
        }
    }

    /// Currently valid: active, unexpired.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

/// Identity record as the authenticate path sees it. Sessions are ordered by
/// issue time.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub phone: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub sessions: Vec<Session>,
}

impl User {
    /// The session entry matching the presented wire token, if it is still
    /// current.
    pub fn current_session(&self, token: &str, now: DateTime<Utc>) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|s| s.token == token && s.is_current(now))
    }
}

/// Registry backend. Implementations must be thread-safe.
///
/// The authenticate path only reads; the writers (`push_session`,
/// `revoke_session`) are invoked by login/logout and must be atomic per
/// user with respect to concurrent reads.
pub trait UserStore: Send + Sync {
    fn find_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    fn find_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError>;

    /// Check a plaintext password against the stored credential hash.
    fn verify_password(&self, user_id: &str, password: &str) -> Result<bool, StoreError>;

    /// Append a freshly issued session to the user's registry entry.
    fn push_session(&self, user_id: &str, session: Session) -> Result<(), StoreError>;

    /// Mark the session holding `token` inactive. Returns whether a session
    /// was found to revoke.
    fn revoke_session(&self, user_id: &str, token: &str) -> Result<bool, StoreError>;

    /// Revoke every active session of a user (administrative lockout).
    /// Returns the number of sessions revoked.
    fn revoke_all_sessions(&self, user_id: &str) -> Result<usize, StoreError>;
}

struct MemoryRecord {
    user: User,
    password_hash: String,
}

/// In-memory registry backed by DashMap. Fast, lost on restart — intended
/// for tests and single-node development.
#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, MemoryRecord>,
    phone_index: DashMap<String, String>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a user with a hashed credential. Returns the new user id.
    pub fn create_user(
        &self,
        phone: &str,
        password: &str,
        is_admin: bool,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let record = MemoryRecord {
            user: User {
                id: id.clone(),
                phone: phone.to_string(),
                is_admin,
                is_active: true,
                sessions: Vec::new(),
            },
            password_hash: password::hash_password(password)?,
        };
        self.users.insert(id.clone(), record);
        self.phone_index.insert(phone.to_string(), id.clone());
        Ok(id)
    }

    /// Flip the account-active flag (test hook for disabled accounts).
    pub fn set_active(&self, user_id: &str, is_active: bool) {
        if let Some(mut record) = self.users.get_mut(user_id) {
            record.user.is_active = is_active;
        }
    }
}

impl UserStore for MemoryUserStore {
    fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(id).map(|r| r.user.clone()))
    }

    fn find_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        let id = match self.phone_index.get(phone) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        self.find_user(&id)
    }

    fn verify_password(&self, user_id: &str, password: &str) -> Result<bool, StoreError> {
        match self.users.get(user_id) {
            Some(record) => password::verify_password(password, &record.password_hash),
            None => Ok(false),
        }
    }

    fn push_session(&self, user_id: &str, session: Session) -> Result<(), StoreError> {
        match self.users.get_mut(user_id) {
            Some(mut record) => {
                record.user.sessions.push(session);
                Ok(())
            }
            None => Err(StoreError::Internal(format!("unknown user {user_id}"))),
        }
    }

    fn revoke_session(&self, user_id: &str, token: &str) -> Result<bool, StoreError> {
        match self.users.get_mut(user_id) {
            Some(mut record) => {
                match record.user.sessions.iter_mut().find(|s| s.token == token) {
                    Some(session) => {
                        session.is_active = false;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            None => Ok(false),
        }
    }

    fn revoke_all_sessions(&self, user_id: &str) -> Result<usize, StoreError> {
        match self.users.get_mut(user_id) {
            Some(mut record) => {
                let mut revoked = 0;
                for session in record.user.sessions.iter_mut().filter(|s| s.is_active) {
                    session.is_active = false;
                    revoked += 1;
                }
                Ok(revoked)
            }
            None => Ok(0),
        }
    }
}

/// Persistent registry backed by SQLite. Survives restarts.
pub struct SqliteUserStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteUserStore {
    /// Open (or create) the registry database at the given path.
    ///
    /// On Unix the database file permissions are restricted to 0600 so other
    /// system users cannot read session tokens.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                phone TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                is_admin INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL REFERENCES users(id),
                token TEXT NOT NULL,
                issued_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            PRAGMA journal_mode=WAL;",
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to restrict registry database permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("registry mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Create a user with a hashed credential. Returns the new user id.
    pub fn create_user(
        &self,
        phone: &str,
        password: &str,
        is_admin: bool,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let hash = password::hash_password(password)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO users (id, phone, password_hash, is_admin, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            rusqlite::params![id, phone, hash, is_admin as i64, Utc::now().timestamp()],
        )?;
        Ok(id)
    }

    fn load_sessions(
        conn: &rusqlite::Connection,
        user_id: &str,
    ) -> Result<Vec<Session>, rusqlite::Error> {
        let mut stmt = conn.prepare(
            "SELECT token, issued_at, expires_at, is_active
             FROM sessions WHERE user_id = ?1 ORDER BY issued_at, id",
        )?;
        let rows = stmt.query_map([user_id], |row| {
            Ok(Session {
                token: row.get(0)?,
                issued_at: timestamp(row.get(1)?),
                expires_at: timestamp(row.get(2)?),
                is_active: row.get::<_, i64>(3)? != 0,
            })
        })?;
        rows.collect()
    }

    fn load_user(
        conn: &rusqlite::Connection,
        where_clause: &str,
        key: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT id, phone, is_admin, is_active FROM users WHERE {where_clause}");
        let user = conn
            .query_row(&sql, [key], |row| {
                Ok(User {
                    id: row.get(0)?,
                    phone: row.get(1)?,
                    is_admin: row.get::<_, i64>(2)? != 0,
                    is_active: row.get::<_, i64>(3)? != 0,
                    sessions: Vec::new(),
                })
            })
            .optional()?;

        match user {
            Some(mut user) => {
                user.sessions = Self::load_sessions(conn, &user.id)?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

impl UserStore for SqliteUserStore {
    fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let conn = self.lock();
        Self::load_user(&conn, "id = ?1", id)
    }

    fn find_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        let conn = self.lock();
        Self::load_user(&conn, "phone = ?1", phone)
    }

    fn verify_password(&self, user_id: &str, password: &str) -> Result<bool, StoreError> {
        let hash: Option<String> = {
            let conn = self.lock();
            conn.query_row(
                "SELECT password_hash FROM users WHERE id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?
        };
        match hash {
            Some(hash) => password::verify_password(password, &hash),
            None => Ok(false),
        }
    }

    fn push_session(&self, user_id: &str, session: Session) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sessions (user_id, token, issued_at, expires_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                user_id,
                session.token,
                session.issued_at.timestamp(),
                session.expires_at.timestamp(),
                session.is_active as i64,
            ],
        )?;
        Ok(())
    }

    fn revoke_session(&self, user_id: &str, token: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE sessions SET is_active = 0 WHERE user_id = ?1 AND token = ?2",
            rusqlite::params![user_id, token],
        )?;
        Ok(changed > 0)
    }

    fn revoke_all_sessions(&self, user_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE sessions SET is_active = 0 WHERE user_id = ?1 AND is_active = 1",
            [user_id],
        )?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ttl() -> Duration {
        Duration::from_secs(3600)
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryUserStore::new();
        let id = store.create_user("09121234567", "hunter2", false).unwrap();

        let user = store.find_user(&id).unwrap().unwrap();
        assert_eq!(user.phone, "09121234567");
        assert!(!user.is_admin);
        assert!(user.sessions.is_empty());

        let by_phone = store.find_by_phone("09121234567").unwrap().unwrap();
        assert_eq!(by_phone.id, id);
        assert!(store.find_by_phone("09120000000").unwrap().is_none());
    }

    #[test]
    fn memory_store_password_check() {
        let store = MemoryUserStore::new();
        let id = store.create_user("09121234567", "hunter2", false).unwrap();
        assert!(store.verify_password(&id, "hunter2").unwrap());
        assert!(!store.verify_password(&id, "wrong").unwrap());
        assert!(!store.verify_password("missing", "hunter2").unwrap());
    }

    #[test]
    fn revoke_targets_one_session() {
        let store = MemoryUserStore::new();
        let id = store.create_user("09121234567", "pw-value-1", false).unwrap();
        store
            .push_session(&id, Session::new("token-a".into(), ttl()))
            .unwrap();
        store
            .push_session(&id, Session::new("token-b".into(), ttl()))
            .unwrap();

        assert!(store.revoke_session(&id, "token-a").unwrap());
        let user = store.find_user(&id).unwrap().unwrap();
        let now = Utc::now();
        assert!(user.current_session("token-a", now).is_none());
        assert!(user.current_session("token-b", now).is_some());
    }

    #[test]
    fn revoke_all_counts_active_only() {
        let store = MemoryUserStore::new();
        let id = store.create_user("09121234567", "pw-value-1", false).unwrap();
        store
            .push_session(&id, Session::new("token-a".into(), ttl()))
            .unwrap();
        store
            .push_session(&id, Session::new("token-b".into(), ttl()))
            .unwrap();
        store.revoke_session(&id, "token-a").unwrap();

        assert_eq!(store.revoke_all_sessions(&id).unwrap(), 1);
        assert_eq!(store.revoke_all_sessions(&id).unwrap(), 0);
    }

    #[test]
    fn expired_session_is_not_current() {
        let session = Session {
            token: "t".into(),
            issued_at: Utc::now() - chrono::Duration::hours(2),
            expires_at: Utc::now() - chrono::Duration::hours(1),
            is_active: true,
        };
        assert!(!session.is_current(Utc::now()));
    }

    #[test]
    fn sqlite_store_persists_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        let path = path.to_str().unwrap();

        let id = {
            let store = SqliteUserStore::open(path).unwrap();
            let id = store.create_user("09121234567", "hunter2", true).unwrap();
            store
                .push_session(&id, Session::new("token-a".into(), ttl()))
                .unwrap();
            id
        };

        // Fresh handle — data must still be there.
        let store = SqliteUserStore::open(path).unwrap();
        let user = store.find_user(&id).unwrap().unwrap();
        assert!(user.is_admin);
        assert_eq!(user.sessions.len(), 1);
        assert!(user.current_session("token-a", Utc::now()).is_some());
        assert!(store.verify_password(&id, "hunter2").unwrap());
    }

    #[test]
    fn sqlite_sessions_keep_issue_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        let store = SqliteUserStore::open(path.to_str().unwrap()).unwrap();
        let id = store.create_user("09121234567", "pw-value-1", false).unwrap();

        for name in ["first", "second", "third"] {
            store
                .push_session(&id, Session::new(name.into(), ttl()))
                .unwrap();
        }

        let user = store.find_user(&id).unwrap().unwrap();
        let tokens: Vec<_> = user.sessions.iter().map(|s| s.token.as_str()).collect();
        assert_eq!(tokens, vec!["first", "second", "third"]);
    }

    #[test]
    fn sqlite_revocation_flips_not_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        let store = SqliteUserStore::open(path.to_str().unwrap()).unwrap();
        let id = store.create_user("09121234567", "pw-value-1", false).unwrap();
        store
            .push_session(&id, Session::new("token-a".into(), ttl()))
            .unwrap();

        assert!(store.revoke_session(&id, "token-a").unwrap());
        assert!(!store.revoke_session(&id, "token-missing").unwrap());

        let user = store.find_user(&id).unwrap().unwrap();
        // Entry survives with is_active = false.
        assert_eq!(user.sessions.len(), 1);
        assert!(!user.sessions[0].is_active);
    }
}
