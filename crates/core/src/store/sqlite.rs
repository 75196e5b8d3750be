//! SQLite store
//!
//! One connection behind a mutex; every call runs on the blocking pool.
//! `commit_all` runs inside a single transaction.

use super::{new_id, Device, PresenceStore, Registry, StatusCounters, User};
use crate::error::{DomainError, PresenceError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id   TEXT PRIMARY KEY,
    nickname  TEXT NOT NULL UNIQUE,
    online    INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS devices (
    device_id      TEXT PRIMARY KEY,
    owner_id       TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    tag            TEXT NOT NULL,
    hashed_address TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS devices_owner ON devices(owner_id);

CREATE TABLE IF NOT EXISTS status (
    id              INTEGER PRIMARY KEY CHECK (id = 1),
    online_users    INTEGER NOT NULL,
    unknown_devices INTEGER NOT NULL,
    updated_at      TEXT
);
"#;

const SELECT_DEVICES: &str = r#"
SELECT d.device_id, d.owner_id, d.tag, u.nickname, d.hashed_address
FROM devices d INNER JOIN users u ON u.user_id = d.owner_id
"#;

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Private database that disappears with the store
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| PresenceError::Other("sqlite connection lock poisoned".to_string()))?;
            f(&mut *conn)
        })
        .await?
    }
}

fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        tag: row.get(2)?,
        owner: row.get(3)?,
        hashed_address: row.get(4)?,
    })
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        nickname: row.get(1)?,
        online: row.get::<_, i64>(2)? != 0,
    })
}

fn user_exists(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM users WHERE user_id = ?1", [id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

#[async_trait]
impl PresenceStore for SqliteStore {
    async fn all_devices(&self) -> Result<Vec<Device>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(SELECT_DEVICES)?;
            let devices = stmt
                .query_map([], row_to_device)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(devices)
        })
        .await
    }

    async fn all_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT user_id, nickname, online FROM users ORDER BY nickname")?;
            let users = stmt
                .query_map([], row_to_user)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
        .await
    }

    async fn commit_all(&self, users: Vec<User>, counters: StatusCounters) -> Result<()> {
        self.with_conn(move |conn| {
            // Dropping the transaction without commit rolls back
            let tx = conn.transaction()?;
            {
                let mut update = tx.prepare("UPDATE users SET online = ?2 WHERE user_id = ?1")?;
                for user in &users {
                    if update.execute(params![user.id, user.online as i64])? != 1 {
                        return Err(PresenceError::unknown_user(&user.id));
                    }
                }
            }
            tx.execute(
                "INSERT INTO status (id, online_users, unknown_devices, updated_at)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     online_users = excluded.online_users,
                     unknown_devices = excluded.unknown_devices,
                     updated_at = excluded.updated_at",
                params![
                    counters.online_users as i64,
                    counters.unknown_devices as i64,
                    counters.updated_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn status_counters(&self) -> Result<StatusCounters> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT online_users, unknown_devices, updated_at FROM status WHERE id = 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .optional()?;

            let Some((online_users, unknown_devices, updated_at)) = row else {
                return Ok(StatusCounters::default());
            };
            let updated_at = updated_at
                .map(|s| {
                    DateTime::parse_from_rfc3339(&s)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(|e| PresenceError::Other(format!("bad status timestamp: {}", e)))
                })
                .transpose()?;

            Ok(StatusCounters {
                online_users: online_users.max(0) as usize,
                unknown_devices: unknown_devices.max(0) as usize,
                updated_at,
            })
        })
        .await
    }
}

#[async_trait]
impl Registry for SqliteStore {
    async fn add_user(&self, nickname: &str) -> Result<User> {
        let user = User {
            id: new_id(),
            nickname: nickname.to_string(),
            online: false,
        };
        let row = user.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (user_id, nickname, online) VALUES (?1, ?2, 0)",
                params![row.id, row.nickname],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    PresenceError::Domain(DomainError::NicknameTaken {
                        nickname: row.nickname.clone(),
                    })
                } else {
                    e.into()
                }
            })?;
            Ok(())
        })
        .await?;
        Ok(user)
    }

    async fn user(&self, id: &str) -> Result<User> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT user_id, nickname, online FROM users WHERE user_id = ?1",
                [&id],
                row_to_user,
            )
            .optional()?
            .ok_or_else(|| PresenceError::unknown_user(&id))
        })
        .await
    }

    async fn remove_user(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            if conn.execute("DELETE FROM users WHERE user_id = ?1", [&id])? == 0 {
                return Err(PresenceError::unknown_user(id));
            }
            Ok(())
        })
        .await
    }

    async fn add_device(&self, owner_id: &str, tag: &str, hashed_address: &str) -> Result<Device> {
        let owner_id = owner_id.to_string();
        let tag = tag.to_string();
        let hashed_address = hashed_address.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let owner: String = tx
                .query_row(
                    "SELECT nickname FROM users WHERE user_id = ?1",
                    [&owner_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| PresenceError::unknown_user(owner_id.as_str()))?;

            let device = Device {
                id: new_id(),
                owner_id,
                tag,
                owner,
                hashed_address,
            };
            tx.execute(
                "INSERT INTO devices (device_id, owner_id, tag, hashed_address) VALUES (?1, ?2, ?3, ?4)",
                params![device.id, device.owner_id, device.tag, device.hashed_address],
            )?;
            tx.commit()?;
            Ok(device)
        })
        .await
    }

    async fn devices_of(&self, owner_id: &str) -> Result<Vec<Device>> {
        let owner_id = owner_id.to_string();
        self.with_conn(move |conn| {
            if !user_exists(conn, &owner_id)? {
                return Err(PresenceError::unknown_user(owner_id));
            }
            let mut stmt = conn.prepare(&format!("{} WHERE d.owner_id = ?1", SELECT_DEVICES))?;
            let devices = stmt
                .query_map([&owner_id], row_to_device)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(devices)
        })
        .await
    }

    async fn remove_device(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            if conn.execute("DELETE FROM devices WHERE device_id = ?1", [&id])? == 0 {
                return Err(PresenceError::unknown_device(id));
            }
            Ok(())
        })
        .await
    }
}
