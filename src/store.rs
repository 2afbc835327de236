//! The persistence gateway backing the client registry and the mailboxes.
//!
//! A `Database` is a cheaply cloneable handle over one SQLite connection.
//! The connection mutex is the single-writer serialization point: every
//! mutating operation runs to completion under it, so a duplicate-name
//! registration race or a lost-message race cannot occur across concurrent
//! connection tasks. The schema bootstrap is idempotent and the file is
//! reusable across process restarts.

use bytes::Bytes;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error as ThisError;
use uuid::Uuid;

use crate::frame::{ClientId, MessageId};

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("client name {0:?} is already registered")]
    DuplicateName(String),
    #[error("client id {0} is already registered")]
    DuplicateId(Uuid),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store lock poisoned")]
    Lock,
}

/// One row of the client registry. Created exactly once at registration,
/// never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub public_key: Vec<u8>,
    pub last_seen: Option<String>,
}

/// One unit of undelivered mailbox content. Held until the recipient pulls
/// its mailbox, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub to_client: ClientId,
    pub from_client: ClientId,
    pub kind: u8,
    pub content: Bytes,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Database, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Database, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Database, StoreError> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.bootstrap()?;
        Ok(db)
    }

    fn bootstrap(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS clients (
                    id BLOB PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    public_key BLOB NOT NULL,
                    last_seen TEXT
                );

                CREATE TABLE IF NOT EXISTS messages (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id INTEGER NOT NULL,
                    to_client BLOB NOT NULL,
                    from_client BLOB NOT NULL,
                    type INTEGER NOT NULL,
                    content BLOB NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_messages_mailbox
                    ON messages (to_client, seq);
                "#,
            )?;
            Ok(())
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        f(&conn)
    }

    fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        f(&mut conn)
    }

    /// Inserts a new client. Fails when the name or the id is already taken;
    /// both checks and the insert run under one lock acquisition.
    pub fn insert_client(&self, client: &Client) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let name_taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM clients WHERE name = ?1)",
                params![client.name],
                |row| row.get(0),
            )?;
            if name_taken {
                return Err(StoreError::DuplicateName(client.name.clone()));
            }

            let id_taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM clients WHERE id = ?1)",
                params![&client.id[..]],
                |row| row.get(0),
            )?;
            if id_taken {
                return Err(StoreError::DuplicateId(Uuid::from_bytes(client.id)));
            }

            conn.execute(
                "INSERT INTO clients (id, name, public_key, last_seen) VALUES (?1, ?2, ?3, ?4)",
                params![&client.id[..], client.name, client.public_key, client.last_seen],
            )?;
            Ok(())
        })
    }

    pub fn client_by_id(&self, id: &ClientId) -> Result<Option<Client>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, public_key, last_seen FROM clients WHERE id = ?1",
            )?;
            let mut rows = stmt.query_map(params![&id[..]], client_from_row)?;
            rows.next().transpose().map_err(StoreError::from)
        })
    }

    pub fn client_by_name(&self, name: &str) -> Result<Option<Client>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, public_key, last_seen FROM clients WHERE name = ?1",
            )?;
            let mut rows = stmt.query_map(params![name], client_from_row)?;
            rows.next().transpose().map_err(StoreError::from)
        })
    }

    pub fn all_clients(&self) -> Result<Vec<Client>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, public_key, last_seen FROM clients ORDER BY name ASC",
            )?;
            let clients = stmt
                .query_map([], client_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(clients)
        })
    }

    pub fn touch_last_seen(&self, id: &ClientId, when: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE clients SET last_seen = ?1 WHERE id = ?2",
                params![when, &id[..]],
            )?;
            Ok(())
        })
    }

    /// Stores a message. Recipient validation is the dispatcher's job.
    pub fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, to_client, from_client, type, content)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id,
                    &message.to_client[..],
                    &message.from_client[..],
                    message.kind,
                    &message.content[..],
                ],
            )?;
            Ok(())
        })
    }

    /// All messages waiting for `to_client`, oldest first. Leaves the
    /// mailbox untouched.
    pub fn messages_for(&self, to_client: &ClientId) -> Result<Vec<Message>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, to_client, from_client, type, content
                 FROM messages WHERE to_client = ?1 ORDER BY seq ASC",
            )?;
            let messages = stmt
                .query_map(params![&to_client[..]], message_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
    }

    /// Drains the mailbox of `to_client`: collects the waiting messages and
    /// deletes them in one transaction, oldest first. A message handed out
    /// here is gone from the store before the caller sees it, which is what
    /// makes delivery at-most-once.
    pub fn take_messages(&self, to_client: &ClientId) -> Result<Vec<Message>, StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let messages = {
                let mut stmt = tx.prepare(
                    "SELECT id, to_client, from_client, type, content
                     FROM messages WHERE to_client = ?1 ORDER BY seq ASC",
                )?;
                let rows = stmt
                    .query_map(params![&to_client[..]], message_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };

            tx.execute(
                "DELETE FROM messages WHERE to_client = ?1",
                params![&to_client[..]],
            )?;
            tx.commit()?;

            Ok(messages)
        })
    }

    /// Deletes the given messages. Idempotent: already-absent ids are
    /// silently skipped.
    pub fn delete_messages(&self, ids: &[MessageId]) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM messages WHERE id = ?1")?;
                for id in ids {
                    stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}

fn client_from_row(row: &rusqlite::Row) -> rusqlite::Result<Client> {
    Ok(Client {
        id: client_id_from_blob(row.get(0)?, 0)?,
        name: row.get(1)?,
        public_key: row.get(2)?,
        last_seen: row.get(3)?,
    })
}

fn message_from_row(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let content: Vec<u8> = row.get(4)?;
    Ok(Message {
        id: row.get(0)?,
        to_client: client_id_from_blob(row.get(1)?, 1)?,
        from_client: client_id_from_blob(row.get(2)?, 2)?,
        kind: row.get(3)?,
        content: Bytes::from(content),
    })
}

fn client_id_from_blob(blob: Vec<u8>, column: usize) -> rusqlite::Result<ClientId> {
    blob.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Blob,
            "client id must be 16 bytes".into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: u8, name: &str) -> Client {
        Client {
            id: [id; 16],
            name: name.to_string(),
            public_key: vec![id; 160],
            last_seen: None,
        }
    }

    fn message(id: MessageId, to: u8, from: u8, content: &[u8]) -> Message {
        Message {
            id,
            to_client: [to; 16],
            from_client: [from; 16],
            kind: 1,
            content: Bytes::copy_from_slice(content),
        }
    }

    #[test]
    fn insert_and_lookup_client() {
        let db = Database::open_in_memory().unwrap();
        let alice = client(1, "alice");

        db.insert_client(&alice).unwrap();

        assert_eq!(db.client_by_id(&alice.id).unwrap(), Some(alice.clone()));
        assert_eq!(db.client_by_name("alice").unwrap(), Some(alice));
        assert_eq!(db.client_by_name("bob").unwrap(), None);
        assert_eq!(db.client_by_id(&[9u8; 16]).unwrap(), None);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.insert_client(&client(1, "alice")).unwrap();

        let err = db.insert_client(&client(2, "alice")).unwrap_err();

        assert!(matches!(err, StoreError::DuplicateName(ref name) if name == "alice"));
        // No second record was created under a different id.
        assert_eq!(db.all_clients().unwrap().len(), 1);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.insert_client(&client(1, "alice")).unwrap();

        let err = db.insert_client(&client(1, "bob")).unwrap_err();

        assert!(matches!(err, StoreError::DuplicateId(_)));
    }

    #[test]
    fn all_clients_empty_is_ok() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.all_clients().unwrap().is_empty());
    }

    #[test]
    fn touch_last_seen_updates_record() {
        let db = Database::open_in_memory().unwrap();
        let alice = client(1, "alice");
        db.insert_client(&alice).unwrap();

        db.touch_last_seen(&alice.id, "2026-01-01T00:00:00Z").unwrap();

        let stored = db.client_by_id(&alice.id).unwrap().unwrap();
        assert_eq!(stored.last_seen.as_deref(), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn mailbox_is_fifo_per_recipient() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&message(10, 1, 2, b"first")).unwrap();
        db.insert_message(&message(11, 1, 3, b"second")).unwrap();
        db.insert_message(&message(12, 4, 2, b"other mailbox")).unwrap();

        let waiting = db.messages_for(&[1u8; 16]).unwrap();

        assert_eq!(waiting.len(), 2);
        assert_eq!(waiting[0].content, Bytes::from_static(b"first"));
        assert_eq!(waiting[1].content, Bytes::from_static(b"second"));
    }

    #[test]
    fn take_messages_drains_the_mailbox() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&message(10, 1, 2, b"hi")).unwrap();
        db.insert_message(&message(11, 4, 2, b"not yours")).unwrap();

        let taken = db.take_messages(&[1u8; 16]).unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].id, 10);

        // At-most-once: a second take returns nothing.
        assert!(db.take_messages(&[1u8; 16]).unwrap().is_empty());
        // The other mailbox is untouched.
        assert_eq!(db.messages_for(&[4u8; 16]).unwrap().len(), 1);
    }

    #[test]
    fn delete_messages_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&message(10, 1, 2, b"hi")).unwrap();

        db.delete_messages(&[10, 999]).unwrap();
        db.delete_messages(&[10]).unwrap();

        assert!(db.messages_for(&[1u8; 16]).unwrap().is_empty());
    }

    #[test]
    fn bootstrap_survives_restart() {
        let path = std::env::temp_dir().join(format!(
            "postbox-store-test-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        {
            let db = Database::open(&path).unwrap();
            db.insert_client(&client(1, "alice")).unwrap();
            db.insert_message(&message(10, 1, 1, b"hold this")).unwrap();
        }

        // Reopening bootstraps again without clobbering existing data.
        let db = Database::open(&path).unwrap();
        assert!(db.client_by_name("alice").unwrap().is_some());
        assert_eq!(db.messages_for(&[1u8; 16]).unwrap().len(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
