use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::SyncError;
use crate::location::LocationStore;
use crate::models::{Event, EventSourceConfig, LocationId, LocationReference};
use crate::sync::{EventSink, SyncStateStore};
use crate::utils;

/// SQLite-backed locations, per-source sync state and the event sink.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        utils::ensure_parent(path);
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Store("database mutex poisoned".into()))
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        let conn = match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events(
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                first_seen_utc TEXT NOT NULL,
                last_seen_utc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS events_source ON events(source_id);
            CREATE TABLE IF NOT EXISTS locations(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at_utc TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS source_state(
                source_id TEXT PRIMARY KEY,
                last_synced_utc TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    pub fn get_event(&self, id: &str) -> Result<Option<Event>, SyncError> {
        let payload: Option<String> = self
            .lock()?
            .query_row(
                "SELECT payload FROM events WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    pub fn count_events(&self, source_id: &str) -> Result<usize, SyncError> {
        let count: i64 = self.lock()?.query_row(
            "SELECT COUNT(*) FROM events WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn list_locations(&self) -> Result<Vec<LocationReference>, SyncError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name FROM locations ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(LocationReference {
                id: LocationId(row.get(0)?),
                name: row.get(1)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl LocationStore for Store {
    fn find_by_name(&self, name: &str) -> Result<Option<LocationId>, SyncError> {
        let id = self
            .lock()?
            .query_row(
                "SELECT id FROM locations WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(LocationId))
    }

    fn create(&self, name: &str) -> Result<(LocationId, bool), SyncError> {
        let conn = self.lock()?;
        // The UNIQUE constraint makes the insert the arbiter, even across
        // processes sharing the database file.
        let inserted = conn.execute(
            "INSERT INTO locations (name, created_at_utc) VALUES (?1, ?2)
             ON CONFLICT(name) DO NOTHING",
            params![name, Utc::now().to_rfc3339()],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM locations WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok((LocationId(id), inserted == 1))
    }
}

impl SyncStateStore for Store {
    fn last_synced_at(&self, source_id: &str) -> Result<Option<DateTime<Utc>>, SyncError> {
        let value: Option<String> = self
            .lock()?
            .query_row(
                "SELECT last_synced_utc FROM source_state WHERE source_id = ?1",
                params![source_id],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|text| {
                DateTime::parse_from_rfc3339(&text)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|err| SyncError::Store(format!("bad sync timestamp {text:?}: {err}")))
            })
            .transpose()
    }

    fn record_synced(&self, source_id: &str, at: DateTime<Utc>) -> Result<(), SyncError> {
        self.lock()?.execute(
            "INSERT INTO source_state (source_id, last_synced_utc) VALUES (?1, ?2)
             ON CONFLICT(source_id) DO UPDATE SET last_synced_utc = excluded.last_synced_utc",
            params![source_id, at.to_rfc3339()],
        )?;
        Ok(())
    }
}

impl EventSink for Store {
    fn store(&self, source: &EventSourceConfig, events: &[Event]) -> Result<usize, SyncError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for event in events {
            let payload = serde_json::to_string(event)?;
            tx.execute(
                "INSERT INTO events (id, source_id, payload, first_seen_utc, last_seen_utc)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                   source_id = excluded.source_id,
                   payload = excluded.payload,
                   last_seen_utc = excluded.last_seen_utc",
                params![event.id(), source.id, payload, now],
            )?;
        }
        tx.commit()?;
        Ok(events.len())
    }
}
