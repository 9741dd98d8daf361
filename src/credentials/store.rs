//! Sealed credential storage using SQLite.
//!
//! One row per camera provider. The store only ever sees sealed envelope
//! blobs; sealing and opening happen in the vault layer, so nothing in this
//! module can leak plaintext tokens into the database file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// A stored credential row, still sealed.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub provider: String,
    pub ciphertext_blob: String,
    pub updated_at: DateTime<Utc>,
}

/// Sealed credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE camera_credentials (
///     id INTEGER PRIMARY KEY,
///     provider TEXT NOT NULL UNIQUE,
///     ciphertext_blob TEXT NOT NULL,   -- base64(nonce || ciphertext || tag)
///     updated_at TEXT NOT NULL         -- ISO 8601 timestamp
/// );
/// ```
///
/// # Security
/// - Rows hold sealed envelopes only; the master key never reaches this layer
/// - Database file is protected by filesystem permissions
/// - SQLite ACID guarantees prevent partial updates
///
/// # Thread Safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - SQLite itself is thread-safe with serialized mode
pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    /// Creates or opens a credential store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    ///
    /// # Returns
    /// * `Ok(CredentialStore)` - Initialized store with schema in place
    /// * `Err` - If the database cannot be opened or created
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS camera_credentials (
                id INTEGER PRIMARY KEY,
                provider TEXT NOT NULL UNIQUE,
                ciphertext_blob TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create camera_credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Writes the sealed blob for a provider, replacing any existing row.
    ///
    /// `updated_at` is refreshed on every write, including overwrites of an
    /// identical blob.
    ///
    /// # Arguments
    /// * `provider` - Provider name (e.g., "nest_legacy")
    /// * `ciphertext_blob` - Sealed envelope, base64-encoded
    pub fn put(&self, provider: &str, ciphertext_blob: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO camera_credentials (provider, ciphertext_blob, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(provider) DO UPDATE SET
                    ciphertext_blob = excluded.ciphertext_blob,
                    updated_at = excluded.updated_at
                "#,
                params![provider, ciphertext_blob, now],
            )
            .context("Failed to store credential blob")?;

        Ok(())
    }

    /// Retrieves the sealed row for a provider.
    ///
    /// # Returns
    /// * `Ok(Some(CredentialRecord))` - Row found
    /// * `Ok(None)` - No row for this provider
    /// * `Err` - If the query fails or the stored timestamp is unparseable
    pub fn get(&self, provider: &str) -> Result<Option<CredentialRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT ciphertext_blob, updated_at FROM camera_credentials WHERE provider = ?1",
            )
            .context("Failed to prepare query")?;

        let mut rows = stmt
            .query(params![provider])
            .context("Failed to execute query")?;

        if let Some(row) = rows.next().context("Failed to read row")? {
            let ciphertext_blob: String = row.get(0)?;
            let updated_at: String = row.get(1)?;
            let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .context("Failed to parse updated_at timestamp")?;

            Ok(Some(CredentialRecord {
                provider: provider.to_string(),
                ciphertext_blob,
                updated_at,
            }))
        } else {
            Ok(None)
        }
    }

    /// Deletes the row for a provider.
    ///
    /// # Returns
    /// * `Ok(true)` - Row deleted
    /// * `Ok(false)` - No row existed
    pub fn delete(&self, provider: &str) -> Result<bool> {
        let rows_affected = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM camera_credentials WHERE provider = ?1",
                params![provider],
            )
            .context("Failed to delete credential row")?;

        Ok(rows_affected > 0)
    }

    /// Lists all providers with a stored row.
    ///
    /// Used on startup to decide which providers the scheduler should watch.
    pub fn list_providers(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT provider FROM camera_credentials ORDER BY provider")
            .context("Failed to prepare query")?;

        let providers = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;

        Ok(providers)
    }
}
