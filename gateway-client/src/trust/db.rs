use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// A pinned certificate fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pin {
    /// StableEndpointId string of the gateway
    pub store_key: String,
    /// Lowercase hex SHA-256
    pub fingerprint: String,
    pub pinned_at: DateTime<Utc>,
}

pub struct TrustDb {
    conn: Connection,
}

impl TrustDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pinned_fingerprints (
                store_key   TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL,
                pinned_at   TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    pub fn get(&self, store_key: &str) -> Result<Option<Pin>> {
        self.conn
            .query_row(
                "SELECT store_key, fingerprint, pinned_at FROM pinned_fingerprints WHERE store_key = ?1",
                params![store_key],
                Self::row_to_pin,
            )
            .optional()
            .context("Failed to query pin")
    }

    /// Pin `fingerprint` unless something is already pinned for the key.
    /// Returns whatever is on record afterwards, so the caller can tell
    /// whether it won.
    pub fn pin_if_absent(&self, store_key: &str, fingerprint: &str) -> Result<Pin> {
        self.conn
            .execute(
                r#"
                INSERT INTO pinned_fingerprints (store_key, fingerprint, pinned_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(store_key) DO NOTHING
                "#,
                params![store_key, fingerprint, Utc::now().to_rfc3339()],
            )
            .context("Failed to pin fingerprint")?;

        self.get(store_key)?
            .with_context(|| format!("Pin for {} vanished after insert", store_key))
    }

    /// Forget the pin (re-pairing). Returns true if one existed.
    pub fn clear(&self, store_key: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM pinned_fingerprints WHERE store_key = ?1", params![store_key])
            .context("Failed to clear pin")?;
        Ok(count > 0)
    }

    pub fn all(&self) -> Result<Vec<Pin>> {
        let mut stmt = self
            .conn
            .prepare("SELECT store_key, fingerprint, pinned_at FROM pinned_fingerprints ORDER BY store_key")
            .context("Failed to prepare query")?;

        let pins = stmt
            .query_map([], Self::row_to_pin)
            .context("Failed to query pins")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect pins")?;

        Ok(pins)
    }

    fn row_to_pin(row: &rusqlite::Row) -> Result<Pin, rusqlite::Error> {
        let pinned_at_str: String = row.get(2)?;
        let pinned_at = DateTime::parse_from_rfc3339(&pinned_at_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?
            .with_timezone(&Utc);

        Ok(Pin {
            store_key: row.get(0)?,
            fingerprint: row.get(1)?,
            pinned_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const FP_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn test_pin_if_absent_keeps_first() {
        let db = TrustDb::open(":memory:").unwrap();
        assert!(db.get("gw").unwrap().is_none());

        let first = db.pin_if_absent("gw", FP_A).unwrap();
        assert_eq!(first.fingerprint, FP_A);

        let second = db.pin_if_absent("gw", FP_B).unwrap();
        assert_eq!(second.fingerprint, FP_A, "An existing pin must not be replaced");
    }

    #[test]
    fn test_clear_allows_repin() {
        let db = TrustDb::open(":memory:").unwrap();
        db.pin_if_absent("gw", FP_A).unwrap();

        assert!(db.clear("gw").unwrap());
        assert!(!db.clear("gw").unwrap());

        let pin = db.pin_if_absent("gw", FP_B).unwrap();
        assert_eq!(pin.fingerprint, FP_B);
    }

    #[test]
    fn test_all_lists_pins_in_key_order() {
        let db = TrustDb::open(":memory:").unwrap();
        db.pin_if_absent("b", FP_B).unwrap();
        db.pin_if_absent("a", FP_A).unwrap();

        let keys: Vec<String> = db.all().unwrap().into_iter().map(|p| p.store_key).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_pins_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust").join("pins.db");

        TrustDb::open(&path).unwrap().pin_if_absent("gw", FP_A).unwrap();
        let reopened = TrustDb::open(&path).unwrap();
        assert_eq!(reopened.get("gw").unwrap().unwrap().fingerprint, FP_A);
    }
}
