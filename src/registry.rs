use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::RegistryError;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Schema version written to the `meta` table on creation
pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub tag_id: String,
    pub folder_path: String,
    pub updated_at: DateTime<Utc>,
}

/// Persistent tag id -> folder association store backed by SQLite.
pub struct Registry {
    conn: Connection,
}

impl Registry {
    /// Open (creating if needed) the registry at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let registry = Registry { conn };
        registry.initialize_schema()?;
        Ok(registry)
    }

    /// Open an existing registry without write access.
    pub fn open_read_only<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let registry = Registry { conn };
        // Fails early on a file that is not a registry
        registry.schema_version()?;
        Ok(registry)
    }

    /// In-memory registry, mostly useful for tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let registry = Registry {
            conn: Connection::open_in_memory()?,
        };
        registry.initialize_schema()?;
        Ok(registry)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        let created = self.conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        if created > 0 {
            info!("Created tag registry (schema v{})", SCHEMA_VERSION);
        }

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS tags (
                tag_id TEXT PRIMARY KEY,
                folder_path TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64> {
        let version: String = self.conn.query_row(
            "SELECT value FROM meta WHERE key = 'version'",
            [],
            |row| row.get(0),
        )?;
        version
            .parse()
            .map_err(|_| RegistryError::InvalidEntry(format!("bad schema version '{}'", version)))
    }

    /// Folder registered for `tag_id`, or `None` for an unknown tag.
    pub fn lookup(&self, tag_id: &str) -> Result<Option<String>> {
        let folder = self.conn.query_row(
            "SELECT folder_path FROM tags WHERE tag_id = ?1",
            params![tag_id],
            |row| row.get::<_, String>(0),
        );

        match folder {
            Ok(path) => {
                debug!("Tag {} -> {}", tag_id, path);
                Ok(Some(path))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Associate `tag_id` with `folder_path`, replacing any previous folder.
    pub fn store(&self, tag_id: &str, folder_path: &str) -> Result<TagRecord> {
        if is_blank(tag_id) || is_blank(folder_path) {
            return Err(RegistryError::InvalidEntry(format!(
                "missing tag id or folder ('{}', '{}')",
                tag_id, folder_path
            )));
        }

        let record = TagRecord {
            tag_id: tag_id.to_string(),
            folder_path: folder_path.to_string(),
            updated_at: Utc::now(),
        };

        self.conn.execute(
            "INSERT OR REPLACE INTO tags (tag_id, folder_path, updated_at)
             VALUES (?1, ?2, ?3)",
            params![record.tag_id, record.folder_path, record.updated_at],
        )?;

        Ok(record)
    }

    /// Drop the association for `tag_id`. Returns whether one existed.
    pub fn remove(&self, tag_id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM tags WHERE tag_id = ?1", params![tag_id])?;
        Ok(removed > 0)
    }

    pub fn entries(&self) -> Result<Vec<TagRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT tag_id, folder_path, updated_at FROM tags ORDER BY tag_id",
        )?;

        let records = stmt
            .query_map([], |row| {
                Ok(TagRecord {
                    tag_id: row.get(0)?,
                    folder_path: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_store_then_lookup() {
        let registry = Registry::in_memory().unwrap();
        registry.store("04:A1:B2:C3", "/music/rock").unwrap();

        assert_eq!(
            registry.lookup("04:A1:B2:C3").unwrap().as_deref(),
            Some("/music/rock")
        );
    }

    #[test]
    fn test_latest_store_wins() {
        let registry = Registry::in_memory().unwrap();
        registry.store("04:A1:B2:C3", "/music/rock").unwrap();
        registry.store("04:A1:B2:C3", "/music/jazz").unwrap();

        assert_eq!(
            registry.lookup("04:A1:B2:C3").unwrap().as_deref(),
            Some("/music/jazz")
        );
        assert_eq!(registry.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_tag_is_none() {
        let registry = Registry::in_memory().unwrap();
        assert!(registry.lookup("DE:AD:BE:EF").unwrap().is_none());
    }

    #[test]
    fn test_blank_entries_rejected() {
        let registry = Registry::in_memory().unwrap();
        assert!(matches!(
            registry.store("  ", "/music"),
            Err(RegistryError::InvalidEntry(_))
        ));
        assert!(matches!(
            registry.store("04:A1", ""),
            Err(RegistryError::InvalidEntry(_))
        ));
    }

    #[test]
    fn test_remove() {
        let registry = Registry::in_memory().unwrap();
        registry.store("04:A1", "/music/a").unwrap();

        assert!(registry.remove("04:A1").unwrap());
        assert!(!registry.remove("04:A1").unwrap());
        assert!(registry.lookup("04:A1").unwrap().is_none());
    }

    #[test]
    fn test_entries_sorted_by_tag() {
        let registry = Registry::in_memory().unwrap();
        registry.store("B0", "/music/b").unwrap();
        registry.store("A0", "/music/a").unwrap();

        let tags: Vec<String> = registry
            .entries()
            .unwrap()
            .into_iter()
            .map(|r| r.tag_id)
            .collect();
        assert_eq!(tags, vec!["A0", "B0"]);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.db");

        {
            let registry = Registry::open(&path).unwrap();
            registry.store("04:A1:B2:C3", "/music/rock").unwrap();
        }

        let registry = Registry::open(&path).unwrap();
        assert_eq!(registry.schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(
            registry.lookup("04:A1:B2:C3").unwrap().as_deref(),
            Some("/music/rock")
        );
    }

    #[test]
    fn test_read_only_store_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.db");
        Registry::open(&path).unwrap();

        let registry = Registry::open_read_only(&path).unwrap();
        let result = registry.store("04:A1:B2:C3", "/music/rock");
        assert!(matches!(result, Err(RegistryError::Persistence(_))));
        assert!(registry.lookup("04:A1:B2:C3").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), vec![0xA5u8; 4096]).unwrap();

        assert!(Registry::open(file.path()).is_err());
    }
}
