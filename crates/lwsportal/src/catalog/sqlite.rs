//! SQLite-backed catalog.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{migrations, Catalog, CatalogEntry, CatalogError, NewCatalogEntry};
use crate::language::Language;

/// Catalog over a single rusqlite connection.
///
/// Cloning is cheap and shares the connection; access is serialized through
/// a `Mutex`.
#[derive(Clone)]
pub struct SqliteCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalog {
    /// Opens (or creates) the catalog at `path` and runs pending migrations.
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CatalogError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        migrations::run_all(&conn)?;

        log::info!("Catalog opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, CatalogError>
    where
        F: FnOnce(&Connection) -> Result<T, CatalogError>,
    {
        let conn = self.conn.lock().map_err(|_| CatalogError::LockPoisoned)?;
        f(&conn)
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, project_id, name, language, path, created_by, created_at FROM functions";

struct RawEntry {
    id: String,
    project_id: String,
    name: String,
    language: String,
    path: String,
    created_by: String,
    created_at: String,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            language: row.get(3)?,
            path: row.get(4)?,
            created_by: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_entry(self) -> Result<CatalogEntry, CatalogError> {
        let language: Language = self
            .language
            .parse()
            .map_err(|e| CatalogError::Corrupt(format!("{} ({})", e, self.id)))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| CatalogError::Corrupt(format!("bad created_at for {}: {}", self.id, e)))?;
        Ok(CatalogEntry {
            id: self.id,
            project_id: self.project_id,
            name: self.name,
            language,
            path: self.path,
            created_by: self.created_by,
            created_at,
        })
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

impl Catalog for SqliteCatalog {
    fn list_entries(&self, project_id: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE project_id = ?1 ORDER BY path",
                SELECT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![project_id], RawEntry::from_row)?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?.into_entry()?);
            }
            Ok(entries)
        })
    }

    fn insert_entry(&self, entry: &NewCatalogEntry) -> Result<CatalogEntry, CatalogError> {
        let stored = CatalogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: entry.project_id.clone(),
            name: entry.name.clone(),
            language: entry.language,
            path: entry.path.clone(),
            created_by: entry.created_by.clone(),
            created_at: Utc::now(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO functions (id, project_id, name, language, path, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    stored.id,
                    stored.project_id,
                    stored.name,
                    stored.language.as_str(),
                    stored.path,
                    stored.created_by,
                    stored.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CatalogError::Duplicate {
                        project_id: entry.project_id.clone(),
                        path: entry.path.clone(),
                    }
                } else {
                    CatalogError::Sqlite(e)
                }
            })?;
            Ok(())
        })?;

        Ok(stored)
    }

    fn delete_entry(&self, project_id: &str, path: &str) -> Result<bool, CatalogError> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM functions WHERE project_id = ?1 AND path = ?2",
                params![project_id, path],
            )?;
            Ok(removed > 0)
        })
    }

    fn find_entry(
        &self,
        project_id: &str,
        path: &str,
    ) -> Result<Option<CatalogEntry>, CatalogError> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("{} WHERE project_id = ?1 AND path = ?2", SELECT_COLUMNS),
                    params![project_id, path],
                    RawEntry::from_row,
                )
                .optional()?;
            raw.map(RawEntry::into_entry).transpose()
        })
    }

    fn find_by_id(&self, id: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        self.with_conn(|conn| select_by_id(conn, id))
    }

    fn update_path(&self, id: &str, path: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        self.with_conn(|conn| {
            let Some(current) = select_by_id(conn, id)? else {
                return Ok(None);
            };
            conn.execute(
                "UPDATE functions SET path = ?2 WHERE id = ?1",
                params![id, path],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CatalogError::Duplicate {
                        project_id: current.project_id.clone(),
                        path: path.to_string(),
                    }
                } else {
                    CatalogError::Sqlite(e)
                }
            })?;
            Ok(Some(CatalogEntry {
                path: path.to_string(),
                ..current
            }))
        })
    }
}

fn select_by_id(conn: &Connection, id: &str) -> Result<Option<CatalogEntry>, CatalogError> {
    let raw = conn
        .query_row(
            &format!("{} WHERE id = ?1", SELECT_COLUMNS),
            params![id],
            RawEntry::from_row,
        )
        .optional()?;
    raw.map(RawEntry::into_entry).transpose()
}
