//! Catalog persistence: registered folders and track records

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::path::{Path, PathBuf};

use crate::models::{path_key, Folder, LibraryEntry, TrackTags};

const LIBRARY_COLUMNS: &str =
    "path, title, artist, album, album_artist, disk, duration, genre, picture, track, year";

/// SQLite-backed catalog shared by every component
///
/// All access goes through one connection behind a mutex, so writes from
/// parallel folder workers are serialized.
pub struct CatalogStore {
    conn: Mutex<Connection>,
}

impl CatalogStore {
    /// Open or create database
    pub fn open(path: &Path) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> SqliteResult<()> {
        self.conn.lock().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS folders (
                path TEXT PRIMARY KEY,
                last_modified INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS library (
                path TEXT PRIMARY KEY,
                title TEXT,
                artist TEXT,
                album TEXT,
                album_artist TEXT,
                disk INTEGER,
                duration REAL,
                genre TEXT,
                picture TEXT,
                track INTEGER,
                year INTEGER
            );
            ",
        )?;
        Ok(())
    }

    /// All registered folders, ordered by path
    pub fn folders(&self) -> SqliteResult<Vec<Folder>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path, last_modified FROM folders ORDER BY path ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(Folder {
                path: PathBuf::from(row.get::<_, String>(0)?),
                last_modified: row.get(1)?,
            })
        })?;

        let mut folders = Vec::new();
        for row in rows {
            folders.push(row?);
        }
        Ok(folders)
    }

    /// Register a folder, keeping an existing timestamp if already present
    pub fn add_folder(&self, folder: &Folder) -> SqliteResult<()> {
        self.conn.lock().execute(
            "INSERT INTO folders (path, last_modified) VALUES (?1, ?2)
             ON CONFLICT(path) DO NOTHING",
            params![path_key(&folder.path), folder.last_modified],
        )?;
        Ok(())
    }

    /// Unregister a folder; its tracks are left for the orphan sweep or a rescan
    pub fn remove_folder(&self, path: &Path) -> SqliteResult<bool> {
        let changed = self
            .conn
            .lock()
            .execute("DELETE FROM folders WHERE path = ?1", params![path_key(path)])?;
        Ok(changed > 0)
    }

    /// Swap `replace` for `register` in one transaction
    pub fn apply_registration(&self, replace: &[PathBuf], register: &[Folder]) -> SqliteResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for path in replace {
            tx.execute("DELETE FROM folders WHERE path = ?1", params![path_key(path)])?;
        }
        for folder in register {
            tx.execute(
                "INSERT INTO folders (path, last_modified) VALUES (?1, ?2)
                 ON CONFLICT(path) DO NOTHING",
                params![path_key(&folder.path), folder.last_modified],
            )?;
        }
        tx.commit()
    }

    /// Record the mtime observed when a folder was last scanned
    pub fn set_folder_last_modified(&self, path: &Path, last_modified: i64) -> SqliteResult<()> {
        self.conn.lock().execute(
            "UPDATE folders SET last_modified = ?2 WHERE path = ?1",
            params![path_key(path), last_modified],
        )?;
        Ok(())
    }

    /// Insert or overwrite track records in one transaction
    pub fn upsert_entries(&self, entries: &[LibraryEntry]) -> SqliteResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO library
                 (path, title, artist, album, album_artist, disk, duration, genre, picture, track, year)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(path) DO UPDATE SET
                    title = excluded.title,
                    artist = excluded.artist,
                    album = excluded.album,
                    album_artist = excluded.album_artist,
                    disk = excluded.disk,
                    duration = excluded.duration,
                    genre = excluded.genre,
                    picture = excluded.picture,
                    track = excluded.track,
                    year = excluded.year",
            )?;

            for entry in entries {
                let tags = &entry.tags;
                stmt.execute(params![
                    path_key(&entry.path),
                    tags.title,
                    tags.artist,
                    tags.album,
                    tags.album_artist,
                    tags.disk,
                    tags.duration,
                    tags.genre,
                    tags.picture,
                    tags.track,
                    tags.year,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete one track record
    pub fn delete_entry(&self, path: &Path) -> SqliteResult<bool> {
        let changed = self
            .conn
            .lock()
            .execute("DELETE FROM library WHERE path = ?1", params![path_key(path)])?;
        Ok(changed > 0)
    }

    /// Delete every track record inside `folder`
    pub fn delete_entries_within(&self, folder: &Path) -> SqliteResult<u64> {
        let mut prefix = path_key(folder);
        if !prefix.ends_with(std::path::MAIN_SEPARATOR) {
            prefix.push(std::path::MAIN_SEPARATOR);
        }
        let changed = self.conn.lock().execute(
            "DELETE FROM library WHERE substr(path, 1, length(?1)) = ?1",
            params![prefix],
        )?;
        Ok(changed as u64)
    }

    /// The full library, ordered by path
    pub fn library(&self) -> SqliteResult<Vec<LibraryEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM library ORDER BY path ASC",
            LIBRARY_COLUMNS
        ))?;
        let rows = stmt.query_map([], entry_from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Paths of every track record, ordered
    pub fn library_paths(&self) -> SqliteResult<Vec<PathBuf>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path FROM library ORDER BY path ASC")?;
        let rows = stmt.query_map([], |row| Ok(PathBuf::from(row.get::<_, String>(0)?)))?;

        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }

    /// Look up a single track record
    pub fn entry(&self, path: &Path) -> SqliteResult<Option<LibraryEntry>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM library WHERE path = ?1", LIBRARY_COLUMNS),
            params![path_key(path)],
            entry_from_row,
        )
        .optional()
    }

    /// Get track count
    pub fn library_size(&self) -> SqliteResult<u64> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM library", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn entry_from_row(row: &Row<'_>) -> SqliteResult<LibraryEntry> {
    Ok(LibraryEntry {
        path: PathBuf::from(row.get::<_, String>(0)?),
        tags: TrackTags {
            title: row.get(1)?,
            artist: row.get(2)?,
            album: row.get(3)?,
            album_artist: row.get(4)?,
            disk: row.get(5)?,
            duration: row.get(6)?,
            genre: row.get(7)?,
            picture: row.get(8)?,
            track: row.get(9)?,
            year: row.get(10)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, title: &str) -> LibraryEntry {
        LibraryEntry::new(
            path,
            TrackTags {
                title: Some(title.to_string()),
                track: Some(3),
                duration: Some(181.5),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_folders_round_trip_in_path_order() {
        let store = CatalogStore::open_memory().unwrap();
        store.add_folder(&Folder::new("/b")).unwrap();
        store.add_folder(&Folder::new("/a")).unwrap();
        store.set_folder_last_modified(Path::new("/b"), 99).unwrap();

        let folders = store.folders().unwrap();
        assert_eq!(folders.len(), 2);
        assert_eq!(folders[0].path, PathBuf::from("/a"));
        assert_eq!(folders[1].last_modified, 99);
    }

    #[test]
    fn test_add_folder_keeps_existing_timestamp() {
        let store = CatalogStore::open_memory().unwrap();
        store.add_folder(&Folder::new("/music")).unwrap();
        store.set_folder_last_modified(Path::new("/music"), 10).unwrap();
        store.add_folder(&Folder::new("/music")).unwrap();

        assert_eq!(store.folders().unwrap()[0].last_modified, 10);
    }

    #[test]
    fn test_upsert_overwrites_metadata() {
        let store = CatalogStore::open_memory().unwrap();
        store.upsert_entries(&[entry("/m/a.mp3", "Old")]).unwrap();
        store.upsert_entries(&[entry("/m/a.mp3", "New")]).unwrap();

        assert_eq!(store.library_size().unwrap(), 1);
        let stored = store.entry(Path::new("/m/a.mp3")).unwrap().unwrap();
        assert_eq!(stored.title(), Some("New"));
        assert_eq!(stored.tags.track, Some(3));
        assert_eq!(stored.tags.duration, Some(181.5));
    }

    #[test]
    fn test_delete_and_library_order() {
        let store = CatalogStore::open_memory().unwrap();
        store
            .upsert_entries(&[entry("/m/c.mp3", "C"), entry("/m/a.mp3", "A")])
            .unwrap();

        let paths = store.library_paths().unwrap();
        assert_eq!(paths, vec![PathBuf::from("/m/a.mp3"), PathBuf::from("/m/c.mp3")]);

        assert!(store.delete_entry(Path::new("/m/a.mp3")).unwrap());
        assert!(!store.delete_entry(Path::new("/m/a.mp3")).unwrap());
        assert_eq!(store.library().unwrap().len(), 1);
        assert!(store.entry(Path::new("/m/a.mp3")).unwrap().is_none());
    }

    #[test]
    fn test_delete_entries_within_respects_segments() {
        let store = CatalogStore::open_memory().unwrap();
        store
            .upsert_entries(&[
                entry("/music/a.mp3", "A"),
                entry("/music/sub/b.mp3", "B"),
                entry("/music1/c.mp3", "C"),
            ])
            .unwrap();

        assert_eq!(store.delete_entries_within(Path::new("/music")).unwrap(), 2);
        assert_eq!(
            store.library_paths().unwrap(),
            vec![PathBuf::from("/music1/c.mp3")]
        );
    }

    #[test]
    fn test_apply_registration_swaps_folders() {
        let store = CatalogStore::open_memory().unwrap();
        store.add_folder(&Folder::new("/music/a")).unwrap();
        store.add_folder(&Folder::new("/music/b")).unwrap();
        store.add_folder(&Folder::new("/podcasts")).unwrap();

        store
            .apply_registration(
                &[PathBuf::from("/music/a"), PathBuf::from("/music/b")],
                &[Folder::new("/music")],
            )
            .unwrap();

        let paths: Vec<PathBuf> = store.folders().unwrap().into_iter().map(|f| f.path).collect();
        assert_eq!(paths, vec![PathBuf::from("/music"), PathBuf::from("/podcasts")]);
    }

    #[test]
    fn test_apply_registration_rolls_back_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("catalog.db");
        let store = CatalogStore::open(&db_path).unwrap();
        store.add_folder(&Folder::new("/music/a")).unwrap();

        // Inserts into folders now fail, after the delete already ran.
        Connection::open(&db_path)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER no_inserts BEFORE INSERT ON folders
                 BEGIN SELECT RAISE(ABORT, 'read only'); END;",
            )
            .unwrap();

        assert!(store
            .apply_registration(&[PathBuf::from("/music/a")], &[Folder::new("/music")])
            .is_err());
        assert_eq!(store.folders().unwrap(), vec![Folder::new("/music/a")]);
    }

    #[test]
    fn test_remove_folder() {
        let store = CatalogStore::open_memory().unwrap();
        store.add_folder(&Folder::new("/music")).unwrap();
        assert!(store.remove_folder(Path::new("/music")).unwrap());
        assert!(store.folders().unwrap().is_empty());
    }

    #[test]
    fn test_open_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("catalog.db");
        {
            let store = CatalogStore::open(&db_path).unwrap();
            store.upsert_entries(&[entry("/m/a.mp3", "A")]).unwrap();
        }
        let store = CatalogStore::open(&db_path).unwrap();
        assert_eq!(store.library_size().unwrap(), 1);
    }
}
