use super::*;
use tempfile::TempDir;

#[test]
fn open_creates_parent_directory_and_file() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("zubot.db");

    let conn = open(&db_path, 5_000).unwrap();
    drop(conn);

    assert!(db_path.exists());
}

#[test]
fn open_enables_wal_and_foreign_keys() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("zubot.db");
    let conn = open(&db_path, 5_000).unwrap();

    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(journal_mode.to_lowercase(), "wal");

    let foreign_keys: i64 = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
        .unwrap();
    assert_eq!(foreign_keys, 1);
}

#[test]
fn initialize_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("zubot.db");
    let conn = open(&db_path, 5_000).unwrap();

    initialize(&conn).unwrap();
    initialize(&conn).unwrap();

    let table_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'runs'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(table_count, 1);
}
