use anyhow::{Context, Result};
use rusqlite::Connection;

/// Embedded migrations, applied in order. The schema version stored in
/// `PRAGMA user_version` is the number of entries applied so far.
const MIGRATIONS: &[(&str, &str)] = &[
    ("initial", include_str!("migrations/001_initial.sql")),
    ("json_tags", include_str!("migrations/002_json_tags.sql")),
    (
        "annotation_indexes",
        include_str!("migrations/003_annotation_indexes.sql"),
    ),
];

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let mut version = schema_version(conn)?;

    // Annotation files written before versioning carry the initial tables
    // with user_version still at 0.
    if version == 0 && has_table(conn, "package_user_data")? {
        set_schema_version(conn, 1)?;
        version = 1;
        tracing::info!("Existing annotation database found, starting from schema version 1");
    }

    if version > MIGRATIONS.len() {
        anyhow::bail!(
            "Annotation database has schema version {} but this build knows only {}",
            version,
            MIGRATIONS.len()
        );
    }

    for (index, (name, sql)) in MIGRATIONS.iter().enumerate().skip(version) {
        let target = index + 1;
        tracing::info!("Upgrading annotation schema to version {} ({})", target, name);
        conn.execute_batch(&format!(
            "BEGIN; {} PRAGMA user_version = {}; COMMIT;",
            sql, target
        ))
        .with_context(|| format!("Schema upgrade {} ({}) failed", target, name))?;
    }

    Ok(())
}

fn schema_version(conn: &Connection) -> Result<usize> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(usize::try_from(version).unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: usize) -> Result<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
    Ok(())
}

fn has_table(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
