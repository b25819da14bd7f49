mod schema;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::config::AppConfig;
use crate::models::*;

const USER_DATA_COLUMNS: &str =
    "package_name, notes, tags, marked_keep, marked_review, last_viewed";

/// SQLite-backed store for per-package user annotations.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        tracing::debug!("Annotation database opened at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default(config: &AppConfig) -> Result<Self> {
        Self::open(config.annotations_db_path()?)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Annotation records
    // ============================================================

    /// Insert or replace the annotation for `data.package_name`.
    ///
    /// Tags are normalized (trimmed, deduplicated) before writing, and each one
    /// is registered in the tag dictionary.
    pub fn save_package_user_data(&self, data: &PackageUserData) -> Result<()> {
        if data.package_name.is_empty() {
            anyhow::bail!("Annotation has an empty package name");
        }

        let mut data = data.clone();
        data.normalize_tags();

        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO package_user_data (package_name, notes, tags, marked_keep, marked_review, last_viewed)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(package_name) DO UPDATE SET
                notes = excluded.notes,
                tags = excluded.tags,
                marked_keep = excluded.marked_keep,
                marked_review = excluded.marked_review,
                last_viewed = excluded.last_viewed",
            (
                &data.package_name,
                &data.notes,
                serde_json::to_string(&data.tags)?,
                if data.marked_keep { 1 } else { 0 },
                if data.marked_review { 1 } else { 0 },
                data.last_viewed
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default(),
            ),
        )
        .with_context(|| format!("Failed to save user data for {}", data.package_name))?;

        for tag in &data.tags {
            tx.execute("INSERT OR IGNORE INTO tags (tag_name) VALUES (?)", [tag])?;
        }

        tx.commit()?;
        tracing::debug!("Saved user data for {}", data.package_name);
        Ok(())
    }

    /// The stored annotation, or `None` if the package was never annotated.
    pub fn find_package_user_data(&self, package_name: &str) -> Result<Option<PackageUserData>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let data = conn
            .query_row(
                &format!(
                    "SELECT {} FROM package_user_data WHERE package_name = ?",
                    USER_DATA_COLUMNS
                ),
                [package_name],
                row_to_user_data,
            )
            .optional()?;
        Ok(data)
    }

    /// The stored annotation, or an empty one for an unannotated package.
    pub fn get_package_user_data(&self, package_name: &str) -> Result<PackageUserData> {
        Ok(self
            .find_package_user_data(package_name)?
            .unwrap_or_else(|| PackageUserData::new(package_name)))
    }

    pub fn get_all_user_data(&self) -> Result<Vec<PackageUserData>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM package_user_data ORDER BY package_name",
            USER_DATA_COLUMNS
        ))?;

        let all = stmt
            .query_map([], row_to_user_data)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(all)
    }

    pub fn delete_package_user_data(&self, package_name: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "DELETE FROM package_user_data WHERE package_name = ?",
            [package_name],
        )?;
        Ok(rows > 0)
    }

    fn update_user_data<F>(&self, package_name: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut PackageUserData),
    {
        let mut data = self.get_package_user_data(package_name)?;
        change(&mut data);
        self.save_package_user_data(&data)
    }

    pub fn set_package_notes(&self, package_name: &str, notes: &str) -> Result<()> {
        self.update_user_data(package_name, |d| d.notes = notes.to_string())
    }

    pub fn get_package_notes(&self, package_name: &str) -> Result<String> {
        Ok(self.get_package_user_data(package_name)?.notes)
    }

    pub fn set_package_tags(&self, package_name: &str, tags: &[String]) -> Result<()> {
        self.update_user_data(package_name, |d| d.tags = tags.to_vec())
    }

    pub fn get_package_tags(&self, package_name: &str) -> Result<Vec<String>> {
        Ok(self.get_package_user_data(package_name)?.tags)
    }

    pub fn add_package_tag(&self, package_name: &str, tag: &str) -> Result<()> {
        let data = self.get_package_user_data(package_name)?;
        if data.tags.iter().any(|t| t == tag) {
            return Ok(());
        }
        self.update_user_data(package_name, |d| d.tags.push(tag.to_string()))
    }

    pub fn remove_package_tag(&self, package_name: &str, tag: &str) -> Result<()> {
        self.update_user_data(package_name, |d| d.tags.retain(|t| t != tag))
    }

    pub fn set_package_keep(&self, package_name: &str, keep: bool) -> Result<()> {
        self.update_user_data(package_name, |d| d.marked_keep = keep)
    }

    pub fn is_package_marked_keep(&self, package_name: &str) -> Result<bool> {
        Ok(self.get_package_user_data(package_name)?.marked_keep)
    }

    pub fn set_package_review(&self, package_name: &str, review: bool) -> Result<()> {
        self.update_user_data(package_name, |d| d.marked_review = review)
    }

    pub fn is_package_marked_review(&self, package_name: &str) -> Result<bool> {
        Ok(self.get_package_user_data(package_name)?.marked_review)
    }

    /// Record that the package's details were just looked at.
    pub fn mark_viewed(&self, package_name: &str) -> Result<()> {
        let now = Utc::now();
        self.update_user_data(package_name, |d| d.last_viewed = Some(now))
    }

    // ============================================================
    // Tags
    // ============================================================

    /// Every tag currently attached to at least one package, sorted.
    pub fn get_all_tags(&self) -> Result<Vec<String>> {
        let tags: BTreeSet<String> = self
            .get_all_user_data()?
            .into_iter()
            .flat_map(|d| d.tags)
            .collect();
        Ok(tags.into_iter().collect())
    }

    pub fn get_packages_with_tag(&self, tag: &str) -> Result<Vec<String>> {
        Ok(self
            .get_all_user_data()?
            .into_iter()
            .filter(|d| d.tags.iter().any(|t| t == tag))
            .map(|d| d.package_name)
            .collect())
    }

    // ============================================================
    // Statistics
    // ============================================================

    pub fn count_packages_with_notes(&self) -> Result<usize> {
        self.count_where("notes != ''")
    }

    pub fn count_packages_marked_keep(&self) -> Result<usize> {
        self.count_where("marked_keep = 1")
    }

    pub fn count_packages_marked_review(&self) -> Result<usize> {
        self.count_where("marked_review = 1")
    }

    fn count_where(&self, predicate: &str) -> Result<usize> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM package_user_data WHERE {}", predicate),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ============================================================
    // Export / Import
    // ============================================================

    /// Write every annotation to `path` as a pretty-printed JSON array.
    pub fn export_to_json(&self, path: &Path) -> Result<usize> {
        let all = self.get_all_user_data()?;
        let json = serde_json::to_string_pretty(&all)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to open file for writing: {}", path.display()))?;
        tracing::info!("Exported {} annotations to {}", all.len(), path.display());
        Ok(all.len())
    }

    /// Upsert every record in the JSON array at `path`, in order.
    ///
    /// Stops at the first invalid record; records before it stay saved.
    pub fn import_from_json(&self, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to open file for reading: {}", path.display()))?;
        self.import_from_str(&raw)
            .with_context(|| format!("Failed to import {}", path.display()))
    }

    pub fn import_from_str(&self, raw: &str) -> Result<usize> {
        let doc: serde_json::Value = serde_json::from_str(raw).context("JSON parse error")?;
        let records = doc
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Expected a JSON array of annotations"))?;

        let mut imported = 0;
        for (index, value) in records.iter().enumerate() {
            let data: PackageUserData = serde_json::from_value(value.clone())
                .with_context(|| format!("Invalid annotation record at index {}", index))?;
            if data.package_name.is_empty() {
                anyhow::bail!("Annotation record at index {} has an empty package_name", index);
            }
            self.save_package_user_data(&data)?;
            imported += 1;
        }

        tracing::info!("Imported {} annotations", imported);
        Ok(imported)
    }

    // ============================================================
    // Settings
    // ============================================================

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(value.flatten())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            (key, value),
        )?;
        Ok(())
    }

    // ============================================================
    // Display-time merge
    // ============================================================

    /// Attach stored annotations to a list of packages.
    pub fn annotate(&self, packages: Vec<Package>) -> Result<Vec<AnnotatedPackage>> {
        let mut by_name: std::collections::HashMap<String, PackageUserData> = self
            .get_all_user_data()?
            .into_iter()
            .map(|d| (d.package_name.clone(), d))
            .collect();

        Ok(packages
            .into_iter()
            .map(|package| {
                let user_data = by_name.remove(&package.name);
                AnnotatedPackage { package, user_data }
            })
            .collect())
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn row_to_user_data(row: &Row<'_>) -> rusqlite::Result<PackageUserData> {
    Ok(PackageUserData {
        package_name: row.get(0)?,
        notes: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        tags: parse_tags(&row.get::<_, Option<String>>(2)?.unwrap_or_default()),
        marked_keep: row.get::<_, i64>(3)? != 0,
        marked_review: row.get::<_, i64>(4)? != 0,
        last_viewed: parse_datetime(&row.get::<_, Option<String>>(5)?.unwrap_or_default()),
    })
}

fn parse_tags(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    serde_json::from_str(raw).unwrap_or_else(|_| {
        raw.split(',')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    })
}

/// RFC 3339, or the zone-less ISO form older databases wrote (taken as UTC).
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tags_accepts_json_and_legacy_commas() {
        assert_eq!(parse_tags(r#"["a","b"]"#), vec!["a", "b"]);
        assert_eq!(parse_tags("a,b"), vec!["a", "b"]);
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn parse_datetime_accepts_legacy_iso() {
        let dt = parse_datetime("2024-03-01T12:30:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T12:30:00+00:00");
        assert!(parse_datetime("").is_none());
        assert!(parse_datetime("not a date").is_none());
    }
}
