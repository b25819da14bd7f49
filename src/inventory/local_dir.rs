use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::{dependency_name, link_reverse_dependencies, LocalDb};
use crate::error::{Error, Result};
use crate::models::{InstallReason, Package};

/// pacman's on-disk local database: one `<name>-<version>/` directory per
/// installed package under `<dbpath>/local/`, each holding a `desc` file and a
/// `files` file.
pub struct LocalDirDb {
    local_dir: PathBuf,
    packages: Vec<Package>,
    entries: HashMap<String, PathBuf>,
}

impl LocalDirDb {
    pub fn open(db_path: &Path) -> Result<Self> {
        let local_dir = db_path.join("local");
        if !local_dir.is_dir() {
            return Err(Error::DatabaseError(format!(
                "Local database does not exist: {}",
                local_dir.display()
            )));
        }

        let mut db = Self {
            local_dir,
            packages: Vec::new(),
            entries: HashMap::new(),
        };
        db.reload()?;
        Ok(db)
    }

    fn scan(&self) -> Result<(Vec<Package>, HashMap<String, PathBuf>)> {
        let mut packages = Vec::new();
        let mut entries = HashMap::new();

        for entry in fs::read_dir(&self.local_dir)? {
            let entry = entry?;
            let dir = entry.path();
            let desc_path = dir.join("desc");
            if !desc_path.is_file() {
                continue;
            }

            let raw = fs::read_to_string(&desc_path)?;
            match parse_desc(&raw) {
                Some(package) => {
                    entries.insert(package.name.clone(), dir);
                    packages.push(package);
                }
                None => {
                    tracing::warn!("Skipping malformed entry {}", desc_path.display());
                }
            }
        }

        packages.sort_by(|a, b| a.name.cmp(&b.name));
        link_reverse_dependencies(&mut packages);
        Ok((packages, entries))
    }
}

impl LocalDb for LocalDirDb {
    fn packages(&self) -> &[Package] {
        &self.packages
    }

    fn files(&self, name: &str) -> Result<Vec<String>> {
        let dir = self
            .entries
            .get(name)
            .ok_or_else(|| Error::PackageNotFound(name.to_string()))?;
        let path = dir.join("files");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(path)?;
        Ok(sections(&raw).remove("FILES").unwrap_or_default())
    }

    fn reload(&mut self) -> Result<()> {
        let (packages, entries) = self.scan()?;
        tracing::debug!(
            "Loaded {} packages from {}",
            packages.len(),
            self.local_dir.display()
        );
        self.packages = packages;
        self.entries = entries;
        Ok(())
    }
}

/// Split a pacman database file into `%SECTION%` blocks.
fn sections(raw: &str) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        let line = line.trim_end();
        if line.len() > 2 && line.starts_with('%') && line.ends_with('%') {
            let key = line[1..line.len() - 1].to_string();
            out.entry(key.clone()).or_default();
            current = Some(key);
        } else if line.is_empty() {
            current = None;
        } else if let Some(key) = &current {
            out.entry(key.clone()).or_default().push(line.to_string());
        }
    }

    out
}

fn parse_desc(raw: &str) -> Option<Package> {
    let mut s = sections(raw);
    let mut take = |key: &str| s.remove(key).unwrap_or_default();
    let first = |values: Vec<String>| values.into_iter().next();

    let name = first(take("NAME"))?;
    let version = first(take("VERSION"))?;

    let install_reason = match first(take("REASON")).as_deref() {
        Some("1") => InstallReason::Dependency,
        _ => InstallReason::Explicit,
    };

    let names = |values: Vec<String>| -> Vec<String> {
        values
            .iter()
            .map(|v| dependency_name(v).to_string())
            .collect()
    };

    Some(Package {
        description: first(take("DESC")).unwrap_or_default(),
        url: first(take("URL")),
        packager: first(take("PACKAGER")),
        architecture: first(take("ARCH")),
        installed_size: first(take("SIZE"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        build_date: first(take("BUILDDATE")).and_then(|v| timestamp(&v)),
        install_date: first(take("INSTALLDATE")).and_then(|v| timestamp(&v)),
        install_reason,
        groups: take("GROUPS"),
        licenses: take("LICENSE"),
        depends: names(take("DEPENDS")),
        optional_depends: take("OPTDEPENDS"),
        provides: names(take("PROVIDES")),
        conflicts: names(take("CONFLICTS")),
        replaces: names(take("REPLACES")),
        ..Package::new(name, version)
    })
}

fn timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
