use std::path::{Path, PathBuf};

use alpm::{Alpm, PackageReason};
use chrono::DateTime;

use super::LocalDb;
use crate::error::{Error, Result};
use crate::models::{InstallReason, Package};

/// The local database read through libalpm.
///
/// The handle is reopened on [`LocalDb::reload`], which is the only way
/// libalpm notices transactions made by another process.
pub struct AlpmDb {
    root: PathBuf,
    db_path: PathBuf,
    handle: Alpm,
    packages: Vec<Package>,
}

impl AlpmDb {
    pub fn open(root: &Path, db_path: &Path) -> Result<Self> {
        let handle = create_handle(root, db_path)?;
        let packages = load_packages(&handle);
        tracing::debug!("libalpm handle opened, {} packages", packages.len());
        Ok(Self {
            root: root.to_path_buf(),
            db_path: db_path.to_path_buf(),
            handle,
            packages,
        })
    }
}

impl LocalDb for AlpmDb {
    fn packages(&self) -> &[Package] {
        &self.packages
    }

    fn files(&self, name: &str) -> Result<Vec<String>> {
        let pkg = self
            .handle
            .localdb()
            .pkg(name)
            .map_err(|_| Error::PackageNotFound(name.to_string()))?;
        Ok(pkg
            .files()
            .files()
            .iter()
            .map(|f| String::from_utf8_lossy(f.name()).into_owned())
            .collect())
    }

    fn reload(&mut self) -> Result<()> {
        let handle = create_handle(&self.root, &self.db_path)?;
        self.packages = load_packages(&handle);
        self.handle = handle;
        Ok(())
    }
}

fn create_handle(root: &Path, db_path: &Path) -> Result<Alpm> {
    Alpm::new(
        root.to_string_lossy().as_ref(),
        db_path.to_string_lossy().as_ref(),
    )
    .map_err(|e| Error::DatabaseError(format!("Failed to initialize ALPM: {}", e)))
}

fn load_packages(handle: &Alpm) -> Vec<Package> {
    let mut packages: Vec<Package> = handle
        .localdb()
        .pkgs()
        .iter()
        .map(|pkg| Package {
            description: pkg.desc().unwrap_or_default().to_string(),
            url: pkg.url().map(|s| s.to_string()),
            packager: pkg.packager().map(|s| s.to_string()),
            architecture: pkg.arch().map(|s| s.to_string()),
            installed_size: pkg.isize(),
            download_size: pkg.download_size(),
            build_date: DateTime::from_timestamp(pkg.build_date(), 0),
            install_date: pkg
                .install_date()
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            install_reason: match pkg.reason() {
                PackageReason::Depend => InstallReason::Dependency,
                _ => InstallReason::Explicit,
            },
            groups: pkg.groups().iter().map(|s| s.to_string()).collect(),
            licenses: pkg.licenses().iter().map(|s| s.to_string()).collect(),
            depends: pkg.depends().iter().map(|d| d.name().to_string()).collect(),
            optional_depends: pkg
                .optdepends()
                .iter()
                .map(|d| match d.desc() {
                    Some(desc) => format!("{}: {}", d.name(), desc),
                    None => d.name().to_string(),
                })
                .collect(),
            required_by: pkg.required_by().iter().map(|s| s.to_string()).collect(),
            optional_for: pkg.optional_for().iter().map(|s| s.to_string()).collect(),
            provides: pkg.provides().iter().map(|d| d.name().to_string()).collect(),
            conflicts: pkg.conflicts().iter().map(|d| d.name().to_string()).collect(),
            replaces: pkg.replaces().iter().map(|d| d.name().to_string()).collect(),
            ..Package::new(pkg.name(), pkg.version().as_str())
        })
        .collect();

    packages.sort_by(|a, b| a.name.cmp(&b.name));
    packages
}
