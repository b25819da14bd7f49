//! Read-only queries over the installed package set.
//!
//! [`Inventory`] answers questions about installed packages. The data comes
//! from a [`LocalDb`] implementation:
//!
//! - [`LocalDirDb`] parses pacman's `local/` database directory directly
//! - `AlpmDb` goes through libalpm (requires the `alpm` feature)
//! - [`MemoryDb`] holds a fixed package list, for tests and embedding
//!
//! Nothing here changes the system. Operations that would are rejected with
//! [`Error::RequiresPrivilege`], carrying the command to hand to the
//! privileged runner instead.

#[cfg(feature = "alpm")]
mod alpm_db;
mod local_dir;
mod memory;

#[cfg(feature = "alpm")]
pub use alpm_db::AlpmDb;
pub use local_dir::LocalDirDb;
pub use memory::MemoryDb;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::commands;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::models::*;

/// Source of installed-package records.
pub trait LocalDb {
    /// Every installed package, with `required_by` and `optional_for`
    /// computed against the current set.
    fn packages(&self) -> &[Package];

    /// The files owned by `name`, relative to the filesystem root as pacman
    /// stores them (`usr/bin/vim`). Directories end with `/`.
    fn files(&self, name: &str) -> Result<Vec<String>>;

    /// Re-read the database so changes made by other processes show up.
    fn reload(&mut self) -> Result<()>;
}

#[cfg(feature = "alpm")]
pub type SystemDb = AlpmDb;
#[cfg(not(feature = "alpm"))]
pub type SystemDb = LocalDirDb;

/// Open the system package database described by `config`.
pub fn open_system(config: &AppConfig) -> Result<Inventory<SystemDb>> {
    #[cfg(feature = "alpm")]
    let db = AlpmDb::open(&config.root_dir, &config.db_path)?;
    #[cfg(not(feature = "alpm"))]
    let db = LocalDirDb::open(&config.db_path)?;

    Ok(Inventory::new(db))
}

pub struct Inventory<D: LocalDb> {
    db: D,
    last_error: Option<String>,
}

impl<D: LocalDb> Inventory<D> {
    pub fn new(db: D) -> Self {
        Self {
            db,
            last_error: None,
        }
    }

    // ============================================================
    // Package lists
    // ============================================================

    pub fn all_packages(&self) -> Vec<Package> {
        self.db.packages().to_vec()
    }

    pub fn explicit_packages(&self) -> Vec<Package> {
        self.filtered(Package::is_explicit)
    }

    pub fn dependency_packages(&self) -> Vec<Package> {
        self.filtered(|p| p.install_reason == InstallReason::Dependency)
    }

    pub fn orphan_packages(&self) -> Vec<Package> {
        self.filtered(Package::is_orphan)
    }

    fn filtered<F>(&self, keep: F) -> Vec<Package>
    where
        F: Fn(&Package) -> bool,
    {
        self.db
            .packages()
            .iter()
            .filter(|p| keep(p))
            .cloned()
            .collect()
    }

    /// Case-insensitive substring match on name or description.
    pub fn search(&self, query: &str) -> Vec<Package> {
        if query.is_empty() {
            return Vec::new();
        }
        let needle = query.to_lowercase();
        self.filtered(|p| {
            p.name.to_lowercase().contains(&needle)
                || p.description.to_lowercase().contains(&needle)
        })
    }

    pub fn package(&self, name: &str) -> Option<Package> {
        self.find(name).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    fn find(&self, name: &str) -> Option<&Package> {
        self.db.packages().iter().find(|p| p.name == name)
    }

    fn require(&self, name: &str) -> Result<&Package> {
        self.find(name)
            .ok_or_else(|| Error::PackageNotFound(name.to_string()))
    }

    // ============================================================
    // Dependency graph
    // ============================================================

    pub fn dependencies(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.require(name)?.depends.clone())
    }

    pub fn reverse_dependencies(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.require(name)?.required_by.clone())
    }

    /// Map from each package reached within `depth` levels to its direct
    /// dependencies. `depth` 1 holds only `name` itself.
    ///
    /// Dependencies on virtual names (`sh`) are followed through whichever
    /// installed package provides them. Names nothing installed satisfies
    /// appear with an empty list.
    pub fn dependency_tree(&self, name: &str, depth: usize) -> Result<BTreeMap<String, Vec<String>>> {
        self.require(name)?;
        let providers = provider_index(self.db.packages());
        Ok(self.walk(name, depth, |n| {
            providers
                .get(n)
                .map(|p| {
                    p.depends
                        .iter()
                        .map(|d| dependency_name(d).to_string())
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    /// Same walk as [`Inventory::dependency_tree`], over `required_by`.
    pub fn reverse_dependency_tree(
        &self,
        name: &str,
        depth: usize,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        self.require(name)?;
        Ok(self.walk(name, depth, |n| {
            self.find(n).map(|p| p.required_by.clone()).unwrap_or_default()
        }))
    }

    // Breadth-first, so every node is expanded at the shallowest level it
    // occurs and the seen set never hides a reachable subtree.
    fn walk<F>(&self, root: &str, depth: usize, edges: F) -> BTreeMap<String, Vec<String>>
    where
        F: Fn(&str) -> Vec<String>,
    {
        let mut tree = BTreeMap::new();
        if depth == 0 {
            return tree;
        }

        let mut seen = HashSet::from([root.to_string()]);
        let mut queue = VecDeque::from([(root.to_string(), 1)]);

        while let Some((name, level)) = queue.pop_front() {
            let children = edges(&name);
            if level < depth {
                for child in &children {
                    if seen.insert(child.clone()) {
                        queue.push_back((child.clone(), level + 1));
                    }
                }
            }
            tree.insert(name, children);
        }

        tree
    }

    // ============================================================
    // Statistics
    // ============================================================

    pub fn total_count(&self) -> usize {
        self.db.packages().len()
    }

    pub fn explicit_count(&self) -> usize {
        self.db.packages().iter().filter(|p| p.is_explicit()).count()
    }

    pub fn dependency_count(&self) -> usize {
        self.total_count() - self.explicit_count()
    }

    pub fn orphan_count(&self) -> usize {
        self.db.packages().iter().filter(|p| p.is_orphan()).count()
    }

    pub fn total_installed_size(&self) -> i64 {
        self.db.packages().iter().map(|p| p.installed_size).sum()
    }

    /// `(name, installed size)` pairs, largest first.
    pub fn size_by_package(&self) -> Vec<(String, i64)> {
        let mut sizes: Vec<(String, i64)> = self
            .db
            .packages()
            .iter()
            .map(|p| (p.name.clone(), p.installed_size))
            .collect();
        sizes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sizes
    }

    // ============================================================
    // Files
    // ============================================================

    /// Files owned by `name`, as absolute paths.
    pub fn files_of(&self, name: &str) -> Result<Vec<String>> {
        self.require(name)?;
        Ok(self
            .db
            .files(name)?
            .into_iter()
            .map(|f| format!("/{}", f))
            .collect())
    }

    /// The package that owns `path`. Directories shared by several packages
    /// resolve to the first owner in database order.
    pub fn owner_of(&self, path: &str) -> Result<Option<String>> {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            return Ok(None);
        }
        let as_dir = format!("{}/", relative.trim_end_matches('/'));

        for package in self.db.packages() {
            let files = self.db.files(&package.name)?;
            if files.iter().any(|f| f == relative || *f == as_dir) {
                return Ok(Some(package.name.clone()));
            }
        }
        Ok(None)
    }

    // ============================================================
    // Refresh and privileged operations
    // ============================================================

    pub fn refresh(&mut self) -> Result<()> {
        match self.db.reload() {
            Ok(()) => {
                self.last_error = None;
                tracing::debug!("Inventory refreshed, {} packages", self.total_count());
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to refresh package database: {}", e);
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Always rejected: removal runs through the privileged runner.
    pub fn remove_package(&self, name: &str, cascade: bool) -> Result<()> {
        Err(Error::RequiresPrivilege {
            command: commands::remove_packages(&[name.to_string()], cascade),
        })
    }

    /// Always rejected: upgrades run through the privileged runner.
    pub fn update_system(&self) -> Result<()> {
        Err(Error::RequiresPrivilege {
            command: commands::update_system(None),
        })
    }

    /// Always rejected: cache cleaning runs through the privileged runner.
    pub fn clean_cache(&self) -> Result<()> {
        Err(Error::RequiresPrivilege {
            command: commands::clean_cache(),
        })
    }
}

/// Map every name and provided name to the package that satisfies it.
/// A real package name wins over another package's `provides` entry.
fn provider_index(packages: &[Package]) -> HashMap<&str, &Package> {
    let mut index = HashMap::new();
    for package in packages {
        for provided in &package.provides {
            index.entry(dependency_name(provided)).or_insert(package);
        }
    }
    for package in packages {
        index.insert(package.name.as_str(), package);
    }
    index
}

/// Strip a version constraint or optdepend reason: `glibc>=2.38` and
/// `python: for scripts` both give the bare package name.
pub(crate) fn dependency_name(spec: &str) -> &str {
    let end = spec
        .find(|c: char| matches!(c, '<' | '>' | '=' | ':'))
        .unwrap_or(spec.len());
    spec[..end].trim()
}

/// Fill `required_by` and `optional_for` on every package from the
/// `depends` and `optional_depends` of the others.
pub(crate) fn link_reverse_dependencies(packages: &mut [Package]) {
    let mut required_by: HashMap<String, Vec<String>> = HashMap::new();
    let mut optional_for: HashMap<String, Vec<String>> = HashMap::new();

    {
        let providers = provider_index(packages);
        for package in packages.iter() {
            for dep in &package.depends {
                if let Some(target) = providers.get(dependency_name(dep)) {
                    required_by
                        .entry(target.name.clone())
                        .or_default()
                        .push(package.name.clone());
                }
            }
            for dep in &package.optional_depends {
                if let Some(target) = providers.get(dependency_name(dep)) {
                    optional_for
                        .entry(target.name.clone())
                        .or_default()
                        .push(package.name.clone());
                }
            }
        }
    }

    for package in packages.iter_mut() {
        let mut req = required_by.remove(&package.name).unwrap_or_default();
        req.sort();
        req.dedup();
        let mut opt = optional_for.remove(&package.name).unwrap_or_default();
        opt.sort();
        opt.dedup();
        package.required_by = req;
        package.optional_for = opt;
    }
}
