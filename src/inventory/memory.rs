use std::collections::HashMap;

use super::{link_reverse_dependencies, LocalDb};
use crate::error::{Error, Result};
use crate::models::Package;

/// A fixed package set held in memory.
///
/// Reverse dependencies are computed on construction, so callers only need to
/// fill in `depends` and `optional_depends`.
#[derive(Debug, Clone, Default)]
pub struct MemoryDb {
    packages: Vec<Package>,
    files: HashMap<String, Vec<String>>,
}

impl MemoryDb {
    pub fn new(mut packages: Vec<Package>) -> Self {
        link_reverse_dependencies(&mut packages);
        Self {
            packages,
            files: HashMap::new(),
        }
    }

    /// Attach a file list, in pacman's relative form (`usr/bin/vim`).
    pub fn with_files(mut self, name: &str, files: &[&str]) -> Self {
        self.files.insert(
            name.to_string(),
            files.iter().map(|f| f.to_string()).collect(),
        );
        self
    }
}

impl LocalDb for MemoryDb {
    fn packages(&self) -> &[Package] {
        &self.packages
    }

    fn files(&self, name: &str) -> Result<Vec<String>> {
        if !self.packages.iter().any(|p| p.name == name) {
            return Err(Error::PackageNotFound(name.to_string()));
        }
        Ok(self.files.get(name).cloned().unwrap_or_default())
    }

    fn reload(&mut self) -> Result<()> {
        link_reverse_dependencies(&mut self.packages);
        Ok(())
    }
}
