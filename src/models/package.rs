use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PackageUserData;

/// An installed package as recorded in the local package database.
///
/// `required_by` and `optional_for` are computed against the package set at
/// the time the record was read, so they go stale as soon as another process
/// changes the database. Re-read through the inventory instead of caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub description: String,
    pub url: Option<String>,
    pub packager: Option<String>,
    pub architecture: Option<String>,
    /// Installed size in bytes.
    pub installed_size: i64,
    /// Download (package file) size in bytes.
    pub download_size: i64,
    pub build_date: Option<DateTime<Utc>>,
    pub install_date: Option<DateTime<Utc>>,
    pub install_reason: InstallReason,
    pub groups: Vec<String>,
    pub licenses: Vec<String>,
    pub depends: Vec<String>,
    /// Optional dependencies, `"name: reason"` when the package gives a reason.
    pub optional_depends: Vec<String>,
    /// Installed packages that depend on this one.
    pub required_by: Vec<String>,
    /// Installed packages that list this one as an optional dependency.
    pub optional_for: Vec<String>,
    pub provides: Vec<String>,
    pub conflicts: Vec<String>,
    pub replaces: Vec<String>,
}

/// Why a package was installed.
///
/// - `Explicit`: requested directly by the user
/// - `Dependency`: pulled in to satisfy another package
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallReason {
    #[default]
    Explicit,
    Dependency,
}

impl InstallReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Dependency => "dependency",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "explicit" => Some(Self::Explicit),
            "dependency" => Some(Self::Dependency),
            _ => None,
        }
    }
}

impl Package {
    /// Creates a package with the given identity and every other field empty.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            url: None,
            packager: None,
            architecture: None,
            installed_size: 0,
            download_size: 0,
            build_date: None,
            install_date: None,
            install_reason: InstallReason::Explicit,
            groups: Vec::new(),
            licenses: Vec::new(),
            depends: Vec::new(),
            optional_depends: Vec::new(),
            required_by: Vec::new(),
            optional_for: Vec::new(),
            provides: Vec::new(),
            conflicts: Vec::new(),
            replaces: Vec::new(),
        }
    }

    /// Installed as a dependency, and nothing installed requires it or
    /// optionally wants it.
    pub fn is_orphan(&self) -> bool {
        self.install_reason == InstallReason::Dependency
            && self.required_by.is_empty()
            && self.optional_for.is_empty()
    }

    pub fn is_explicit(&self) -> bool {
        self.install_reason == InstallReason::Explicit
    }

    pub fn formatted_size(&self) -> String {
        format_size(self.installed_size)
    }
}

/// Human-readable byte count, matching pacman's coarse units.
pub fn format_size(bytes: i64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else if b < GB {
        format!("{:.1} MB", b / MB)
    } else {
        format!("{:.2} GB", b / GB)
    }
}

/// A package joined with the user's annotation for it, if any.
///
/// The `package` fields are flattened into the JSON output, with an additional
/// `user_data` object (or `null`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedPackage {
    #[serde(flatten)]
    pub package: Package,
    pub user_data: Option<PackageUserData>,
}

impl AnnotatedPackage {
    pub fn is_marked_keep(&self) -> bool {
        self.user_data.as_ref().is_some_and(|d| d.marked_keep)
    }

    pub fn is_marked_review(&self) -> bool {
        self.user_data.as_ref().is_some_and(|d| d.marked_review)
    }
}
