use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A package record from the AUR RPC interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AurPackage {
    pub name: String,
    pub version: String,
    pub description: String,
    pub url: Option<String>,
    /// `None` means the package is orphaned on the AUR.
    pub maintainer: Option<String>,
    pub package_base: String,
    pub num_votes: i64,
    pub popularity: f64,
    pub first_submitted: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    /// When the package was flagged out of date, if it is.
    pub out_of_date: Option<DateTime<Utc>>,
    pub depends: Vec<String>,
    pub make_depends: Vec<String>,
    pub opt_depends: Vec<String>,
    pub conflicts: Vec<String>,
    pub provides: Vec<String>,
    pub replaces: Vec<String>,
    pub keywords: Vec<String>,
    pub licenses: Vec<String>,
}

impl AurPackage {
    pub fn is_out_of_date(&self) -> bool {
        self.out_of_date.is_some()
    }

    /// The package's page on the AUR website.
    pub fn aur_url(&self) -> String {
        format!("https://aur.archlinux.org/packages/{}", self.name)
    }
}
