//! Domain models for archmaster.
//!
//! # Core Concepts
//!
//! ## Read from the system
//!
//! - [`Package`]: An installed package as recorded in the local package database.
//!   Never modified here; changes go through pacman via the privileged runner.
//! - [`AurPackage`]: A package record returned by the AUR RPC interface.
//! - [`UpdateInfo`]: One pending upgrade, from the repos or the AUR.
//!
//! ## Owned by the user
//!
//! - [`PackageUserData`]: Notes, tags and keep/review flags keyed by package name.
//!   Outlives the package itself; removing a package does not remove its notes.
//! - [`Profile`]: A named list of packages, either compiled in or user-defined.
//!
//! [`AnnotatedPackage`] joins the two worlds at display time.

mod annotation;
mod aur;
mod package;
mod profile;
mod update;

pub use annotation::*;
pub use aur::*;
pub use package::*;
pub use profile::*;
pub use update::*;
