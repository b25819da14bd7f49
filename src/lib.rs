//! Arch Linux package dashboard core.
//!
//! The crate is split along the same lines as the application:
//!
//! - [`inventory`]: read-only queries over the local package database.
//! - [`db`]: SQLite-backed user annotations (notes, tags, keep/review flags).
//! - [`aur`]: asynchronous client for the AUR RPC interface.
//! - [`privileged`]: runs one shell command through `sudo` on a pseudo-terminal.
//! - [`profiles`]: built-in and user-defined package lists.
//!
//! Nothing in here depends on a UI toolkit; front ends receive progress through
//! channels and call back in through plain methods.

pub mod aur;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod inventory;
pub mod models;
pub mod pacman_conf;
pub mod privileged;
pub mod profiles;
pub mod updates;
