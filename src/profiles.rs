//! Built-in and user-defined package profiles.
//!
//! User profiles live in `profiles.json`. Deleting a built-in profile records
//! its name in `removed_builtin_profiles.json` instead, since built-ins are
//! compiled in and cannot be removed from the binary.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::inventory::{Inventory, LocalDb};
use crate::models::{DeleteOutcome, Profile, ProfileState};

const PROFILES_FILE: &str = "profiles.json";
const TOMBSTONES_FILE: &str = "removed_builtin_profiles.json";

/// Name of the profile built by [`ProfileManager::create_from_installed`].
pub const INSTALLED_PROFILE_NAME: &str = "My Packages";

fn builtin(name: &str, description: &str, packages: &[&str]) -> Profile {
    Profile {
        built_in: true,
        ..Profile::new(
            name,
            description,
            packages.iter().map(|p| p.to_string()).collect(),
        )
    }
}

/// The compiled-in profiles, in display order.
pub fn builtin_profiles() -> Vec<Profile> {
    vec![
        builtin(
            "Base Development",
            "Essential development tools",
            &["base-devel", "git", "make", "cmake", "gcc", "gdb", "valgrind"],
        ),
        builtin(
            "Python Development",
            "Python development environment",
            &[
                "python",
                "python-pip",
                "python-virtualenv",
                "ipython",
                "python-pytest",
                "python-black",
                "python-pylint",
            ],
        ),
        builtin(
            "Web Development",
            "Web development stack",
            &["nodejs", "npm", "yarn", "typescript", "deno"],
        ),
        builtin(
            "Rust Development",
            "Rust development environment",
            &["rust", "cargo", "rustfmt", "rust-analyzer"],
        ),
        builtin(
            "C/C++ Development",
            "C/C++ development tools",
            &["gcc", "clang", "cmake", "ninja", "gdb", "lldb", "clang-tools-extra"],
        ),
        builtin(
            "Container & DevOps",
            "Container and DevOps tools",
            &["docker", "docker-compose", "kubectl", "helm", "terraform"],
        ),
        builtin(
            "Database Tools",
            "Database management tools",
            &["postgresql", "mariadb", "sqlite", "redis", "mongodb"],
        ),
    ]
}

pub struct ProfileManager {
    dir: PathBuf,
    builtins: Vec<Profile>,
    user: Vec<Profile>,
    tombstones: BTreeSet<String>,
}

impl ProfileManager {
    /// Load user profiles and tombstones from `dir`. Missing files mean
    /// "none yet"; unreadable or malformed ones are errors, so a later save
    /// never overwrites data that failed to load.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let user: Vec<Profile> = read_json_array(&dir.join(PROFILES_FILE))?;
        let tombstones: Vec<String> = read_json_array(&dir.join(TOMBSTONES_FILE))?;

        tracing::debug!(
            "Loaded {} user profiles and {} hidden built-ins from {}",
            user.len(),
            tombstones.len(),
            dir.display()
        );

        Ok(Self {
            dir,
            builtins: builtin_profiles(),
            user: user
                .into_iter()
                .map(|p| Profile {
                    built_in: false,
                    ..p
                })
                .collect(),
            tombstones: tombstones.into_iter().collect(),
        })
    }

    // ============================================================
    // Lookup
    // ============================================================

    pub fn lookup(&self, name: &str) -> ProfileState {
        if let Some(p) = self.user.iter().find(|p| p.name == name) {
            return ProfileState::User(p.clone());
        }
        match self.builtins.iter().find(|p| p.name == name) {
            Some(_) if self.tombstones.contains(name) => ProfileState::Tombstoned,
            Some(p) => ProfileState::BuiltIn(p.clone()),
            None => ProfileState::Missing,
        }
    }

    pub fn profile(&self, name: &str) -> Option<Profile> {
        self.lookup(name).effective()
    }

    /// Visible built-ins, then user profiles.
    pub fn all_profiles(&self) -> Vec<Profile> {
        self.builtins
            .iter()
            .filter(|b| matches!(self.lookup(&b.name), ProfileState::BuiltIn(_)))
            .chain(self.user.iter())
            .cloned()
            .collect()
    }

    /// Every compiled-in profile, hidden or not.
    pub fn builtin_profiles(&self) -> &[Profile] {
        &self.builtins
    }

    pub fn user_profiles(&self) -> &[Profile] {
        &self.user
    }

    // ============================================================
    // Changes
    // ============================================================

    /// Insert or replace the user profile named `profile.name`. Saving under
    /// a built-in's name shadows that built-in.
    pub fn save_profile(&mut self, profile: Profile) -> Result<()> {
        if profile.name.trim().is_empty() {
            return Err(Error::ProfileError("Profile name is empty".to_string()));
        }

        let profile = Profile {
            built_in: false,
            ..profile
        };
        match self.user.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => *existing = profile,
            None => self.user.push(profile),
        }
        self.persist_user()
    }

    pub fn delete_profile(&mut self, name: &str) -> Result<DeleteOutcome> {
        match self.lookup(name) {
            ProfileState::User(_) => {
                self.user.retain(|p| p.name != name);
                self.persist_user()?;
                Ok(DeleteOutcome::RemovedUser)
            }
            ProfileState::BuiltIn(_) => {
                self.tombstones.insert(name.to_string());
                self.persist_tombstones()?;
                Ok(DeleteOutcome::Tombstoned)
            }
            ProfileState::Tombstoned | ProfileState::Missing => Ok(DeleteOutcome::NotFound),
        }
    }

    /// Make a deleted built-in visible again. Returns false if `name` was not
    /// hidden.
    pub fn restore_builtin(&mut self, name: &str) -> Result<bool> {
        if !self.tombstones.remove(name) {
            return Ok(false);
        }
        self.persist_tombstones()?;
        Ok(true)
    }

    // ============================================================
    // Installed system
    // ============================================================

    /// A profile listing every explicitly installed package. Not saved.
    pub fn create_from_installed<D: LocalDb>(&self, inventory: &Inventory<D>) -> Profile {
        Profile::new(
            INSTALLED_PROFILE_NAME,
            "Exported from current system",
            inventory
                .explicit_packages()
                .into_iter()
                .map(|p| p.name)
                .collect(),
        )
    }

    /// Packages in `profile` that are not installed, in profile order.
    pub fn missing_packages<D: LocalDb>(
        &self,
        profile: &Profile,
        inventory: &Inventory<D>,
    ) -> Vec<String> {
        profile
            .packages
            .iter()
            .filter(|p| !inventory.exists(p))
            .cloned()
            .collect()
    }

    // ============================================================
    // Files
    // ============================================================

    pub fn export_profile(&self, name: &str, path: &Path) -> Result<()> {
        let profile = self
            .profile(name)
            .ok_or_else(|| Error::ProfileError(format!("No profile named '{}'", name)))?;
        fs::write(path, serde_json::to_string_pretty(&profile)?)?;
        tracing::info!("Exported profile '{}' to {}", name, path.display());
        Ok(())
    }

    /// Import a profile file written by [`ProfileManager::export_profile`]. A
    /// JSON array is accepted too; only its first element is used.
    pub fn import_profile(&mut self, path: &Path) -> Result<Profile> {
        let raw = fs::read_to_string(path)?;
        let doc: serde_json::Value = serde_json::from_str(&raw)?;

        let value = match doc {
            serde_json::Value::Object(_) => doc,
            serde_json::Value::Array(items) => items.into_iter().next().ok_or_else(|| {
                Error::ProfileError("No valid profile found in file".to_string())
            })?,
            _ => {
                return Err(Error::ProfileError(
                    "No valid profile found in file".to_string(),
                ))
            }
        };

        let profile: Profile = serde_json::from_value(value)?;
        if profile.name.is_empty() || profile.packages.is_empty() {
            return Err(Error::ProfileError(
                "Profile has no name or packages".to_string(),
            ));
        }

        self.save_profile(profile.clone())?;
        tracing::info!(
            "Imported profile '{}' with {} packages",
            profile.name,
            profile.packages.len()
        );
        Ok(Profile {
            built_in: false,
            ..profile
        })
    }

    fn persist_user(&self) -> Result<()> {
        write_json(&self.dir.join(PROFILES_FILE), &self.user)
    }

    fn persist_tombstones(&self) -> Result<()> {
        let names: Vec<&String> = self.tombstones.iter().collect();
        write_json(&self.dir.join(TOMBSTONES_FILE), &names)
    }
}

fn read_json_array<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        Error::ProfileError(format!("Failed to parse {}: {}", path.display(), e))
    })
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
