use serde::{Deserialize, Serialize};

/// A named list of packages that can be installed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub packages: Vec<String>,
    /// Compiled-in profiles are never written to the profiles file.
    #[serde(default, skip_serializing)]
    pub built_in: bool,
}

impl Profile {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        packages: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            packages,
            built_in: false,
        }
    }
}

/// What a profile name currently resolves to.
///
/// - `User`: a user profile with this name exists (it shadows any built-in)
/// - `BuiltIn`: only the compiled-in profile exists and it has not been hidden
/// - `Tombstoned`: the compiled-in profile was deleted by the user
/// - `Missing`: no profile of any kind has this name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileState {
    User(Profile),
    BuiltIn(Profile),
    Tombstoned,
    Missing,
}

impl ProfileState {
    /// The profile that should be shown for this name, if any.
    pub fn effective(self) -> Option<Profile> {
        match self {
            Self::User(p) | Self::BuiltIn(p) => Some(p),
            Self::Tombstoned | Self::Missing => None,
        }
    }
}

/// Result of deleting a profile by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// A user profile was removed. A built-in of the same name, if any, is
    /// visible again.
    RemovedUser,
    /// A built-in profile was hidden.
    Tombstoned,
    NotFound,
}
