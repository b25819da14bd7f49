use serde::{Deserialize, Serialize};

/// Package name fragments that usually mean a security-relevant upgrade.
const SECURITY_SENSITIVE: &[&str] = &["linux", "openssl", "gnutls", "nss", "ca-certificates"];

/// A pending upgrade for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub name: String,
    pub current_version: String,
    pub new_version: String,
    pub is_aur: bool,
    /// Whether the package is included when applying a partial update.
    pub selected: bool,
}

impl UpdateInfo {
    pub fn new(
        name: impl Into<String>,
        current_version: impl Into<String>,
        new_version: impl Into<String>,
        is_aur: bool,
    ) -> Self {
        Self {
            name: name.into(),
            current_version: current_version.into(),
            new_version: new_version.into(),
            is_aur,
            selected: true,
        }
    }

    /// The leading numeric component changed (e.g. 1.9 -> 2.0).
    pub fn is_major_update(&self) -> bool {
        match (
            leading_digits(&self.current_version),
            leading_digits(&self.new_version),
        ) {
            (Some(current), Some(new)) => current != new,
            _ => false,
        }
    }

    /// Heuristic: repo packages whose name touches the kernel or TLS stack.
    pub fn is_security_update(&self) -> bool {
        !self.is_aur && SECURITY_SENSITIVE.iter().any(|s| self.name.contains(s))
    }
}

fn leading_digits(version: &str) -> Option<&str> {
    let end = version
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(version.len());
    (end > 0).then(|| &version[..end])
}
