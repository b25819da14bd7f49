//! Shell commands handed to the privileged runner.
//!
//! Every command here runs inside `sudo bash -c`, so none of them carry their
//! own `sudo` prefix. Package names and paths always go through
//! [`shell_quote`].

use std::path::Path;

/// AUR helpers, in order of preference.
pub const AUR_HELPERS: &[&str] = &["yay", "paru"];

/// Quote `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn quoted(names: &[String]) -> String {
    names
        .iter()
        .map(|n| shell_quote(n))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `cascade` also removes dependencies nothing else needs and skips saving
/// `.pacsave` files.
pub fn remove_packages(names: &[String], cascade: bool) -> String {
    let flags = if cascade { "-Rns" } else { "-R" };
    format!("pacman {} --noconfirm {}", flags, quoted(names))
}

pub fn remove_orphans(names: &[String]) -> String {
    remove_packages(names, true)
}

/// Remove cached package files for packages no longer installed.
pub fn clean_cache() -> String {
    "pacman -Sc --noconfirm".to_string()
}

/// Keep only the newest `keep` cached versions of each package.
pub fn prune_cache(keep: u32) -> String {
    format!("paccache -rk{}", keep)
}

pub fn sync_databases() -> String {
    "pacman -Sy".to_string()
}

/// Full system upgrade. With an AUR helper, it upgrades repo and AUR
/// packages together. The helper runs as the invoking user, since both yay
/// and paru refuse to build as root.
pub fn update_system(aur_helper: Option<&str>) -> String {
    match aur_helper {
        Some(helper) => format!("{} {} -Syu", as_invoking_user(), helper),
        None => "pacman -Syu".to_string(),
    }
}

pub fn install_packages(names: &[String]) -> String {
    format!("pacman -S --needed --noconfirm {}", quoted(names))
}

/// Upgrade only the given repo packages.
pub fn update_packages(names: &[String]) -> String {
    format!("pacman -S --noconfirm {}", quoted(names))
}

/// Upgrade only the given AUR packages through `helper`.
pub fn update_aur_packages(helper: &str, names: &[String]) -> String {
    format!(
        "{} {} -S --noconfirm {}",
        as_invoking_user(),
        helper,
        quoted(names)
    )
}

pub fn refresh_keyrings() -> String {
    "pacman-key --refresh-keys && pacman-key --populate archlinux".to_string()
}

/// Delete a stale `db.lck`. Only safe when no pacman process is running.
pub fn remove_db_lock(db_path: &Path) -> String {
    format!(
        "rm -f {}",
        shell_quote(&db_path.join("db.lck").to_string_lossy())
    )
}

/// Review `.pacnew` and `.pacsave` files with a plain unified diff, which
/// works inside the runner's pseudo-terminal.
pub fn merge_pacnew() -> String {
    "DIFFPROG='diff -u' pacdiff".to_string()
}

/// Copy `source` over `dest` as a root-owned 0644 file.
pub fn install_file(source: &Path, dest: &Path) -> String {
    format!(
        "install -m644 {} {}",
        shell_quote(&source.to_string_lossy()),
        shell_quote(&dest.to_string_lossy())
    )
}

fn as_invoking_user() -> &'static str {
    r#"sudo -u "$SUDO_USER""#
}

/// The first AUR helper found on `path_env` (a `PATH`-style list).
pub fn detect_aur_helper(path_env: &str) -> Option<&'static str> {
    AUR_HELPERS
        .iter()
        .copied()
        .find(|helper| find_executable(path_env, helper))
}

fn find_executable(path_env: &str, name: &str) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path_env
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(name))
        .any(|candidate| {
            candidate
                .metadata()
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        })
}
