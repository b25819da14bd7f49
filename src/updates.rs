//! Parsers for update listings and the pacman log.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::models::{Package, UpdateInfo};

/// How many entries [`recent_upgrades`] returns at most.
pub const RECENT_UPGRADES_LIMIT: usize = 20;

/// Parse `checkupdates` or `yay -Qua` output: one `name current -> new`
/// entry per line. Lines in any other shape are skipped.
pub fn parse_updates_output(text: &str, is_aur: bool) -> Vec<UpdateInfo> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [name, current, "->", new] => Some(UpdateInfo::new(*name, *current, *new, is_aur)),
                _ => None,
            }
        })
        .collect()
}

/// Package names from `pacman -Qm` or `pacman -Qmq` output, the first field
/// of each line.
pub fn parse_package_names(text: &str) -> BTreeSet<String> {
    text.lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Name to version for the installed packages named in `foreign`, the ones
/// no sync database provides. These are the only candidates for AUR updates.
pub fn foreign_versions(
    installed: impl IntoIterator<Item = Package>,
    foreign: &BTreeSet<String>,
) -> BTreeMap<String, String> {
    installed
        .into_iter()
        .filter(|p| foreign.contains(&p.name))
        .map(|p| (p.name, p.version))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Installed,
    Upgraded,
    Removed,
}

/// One package transaction recorded in `pacman.log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// Local wall-clock time as logged. The UTC offset is dropped.
    pub timestamp: NaiveDateTime,
    pub action: HistoryAction,
    pub package: String,
    pub old_version: Option<String>,
    pub new_version: Option<String>,
}

/// Every install, upgrade and removal in `log_text`, in log order.
pub fn history(log_text: &str) -> Vec<HistoryEntry> {
    log_text.lines().filter_map(parse_log_line).collect()
}

/// Upgrades logged at or after `since`, newest first, at most
/// [`RECENT_UPGRADES_LIMIT`].
pub fn recent_upgrades(log_text: &str, since: NaiveDateTime) -> Vec<HistoryEntry> {
    let mut upgrades: Vec<HistoryEntry> = history(log_text)
        .into_iter()
        .filter(|e| e.action == HistoryAction::Upgraded && e.timestamp >= since)
        .collect();
    upgrades.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    upgrades.truncate(RECENT_UPGRADES_LIMIT);
    upgrades
}

// [2024-03-01T12:30:00+0100] [ALPM] upgraded vim (9.0-1 -> 9.1-1)
fn parse_log_line(line: &str) -> Option<HistoryEntry> {
    let rest = line.strip_prefix('[')?;
    let (stamp, rest) = rest.split_once(']')?;
    let timestamp = NaiveDateTime::parse_from_str(stamp.get(..19)?, "%Y-%m-%dT%H:%M:%S").ok()?;

    let rest = rest.trim_start().strip_prefix("[ALPM] ")?;
    let (action, rest) = rest.split_once(' ')?;
    let action = match action {
        "installed" => HistoryAction::Installed,
        "upgraded" => HistoryAction::Upgraded,
        "removed" => HistoryAction::Removed,
        _ => return None,
    };

    let (package, rest) = rest.split_once(' ')?;
    let versions = rest.trim().strip_prefix('(')?.strip_suffix(')')?;

    let (old_version, new_version) = match action {
        HistoryAction::Upgraded => {
            let (old, new) = versions.split_once(" -> ")?;
            (Some(old.to_string()), Some(new.to_string()))
        }
        HistoryAction::Installed => (None, Some(versions.to_string())),
        HistoryAction::Removed => (Some(versions.to_string()), None),
    };

    Some(HistoryEntry {
        timestamp,
        action,
        package: package.to_string(),
        old_version,
        new_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
[2024-03-01T10:00:00+0100] [PACMAN] Running 'pacman -Syu'
[2024-03-01T10:00:05+0100] [ALPM] upgraded vim (9.0-1 -> 9.1-1)
[2024-03-01T10:00:06+0100] [ALPM] installed ripgrep (14.1.0-1)
[2024-03-02T09:00:00+0100] [ALPM] upgraded linux (6.7.1-1 -> 6.7.2-1)
[2024-03-02T09:00:01+0100] [ALPM] removed nano (7.2-1)
[2024-03-02T09:00:02+0100] [ALPM-SCRIPTLET] upgraded nothing (1 -> 2)
";

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn only_foreign_packages_are_aur_candidates() {
        let foreign = parse_package_names("yay-bin 12.3.5-1\n\nparu 2.0.3-1\n");
        assert_eq!(foreign.len(), 2);

        let installed = ["vim", "yay-bin", "paru", "glibc"].map(|name| Package::new(name, "1.0-1"));
        let candidates = foreign_versions(installed, &foreign);

        assert_eq!(candidates.keys().collect::<Vec<_>>(), vec!["paru", "yay-bin"]);
        assert_eq!(candidates["paru"], "1.0-1");
        assert!(foreign_versions(Vec::new(), &foreign).is_empty());
    }

    #[test]
    fn parses_update_lines_and_skips_noise() {
        let out = "vim 9.0-1 -> 9.1-1\n\n:: Synchronizing...\nlinux 6.7.1-1 -> 6.7.2-1\n";
        let updates = parse_updates_output(out, false);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].name, "vim");
        assert_eq!(updates[0].new_version, "9.1-1");
        assert!(updates[1].is_security_update());
        assert!(updates.iter().all(|u| u.selected && !u.is_aur));
    }

    #[test]
    fn history_reads_all_three_actions() {
        let entries = history(LOG);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].action, HistoryAction::Installed);
        assert_eq!(entries[1].new_version.as_deref(), Some("14.1.0-1"));
        assert_eq!(entries[3].action, HistoryAction::Removed);
        assert_eq!(entries[3].old_version.as_deref(), Some("7.2-1"));
    }

    #[test]
    fn recent_upgrades_are_newest_first_and_cut_off() {
        let all = recent_upgrades(LOG, at("2024-01-01T00:00:00"));
        let names: Vec<&str> = all.iter().map(|e| e.package.as_str()).collect();
        assert_eq!(names, vec!["linux", "vim"]);

        let recent = recent_upgrades(LOG, at("2024-03-02T00:00:00"));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].new_version.as_deref(), Some("6.7.2-1"));
    }

    #[test]
    fn recent_upgrades_are_limited() {
        let log: String = (0..30)
            .map(|i| {
                format!(
                    "[2024-03-01T10:{:02}:00+0000] [ALPM] upgraded pkg{} (1 -> 2)\n",
                    i, i
                )
            })
            .collect();
        let recent = recent_upgrades(&log, at("2024-01-01T00:00:00"));
        assert_eq!(recent.len(), RECENT_UPGRADES_LIMIT);
        assert_eq!(recent[0].package, "pkg29");
    }
}
