//! `IgnorePkg` pinning in `pacman.conf`.
//!
//! The functions here only transform text. Writing the result back needs
//! root: stage it with [`stage`] and hand [`write_command`] to the privileged
//! runner.

use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::commands;

/// Every package named on an `IgnorePkg` line, without duplicates.
pub fn ignored_packages(conf: &str) -> Vec<String> {
    let mut ignored: Vec<String> = Vec::new();
    for line in conf.lines() {
        if let Some(value) = ignore_value(line) {
            for name in value.split_whitespace() {
                if !ignored.iter().any(|n| n == name) {
                    ignored.push(name.to_string());
                }
            }
        }
    }
    ignored
}

pub fn is_pinned(conf: &str, name: &str) -> bool {
    ignored_packages(conf).iter().any(|n| n == name)
}

/// Pin `name`. Appends to the first `IgnorePkg` line, or adds one at the end
/// of `[options]`. Returns `None` when the file has no `[options]` section.
pub fn add_ignored(conf: &str, name: &str) -> Option<String> {
    if is_pinned(conf, name) {
        return Some(conf.to_string());
    }

    let mut lines: Vec<String> = conf.lines().map(str::to_string).collect();

    if let Some(index) = lines.iter().position(|l| ignore_value(l).is_some()) {
        let line = &lines[index];
        let value = ignore_value(line).unwrap_or_default();
        let prefix = line[..line.len() - value.len()].trim_end();
        let updated = match value.trim() {
            "" => format!("{} {}", prefix, name),
            existing => format!("{} {} {}", prefix, existing, name),
        };
        lines[index] = updated;
        return Some(rejoin(conf, lines));
    }

    let start = lines.iter().position(|l| l.trim() == "[options]")?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| l.trim_start().starts_with('['))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());
    let insert_at = lines[start + 1..end]
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map(|offset| start + 1 + offset + 1)
        .unwrap_or(start + 1);

    lines.insert(insert_at, format!("IgnorePkg = {}", name));
    Some(rejoin(conf, lines))
}

/// Unpin `name` from every `IgnorePkg` line. Lines left empty stay in place
/// as `IgnorePkg =`.
pub fn remove_ignored(conf: &str, name: &str) -> String {
    if !is_pinned(conf, name) {
        return conf.to_string();
    }

    let lines = conf
        .lines()
        .map(|line| match ignore_value(line) {
            Some(value) => {
                let prefix = &line[..line.len() - value.len()];
                let kept: Vec<&str> = value.split_whitespace().filter(|n| *n != name).collect();
                if kept.is_empty() {
                    prefix.trim_end().to_string()
                } else {
                    format!("{}{}", prefix, kept.join(" "))
                }
            }
            None => line.to_string(),
        })
        .collect();

    rejoin(conf, lines)
}

/// Write `content` to a fresh temporary file, readable only by the current
/// user, for [`write_command`]. The file is removed when the returned handle
/// drops, so keep it until the command has run.
pub fn stage(content: &str) -> io::Result<NamedTempFile> {
    let mut staged = tempfile::Builder::new()
        .prefix("archmaster-pacman.conf.")
        .tempfile()?;
    staged.write_all(content.as_bytes())?;
    staged.as_file().sync_all()?;
    Ok(staged)
}

/// Command that installs a staged file over the live `pacman.conf`.
pub fn write_command(staged: &Path, conf_path: &Path) -> String {
    commands::install_file(staged, conf_path)
}

/// The text after `IgnorePkg =` on an active (uncommented) line.
fn ignore_value(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("IgnorePkg")?;
    let rest = rest.trim_start().strip_prefix('=')?;
    Some(rest.trim_start())
}

fn rejoin(original: &str, lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    if original.ends_with('\n') {
        out.push('\n');
    }
    out
}
