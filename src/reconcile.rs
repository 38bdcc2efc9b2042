//! Line-set reconciliation for persistent host files
//!
//! Sysctl settings and crontab entries are kept as sets of lines: the
//! desired lines are merged into what is already there instead of being
//! appended blindly, so re-running provisioning never duplicates them.
//! Unrelated lines keep their position.

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

/// Outcome of a reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// New file content
    pub content: String,
    /// Whether the content differs from the input
    pub changed: bool,
}

fn join(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// Merge `desired` into `existing`
///
/// Lines already present stay where they are; repeated copies of a desired
/// line collapse to the first one; missing desired lines are appended in
/// order. Unrelated lines are untouched.
pub fn merge_lines(existing: &str, desired: &[String]) -> Reconciled {
    let wanted: HashSet<&str> = desired.iter().map(|s| s.trim()).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<String> = Vec::new();

    for line in existing.lines() {
        let trimmed = line.trim();
        if wanted.contains(trimmed) {
            if seen.insert(trimmed.to_string()) {
                out.push(line.to_string());
            }
        } else {
            out.push(line.to_string());
        }
    }

    for line in desired {
        if seen.insert(line.trim().to_string()) {
            out.push(line.clone());
        }
    }

    let content = join(&out);
    let changed = content != existing;
    Reconciled { content, changed }
}

/// Ensure a single scheduler entry, leaving every other line in place
///
/// Lines claimed by `owned` other than `entry` are dropped, and repeated
/// copies of `entry` collapse to the first one. `env_line` (`KEY=value`) is
/// added only when no line assigns `KEY` yet; in that case the entry is
/// placed right after it at the end, so it never shifts the environment of
/// existing lines.
pub fn ensure_entry<F>(existing: &str, env_line: &str, entry: &str, owned: F) -> Reconciled
where
    F: Fn(&str) -> bool,
{
    let key = env_line.split_once('=').map_or(env_line, |(k, _)| k).trim();
    let assigns_key = |line: &str| line.split_once('=').is_some_and(|(k, _)| k.trim() == key);
    let has_env = existing.lines().any(|line| assigns_key(line.trim()));

    let mut placed = false;
    let mut out: Vec<String> = Vec::new();
    for line in existing.lines() {
        let trimmed = line.trim();
        if trimmed == entry.trim() {
            if has_env && !placed {
                out.push(line.to_string());
                placed = true;
            }
        } else if !owned(trimmed) {
            out.push(line.to_string());
        }
    }

    if !has_env {
        out.push(env_line.to_string());
    }
    if !placed {
        out.push(entry.to_string());
    }

    let content = join(&out);
    let changed = content != existing;
    Reconciled { content, changed }
}

/// Merge desired lines into a file, creating it if needed
///
/// Returns whether the file was rewritten.
pub fn merge_file(path: &Path, desired: &[String]) -> Result<bool> {
    let existing = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(Error::Io(e)),
    };

    let result = merge_lines(&existing, desired);
    if result.changed {
        fs::write(path, &result.content)?;
    }

    Ok(result.changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_merge_appends_missing() {
        let existing = "# sysctl\nvm.swappiness = 10\n";
        let desired = lines(&["net.ipv6.conf.bridge101.disable_ipv6 = 1"]);
        let result = merge_lines(existing, &desired);

        assert!(result.changed);
        assert_eq!(
            result.content,
            "# sysctl\nvm.swappiness = 10\nnet.ipv6.conf.bridge101.disable_ipv6 = 1\n"
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let desired = lines(&[
            "net.ipv6.conf.bridge101.disable_ipv6 = 1",
            "net.ipv6.conf.bridge102.disable_ipv6 = 1",
        ]);
        let first = merge_lines("", &desired);
        let second = merge_lines(&first.content, &desired);

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(first.content, second.content);
    }

    #[test]
    fn test_merge_collapses_duplicates() {
        let existing = "\
net.ipv6.conf.bridge101.disable_ipv6 = 1
vm.swappiness = 10
net.ipv6.conf.bridge101.disable_ipv6 = 1
";
        let desired = lines(&["net.ipv6.conf.bridge101.disable_ipv6 = 1"]);
        let result = merge_lines(existing, &desired);

        assert_eq!(
            result.content,
            "net.ipv6.conf.bridge101.disable_ipv6 = 1\nvm.swappiness = 10\n"
        );
    }

    const PATH: &str = "PATH=/sbin:/bin:/usr/sbin:/usr/bin";
    const ENTRY: &str = "* * * * * /provision/delete_bridge_macs.sh";

    fn ours(line: &str) -> bool {
        !line.starts_with('#') && line.ends_with("/provision/delete_bridge_macs.sh")
    }

    #[test]
    fn test_ensure_entry_empty_table() {
        let result = ensure_entry("", PATH, ENTRY, ours);
        assert!(result.changed);
        assert_eq!(result.content, format!("{}\n{}\n", PATH, ENTRY));

        let again = ensure_entry(&result.content, PATH, ENTRY, ours);
        assert!(!again.changed);
    }

    #[test]
    fn test_ensure_entry_keeps_jobs_after_block() {
        let existing = "\
PATH=/sbin:/bin:/usr/sbin:/usr/bin
* * * * * /provision/delete_bridge_macs.sh
0 3 * * * backup.sh
";
        let result = ensure_entry(existing, PATH, ENTRY, ours);
        assert!(!result.changed);
        assert_eq!(result.content, existing);
    }

    #[test]
    fn test_ensure_entry_replaces_old_schedule_in_place() {
        let existing = "\
MAILTO=root
PATH=/sbin:/bin:/usr/sbin:/usr/bin
*/5 * * * * /provision/delete_bridge_macs.sh
0 3 * * * backup.sh
* * * * * /provision/delete_bridge_macs.sh
";
        let result = ensure_entry(existing, PATH, ENTRY, ours);
        assert_eq!(
            result.content,
            "\
MAILTO=root
PATH=/sbin:/bin:/usr/sbin:/usr/bin
0 3 * * * backup.sh
* * * * * /provision/delete_bridge_macs.sh
"
        );
    }

    #[test]
    fn test_ensure_entry_respects_user_path() {
        let existing = "PATH=/usr/local/bin:/usr/bin:/bin\n0 3 * * * backup.sh\n";
        let result = ensure_entry(existing, PATH, ENTRY, ours);

        assert_eq!(
            result.content,
            "PATH=/usr/local/bin:/usr/bin:/bin\n0 3 * * * backup.sh\n* * * * * /provision/delete_bridge_macs.sh\n"
        );
        assert_eq!(result.content.matches("PATH=").count(), 1);
    }

    #[test]
    fn test_ensure_entry_collapses_duplicates() {
        let existing = format!("{}\n{}\n{}\n", PATH, ENTRY, ENTRY);
        let result = ensure_entry(&existing, PATH, ENTRY, ours);
        assert_eq!(result.content, format!("{}\n{}\n", PATH, ENTRY));
    }

    #[test]
    fn test_merge_file_creates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sysctl.conf");
        let desired = lines(&["net.ipv6.conf.bridge101.disable_ipv6 = 1"]);

        assert!(merge_file(&path, &desired).unwrap());
        assert!(!merge_file(&path, &desired).unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "net.ipv6.conf.bridge101.disable_ipv6 = 1\n"
        );
    }
}
