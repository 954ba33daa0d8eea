//! Detection of shortcut records that would collide with a new
//! registration.
//!
//! Detection only: a matching record may carry user customizations
//! (launch options, tags, artwork references) this subsystem cannot
//! reconstruct, so the Replace / Skip / Abort decision is always
//! delegated to the caller.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::{ShortcutRecord, ShortcutStore};

/// A pre-existing record that collides with a requested registration.
#[derive(Debug, Clone, PartialEq)]
pub struct ShortcutConflict {
    /// Index key of the record inside the store.
    pub index: String,
    pub record: ShortcutRecord,
}

/// Caller's decision for a detected conflict set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Discard the conflicting records and register fresh.
    Replace,
    /// Leave the store untouched and end the session.
    Skip,
    /// Treat the collision as a hard stop.
    Abort,
}

/// Find every record whose name matches exactly and whose executable
/// or start directory also matches. An empty result means the
/// registration is collision-free.
pub fn find_conflicts(
    store: &ShortcutStore,
    app_name: &str,
    exe_path: &str,
    start_dir: &str,
) -> Vec<ShortcutConflict> {
    let exe = normalize(exe_path);
    let dir = normalize(start_dir);

    let conflicts: Vec<ShortcutConflict> = store
        .records()
        .into_iter()
        .filter(|(_, record)| {
            record.app_name == app_name
                && (normalize(record.exe_path()) == exe || normalize(record.start_dir_path()) == dir)
        })
        .map(|(index, record)| ShortcutConflict { index, record })
        .collect();

    if !conflicts.is_empty() {
        debug!(
            "found {} conflicting record(s) for shortcut {app_name:?}",
            conflicts.len()
        );
    }
    conflicts
}

/// Human-readable summary front ends can show before asking for a
/// resolution.
pub fn summarize_conflicts(app_name: &str, conflicts: &[ShortcutConflict]) -> String {
    let mut out = format!(
        "Found {} existing shortcut(s) named {app_name:?}:\n",
        conflicts.len()
    );
    for conflict in conflicts {
        let _ = writeln!(
            out,
            "  [{}] exe: {} (start dir: {})",
            conflict.index,
            conflict.record.exe_path(),
            conflict.record.start_dir_path()
        );
    }
    out.push_str("Replacing discards their settings; skipping leaves them as they are.");
    out
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_matches('"');
    trimmed.strip_suffix('/').unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appid::AppId;
    use std::path::Path;

    fn store_with(records: &[(&str, &str, &str)]) -> ShortcutStore {
        let mut store = ShortcutStore::default();
        for (name, exe, dir) in records {
            store
                .upsert(
                    |r| r.app_name == *name && r.start_dir_path() == *dir,
                    |r| {
                        *r = ShortcutRecord::new(
                            AppId::from_signed(-1),
                            name,
                            Path::new(exe),
                            Path::new(dir),
                        )
                    },
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn same_name_and_start_dir_is_a_conflict() {
        let store = store_with(&[("Foo", "/a/b/foo.exe", "/a/b")]);
        let conflicts = find_conflicts(&store, "Foo", "/elsewhere/foo.exe", "/a/b");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].index, "0");
    }

    #[test]
    fn same_name_different_paths_is_not_a_conflict() {
        let store = store_with(&[("Foo", "/a/b/foo.exe", "/a/b")]);
        let conflicts = find_conflicts(&store, "Foo", "/a/c/foo.exe", "/a/c");
        assert!(conflicts.is_empty());
    }

    #[test]
    fn name_match_alone_is_not_a_conflict() {
        let store = store_with(&[("Foo", "/a/b/foo.exe", "/a/b")]);
        assert!(find_conflicts(&store, "Bar", "/a/b/foo.exe", "/a/b").is_empty());
    }

    #[test]
    fn exe_match_with_same_name_is_a_conflict() {
        let store = store_with(&[("Foo", "/a/b/foo.exe", "/a/b")]);
        let conflicts = find_conflicts(&store, "Foo", "/a/b/foo.exe", "/different");
        assert_eq!(conflicts.len(), 1);
    }

    #[test]
    fn quoting_and_trailing_slashes_do_not_hide_conflicts() {
        let store = store_with(&[("Foo", "/a/b/foo.exe", "/a/b")]);
        let conflicts = find_conflicts(&store, "Foo", "\"/a/b/foo.exe\"", "/a/b/");
        assert_eq!(conflicts.len(), 1);
    }

    #[test]
    fn summary_names_every_colliding_record() {
        let store = store_with(&[("Foo", "/a/b/foo.exe", "/a/b"), ("Foo", "/a/b/foo.exe", "/c")]);
        let conflicts = find_conflicts(&store, "Foo", "/a/b/foo.exe", "/a/b");
        let summary = summarize_conflicts("Foo", &conflicts);
        assert!(summary.contains("2 existing"));
        assert!(summary.contains("/a/b/foo.exe"));
    }
}
