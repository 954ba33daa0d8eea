//! Typed view over the binary shortcut store.
//!
//! The store keeps every record as a raw tree node and only converts
//! the one record an operation touches, so unrelated entries are never
//! reparsed, reordered, or renumbered. Fields this subsystem does not
//! interpret ride along in an `extra` bag and are written back
//! verbatim.

use std::path::Path;

use tracing::debug;

use crate::appid::AppId;
use crate::error::{ProvisionError, Result};

use super::{binary, KvMap, KvValue};

/// Top-level key of the shortcut store.
pub const SHORTCUTS_KEY: &str = "shortcuts";

/// Default launch options for newly created shortcuts.
pub const DEFAULT_LAUNCH_OPTIONS: &str = "%command%";

/// One non-Steam shortcut entry.
///
/// Identity for idempotency purposes is the `(app_name, start_dir)`
/// pair; the AppID is a derived value some clients recompute.
#[derive(Debug, Clone, PartialEq)]
pub struct ShortcutRecord {
    pub app_id: AppId,
    pub app_name: String,
    /// Executable target as stored, usually wrapped in quotes.
    pub exe: String,
    /// Start directory as stored, usually wrapped in quotes.
    pub start_dir: String,
    pub launch_options: String,
    pub tags: Vec<String>,
    pub is_hidden: bool,
    pub allow_overlay: bool,
    pub is_installed: bool,
    pub last_play_time: i32,
    /// Passthrough fields (icon, devkit flags, ...) preserved verbatim.
    pub extra: KvMap,
}

impl Default for ShortcutRecord {
    fn default() -> Self {
        Self {
            app_id: AppId::from_signed(0),
            app_name: String::new(),
            exe: String::new(),
            start_dir: String::new(),
            launch_options: DEFAULT_LAUNCH_OPTIONS.to_string(),
            tags: Vec::new(),
            is_hidden: false,
            allow_overlay: true,
            is_installed: true,
            last_play_time: 0,
            extra: default_extra_fields(),
        }
    }
}

/// Fields the client expects on every record but this subsystem never
/// interprets. Present so freshly created records look like
/// client-written ones.
fn default_extra_fields() -> KvMap {
    let mut extra = KvMap::new();
    extra.set("icon", KvValue::Str(String::new()));
    extra.set("ShortcutPath", KvValue::Str(String::new()));
    extra.set("AllowDesktopConfig", KvValue::Int(1));
    extra.set("OpenVR", KvValue::Int(0));
    extra.set("Devkit", KvValue::Int(0));
    extra.set("DevkitGameID", KvValue::Str(String::new()));
    extra.set("DevkitOverrideAppID", KvValue::Int(0));
    extra.set("FlatpakAppID", KvValue::Str(String::new()));
    extra
}

impl ShortcutRecord {
    /// Build a record for `(name, exe, start_dir)` with client-typical
    /// defaults. Paths are stored quoted, matching client convention.
    pub fn new(app_id: AppId, app_name: &str, exe_path: &Path, start_dir: &Path) -> Self {
        Self {
            app_id,
            app_name: app_name.to_string(),
            exe: quote(&exe_path.to_string_lossy()),
            start_dir: quote(&start_dir.to_string_lossy()),
            ..Self::default()
        }
    }

    /// Executable target with surrounding quotes stripped.
    pub fn exe_path(&self) -> &str {
        unquote(&self.exe)
    }

    /// Start directory with surrounding quotes stripped.
    pub fn start_dir_path(&self) -> &str {
        unquote(&self.start_dir)
    }

    pub fn set_exe(&mut self, exe_path: &Path) {
        self.exe = quote(&exe_path.to_string_lossy());
    }

    pub fn set_start_dir(&mut self, start_dir: &Path) {
        self.start_dir = quote(&start_dir.to_string_lossy());
    }

    /// Parse a record from its tree node. Missing fields fall back to
    /// empty/zero values; anything unrecognized lands in `extra`.
    pub fn from_map(map: &KvMap) -> Self {
        let mut record = ShortcutRecord {
            app_id: AppId::from_signed(map.get_int("appid").unwrap_or(0)),
            app_name: map.get_str("AppName").unwrap_or_default().to_string(),
            exe: map.get_str("Exe").unwrap_or_default().to_string(),
            start_dir: map.get_str("StartDir").unwrap_or_default().to_string(),
            launch_options: map
                .get_str("LaunchOptions")
                .unwrap_or_default()
                .to_string(),
            tags: Vec::new(),
            is_hidden: map.get_int("IsHidden").unwrap_or(0) != 0,
            allow_overlay: map.get_int("AllowOverlay").unwrap_or(0) != 0,
            is_installed: map.get_int("IsInstalled").unwrap_or(0) != 0,
            last_play_time: map.get_int("LastPlayTime").unwrap_or(0),
            extra: KvMap::new(),
        };
        if let Some(tags) = map.get_map("tags") {
            record.tags = tags
                .iter()
                .filter_map(|(_, v)| v.as_str().map(str::to_string))
                .collect();
        }
        for (key, value) in map.iter() {
            if !is_known_field(key) {
                record.extra.set(key, value.clone());
            }
        }
        record
    }

    /// Serialize back to a tree node: known fields in client-canonical
    /// order, then the passthrough bag in its original order.
    pub fn to_map(&self) -> KvMap {
        let mut map = KvMap::new();
        map.set("appid", KvValue::Int(self.app_id.signed()));
        map.set("AppName", KvValue::Str(self.app_name.clone()));
        map.set("Exe", KvValue::Str(self.exe.clone()));
        map.set("StartDir", KvValue::Str(self.start_dir.clone()));
        map.set("LaunchOptions", KvValue::Str(self.launch_options.clone()));
        map.set("IsHidden", KvValue::Int(self.is_hidden as i32));
        map.set("AllowOverlay", KvValue::Int(self.allow_overlay as i32));
        map.set("IsInstalled", KvValue::Int(self.is_installed as i32));
        map.set("LastPlayTime", KvValue::Int(self.last_play_time));
        for (key, value) in self.extra.iter() {
            map.set(key, value.clone());
        }
        let mut tags = KvMap::new();
        for (i, tag) in self.tags.iter().enumerate() {
            tags.set(i.to_string(), KvValue::Str(tag.clone()));
        }
        map.set("tags", KvValue::Map(tags));
        map
    }
}

fn is_known_field(key: &str) -> bool {
    matches!(
        key,
        "appid"
            | "AppName"
            | "Exe"
            | "StartDir"
            | "LaunchOptions"
            | "IsHidden"
            | "AllowOverlay"
            | "IsInstalled"
            | "LastPlayTime"
            | "tags"
    )
}

fn quote(s: &str) -> String {
    format!("\"{s}\"")
}

fn unquote(s: &str) -> &str {
    s.trim_matches('"')
}

/// The shortcut store: the binary tree plus record-level operations.
#[derive(Debug, Clone, Default)]
pub struct ShortcutStore {
    tree: KvMap,
}

impl ShortcutStore {
    /// Load from disk; the file must exist.
    pub fn load(path: &Path) -> Result<Self> {
        let tree = binary::load(path)?;
        Ok(Self { tree })
    }

    /// Load from disk, starting empty when the client has never
    /// written a shortcut store.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let tree = binary::load_or_default(path)?;
        Ok(Self { tree })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        binary::save(&self.tree, path)
    }

    pub fn tree(&self) -> &KvMap {
        &self.tree
    }

    fn shortcuts(&self) -> Option<&KvMap> {
        self.tree.get_map(SHORTCUTS_KEY)
    }

    /// Parsed copies of every record, paired with their index key.
    /// Read-only: parsing here never rewrites the underlying nodes.
    pub fn records(&self) -> Vec<(String, ShortcutRecord)> {
        let Some(shortcuts) = self.shortcuts() else {
            return Vec::new();
        };
        shortcuts
            .iter()
            .filter_map(|(index, value)| {
                value
                    .as_map()
                    .map(|m| (index.to_string(), ShortcutRecord::from_map(m)))
            })
            .collect()
    }

    /// Next free sequential index for an appended record.
    pub fn next_index(&self) -> u32 {
        self.shortcuts()
            .map(|s| {
                s.iter()
                    .filter_map(|(k, _)| k.parse::<u32>().ok())
                    .map(|n| n + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// Mutate the first record matching `predicate`, or append a new
    /// one at the next sequential index. Only the touched slot is
    /// rewritten; every other record keeps its node and position.
    ///
    /// Returns the index key of the touched record.
    pub fn upsert<P, M>(&mut self, predicate: P, mutator: M) -> Result<String>
    where
        P: Fn(&ShortcutRecord) -> bool,
        M: FnOnce(&mut ShortcutRecord),
    {
        let existing = self.records().into_iter().find(|(_, r)| predicate(r));
        match existing {
            Some((index, mut record)) => {
                mutator(&mut record);
                let shortcuts = self.tree.ensure_map(SHORTCUTS_KEY);
                shortcuts.set(index.clone(), KvValue::Map(record.to_map()));
                debug!("updated shortcut record in place at index {index}");
                Ok(index)
            }
            None => {
                let index = self.next_index().to_string();
                let mut record = ShortcutRecord::default();
                mutator(&mut record);
                if record.app_name.is_empty() {
                    return Err(ProvisionError::InvalidInput(
                        "shortcut record needs an app name".into(),
                    ));
                }
                let shortcuts = self.tree.ensure_map(SHORTCUTS_KEY);
                shortcuts.set(index.clone(), KvValue::Map(record.to_map()));
                debug!("appended shortcut record at index {index}");
                Ok(index)
            }
        }
    }

    /// Remove every record matching `predicate`. Surviving records
    /// keep their index keys; nothing is renumbered.
    pub fn remove_matching<P>(&mut self, predicate: P) -> usize
    where
        P: Fn(&ShortcutRecord) -> bool,
    {
        let doomed: Vec<String> = self
            .records()
            .into_iter()
            .filter(|(_, r)| predicate(r))
            .map(|(index, _)| index)
            .collect();
        let Some(shortcuts) = self.tree.get_map_mut(SHORTCUTS_KEY) else {
            return 0;
        };
        for index in &doomed {
            shortcuts.remove(index);
        }
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(name: &str, exe: &str, start_dir: &str) -> ShortcutRecord {
        ShortcutRecord::new(
            AppId::from_signed(-42),
            name,
            Path::new(exe),
            Path::new(start_dir),
        )
    }

    #[test]
    fn record_round_trips_through_tree_node() {
        let mut original = record("Tuxborn", "/games/Tuxborn/MO2.exe", "/games/Tuxborn");
        original.tags = vec!["favorite".to_string()];
        let parsed = ShortcutRecord::from_map(&original.to_map());
        assert_eq!(parsed, original);
    }

    #[test]
    fn unknown_fields_pass_through() {
        let mut node = record("Foo", "/x/foo.exe", "/x").to_map();
        node.set("SomeFutureField", KvValue::Str("kept".into()));
        let parsed = ShortcutRecord::from_map(&node);
        assert_eq!(parsed.extra.get_str("SomeFutureField"), Some("kept"));
        let rewritten = parsed.to_map();
        assert_eq!(rewritten.get_str("SomeFutureField"), Some("kept"));
    }

    #[test]
    fn upsert_appends_then_updates_in_place() {
        let mut store = ShortcutStore::default();
        let first = store
            .upsert(
                |r| r.app_name == "Foo" && r.start_dir_path() == "/x",
                |r| *r = record("Foo", "/x/foo.exe", "/x"),
            )
            .unwrap();
        assert_eq!(first, "0");

        // same identity: updated in place, not duplicated
        let second = store
            .upsert(
                |r| r.app_name == "Foo" && r.start_dir_path() == "/x",
                |r| r.set_exe(Path::new("/x/bar.exe")),
            )
            .unwrap();
        assert_eq!(second, "0");
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.records()[0].1.exe_path(), "/x/bar.exe");
    }

    #[test]
    fn upsert_never_renumbers_neighbours() {
        let mut store = ShortcutStore::default();
        for (name, exe) in [("A", "/a/a.exe"), ("B", "/b/b.exe"), ("C", "/c/c.exe")] {
            store
                .upsert(
                    |r| r.app_name == name,
                    |r| *r = record(name, exe, "/same"),
                )
                .unwrap();
        }
        store
            .upsert(
                |r| r.app_name == "B",
                |r| r.launch_options = "PROTON_LOG=1 %command%".into(),
            )
            .unwrap();

        let indices: Vec<String> = store.records().into_iter().map(|(i, _)| i).collect();
        assert_eq!(indices, ["0", "1", "2"]);
        let names: Vec<String> = store
            .records()
            .into_iter()
            .map(|(_, r)| r.app_name)
            .collect();
        assert_eq!(names, ["A", "B", "C"]);
    }

    #[test]
    fn remove_matching_keeps_other_indices() {
        let mut store = ShortcutStore::default();
        for name in ["A", "B", "C"] {
            store
                .upsert(
                    |r| r.app_name == name,
                    |r| *r = record(name, "/e/e.exe", "/e"),
                )
                .unwrap();
        }
        assert_eq!(store.remove_matching(|r| r.app_name == "B"), 1);
        let indices: Vec<String> = store.records().into_iter().map(|(i, _)| i).collect();
        assert_eq!(indices, ["0", "2"]);
        // the free slot is not reused out of order
        assert_eq!(store.next_index(), 3);
    }

    #[test]
    fn raw_sibling_nodes_are_untouched_by_upsert() {
        let mut store = ShortcutStore::default();
        // a hand-written node with fields in a nonstandard order
        let mut odd = KvMap::new();
        odd.set("AppName", KvValue::Str("Odd".into()));
        odd.set("appid", KvValue::Int(7));
        odd.set("Exe", KvValue::Str("\"/odd.exe\"".into()));
        store
            .tree
            .ensure_map(SHORTCUTS_KEY)
            .set("0", KvValue::Map(odd.clone()));

        store
            .upsert(
                |r| r.app_name == "New",
                |r| *r = record("New", "/n/n.exe", "/n"),
            )
            .unwrap();

        assert_eq!(
            store.tree.get_map(SHORTCUTS_KEY).unwrap().get_map("0"),
            Some(&odd)
        );
    }
}
