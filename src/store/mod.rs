//! Codecs for the Steam client's persisted key-value stores.
//!
//! Two on-disk formats share one in-memory shape: a binary, typed-field
//! format (the shortcut store) and a text, brace-delimited format (the
//! client configuration store). Both are maps of maps; the tree type
//! here preserves entry order so untouched data survives a
//! load-mutate-save cycle exactly.
//!
//! The codecs implement the record shapes this crate needs and carry
//! everything else through verbatim; they are not schema validators.

pub mod binary;
pub mod compat;
pub mod shortcuts;
pub mod text;

pub use compat::{CompatToolEntry, COMPAT_TOOL_PRIORITY};
pub use shortcuts::{ShortcutRecord, ShortcutStore, DEFAULT_LAUNCH_OPTIONS, SHORTCUTS_KEY};

use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::{ProvisionError, Result};

/// A single field value in either store format.
///
/// The text format has no integer type; numeric-looking values stay
/// strings there and only the binary format produces `Int`.
#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
    Str(String),
    Int(i32),
    Map(KvMap),
}

impl KvValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KvValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            KvValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&KvMap> {
        match self {
            KvValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut KvMap> {
        match self {
            KvValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

/// An order-preserving map of string keys to [`KvValue`]s.
///
/// Insertion order is the serialization order. `set` replaces a value
/// in place without moving the entry, so records this subsystem never
/// touches are neither reordered nor renumbered.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KvMap {
    entries: Vec<(String, KvValue)>,
}

impl KvMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KvValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&KvValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut KvValue> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(KvValue::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(KvValue::as_int)
    }

    pub fn get_map(&self, key: &str) -> Option<&KvMap> {
        self.get(key).and_then(KvValue::as_map)
    }

    pub fn get_map_mut(&mut self, key: &str) -> Option<&mut KvMap> {
        self.get_mut(key).and_then(KvValue::as_map_mut)
    }

    /// Replace the value under `key` in place, or append a new entry.
    pub fn set(&mut self, key: impl Into<String>, value: KvValue) {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<KvValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Get the nested map under `key`, creating (or coercing) it if
    /// absent. New entries append; existing entries keep their slot.
    pub fn ensure_map(&mut self, key: &str) -> &mut KvMap {
        let idx = match self.entries.iter().position(|(k, _)| k == key) {
            Some(idx) => idx,
            None => {
                self.entries
                    .push((key.to_owned(), KvValue::Map(KvMap::new())));
                self.entries.len() - 1
            }
        };
        let slot = &mut self.entries[idx].1;
        if !matches!(slot, KvValue::Map(_)) {
            *slot = KvValue::Map(KvMap::new());
        }
        match slot {
            KvValue::Map(map) => map,
            _ => unreachable!("slot was just coerced to a map"),
        }
    }

    /// Follow a path of nested map keys.
    pub fn get_path(&self, path: &[&str]) -> Option<&KvValue> {
        let (first, rest) = path.split_first()?;
        let value = self.get(first)?;
        if rest.is_empty() {
            return Some(value);
        }
        value.as_map()?.get_path(rest)
    }

    /// Follow a path of nested map keys, creating maps along the way.
    pub fn ensure_path(&mut self, path: &[&str]) -> &mut KvMap {
        let mut current = self;
        for key in path {
            current = current.ensure_map(key);
        }
        current
    }
}

/// Write `bytes` to `path` via a temporary file in the same directory
/// followed by an atomic rename, so no reader ever observes a partial
/// store. The previous file, when present, is kept as a timestamped
/// backup next to the original.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| ProvisionError::InvalidInput(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| ProvisionError::io(dir, e))?;

    if path.exists() {
        let backup = backup_path(path);
        std::fs::copy(path, &backup).map_err(|e| ProvisionError::io(&backup, e))?;
        debug!("created backup: {}", backup.display());
    }

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ProvisionError::io(dir, e))?;
    tmp.write_all(bytes)
        .map_err(|e| ProvisionError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| ProvisionError::io(path, e.error))?;
    Ok(())
}

fn backup_path(path: &Path) -> std::path::PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    path.with_file_name(format!(
        "{name}.backup_{}",
        chrono::Utc::now().timestamp()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn set_replaces_in_place_without_reordering() {
        let mut map = KvMap::new();
        map.set("a", KvValue::Str("1".into()));
        map.set("b", KvValue::Str("2".into()));
        map.set("c", KvValue::Str("3".into()));
        map.set("b", KvValue::Str("two".into()));

        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(map.get_str("b"), Some("two"));
    }

    #[test]
    fn ensure_path_creates_nested_maps() {
        let mut map = KvMap::new();
        map.ensure_path(&["Software", "Valve", "Steam"])
            .set("k", KvValue::Str("v".into()));
        assert_eq!(
            map.get_path(&["Software", "Valve", "Steam", "k"])
                .and_then(KvValue::as_str),
            Some("v")
        );
    }

    #[test]
    fn write_atomic_keeps_a_backup() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("store.vdf");
        write_atomic(&target, b"first").unwrap();
        write_atomic(&target, b"second").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"second");
        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("backup_"))
            .collect();
        assert_eq!(backups.len(), 1);
    }
}
