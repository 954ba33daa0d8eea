//! Binary key-value store codec.
//!
//! Sequential typed-field format: each entry is a type marker, a
//! NUL-terminated key, and a payload. `0x00` opens a nested map,
//! `0x01` is a NUL-terminated UTF-8 string, `0x02` a little-endian
//! signed 32-bit integer, and `0x08` terminates the enclosing map.
//! The file as a whole is one map body, including the final terminator.

use std::path::Path;

use crate::error::{ProvisionError, Result};

use super::{write_atomic, KvMap, KvValue};

const TYPE_MAP: u8 = 0x00;
const TYPE_STRING: u8 = 0x01;
const TYPE_INT: u8 = 0x02;
const TYPE_END: u8 = 0x08;

/// Load a binary store, failing with `NotFound` when the file is
/// absent and `Format` when it cannot be decoded.
pub fn load(path: &Path) -> Result<KvMap> {
    if !path.exists() {
        return Err(ProvisionError::not_found(format!(
            "binary store {}",
            path.display()
        )));
    }
    let bytes = std::fs::read(path).map_err(|e| ProvisionError::io(path, e))?;
    parse(&bytes, path)
}

/// Load a binary store, treating an absent file as an empty tree.
pub fn load_or_default(path: &Path) -> Result<KvMap> {
    if !path.exists() {
        return Ok(KvMap::new());
    }
    load(path)
}

/// Serialize and atomically replace the store at `path`.
pub fn save(tree: &KvMap, path: &Path) -> Result<()> {
    write_atomic(path, &serialize(tree))
}

/// Decode a binary store image.
pub fn parse(bytes: &[u8], origin: &Path) -> Result<KvMap> {
    let mut cursor = Cursor {
        buf: bytes,
        pos: 0,
        origin,
    };
    let tree = parse_map(&mut cursor)?;
    if cursor.pos != bytes.len() {
        return Err(cursor.format_error(format!(
            "{} trailing bytes after top-level terminator",
            bytes.len() - cursor.pos
        )));
    }
    Ok(tree)
}

/// Encode a tree in the binary wire format.
pub fn serialize(tree: &KvMap) -> Vec<u8> {
    let mut out = Vec::new();
    write_map(&mut out, tree);
    out
}

fn write_map(out: &mut Vec<u8>, map: &KvMap) {
    for (key, value) in map.iter() {
        match value {
            KvValue::Map(nested) => {
                out.push(TYPE_MAP);
                write_cstr(out, key);
                write_map(out, nested);
            }
            KvValue::Str(s) => {
                out.push(TYPE_STRING);
                write_cstr(out, key);
                write_cstr(out, s);
            }
            KvValue::Int(n) => {
                out.push(TYPE_INT);
                write_cstr(out, key);
                out.extend_from_slice(&n.to_le_bytes());
            }
        }
    }
    out.push(TYPE_END);
}

fn write_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    origin: &'a Path,
}

impl Cursor<'_> {
    fn format_error(&self, detail: impl Into<String>) -> ProvisionError {
        ProvisionError::Format {
            path: self.origin.to_path_buf(),
            detail: detail.into(),
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| self.format_error("unexpected end of data"))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let end = self.pos + 4;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| self.format_error("truncated integer field"))?;
        self.pos = end;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(slice);
        Ok(i32::from_le_bytes(raw))
    }

    fn read_cstr(&mut self) -> Result<String> {
        let start = self.pos;
        let nul = self.buf[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.format_error("unterminated string"))?;
        let bytes = &self.buf[start..start + nul];
        self.pos = start + nul + 1;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| self.format_error(format!("invalid UTF-8 at offset {start}")))
    }
}

fn parse_map(cursor: &mut Cursor<'_>) -> Result<KvMap> {
    let mut map = KvMap::new();
    loop {
        let marker = cursor.read_u8()?;
        if marker == TYPE_END {
            return Ok(map);
        }
        let key = cursor.read_cstr()?;
        let value = match marker {
            TYPE_MAP => KvValue::Map(parse_map(cursor)?),
            TYPE_STRING => KvValue::Str(cursor.read_cstr()?),
            TYPE_INT => KvValue::Int(cursor.read_i32()?),
            other => {
                return Err(cursor.format_error(format!(
                    "unknown field type 0x{other:02x} at offset {}",
                    cursor.pos - 1
                )))
            }
        };
        map.set(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample_tree() -> KvMap {
        let mut record = KvMap::new();
        record.set("appid", KvValue::Int(-1_480_407_418));
        record.set("AppName", KvValue::Str("Tuxborn".into()));
        record.set("Exe", KvValue::Str("\"/games/Tuxborn/MO2.exe\"".into()));
        let mut tags = KvMap::new();
        tags.set("0", KvValue::Str("favorite".into()));
        record.set("tags", KvValue::Map(tags));

        let mut shortcuts = KvMap::new();
        shortcuts.set("0", KvValue::Map(record));
        let mut root = KvMap::new();
        root.set("shortcuts", KvValue::Map(shortcuts));
        root
    }

    #[test]
    fn round_trip_preserves_tree() {
        let tree = sample_tree();
        let bytes = serialize(&tree);
        let parsed = parse(&bytes, Path::new("<memory>")).unwrap();
        assert_eq!(parsed, tree);
    }

    #[test]
    fn round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shortcuts.vdf");
        let tree = sample_tree();
        save(&tree, &path).unwrap();
        assert_eq!(load(&path).unwrap(), tree);
    }

    #[test]
    fn negative_int_survives() {
        let tree = sample_tree();
        let parsed = parse(&serialize(&tree), Path::new("<memory>")).unwrap();
        let record = parsed
            .get_map("shortcuts")
            .and_then(|s| s.get_map("0"))
            .unwrap();
        assert_eq!(record.get_int("appid"), Some(-1_480_407_418));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = load(&dir.path().join("absent.vdf")).unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound { .. }));
    }

    #[test]
    fn unknown_type_marker_is_a_format_error() {
        let mut bytes = Vec::new();
        bytes.push(0x07);
        bytes.extend_from_slice(b"key\0");
        bytes.push(TYPE_END);
        let err = parse(&bytes, Path::new("<memory>")).unwrap_err();
        assert!(matches!(err, ProvisionError::Format { .. }));
    }

    #[test]
    fn truncated_input_is_a_format_error() {
        let tree = sample_tree();
        let mut bytes = serialize(&tree);
        bytes.truncate(bytes.len() - 3);
        let err = parse(&bytes, Path::new("<memory>")).unwrap_err();
        assert!(matches!(err, ProvisionError::Format { .. }));
    }

    #[test]
    fn trailing_garbage_is_a_format_error() {
        let mut bytes = serialize(&sample_tree());
        bytes.extend_from_slice(b"junk");
        let err = parse(&bytes, Path::new("<memory>")).unwrap_err();
        assert!(matches!(err, ProvisionError::Format { .. }));
    }
}
