//! Compatibility-tool mapping operations on the client configuration
//! store.
//!
//! The mapping lives at one nested path inside a file full of sections
//! this subsystem must never touch; all edits go through the tree so
//! everything else passes through verbatim.

use tracing::debug;

use crate::appid::AppId;

use super::{KvMap, KvValue};

/// Fixed priority written for every mapping this subsystem creates.
pub const COMPAT_TOOL_PRIORITY: &str = "250";

/// Top-level section the client wraps its configuration store in.
const STORE_ROOT: &str = "InstallConfigStore";

/// Nested path of the mapping section, relative to the store root.
const MAPPING_PATH: [&str; 4] = ["Software", "Valve", "Steam", "CompatToolMapping"];

/// Client-written files carry the [`STORE_ROOT`] wrapper; trees built
/// from scratch may not. Resolve relative to whichever is present.
fn root_of(tree: &KvMap) -> &KvMap {
    tree.get_map(STORE_ROOT).unwrap_or(tree)
}

fn root_of_mut(tree: &mut KvMap) -> &mut KvMap {
    if tree.get_map(STORE_ROOT).is_some() {
        tree.ensure_map(STORE_ROOT)
    } else {
        tree
    }
}

/// One compatibility-tool mapping entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatToolEntry {
    pub name: String,
    pub config: String,
    pub priority: String,
}

/// Point `app_id` at the runtime named `tool`, creating the mapping
/// section when the client has never written one. An existing entry
/// for the same identifier is overwritten in place.
pub fn set_compat_tool(tree: &mut KvMap, app_id: AppId, tool: &str) {
    let mapping = root_of_mut(tree).ensure_path(&MAPPING_PATH);
    let entry = mapping.ensure_map(&app_id.unsigned().to_string());
    entry.set("name", KvValue::Str(tool.to_string()));
    entry.set("config", KvValue::Str(String::new()));
    entry.set("priority", KvValue::Str(COMPAT_TOOL_PRIORITY.to_string()));
    debug!(
        "mapped AppID {} to compatibility tool {tool}",
        app_id.unsigned()
    );
}

/// Read the mapping entry for `app_id`, if any.
pub fn compat_tool_for(tree: &KvMap, app_id: AppId) -> Option<CompatToolEntry> {
    let key = app_id.unsigned().to_string();
    let mapping = match root_of(tree).get_path(&MAPPING_PATH)? {
        KvValue::Map(m) => m,
        _ => return None,
    };
    let entry = mapping.get_map(&key)?;
    Some(CompatToolEntry {
        name: entry.get_str("name")?.to_string(),
        config: entry.get_str("config").unwrap_or_default().to_string(),
        priority: entry.get_str("priority").unwrap_or_default().to_string(),
    })
}
