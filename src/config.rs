//! Session configuration and Steam installation discovery.
//!
//! Everything the catalog and orchestrator need arrives as an explicit
//! value built here — there is no ambient settings object, so a front
//! end can override any path or budget per session and tests can point
//! a whole session at a temporary directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};
use crate::store::text;

/// Offset between the 64-bit account identifier in the login store and
/// the 32-bit form used for userdata directory names.
const STEAMID64_BASE: u64 = 76_561_197_960_265_728;

/// Resolved locations inside a Steam installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteamPaths {
    /// Client root (contains `config/`, `userdata/`, `steamapps/`).
    pub root: PathBuf,
    /// Per-user config directory holding the shortcut store.
    pub user_config: PathBuf,
    /// Library roots, primary first.
    pub library_roots: Vec<PathBuf>,
    /// `compatibilitytools.d` roots, primary first.
    pub compat_tool_roots: Vec<PathBuf>,
}

impl SteamPaths {
    /// Discover the Steam installation and its most recent user.
    ///
    /// Checks the well-known roots in order (native, XDG data dir,
    /// Flatpak) and resolves the active user from the client's own
    /// login store rather than guessing from directory listings.
    pub fn discover() -> Result<Self> {
        for root in candidate_roots() {
            if root.join("config/loginusers.vdf").exists() && root.join("userdata").is_dir() {
                info!("found Steam installation at {}", root.display());
                return Self::from_root(root);
            }
        }
        Err(ProvisionError::not_found(
            "Steam installation (checked ~/.steam/steam, ~/.local/share/Steam, and the Flatpak data dir)",
        ))
    }

    /// Resolve paths under a known client root.
    pub fn from_root(root: PathBuf) -> Result<Self> {
        let user_id = active_user_id(&root)?;
        Ok(Self::with_user(root, user_id))
    }

    /// Resolve paths for an explicit user id (userdata directory name).
    pub fn with_user(root: PathBuf, user_id: u64) -> Self {
        let user_config = root.join("userdata").join(user_id.to_string()).join("config");
        let compat_tools = root.join("compatibilitytools.d");
        Self {
            user_config,
            library_roots: vec![root.clone()],
            compat_tool_roots: vec![compat_tools],
            root,
        }
    }

    /// The binary shortcut store for the resolved user.
    pub fn shortcuts_file(&self) -> PathBuf {
        self.user_config.join("shortcuts.vdf")
    }

    /// The client's text configuration store.
    pub fn client_config_file(&self) -> PathBuf {
        self.root.join("config/config.vdf")
    }

    /// Where compatibility prefixes materialize (primary library).
    pub fn compatdata_dir(&self) -> PathBuf {
        self.primary_library().join("steamapps/compatdata")
    }

    fn primary_library(&self) -> &Path {
        self.library_roots.first().unwrap_or(&self.root)
    }
}

fn candidate_roots() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    vec![
        home.join(".steam/steam"),
        home.join(".local/share/Steam"),
        home.join(".var/app/com.valvesoftware.Steam/.local/share/Steam"),
    ]
}

/// Resolve the most recent user from the login store: the entry marked
/// `MostRecent`, falling back to the highest login timestamp. The
/// 64-bit identifier is converted to the 32-bit userdata form.
fn active_user_id(root: &Path) -> Result<u64> {
    let loginusers = root.join("config/loginusers.vdf");
    let tree = text::load(&loginusers)?;
    let users = tree
        .get_map("users")
        .ok_or_else(|| ProvisionError::not_found(format!("users section in {}", loginusers.display())))?;

    let mut best: Option<(u64, u64)> = None; // (steamid64, timestamp)
    for (steamid64, entry) in users.iter() {
        let Some(entry) = entry.as_map() else {
            continue;
        };
        let Ok(id) = steamid64.parse::<u64>() else {
            continue;
        };
        if entry.get_str("MostRecent") == Some("1") {
            debug!("login store marks {steamid64} as most recent");
            return Ok(id - STEAMID64_BASE);
        }
        let timestamp = entry
            .get_str("Timestamp")
            .and_then(|t| t.parse::<u64>().ok())
            .unwrap_or(0);
        if best.map_or(true, |(_, ts)| timestamp > ts) {
            best = Some((id, timestamp));
        }
    }

    let (id, _) = best.ok_or_else(|| {
        ProvisionError::not_found(format!("a signed-in user in {}", loginusers.display()))
    })?;
    debug!("falling back to highest login timestamp: {id}");
    Ok(id - STEAMID64_BASE)
}

/// What the runtime catalog scans and how it ranks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Library roots whose `steamapps/common` holds official runtimes.
    pub library_roots: Vec<PathBuf>,
    /// Roots holding community runtimes.
    pub compat_tool_roots: Vec<PathBuf>,
    /// Bypass scanning and use exactly this install directory.
    pub forced_runtime: Option<PathBuf>,
    /// Community major version below which the official rolling
    /// pre-release outranks community builds.
    pub community_floor_major: u32,
}

impl CatalogConfig {
    pub fn from_steam(paths: &SteamPaths) -> Self {
        Self {
            library_roots: paths.library_roots.clone(),
            compat_tool_roots: paths.compat_tool_roots.clone(),
            forced_runtime: None,
            community_floor_major: 10,
        }
    }
}

/// Budgets and intervals for the blocking steps of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTuning {
    /// Fixed settle delay after the fire-and-forget runtime trigger.
    pub settle: Duration,
    /// Interval for prefix and identifier polling loops.
    pub poll_interval: Duration,
    /// Prefix initialization budget; `None` sizes it from the storage
    /// the compatdata directory lives on.
    pub prefix_timeout: Option<Duration>,
    /// Budget for resolving the client-assigned identifier.
    pub resolve_timeout: Duration,
    /// Client restart attempts before giving up.
    pub restart_attempts: u32,
    /// Base backoff between restart attempts (scales linearly).
    pub restart_backoff: Duration,
    /// How long to wait for the client to exit during a restart.
    pub restart_exit_timeout: Duration,
    /// Attempts per registry write before surfacing a failure.
    pub registry_attempts: u32,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            prefix_timeout: None,
            resolve_timeout: Duration::from_secs(30),
            restart_attempts: 3,
            restart_backoff: Duration::from_secs(2),
            restart_exit_timeout: Duration::from_secs(60),
            registry_attempts: 3,
        }
    }
}

/// Everything a provisioning session needs, bundled.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub steam: SteamPaths,
    pub catalog: CatalogConfig,
    pub tuning: SessionTuning,
    /// Inert always-succeeds command used as the placeholder target.
    pub placeholder_command: PathBuf,
}

impl ProvisionConfig {
    pub fn new(steam: SteamPaths) -> Self {
        let catalog = CatalogConfig::from_steam(&steam);
        Self {
            steam,
            catalog,
            tuning: SessionTuning::default(),
            placeholder_command: PathBuf::from("/bin/true"),
        }
    }
}
