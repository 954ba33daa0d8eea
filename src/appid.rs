//! Deterministic AppID derivation for non-Steam shortcut entries.
//!
//! Steam itself assigns shortcut identifiers internally, but external
//! tooling predicts them so the prefix directory and the
//! `steam://rungameid/` launch target can be derived before the client
//! ever sees the shortcut. Two conventions exist in the wild and
//! collaborating tools disagree on which one they expect, so both are
//! kept as named strategies the caller selects explicitly.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// Flag OR-ed into the shifted unsigned AppID to form a rungameid.
const RUN_GAME_FLAG: u64 = 0x0200_0000;

/// How to derive an AppID from an `(app_name, exe_path)` pair.
///
/// Each strategy is internally stable; the two will generally disagree
/// with each other. There is no auto-selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppIdStrategy {
    /// CRC32 over `name + path`, masked to 31 bits and negated.
    Crc32,
    /// MD5 over `name + path`; first 8 hex digits reduced modulo 1e9,
    /// negated, reinterpreted as unsigned via 32-bit wraparound.
    Md5Modulo,
}

/// A shortcut identifier, stored in its signed 32-bit form.
///
/// The unsigned form used for CompatToolMapping keys and the compatdata
/// directory name is the two's-complement reinterpretation, not the
/// absolute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppId(i32);

impl AppId {
    /// Derive an AppID with the given strategy.
    ///
    /// Pure and deterministic. Empty name or path is rejected; callers
    /// are expected to have validated upstream.
    pub fn generate(strategy: AppIdStrategy, app_name: &str, exe_path: &str) -> Result<AppId> {
        if app_name.is_empty() {
            return Err(ProvisionError::InvalidInput(
                "app name must not be empty".into(),
            ));
        }
        if exe_path.is_empty() {
            return Err(ProvisionError::InvalidInput(
                "executable path must not be empty".into(),
            ));
        }

        let combined = format!("{app_name}{exe_path}");
        let signed = match strategy {
            AppIdStrategy::Crc32 => {
                let sum = crc32fast::hash(combined.as_bytes());
                -((sum & 0x7FFF_FFFF) as i32)
            }
            AppIdStrategy::Md5Modulo => {
                let digest = Md5::digest(combined.as_bytes());
                let hex = hex::encode(digest);
                // First 8 hex digits always parse; the slice is ASCII.
                let seed = u32::from_str_radix(&hex[..8], 16).map_err(|e| {
                    ProvisionError::InvalidInput(format!("digest seed out of range: {e}"))
                })?;
                -((seed % 1_000_000_000) as i32)
            }
        };

        Ok(AppId(signed))
    }

    /// Wrap an identifier read back from a shortcut store.
    pub fn from_signed(raw: i32) -> AppId {
        AppId(raw)
    }

    /// Signed form as persisted in the binary shortcut store.
    pub fn signed(self) -> i32 {
        self.0
    }

    /// Unsigned form used for CompatToolMapping keys and prefix paths.
    pub fn unsigned(self) -> u32 {
        self.0 as u32
    }

    /// Directory name of the compatdata subtree for this identifier.
    pub fn prefix_dir_name(self) -> String {
        self.unsigned().to_string()
    }

    /// Identifier accepted by the client's URI launch mechanism.
    pub fn run_game_id(self) -> u64 {
        ((self.unsigned() as u64) << 32) | RUN_GAME_FLAG
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
