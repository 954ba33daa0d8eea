//! Discovery and ranking of installed compatibility runtimes.
//!
//! Runtimes arrive through two installation conventions: official
//! builds live under a library's `steamapps/common/` with descriptive
//! directory names ("Proton - Experimental", "Proton 9.0"), community
//! builds under `compatibilitytools.d/` with the version encoded in
//! the directory name ("GE-Proton10-16"). Each family keeps its wine
//! binary at a fixed relative path; candidates missing it are skipped.
//!
//! Scans are depth-bounded to the direct children of each configured
//! root, so a misconfigured root can never turn into a filesystem walk.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CatalogConfig;
use crate::error::{ProvisionError, Result};

/// Installation convention a runtime was found under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeFamily {
    /// Official builds under `steamapps/common/`, descriptive names.
    Official,
    /// Community builds under `compatibilitytools.d/`, folder-encoded
    /// versions.
    Community,
}

impl RuntimeFamily {
    /// Fixed wine binary location relative to the install directory.
    pub fn wine_relative_path(self) -> &'static str {
        match self {
            RuntimeFamily::Official => "dist/bin/wine",
            RuntimeFamily::Community => "files/bin/wine",
        }
    }
}

/// One discovered runtime installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeDescriptor {
    pub name: String,
    pub install_dir: PathBuf,
    pub wine_binary: PathBuf,
    pub family: RuntimeFamily,
    /// Parsed `(major, minor)` when the name encodes one.
    pub version: Option<(u32, u32)>,
    /// Official family's rolling pre-release designation.
    pub experimental: bool,
    /// Found under the primary root rather than an extra-tools root.
    pub primary_root: bool,
}

// Ranking bands, widest-spread first. Within a band the encoded
// version decides; across bands the order is: community at or above
// the version floor, then Experimental, then community below the
// floor, then versioned official builds.
const BAND_COMMUNITY: u32 = 30_000;
const BAND_EXPERIMENTAL: u32 = 25_000;
const BAND_COMMUNITY_LEGACY: u32 = 20_000;
const BAND_OFFICIAL: u32 = 10_000;

impl RuntimeDescriptor {
    /// Priority score under the given community version floor. Higher
    /// wins; root preference breaks ties outside this score.
    pub fn priority(&self, community_floor_major: u32) -> u32 {
        let (major, minor) = self.version.unwrap_or((0, 0));
        match self.family {
            RuntimeFamily::Community => {
                let band = if major >= community_floor_major {
                    BAND_COMMUNITY
                } else {
                    BAND_COMMUNITY_LEGACY
                };
                band + major * 100 + minor.min(99)
            }
            RuntimeFamily::Official if self.experimental => BAND_EXPERIMENTAL,
            RuntimeFamily::Official => {
                let beta_penalty = if self.name.contains("(Beta)") { 5 } else { 0 };
                BAND_OFFICIAL + major * 100 + minor.min(9) * 10 - beta_penalty
            }
        }
    }

    /// Name as written into the compatibility-tool mapping. Community
    /// names are used verbatim; official names collapse to the
    /// client's internal form ("Proton - Experimental" becomes
    /// `proton_experimental`).
    pub fn mapping_name(&self) -> String {
        match self.family {
            RuntimeFamily::Community => self.name.clone(),
            RuntimeFamily::Official => {
                let mut name = self
                    .name
                    .to_lowercase()
                    .replace(" - ", "_")
                    .replace([' ', '-'], "_");
                if !name.starts_with("proton") {
                    name = format!("proton_{name}");
                }
                name
            }
        }
    }
}

/// The set of runtimes discovered by one scan.
#[derive(Debug, Clone, Default)]
pub struct RuntimeCatalog {
    candidates: Vec<RuntimeDescriptor>,
    community_floor_major: u32,
}

impl RuntimeCatalog {
    /// Scan the configured roots. A forced runtime path in the config
    /// bypasses scanning entirely and yields a one-entry catalog.
    pub async fn scan(config: &CatalogConfig) -> Result<Self> {
        if let Some(forced) = &config.forced_runtime {
            let descriptor = classify_forced(forced)?;
            info!("using forced runtime {} at {}", descriptor.name, forced.display());
            return Ok(Self {
                candidates: vec![descriptor],
                community_floor_major: config.community_floor_major,
            });
        }

        let mut candidates = Vec::new();
        for (i, library) in config.library_roots.iter().enumerate() {
            let common = library.join("steamapps/common");
            scan_root(&common, RuntimeFamily::Official, i == 0, &mut candidates).await?;
        }
        for (i, root) in config.compat_tool_roots.iter().enumerate() {
            scan_root(root, RuntimeFamily::Community, i == 0, &mut candidates).await?;
        }

        info!("runtime scan found {} candidate(s)", candidates.len());
        Ok(Self {
            candidates,
            community_floor_major: config.community_floor_major,
        })
    }

    /// Build a catalog from known descriptors. Mostly useful to rank
    /// a fixed candidate set.
    pub fn from_candidates(candidates: Vec<RuntimeDescriptor>, community_floor_major: u32) -> Self {
        Self {
            candidates,
            community_floor_major,
        }
    }

    pub fn candidates(&self) -> &[RuntimeDescriptor] {
        &self.candidates
    }

    /// All candidates in rank order, deduplicated by name (the
    /// higher-ranked instance of a name wins).
    pub fn ranked(&self) -> Vec<&RuntimeDescriptor> {
        let mut sorted: Vec<&RuntimeDescriptor> = self.candidates.iter().collect();
        sorted.sort_by_key(|d| {
            (
                std::cmp::Reverse(d.priority(self.community_floor_major)),
                std::cmp::Reverse(d.primary_root),
            )
        });
        let mut seen = std::collections::HashSet::new();
        sorted.retain(|d| seen.insert(d.name.clone()));
        sorted
    }

    /// The top-ranked runtime, or `NotFound` when the catalog is empty.
    pub fn select_best(&self) -> Result<&RuntimeDescriptor> {
        self.ranked().into_iter().next().ok_or_else(|| {
            ProvisionError::not_found(
                "no compatibility runtime; install one under steamapps/common or compatibilitytools.d",
            )
        })
    }
}

/// Scan the direct children of one root for the given family.
async fn scan_root(
    root: &Path,
    family: RuntimeFamily,
    primary: bool,
    out: &mut Vec<RuntimeDescriptor>,
) -> Result<()> {
    if !root.is_dir() {
        debug!("runtime root does not exist, skipping: {}", root.display());
        return Ok(());
    }
    debug!("scanning runtime root: {}", root.display());

    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(|e| ProvisionError::io(root, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ProvisionError::io(root, e))?
    {
        let path = entry.path();
        // follows symlinks; community runtimes are often linked in
        let Ok(metadata) = tokio::fs::metadata(&path).await else {
            debug!("unreadable entry, skipping: {}", path.display());
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(parsed) = parse_name(&name, family) else {
            continue;
        };

        let wine_binary = path.join(family.wine_relative_path());
        if !is_executable(&wine_binary) {
            debug!("skipping {name}: no wine binary at {}", wine_binary.display());
            continue;
        }

        debug!("found runtime {name} at {}", path.display());
        out.push(RuntimeDescriptor {
            name,
            install_dir: path,
            wine_binary,
            family,
            version: parsed.version,
            experimental: parsed.experimental,
            primary_root: primary,
        });
    }
    Ok(())
}

struct ParsedName {
    version: Option<(u32, u32)>,
    experimental: bool,
}

/// Parse a candidate directory name for its family's convention.
/// Returns `None` for directories that are not runtimes of the family.
fn parse_name(name: &str, family: RuntimeFamily) -> Option<ParsedName> {
    match family {
        RuntimeFamily::Community => {
            let re = community_name_pattern();
            let caps = re.captures(name)?;
            let major = caps[1].parse().ok()?;
            let minor = caps[2].parse().ok()?;
            Some(ParsedName {
                version: Some((major, minor)),
                experimental: false,
            })
        }
        RuntimeFamily::Official => {
            let suffix = name.strip_prefix("Proton")?.trim_start_matches([' ', '-']);
            if suffix.eq_ignore_ascii_case("Experimental") {
                return Some(ParsedName {
                    version: None,
                    experimental: true,
                });
            }
            let re = official_version_pattern();
            let caps = re.captures(suffix)?;
            let major = caps[1].parse().ok()?;
            let minor = caps[2].parse().ok()?;
            Some(ParsedName {
                version: Some((major, minor)),
                experimental: false,
            })
        }
    }
}

fn community_name_pattern() -> Regex {
    // The pattern is static; construction cannot fail.
    Regex::new(r"^GE-Proton(\d+)-(\d+)$").expect("static regex")
}

fn official_version_pattern() -> Regex {
    Regex::new(r"^(\d+)\.(\d+)( \(Beta\))?$").expect("static regex")
}

/// Classify a user-forced runtime directory by its name and verify the
/// family's wine binary is in place.
fn classify_forced(path: &Path) -> Result<RuntimeDescriptor> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            ProvisionError::InvalidInput(format!("forced runtime path {} has no name", path.display()))
        })?;

    let family = if name.starts_with("GE-Proton") {
        RuntimeFamily::Community
    } else {
        RuntimeFamily::Official
    };
    let parsed = parse_name(&name, family).unwrap_or(ParsedName {
        version: None,
        experimental: false,
    });

    // A forced path may use either family's layout regardless of name.
    let wine_binary = [
        path.join(family.wine_relative_path()),
        path.join(RuntimeFamily::Community.wine_relative_path()),
        path.join(RuntimeFamily::Official.wine_relative_path()),
    ]
    .into_iter()
    .find(|p| is_executable(p))
    .ok_or_else(|| {
        ProvisionError::not_found(format!("wine binary under forced runtime {}", path.display()))
    })?;

    Ok(RuntimeDescriptor {
        name,
        install_dir: path.to_path_buf(),
        wine_binary,
        family,
        version: parsed.version,
        experimental: parsed.experimental,
        primary_root: true,
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn descriptor(
        name: &str,
        family: RuntimeFamily,
        version: Option<(u32, u32)>,
        experimental: bool,
    ) -> RuntimeDescriptor {
        RuntimeDescriptor {
            name: name.to_string(),
            install_dir: PathBuf::from("/tools").join(name),
            wine_binary: PathBuf::from("/tools")
                .join(name)
                .join(family.wine_relative_path()),
            family,
            version,
            experimental,
            primary_root: true,
        }
    }

    fn fixture() -> Vec<RuntimeDescriptor> {
        vec![
            descriptor("GE-Proton10-16", RuntimeFamily::Community, Some((10, 16)), false),
            descriptor("Proton - Experimental", RuntimeFamily::Official, None, true),
            descriptor("GE-Proton9-5", RuntimeFamily::Community, Some((9, 5)), false),
            descriptor("Proton 9.0", RuntimeFamily::Official, Some((9, 0)), false),
        ]
    }

    #[test]
    fn community_above_floor_outranks_everything() {
        let catalog = RuntimeCatalog::from_candidates(fixture(), 10);
        assert_eq!(catalog.select_best().unwrap().name, "GE-Proton10-16");
    }

    #[test]
    fn experimental_outranks_community_below_floor() {
        let catalog = RuntimeCatalog::from_candidates(fixture(), 10);
        let names: Vec<&str> = catalog.ranked().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "GE-Proton10-16",
                "Proton - Experimental",
                "GE-Proton9-5",
                "Proton 9.0"
            ]
        );
    }

    #[test]
    fn without_community_candidates_experimental_beats_versioned() {
        let candidates: Vec<_> = fixture()
            .into_iter()
            .filter(|d| d.family != RuntimeFamily::Community)
            .collect();
        let catalog = RuntimeCatalog::from_candidates(candidates, 10);
        let names: Vec<&str> = catalog.ranked().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["Proton - Experimental", "Proton 9.0"]);
    }

    #[test]
    fn higher_version_wins_within_family() {
        let candidates = vec![
            descriptor("GE-Proton10-4", RuntimeFamily::Community, Some((10, 4)), false),
            descriptor("GE-Proton10-16", RuntimeFamily::Community, Some((10, 16)), false),
            descriptor("Proton 9.0", RuntimeFamily::Official, Some((9, 0)), false),
            descriptor("Proton 10.0", RuntimeFamily::Official, Some((10, 0)), false),
        ];
        let catalog = RuntimeCatalog::from_candidates(candidates, 10);
        let names: Vec<&str> = catalog.ranked().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            ["GE-Proton10-16", "GE-Proton10-4", "Proton 10.0", "Proton 9.0"]
        );
    }

    #[test]
    fn beta_ranks_below_its_plain_version() {
        let plain = descriptor("Proton 9.0", RuntimeFamily::Official, Some((9, 0)), false);
        let beta = descriptor("Proton 9.0 (Beta)", RuntimeFamily::Official, Some((9, 0)), false);
        assert!(plain.priority(10) > beta.priority(10));
    }

    #[test]
    fn primary_root_breaks_ties() {
        let mut primary = descriptor("GE-Proton10-16", RuntimeFamily::Community, Some((10, 16)), false);
        primary.primary_root = true;
        let mut extra = primary.clone();
        extra.primary_root = false;
        extra.install_dir = PathBuf::from("/extra/GE-Proton10-16");

        let catalog = RuntimeCatalog::from_candidates(vec![extra, primary], 10);
        let best = catalog.select_best().unwrap();
        assert!(best.primary_root);
        // deduplicated by name
        assert_eq!(catalog.ranked().len(), 1);
    }

    #[test]
    fn empty_catalog_is_not_found() {
        let catalog = RuntimeCatalog::from_candidates(Vec::new(), 10);
        assert!(matches!(
            catalog.select_best(),
            Err(ProvisionError::NotFound { .. })
        ));
    }

    #[test]
    fn name_parsing_follows_family_conventions() {
        assert!(parse_name("GE-Proton10-16", RuntimeFamily::Community)
            .is_some_and(|p| p.version == Some((10, 16))));
        assert!(parse_name("GE-Proton10", RuntimeFamily::Community).is_none());
        assert!(parse_name("SomeTool", RuntimeFamily::Community).is_none());

        assert!(parse_name("Proton - Experimental", RuntimeFamily::Official)
            .is_some_and(|p| p.experimental));
        assert!(parse_name("Proton 9.0", RuntimeFamily::Official)
            .is_some_and(|p| p.version == Some((9, 0))));
        assert!(parse_name("Proton 9.0 (Beta)", RuntimeFamily::Official)
            .is_some_and(|p| p.version == Some((9, 0))));
        assert!(parse_name("Proton Hotfix", RuntimeFamily::Official).is_none());
        assert!(parse_name("SteamLinuxRuntime", RuntimeFamily::Official).is_none());
    }

    #[test]
    fn mapping_names_follow_client_conventions() {
        let ge = descriptor("GE-Proton10-16", RuntimeFamily::Community, Some((10, 16)), false);
        assert_eq!(ge.mapping_name(), "GE-Proton10-16");

        let exp = descriptor("Proton - Experimental", RuntimeFamily::Official, None, true);
        assert_eq!(exp.mapping_name(), "proton_experimental");

        let versioned = descriptor("Proton 9.0", RuntimeFamily::Official, Some((9, 0)), false);
        assert_eq!(versioned.mapping_name(), "proton_9.0");
    }
}
