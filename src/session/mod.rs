//! The provisioning orchestrator.
//!
//! Drives one workload through the full sequence: placeholder shortcut
//! and runtime mapping, client restart, runtime trigger, prefix
//! verification, in-place finalization, supplemental registry
//! configuration, and client-assigned identifier resolution.
//!
//! One session runs sequentially; callers must serialize sessions per
//! app name. On failure nothing is rolled back — the failure names the
//! attempted transition and the last completed state so the caller can
//! resume or clean up explicitly.

pub mod client;
pub mod prefix;
pub mod registry;
pub mod state;

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::appid::{AppId, AppIdStrategy};
use crate::catalog::RuntimeDescriptor;
use crate::config::ProvisionConfig;
use crate::conflict::{self, ConflictResolution, ShortcutConflict};
use crate::error::{ProvisionError, Result};
use crate::store::{compat, text, ShortcutRecord, ShortcutStore};

pub use client::{ClientControl, SteamProcessControl};
pub use prefix::PrefixDirectory;
pub use registry::RegistrySupplement;
pub use state::{SessionFailure, SessionReport, SessionState};

/// Tag written onto shortcuts this crate creates.
const SHORTCUT_TAG: &str = "prefixforge";

/// How a workload is classified for supplemental configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WorkloadProfile {
    /// Needs nothing beyond the prefix itself.
    #[default]
    Standard,
    /// Needs path-valued registry entries and the CLR overrides.
    Supplemented {
        registry_paths: Vec<RegistrySupplement>,
    },
}

/// What the caller wants provisioned.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadRequest {
    pub app_name: String,
    /// The real workload executable, installed once the runtime is up.
    pub exe_path: PathBuf,
    pub start_dir: PathBuf,
    pub launch_options: String,
    pub profile: WorkloadProfile,
    pub strategy: AppIdStrategy,
}

impl WorkloadRequest {
    pub fn new(app_name: impl Into<String>, exe_path: impl Into<PathBuf>) -> Result<Self> {
        let app_name = app_name.into();
        let exe_path: PathBuf = exe_path.into();
        if app_name.trim().is_empty() {
            return Err(ProvisionError::InvalidInput(
                "workload needs a non-empty app name".into(),
            ));
        }
        let start_dir = exe_path
            .parent()
            .map(PathBuf::from)
            .ok_or_else(|| {
                ProvisionError::InvalidInput(format!(
                    "executable path {} has no parent directory",
                    exe_path.display()
                ))
            })?;
        Ok(Self {
            app_name,
            exe_path,
            start_dir,
            launch_options: crate::store::DEFAULT_LAUNCH_OPTIONS.to_string(),
            profile: WorkloadProfile::Standard,
            strategy: AppIdStrategy::Crc32,
        })
    }

    pub fn with_start_dir(mut self, start_dir: impl Into<PathBuf>) -> Self {
        self.start_dir = start_dir.into();
        self
    }

    pub fn with_profile(mut self, profile: WorkloadProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_strategy(mut self, strategy: AppIdStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Outcome of the placeholder step.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaceholderOutcome {
    /// The placeholder is in the stores; the session may proceed.
    Created,
    /// Colliding records were found and no resolution was supplied.
    /// The session stays at `Idle` awaiting a decision.
    Conflicts(Vec<ShortcutConflict>),
    /// The caller chose to keep the existing records; the stores are
    /// untouched and the session will not proceed.
    Skipped,
}

/// One provisioning session. Create it, call
/// [`create_placeholder`](Self::create_placeholder), then
/// [`run_to_complete`](Self::run_to_complete).
///
/// All waits are deadline-bound async; dropping a future cancels the
/// wait without leaving this process holding anything.
pub struct ProvisioningSession<'a, C: ClientControl> {
    config: &'a ProvisionConfig,
    client: &'a C,
    runtime: RuntimeDescriptor,
    request: WorkloadRequest,
    app_id: AppId,
    state: SessionState,
}

impl<'a, C: ClientControl> ProvisioningSession<'a, C> {
    /// Set up a session. The AppID is computed here and never changes
    /// for the session's lifetime.
    pub fn new(
        config: &'a ProvisionConfig,
        client: &'a C,
        runtime: RuntimeDescriptor,
        request: WorkloadRequest,
    ) -> Result<Self> {
        let app_id = AppId::generate(
            request.strategy,
            &request.app_name,
            &request.exe_path.to_string_lossy(),
        )?;
        info!(
            "session for {:?}: AppID {} (unsigned {}), runtime {}",
            request.app_name,
            app_id,
            app_id.unsigned(),
            runtime.name
        );
        Ok(Self {
            config,
            client,
            runtime,
            request,
            app_id,
            state: SessionState::Idle,
        })
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The prefix directory this session's runtime will materialize.
    pub fn prefix(&self) -> PrefixDirectory {
        PrefixDirectory::new(&self.config.steam.compatdata_dir(), self.app_id)
    }

    fn fail(&mut self, attempted: SessionState, reason: ProvisionError) -> SessionFailure {
        let last_completed = self.state;
        self.state = SessionState::Failed;
        warn!("session failed entering {attempted}: {reason}");
        SessionFailure {
            failed: attempted,
            last_completed,
            reason,
        }
    }

    /// Step 1: conflict check, placeholder record, runtime mapping.
    ///
    /// Invoking this twice for the same `(app_name, start_dir)` updates
    /// the existing record in place rather than creating a second one.
    pub async fn create_placeholder(
        &mut self,
        resolution: Option<ConflictResolution>,
    ) -> std::result::Result<PlaceholderOutcome, SessionFailure> {
        if self.state != SessionState::Idle {
            let err = ProvisionError::InvalidInput(format!(
                "placeholder creation requires an idle session (state: {})",
                self.state
            ));
            return Err(self.fail(SessionState::PlaceholderCreated, err));
        }

        let shortcuts_path = self.config.steam.shortcuts_file();
        let mut store = ShortcutStore::load_or_default(&shortcuts_path)
            .map_err(|e| self.fail(SessionState::PlaceholderCreated, e))?;

        // A record carrying this session's own deterministic AppID is a
        // previous placeholder for the identical request; it is updated
        // in place, not treated as a collision.
        let conflicts: Vec<ShortcutConflict> = conflict::find_conflicts(
            &store,
            &self.request.app_name,
            &self.request.exe_path.to_string_lossy(),
            &self.request.start_dir.to_string_lossy(),
        )
        .into_iter()
        .filter(|c| c.record.app_id != self.app_id)
        .collect();
        if !conflicts.is_empty() {
            match resolution {
                None => {
                    info!(
                        "{} conflicting record(s); awaiting a resolution",
                        conflicts.len()
                    );
                    return Ok(PlaceholderOutcome::Conflicts(conflicts));
                }
                Some(ConflictResolution::Skip) => {
                    info!("caller chose to keep the existing records");
                    return Ok(PlaceholderOutcome::Skipped);
                }
                Some(ConflictResolution::Abort) => {
                    let err = ProvisionError::InvalidInput(format!(
                        "aborted: {} conflicting record(s) for {:?}",
                        conflicts.len(),
                        self.request.app_name
                    ));
                    return Err(self.fail(SessionState::PlaceholderCreated, err));
                }
                Some(ConflictResolution::Replace) => {
                    let indices: Vec<String> =
                        conflicts.iter().map(|c| c.index.clone()).collect();
                    let removed = store.remove_matching(|r| {
                        conflicts.iter().any(|c| {
                            c.record.app_name == r.app_name
                                && c.record.start_dir == r.start_dir
                                && c.record.exe == r.exe
                        })
                    });
                    info!("replaced {removed} conflicting record(s) at indices {indices:?}");
                }
            }
        }

        self.write_placeholder(&mut store)
            .and_then(|()| store.save(&shortcuts_path))
            .map_err(|e| self.fail(SessionState::PlaceholderCreated, e))?;

        self.write_runtime_mapping()
            .map_err(|e| self.fail(SessionState::PlaceholderCreated, e))?;

        self.state = SessionState::PlaceholderCreated;
        info!(
            "placeholder in place for {:?} (AppID {})",
            self.request.app_name, self.app_id
        );
        Ok(PlaceholderOutcome::Created)
    }

    fn write_placeholder(&self, store: &mut ShortcutStore) -> Result<()> {
        let app_name = self.request.app_name.clone();
        let start_dir = self.request.start_dir.clone();
        let placeholder = &self.config.placeholder_command;
        let app_id = self.app_id;
        let launch_options = self.request.launch_options.clone();

        let identity_dir = start_dir.to_string_lossy().to_string();
        store.upsert(
            |r| r.app_name == app_name && r.start_dir_path() == identity_dir,
            |r| {
                let mut fresh = ShortcutRecord::new(app_id, &app_name, placeholder, &start_dir);
                fresh.launch_options = launch_options;
                fresh.tags = vec![SHORTCUT_TAG.to_string()];
                // keep passthrough fields of a record being reused
                if !r.extra.is_empty() {
                    fresh.extra = r.extra.clone();
                }
                *r = fresh;
            },
        )?;
        Ok(())
    }

    fn write_runtime_mapping(&self) -> Result<()> {
        let config_path = self.config.steam.client_config_file();
        let mut tree = text::load(&config_path)?;
        compat::set_compat_tool(&mut tree, self.app_id, &self.runtime.mapping_name());
        text::save(&tree, &config_path)
    }

    /// Steps 2–7. Requires a created placeholder.
    pub async fn run_to_complete(&mut self) -> std::result::Result<SessionReport, SessionFailure> {
        if self.state != SessionState::PlaceholderCreated {
            let err = ProvisionError::InvalidInput(format!(
                "run_to_complete requires a created placeholder (state: {})",
                self.state
            ));
            return Err(self.fail(SessionState::ClientRestarted, err));
        }

        self.restart_client().await?;
        self.trigger_runtime().await?;
        self.verify_runtime().await?;
        self.finalize()?;
        self.apply_supplement().await?;
        let (resolved, uncertain) = self.resolve_assigned_id().await;

        self.state = SessionState::Complete;
        info!("session complete for {:?}", self.request.app_name);
        Ok(SessionReport {
            app_name: self.request.app_name.clone(),
            app_id_signed: self.app_id.signed(),
            app_id_unsigned: self.app_id.unsigned(),
            runtime: self.runtime.mapping_name(),
            prefix_dir: self.prefix().root().to_path_buf(),
            resolved_app_id: resolved,
            identifier_uncertain: uncertain,
            completed_at: chrono::Utc::now(),
        })
    }

    /// Step 2: the client only rereads its stores at startup.
    async fn restart_client(&mut self) -> std::result::Result<(), SessionFailure> {
        let tuning = &self.config.tuning;
        let mut last_err: Option<ProvisionError> = None;
        for attempt in 1..=tuning.restart_attempts.max(1) {
            match self.client.restart(tuning.restart_exit_timeout).await {
                Ok(()) => {
                    self.state = SessionState::ClientRestarted;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "client restart attempt {attempt}/{} failed: {e}",
                        tuning.restart_attempts
                    );
                    last_err = Some(e);
                    if attempt < tuning.restart_attempts {
                        tokio::time::sleep(tuning.restart_backoff * attempt).await;
                    }
                }
            }
        }
        let reason = last_err.unwrap_or_else(|| ProvisionError::ExternalProcess {
            command: "client restart".into(),
            detail: "no attempts were made".into(),
        });
        Err(self.fail(SessionState::ClientRestarted, reason))
    }

    /// Step 3: fire-and-forget URI launch plus a fixed settle delay —
    /// the launch call returns before initialization starts.
    async fn trigger_runtime(&mut self) -> std::result::Result<(), SessionFailure> {
        let run_game_id = self.app_id.run_game_id();
        debug!("triggering runtime initialization via rungameid {run_game_id}");
        self.client
            .launch_uri(run_game_id)
            .await
            .map_err(|e| self.fail(SessionState::RuntimeTriggered, e))?;
        tokio::time::sleep(self.config.tuning.settle).await;
        self.state = SessionState::RuntimeTriggered;
        Ok(())
    }

    /// Step 4: bounded poll for the materialized prefix.
    async fn verify_runtime(&mut self) -> std::result::Result<(), SessionFailure> {
        let prefix = self.prefix();
        let deadline = self
            .config
            .tuning
            .prefix_timeout
            .unwrap_or_else(|| prefix.default_timeout());
        prefix
            .wait_until_initialized(self.config.tuning.poll_interval, deadline)
            .await
            .map_err(|e| self.fail(SessionState::RuntimeVerified, e))?;
        self.state = SessionState::RuntimeVerified;
        Ok(())
    }

    /// Step 5: same AppID, same store index — only the executable
    /// target and start directory change to the real workload.
    fn finalize(&mut self) -> std::result::Result<(), SessionFailure> {
        let shortcuts_path = self.config.steam.shortcuts_file();
        let app_name = self.request.app_name.clone();
        let identity_dir = self.request.start_dir.to_string_lossy().to_string();
        let exe_path = self.request.exe_path.clone();
        let app_id = self.app_id;

        let result = (|| -> Result<()> {
            let mut store = ShortcutStore::load(&shortcuts_path)?;
            let index = store.upsert(
                |r| r.app_name == app_name && r.start_dir_path() == identity_dir,
                |r| {
                    r.app_id = app_id;
                    r.set_exe(&exe_path);
                },
            )?;
            debug!("finalized shortcut at index {index}");
            store.save(&shortcuts_path)
        })();

        result.map_err(|e| self.fail(SessionState::Finalized, e))?;
        self.state = SessionState::Finalized;
        info!(
            "shortcut for {:?} now targets {}",
            self.request.app_name,
            self.request.exe_path.display()
        );
        Ok(())
    }

    /// Step 6: supplemental registry configuration for classified
    /// workloads; a no-op transition for standard ones.
    async fn apply_supplement(&mut self) -> std::result::Result<(), SessionFailure> {
        let WorkloadProfile::Supplemented { registry_paths } = self.request.profile.clone() else {
            debug!("standard workload, no supplemental configuration");
            self.state = SessionState::SupplementApplied;
            return Ok(());
        };

        let prefix = self.prefix();
        let tuning = &self.config.tuning;

        // Let the runtime finish its first-boot registry writes before
        // editing the file underneath it. Not fatal if it stays busy.
        if let Err(e) = prefix
            .wait_until_settled(tuning.poll_interval, tuning.resolve_timeout)
            .await
        {
            warn!("proceeding with supplement although registry never settled: {e}");
        }

        let result = async {
            for supplement in &registry_paths {
                registry::update_registry_path(
                    &prefix.system_reg(),
                    &supplement.section,
                    &supplement.value_name,
                    &supplement.unix_path,
                )?;
            }
            registry::apply_dotnet_overrides(
                &self.runtime.wine_binary,
                &prefix.pfx_dir(),
                tuning.registry_attempts,
            )
            .await
        }
        .await;

        result.map_err(|e| self.fail(SessionState::SupplementApplied, e))?;
        self.state = SessionState::SupplementApplied;
        Ok(())
    }

    /// Step 7: the orchestrator's AppID is a best-effort prediction
    /// some clients recompute; ask the client what it actually
    /// assigned. Degrades to an uncertainty flag, never fails.
    async fn resolve_assigned_id(&mut self) -> (Option<u32>, bool) {
        let tuning = &self.config.tuning;
        let deadline = tokio::time::Instant::now() + tuning.resolve_timeout;

        loop {
            match self.client.enumerate_shortcuts().await {
                Ok(entries) => {
                    if let Some((_, id)) = entries
                        .iter()
                        .find(|(name, _)| name == &self.request.app_name)
                    {
                        let uncertain = *id != self.app_id.unsigned();
                        if uncertain {
                            warn!(
                                "client assigned AppID {id}, prediction was {}",
                                self.app_id.unsigned()
                            );
                        } else {
                            debug!("client confirmed predicted AppID {id}");
                        }
                        return (Some(*id), uncertain);
                    }
                }
                Err(e) => debug!("shortcut enumeration not ready: {e}"),
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "could not resolve the client-assigned identifier within {:?}; continuing with the predicted value",
                    tuning.resolve_timeout
                );
                return (None, true);
            }
            tokio::time::sleep(tuning.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_derives_start_dir_from_exe() {
        let request = WorkloadRequest::new("Tuxborn", "/games/Tuxborn/ModOrganizer.exe").unwrap();
        assert_eq!(request.start_dir, PathBuf::from("/games/Tuxborn"));
        assert_eq!(request.launch_options, "%command%");
        assert_eq!(request.profile, WorkloadProfile::Standard);
    }

    #[test]
    fn request_rejects_blank_name() {
        assert!(WorkloadRequest::new("  ", "/games/x.exe").is_err());
    }
}
