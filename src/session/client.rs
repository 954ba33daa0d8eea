//! External client control: restart, URI launch, and shortcut
//! enumeration.
//!
//! The orchestrator only talks to the client through [`ClientControl`],
//! so front ends can substitute their own plumbing and tests never
//! spawn real processes.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, Result};

/// Operations the orchestrator needs from the external client.
#[async_trait]
pub trait ClientControl: Send + Sync {
    /// Terminate and relaunch the client, returning once the new
    /// instance is observable. The client only rereads its stores at
    /// startup, so every store mutation is followed by this.
    async fn restart(&self, exit_timeout: Duration) -> Result<()>;

    /// Fire-and-forget launch of a shortcut through the client's URI
    /// mechanism. Returns once the launcher process was spawned; the
    /// actual initialization continues asynchronously.
    async fn launch_uri(&self, run_game_id: u64) -> Result<()>;

    /// Enumerate non-Steam shortcuts as `(name, unsigned AppID)` pairs
    /// as the client itself reports them.
    async fn enumerate_shortcuts(&self) -> Result<Vec<(String, u32)>>;
}

/// Process-level client control for a locally installed Steam client.
#[derive(Debug, Clone)]
pub struct SteamProcessControl {
    /// Launcher command, `steam` unless the front end overrides it.
    pub launcher: PathBuf,
    /// Enumeration helper command (`protontricks`).
    pub enumerator: PathBuf,
}

impl Default for SteamProcessControl {
    fn default() -> Self {
        Self {
            launcher: PathBuf::from("steam"),
            enumerator: PathBuf::from("protontricks"),
        }
    }
}

impl SteamProcessControl {
    /// The helper process marking a live client instance.
    const HELPER_PATTERN: &'static str = "steamwebhelper";

    async fn client_running(&self) -> bool {
        match Command::new("pgrep")
            .args(["-f", Self::HELPER_PATTERN])
            .output()
            .await
        {
            Ok(output) => output.status.success(),
            Err(e) => {
                warn!("pgrep unavailable, assuming client is down: {e}");
                false
            }
        }
    }

    async fn wait_for_exit(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if !self.client_running().await {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Err(ProvisionError::Timeout {
            operation: "client shutdown".into(),
            waited_secs: timeout.as_secs(),
        })
    }
}

#[async_trait]
impl ClientControl for SteamProcessControl {
    async fn restart(&self, exit_timeout: Duration) -> Result<()> {
        info!("restarting client via {}", self.launcher.display());

        if self.client_running().await {
            let shutdown = Command::new(&self.launcher)
                .arg("-shutdown")
                .output()
                .await
                .map_err(|e| ProvisionError::ExternalProcess {
                    command: format!("{} -shutdown", self.launcher.display()),
                    detail: e.to_string(),
                })?;
            if !shutdown.status.success() {
                debug!("shutdown command returned {}", shutdown.status);
            }
            self.wait_for_exit(exit_timeout).await?;
            debug!("client processes exited");
        }

        // The client must inherit the session environment to reach the
        // display; spawn detached and only verify it came up.
        let mut child = Command::new(&self.launcher)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| ProvisionError::ExternalProcess {
                command: self.launcher.display().to_string(),
                detail: e.to_string(),
            })?;
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        let start = Instant::now();
        while start.elapsed() < exit_timeout {
            if self.client_running().await {
                info!("client is back up");
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(ProvisionError::ExternalProcess {
            command: self.launcher.display().to_string(),
            detail: format!(
                "client did not come back within {}s",
                exit_timeout.as_secs()
            ),
        })
    }

    async fn launch_uri(&self, run_game_id: u64) -> Result<()> {
        let uri = format!("steam://rungameid/{run_game_id}");
        debug!("launching {uri}");
        let mut child = Command::new(&self.launcher)
            .arg(&uri)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| ProvisionError::ExternalProcess {
                command: format!("{} {uri}", self.launcher.display()),
                detail: e.to_string(),
            })?;
        // the launcher exits quickly; reap it off the session's path
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(())
    }

    async fn enumerate_shortcuts(&self) -> Result<Vec<(String, u32)>> {
        let output = Command::new(&self.enumerator)
            .arg("-l")
            .output()
            .await
            .map_err(|e| ProvisionError::ExternalProcess {
                command: format!("{} -l", self.enumerator.display()),
                detail: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(ProvisionError::ExternalProcess {
                command: format!("{} -l", self.enumerator.display()),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_shortcut_listing(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }
}

/// Parse enumeration output lines of the form
/// `Non-Steam shortcut: <name> (<unsigned id>)`.
fn parse_shortcut_listing(stdout: &str) -> Vec<(String, u32)> {
    stdout
        .lines()
        .filter_map(|line| {
            let rest = line.split("Non-Steam shortcut:").nth(1)?.trim();
            let open = rest.rfind('(')?;
            let close = rest.rfind(')')?;
            let id = rest.get(open + 1..close)?.parse().ok()?;
            let name = rest[..open].trim().to_string();
            Some((name, id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_enumeration_lines() {
        let stdout = "\
Found the following games:
Non-Steam shortcut: Tuxborn (3106560878)
Non-Steam shortcut: Wildlander (2814533851)
Some other line
";
        let parsed = parse_shortcut_listing(stdout);
        assert_eq!(
            parsed,
            vec![
                ("Tuxborn".to_string(), 3_106_560_878),
                ("Wildlander".to_string(), 2_814_533_851),
            ]
        );
    }

    #[test]
    fn names_with_parentheses_parse_from_the_right() {
        let stdout = "Non-Steam shortcut: Skyrim (AE) Modded (123456)\n";
        let parsed = parse_shortcut_listing(stdout);
        assert_eq!(parsed, vec![("Skyrim (AE) Modded".to_string(), 123_456)]);
    }

    #[test]
    fn malformed_lines_are_ignored() {
        let stdout = "Non-Steam shortcut: Broken (notanumber)\nNon-Steam shortcut: NoId\n";
        assert!(parse_shortcut_listing(stdout).is_empty());
    }
}
