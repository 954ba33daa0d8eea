//! The compatibility prefix directory and its initialization waits.
//!
//! The runtime's own first launch materializes the prefix; this
//! subsystem only observes it. A prefix counts as initialized once
//! both registry files and the drive-emulation root exist, and as
//! settled once the system registry stops growing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::appid::AppId;
use crate::error::{ProvisionError, Result};

/// Prefix budget on ordinary storage.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Prefix budget on removable media, which materializes prefixes far
/// slower than internal storage.
const REMOVABLE_MEDIA_TIMEOUT: Duration = Duration::from_secs(180);
/// Consecutive stable size polls before the registry counts as settled.
const SETTLE_POLLS: u32 = 3;

/// Filesystem subtree rooted at a per-AppID compatdata path.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefixDirectory {
    root: PathBuf,
}

impl PrefixDirectory {
    pub fn new(compatdata_dir: &Path, app_id: AppId) -> Self {
        Self {
            root: compatdata_dir.join(app_id.prefix_dir_name()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The wine prefix proper, handed to registry subcommands.
    pub fn pfx_dir(&self) -> PathBuf {
        self.root.join("pfx")
    }

    pub fn system_reg(&self) -> PathBuf {
        self.root.join("pfx/system.reg")
    }

    pub fn user_reg(&self) -> PathBuf {
        self.root.join("pfx/user.reg")
    }

    pub fn drive_c(&self) -> PathBuf {
        self.root.join("pfx/drive_c")
    }

    /// Both registry files and the drive-emulation root exist.
    pub fn is_initialized(&self) -> bool {
        self.system_reg().is_file() && self.user_reg().is_file() && self.drive_c().is_dir()
    }

    /// Budget for [`wait_until_initialized`](Self::wait_until_initialized)
    /// when the caller has not fixed one: generous on removable media,
    /// tight otherwise.
    pub fn default_timeout(&self) -> Duration {
        if self.root.starts_with("/run/media") {
            REMOVABLE_MEDIA_TIMEOUT
        } else {
            DEFAULT_TIMEOUT
        }
    }

    /// Poll until the prefix is initialized. The deadline is the whole
    /// budget; there is no outer retry. Cancellable by dropping the
    /// future.
    pub async fn wait_until_initialized(
        &self,
        interval: Duration,
        deadline: Duration,
    ) -> Result<()> {
        debug!("waiting for prefix at {}", self.root.display());
        let start = Instant::now();
        loop {
            if self.is_initialized() {
                info!(
                    "prefix initialized after {:?}: {}",
                    start.elapsed(),
                    self.root.display()
                );
                return Ok(());
            }
            if start.elapsed() >= deadline {
                return Err(ProvisionError::PrefixTimeout {
                    prefix: self.root.clone(),
                    waited_secs: deadline.as_secs(),
                });
            }
            sleep(interval).await;
        }
    }

    /// Poll until the system registry size has been stable for a few
    /// consecutive intervals, indicating the runtime finished its
    /// first-boot writes. Times out with `Timeout` rather than
    /// `PrefixTimeout`: the prefix exists, it just never went quiet.
    pub async fn wait_until_settled(&self, interval: Duration, deadline: Duration) -> Result<()> {
        let reg = self.system_reg();
        let start = Instant::now();
        let mut last_size = 0u64;
        let mut stable = 0u32;

        while start.elapsed() < deadline {
            if let Ok(metadata) = tokio::fs::metadata(&reg).await {
                let size = metadata.len();
                if size == last_size && size > 0 {
                    stable += 1;
                    if stable >= SETTLE_POLLS {
                        debug!("system registry stable at {size} bytes");
                        return Ok(());
                    }
                } else {
                    stable = 0;
                    last_size = size;
                }
            }
            sleep(interval).await;
        }
        warn!(
            "system registry never settled within {:?}: {}",
            deadline,
            reg.display()
        );
        Err(ProvisionError::Timeout {
            operation: format!("registry settling in {}", self.root.display()),
            waited_secs: deadline.as_secs(),
        })
    }
}

/// Create a minimal initialized prefix structure. Test support for
/// collaborators that simulate the runtime's first boot.
#[doc(hidden)]
pub fn materialize_stub_prefix(root: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(root.join("pfx/drive_c"))?;
    std::fs::write(
        root.join("pfx/system.reg"),
        "WINE REGISTRY Version 2\n;; All keys relative to \\\\Machine\n\n",
    )?;
    std::fs::write(
        root.join("pfx/user.reg"),
        "WINE REGISTRY Version 2\n;; All keys relative to \\\\User\\\\S-1-5-21-0-0-0-1000\n\n",
    )?;
    Ok(())
}
