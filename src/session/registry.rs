//! Registry writes inside an initialized prefix.
//!
//! Two mechanisms, matching what the target values need:
//! - path-valued entries are written straight into the prefix's
//!   `system.reg`, locating or creating the named section and touching
//!   nothing else in the file;
//! - DLL override and CLR keys go through the runtime's own `reg`
//!   subcommand with `WINEPREFIX` pointed at the prefix, each write
//!   verified by a `reg query` read-back and retried on miss.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, Result};
use crate::store::write_atomic;

/// One path-valued registry entry a workload needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySupplement {
    /// Section header as written in the registry file, e.g.
    /// `[Software\\WOW6432Node\\bethesda softworks\\falloutnv]`.
    pub section: String,
    /// Value name, e.g. `Installed Path`.
    pub value_name: String,
    /// Unix path to expose; converted to a drive-mapped Windows path.
    pub unix_path: String,
}

/// Upsert a path value in a registry file, preserving every unrelated
/// line. The value is written in drive-mapped form (`Z:\...\`).
pub fn update_registry_path(
    reg_file: &Path,
    section: &str,
    value_name: &str,
    unix_path: &str,
) -> Result<()> {
    if !reg_file.exists() {
        return Err(ProvisionError::not_found(format!(
            "registry file {}",
            reg_file.display()
        )));
    }
    let content =
        std::fs::read_to_string(reg_file).map_err(|e| ProvisionError::io(reg_file, e))?;

    let value_line = format!(
        "\"{}\"=\"Z:\\\\{}\\\\\"",
        value_name,
        unix_path.trim_start_matches('/').replace('/', "\\\\")
    );
    let value_prefix = format!("\"{value_name}\"");

    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    let mut section_header: Option<usize> = None;
    let mut value_slot: Option<usize> = None;
    let mut in_section = false;
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed == section {
            in_section = true;
            section_header = Some(i);
        } else if trimmed.starts_with('[') {
            in_section = false;
        } else if in_section && trimmed.starts_with(&value_prefix) {
            value_slot = Some(i);
            break;
        }
    }

    match (value_slot, section_header) {
        (Some(i), _) => lines[i] = value_line,
        (None, Some(i)) => lines.insert(i + 1, value_line),
        (None, None) => {
            lines.push(String::new());
            lines.push(section.to_string());
            lines.push(value_line);
        }
    }

    let mut output = lines.join("\n");
    output.push('\n');
    write_atomic(reg_file, output.as_bytes())?;
    info!(
        "registry path {value_name:?} set in section {section} of {}",
        reg_file.display()
    );
    Ok(())
}

/// A single `reg add` invocation plus its read-back query.
#[derive(Debug, Clone)]
struct RegWrite {
    key: &'static str,
    value_name: &'static str,
    value_type: &'static str,
    data: &'static str,
}

/// The universal CLR/runtime overrides applied to supplemented
/// workloads: native .NET runtime instead of the built-in one, and a
/// single (latest) CLR to avoid version conflicts.
const DOTNET_OVERRIDES: [RegWrite; 2] = [
    RegWrite {
        key: "HKEY_CURRENT_USER\\Software\\Wine\\DllOverrides",
        value_name: "mscoree",
        value_type: "REG_SZ",
        data: "native",
    },
    RegWrite {
        key: "HKEY_LOCAL_MACHINE\\Software\\Microsoft\\.NETFramework",
        value_name: "OnlyUseLatestCLR",
        value_type: "REG_DWORD",
        data: "1",
    },
];

/// Apply the .NET overrides through the runtime's registry subcommand.
/// Each write is attempted up to `attempts` times and only counts once
/// the read-back query observes the value.
pub async fn apply_dotnet_overrides(
    wine_binary: &Path,
    pfx_dir: &Path,
    attempts: u32,
) -> Result<()> {
    for write in &DOTNET_OVERRIDES {
        write_with_verification(wine_binary, pfx_dir, write, attempts).await?;
    }
    info!("runtime registry overrides applied in {}", pfx_dir.display());
    Ok(())
}

async fn write_with_verification(
    wine_binary: &Path,
    pfx_dir: &Path,
    write: &RegWrite,
    attempts: u32,
) -> Result<()> {
    for attempt in 1..=attempts.max(1) {
        let add = run_reg(
            wine_binary,
            pfx_dir,
            &[
                "add",
                write.key,
                "/v",
                write.value_name,
                "/t",
                write.value_type,
                "/d",
                write.data,
                "/f",
            ],
        )
        .await?;
        if !add.status.success() {
            warn!(
                "reg add {} failed on attempt {attempt}: {}",
                write.value_name,
                String::from_utf8_lossy(&add.stderr).trim()
            );
            continue;
        }

        // A write that "succeeds" but is not observable on read-back
        // counts as failed.
        let query = run_reg(
            wine_binary,
            pfx_dir,
            &["query", write.key, "/v", write.value_name],
        )
        .await?;
        let stdout = String::from_utf8_lossy(&query.stdout);
        if query.status.success() && stdout.contains(write.value_name) {
            debug!("verified registry value {} on attempt {attempt}", write.value_name);
            return Ok(());
        }
        warn!(
            "registry value {} not observed on read-back (attempt {attempt}/{attempts})",
            write.value_name
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Err(ProvisionError::RegistryOperation {
        detail: format!(
            "value {} under {} was not observable after {attempts} attempt(s)",
            write.value_name, write.key
        ),
    })
}

async fn run_reg(
    wine_binary: &Path,
    pfx_dir: &Path,
    args: &[&str],
) -> Result<std::process::Output> {
    let mut command = Command::new(wine_binary);
    command
        .arg("reg")
        .args(args)
        .env("WINEPREFIX", pfx_dir)
        .env("WINEDEBUG", "-all");
    debug!("running {:?} reg {:?}", wine_binary, args);
    command
        .output()
        .await
        .map_err(|e| ProvisionError::ExternalProcess {
            command: format!("{} reg {}", wine_binary.display(), args.join(" ")),
            detail: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const SYSTEM_REG: &str = "WINE REGISTRY Version 2\n;; All keys relative to \\\\Machine\n\n[Software\\\\Microsoft\\\\Windows]\n\"SomeValue\"=\"untouched\"\n\n[Software\\\\WOW6432Node\\\\bethesda softworks\\\\falloutnv]\n\"Installed Path\"=\"C:\\\\old\\\\\"\n\"Other\"=\"kept\"\n";

    fn reg_fixture(content: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("system.reg");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn updates_value_inside_existing_section() {
        let (_dir, path) = reg_fixture(SYSTEM_REG);
        update_registry_path(
            &path,
            "[Software\\\\WOW6432Node\\\\bethesda softworks\\\\falloutnv]",
            "Installed Path",
            "/games/FalloutNV",
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"Installed Path\"=\"Z:\\\\games\\\\FalloutNV\\\\\""));
        // unrelated lines survive, in place
        assert!(content.contains("\"SomeValue\"=\"untouched\""));
        assert!(content.contains("\"Other\"=\"kept\""));
        assert!(!content.contains("C:\\\\old"));
    }

    #[test]
    fn appends_section_when_absent() {
        let (_dir, path) = reg_fixture("WINE REGISTRY Version 2\n\n[Existing]\n\"a\"=\"b\"\n");
        update_registry_path(
            &path,
            "[Software\\\\Wow6432Node\\\\SureAI\\\\Enderal SE]",
            "installed path",
            "/games/Enderal",
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let section_pos = content
            .find("[Software\\\\Wow6432Node\\\\SureAI\\\\Enderal SE]")
            .unwrap();
        let value_pos = content
            .find("\"installed path\"=\"Z:\\\\games\\\\Enderal\\\\\"")
            .unwrap();
        assert!(value_pos > section_pos);
        assert!(content.contains("\"a\"=\"b\""));
    }

    #[test]
    fn same_value_name_in_other_section_is_not_touched() {
        let reg = "WINE REGISTRY Version 2\n\n[Other\\\\Section]\n\"Installed Path\"=\"elsewhere\"\n\n[Target]\n\"x\"=\"y\"\n";
        let (_dir, path) = reg_fixture(reg);
        update_registry_path(&path, "[Target]", "Installed Path", "/games/X").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"Installed Path\"=\"elsewhere\""));
        assert!(content.contains("\"Installed Path\"=\"Z:\\\\games\\\\X\\\\\""));
        // the existing section was reused, not duplicated
        assert_eq!(content.matches("[Target]").count(), 1);
    }

    #[test]
    fn missing_registry_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = update_registry_path(
            &dir.path().join("absent.reg"),
            "[S]",
            "v",
            "/p",
        )
        .unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound { .. }));
    }

    #[cfg(unix)]
    mod with_stub_runtime {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// A stand-in runtime binary: exits zero and echoes its
        /// arguments, so read-back queries observe the value name.
        fn stub_wine(dir: &Path) -> std::path::PathBuf {
            let path = dir.join("wine");
            std::fs::write(&path, "#!/bin/sh\necho \"$@\"\nexit 0\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn failing_wine(dir: &Path) -> std::path::PathBuf {
            let path = dir.join("wine-broken");
            std::fs::write(&path, "#!/bin/sh\nexit 1\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn overrides_verify_against_echoing_runtime() {
            let dir = TempDir::new().unwrap();
            let wine = stub_wine(dir.path());
            apply_dotnet_overrides(&wine, dir.path(), 3).await.unwrap();
        }

        #[tokio::test]
        async fn exhausted_attempts_surface_registry_error() {
            let dir = TempDir::new().unwrap();
            let wine = failing_wine(dir.path());
            let err = apply_dotnet_overrides(&wine, dir.path(), 2)
                .await
                .unwrap_err();
            assert!(matches!(err, ProvisionError::RegistryOperation { .. }));
        }
    }
}
