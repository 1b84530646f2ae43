//! Cross-platform path utilities for Parley.
//!
//! Single source of truth for where the daemon keeps its configuration and
//! where it binds its sockets.
//!
//! # Platform Behavior
//!
//! | Platform | Config Directory | Socket Directory |
//! |----------|------------------|------------------|
//! | Linux    | `~/.config/parley` | `$XDG_RUNTIME_DIR` or data dir |
//! | macOS    | `~/Library/Application Support/parley` | Same as data dir |
//! | Windows  | `%APPDATA%/parley` | Data dir |

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

/// Errors specific to path operations.
#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not determine data directory")]
    NoDataDirectory,

    #[error("Could not determine config directory")]
    NoConfigDirectory,
}

/// Application identifier used in path construction.
const APP_NAME: &str = "parley";

/// Socket file name for the control socket (start/stop/status).
const IPC_SOCKET_NAME: &str = "parley.sock";

/// Socket file name for the UI event feed.
const BROADCAST_SOCKET_NAME: &str = "parley_events.sock";

/// Configuration file name inside the config directory.
const CONFIG_FILE_NAME: &str = "config.toml";

fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o700);
        fs::set_permissions(dir, perms)
            .with_context(|| format!("Failed to set permissions on {}", dir.display()))?;
    }

    Ok(())
}

/// Get the application data directory, creating it (mode 0700) if needed.
pub fn get_data_dir() -> Result<PathBuf> {
    let base_dir = dirs::data_dir().ok_or(PathError::NoDataDirectory)?;
    let data_dir = base_dir.join(APP_NAME);
    ensure_private_dir(&data_dir)?;
    Ok(data_dir)
}

/// Get the configuration directory.
///
/// Linux uses `~/.config/parley`; other platforms keep config with data.
pub fn get_config_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let config_base = dirs::config_dir().ok_or(PathError::NoConfigDirectory)?;
        let config_dir = config_base.join(APP_NAME);
        ensure_private_dir(&config_dir)?;
        Ok(config_dir)
    }

    #[cfg(not(target_os = "linux"))]
    {
        get_data_dir()
    }
}

/// Get the default configuration file path.
pub fn get_config_file_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Get the socket directory for IPC sockets.
///
/// On Linux `$XDG_RUNTIME_DIR` is preferred (per-user, mode 0700, cleaned at
/// logout); everything else falls back to the data directory.
pub fn get_socket_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        if let Some(runtime_dir) = dirs::runtime_dir() {
            if runtime_dir.exists() {
                return Ok(runtime_dir);
            }
        }
        get_data_dir()
    }

    #[cfg(not(target_os = "linux"))]
    {
        get_data_dir()
    }
}

/// Get the path to the control socket.
pub fn get_ipc_socket_path() -> Result<PathBuf> {
    Ok(get_socket_dir()?.join(IPC_SOCKET_NAME))
}

/// Get the path to the UI event broadcast socket.
pub fn get_broadcast_socket_path() -> Result<PathBuf> {
    Ok(get_socket_dir()?.join(BROADCAST_SOCKET_NAME))
}

/// Set secure Unix socket permissions (0600, owner read/write only).
#[cfg(unix)]
pub fn secure_socket_permissions(socket_path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if socket_path.exists() {
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(socket_path, perms).with_context(|| {
            format!(
                "Failed to set socket permissions: {}",
                socket_path.display()
            )
        })?;
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn secure_socket_permissions(_socket_path: &Path) -> Result<()> {
    Ok(())
}
