pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use crate::config::{EngineConfig, StorageConfig, SyncConfig};
pub use crate::core::{Outcome, SyncEngine, SyncReport, TrackedPath};
pub use crate::error::SyncError;
pub use crate::storage::{RemoteObjectRef, RemoteStore};

use std::path::PathBuf;

/// 默认应用配置目录（`<系统配置目录>/drivesync`）
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("drivesync"))
        .unwrap_or_else(|| PathBuf::from(".drivesync"))
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
