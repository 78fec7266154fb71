//! 应用配置模块
//!
//! 应用配置保存在 `<config_dir>/config.json` 中，按段落（`remote`、`log`、`engine`）读取；
//! 备份配置（需要同步的文件和文件夹）是单独的 JSON 文件，由 `backup` 命令指定。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 覆盖远程容器的环境变量（按顺序查找）
pub const CONTAINER_ENV_VARS: [&str; 2] = ["DRIVESYNC_CONTAINER", "FOLDER_ID"];

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置文件不存在: {}", .0.display())]
    NotFound(PathBuf),

    #[error("读取配置文件失败 ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("配置文件不是合法的 JSON ({}): {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("配置缺少 \"{0}\" 段落")]
    MissingSection(&'static str),

    #[error("{0}")]
    Invalid(String),

    #[error("路径不是普通文件: {}", .0.display())]
    NotAFile(PathBuf),
}

/// 备份配置：声明需要同步的范围
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 显式列出的文件
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// 文件夹（只展开一层，且只在启动时扫描一次）
    #[serde(default)]
    pub folders: Vec<PathBuf>,
    /// 展开文件夹时排除的文件名模式
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl SyncConfig {
    /// 从备份配置文件加载
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = read_config_file(path)?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }
}

/// 同步引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// 初始同步阶段的最大并发传输数
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    /// 最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 创建前重新列出远程容器，避免快照过期导致重复创建
    #[serde(default)]
    pub recheck_before_create: bool,
    /// 内容未变化时跳过更新
    #[serde(default)]
    pub skip_unchanged: bool,
    /// 变化事件合并窗口（毫秒），0 表示不合并
    #[serde(default)]
    pub debounce_ms: u64,
}

fn default_max_concurrent_transfers() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent_transfers(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            recheck_before_create: false,
            skip_unchanged: false,
            debounce_ms: 0,
        }
    }
}

impl EngineConfig {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "engine")
            .ok()
            .flatten()
            .unwrap_or_default()
    }
}

/// 远程存储类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    S3,
    WebDav,
    Memory,
}

/// 远程存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub typ: StorageType,
    /// 目标容器（本地为子目录，S3/WebDAV 为前缀）
    #[serde(default)]
    pub container: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl StorageConfig {
    /// 读取 `remote` 段落，并用环境变量覆盖容器
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: StorageConfig =
            load_section(config_dir, "remote")?.ok_or(ConfigError::MissingSection("remote"))?;

        if let Some(container) = container_from_env() {
            tracing::debug!("使用环境变量中的容器: {}", container);
            config.container = container;
        }

        if config.container.trim().is_empty() && config.typ != StorageType::Local {
            return Err(ConfigError::Invalid("未指定远程容器 (remote.container)".to_string()));
        }

        Ok(config)
    }
}

fn container_from_env() -> Option<String> {
    CONTAINER_ENV_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|v| !v.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

/// 从 `config.json` 中读取指定段落，文件或段落不存在时返回 `None`
pub fn load_section<T: DeserializeOwned>(
    config_dir: &Path,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let config_file = config_dir.join("config.json");
    if !config_file.exists() {
        return Ok(None);
    }

    let content = read_config_file(&config_file)?;
    let config: serde_json::Value =
        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: config_file.clone(),
            source,
        })?;

    match config.get(key) {
        Some(section) => serde_json::from_value(section.clone())
            .map(Some)
            .map_err(|source| ConfigError::Json {
                path: config_file,
                source,
            }),
        None => Ok(None),
    }
}

/// 写入 `config.json` 中的指定段落，保留其它段落
pub fn save_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> io::Result<()> {
    let config_file = config_dir.join("config.json");

    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };

    config[key] = serde_json::to_value(value)?;

    fs::create_dir_all(config_dir)?;
    fs::write(&config_file, serde_json::to_string_pretty(&config)?)
}
