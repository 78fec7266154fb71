//! 同步引擎错误类型

use std::fmt;
use std::path::PathBuf;

/// 远程操作类型（用于错误上下文和日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Authorize,
    List,
    Read,
    Create,
    Update,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Authorize => write!(f, "authorize"),
            Operation::List => write!(f, "list"),
            Operation::Read => write!(f, "read"),
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
        }
    }
}

/// 同步错误
///
/// 每个错误都能归属到某个具体路径或整个运行。
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// 配置错误：配置文件缺失、不是合法 JSON、或引用的路径不是普通文件
    #[error("配置错误: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// 授权失败，整个运行无法继续
    #[error("授权失败: {0:#}")]
    Authorization(#[source] anyhow::Error),

    /// 单个路径的传输失败（可恢复）
    #[error("{op} 失败 ({}): {source:#}", .path.display())]
    Transfer {
        op: Operation,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// 监听到变化但没有可用的远程对象
    #[error("没有可更新的远程对象: {}", .0.display())]
    MissingTarget(PathBuf),
}

impl SyncError {
    pub fn transfer(op: Operation, path: impl Into<PathBuf>, source: anyhow::Error) -> Self {
        SyncError::Transfer {
            op,
            path: path.into(),
            source,
        }
    }

    /// 是否为整个运行级别的致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Authorization(_) | SyncError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
