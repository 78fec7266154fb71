pub mod memory;
pub mod operator;

use crate::config::{StorageConfig, StorageType};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use memory::{MemoryStore, StoreCall};
pub use operator::OperatorStore;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- list, stat 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程对象引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObjectRef {
    /// 远程标识（由服务端分配）
    pub id: String,
    /// 远程名称
    pub name: String,
}

impl RemoteObjectRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// 远程存储抽象接口
///
/// 引擎只依赖这四个操作；所有错误都按单个路径的可恢复错误处理，
/// 只有 `authorize` 的失败会终止整个运行。
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 检查凭据和连通性
    async fn authorize(&self) -> Result<()>;

    /// 列出容器下的顶层对象（不分页）
    async fn list(&self, container: &str) -> Result<Vec<RemoteObjectRef>>;

    /// 在容器中创建新对象，返回服务端分配的标识
    async fn create(&self, container: &str, name: &str, data: Bytes) -> Result<String>;

    /// 原地替换对象内容和名称
    async fn update(&self, id: &str, name: &str, data: Bytes) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建远程存储实例
pub fn create_remote_store(config: &StorageConfig) -> Result<Arc<dyn RemoteStore>> {
    match config.typ {
        StorageType::Local => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Local storage requires path"))?;
            tracing::info!("初始化本地存储: {}", path);
            Ok(Arc::new(OperatorStore::local(path)?) as Arc<dyn RemoteStore>)
        }
        StorageType::S3 => {
            let bucket = config
                .bucket
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires bucket"))?;
            let region = config
                .region
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires region"))?;
            let access_key = config
                .access_key
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires accessKey"))?;
            let secret_key = config
                .secret_key
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires secretKey"))?;
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
            Ok(Arc::new(OperatorStore::s3(
                bucket,
                region,
                access_key,
                secret_key,
                config.endpoint.as_deref(),
            )?) as Arc<dyn RemoteStore>)
        }
        StorageType::WebDav => {
            let endpoint = config
                .endpoint
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("WebDAV storage requires endpoint"))?;
            let username = config
                .username
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("WebDAV storage requires username"))?;
            let password = config
                .password
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("WebDAV storage requires password"))?;
            tracing::info!("创建WebDAV存储: endpoint={}", endpoint);
            Ok(Arc::new(OperatorStore::webdav(endpoint, username, password)?)
                as Arc<dyn RemoteStore>)
        }
        StorageType::Memory => {
            tracing::warn!("使用内存存储，进程退出后数据丢失");
            Ok(Arc::new(MemoryStore::new()) as Arc<dyn RemoteStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(typ: StorageType) -> StorageConfig {
        StorageConfig {
            typ,
            container: "backups".to_string(),
            path: None,
            bucket: None,
            region: None,
            access_key: None,
            secret_key: None,
            endpoint: None,
            username: None,
            password: None,
        }
    }

    #[test]
    fn test_create_store_requires_backend_fields() {
        assert!(create_remote_store(&config(StorageType::Local)).is_err());
        assert!(create_remote_store(&config(StorageType::S3)).is_err());
        assert!(create_remote_store(&config(StorageType::WebDav)).is_err());
        assert!(create_remote_store(&config(StorageType::Memory)).is_ok());
    }
}
