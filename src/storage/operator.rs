//! 基于 OpenDAL 的远程存储
//!
//! 以路径为键的存储没有独立的对象标识，因此对象标识就是它在存储中的路径
//! （`<container>/<name>`），容器对应一个目录或前缀。

use super::{RemoteObjectRef, RemoteStore, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;
use tracing::debug;

pub struct OperatorStore {
    operator: Operator,
    name: String,
}

impl OperatorStore {
    fn with_timeout(operator: Operator, name: String) -> Self {
        let operator = operator.layer(
            TimeoutLayer::default()
                .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
        );
        Self { operator, name }
    }

    pub fn local(path: &str) -> Result<Self> {
        use opendal::services::Fs;

        std::fs::create_dir_all(path)?;
        let builder = Fs::default().root(path);
        let operator = Operator::new(builder)?.finish();

        Ok(Self::with_timeout(operator, format!("local:{}", path)))
    }

    pub fn s3(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        let operator = Operator::new(builder)?.finish();

        Ok(Self::with_timeout(operator, format!("s3://{}", bucket)))
    }

    pub fn webdav(endpoint: &str, username: &str, password: &str) -> Result<Self> {
        use opendal::services::Webdav;

        let builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);

        let operator = Operator::new(builder)?.finish();

        Ok(Self::with_timeout(
            operator,
            format!("webdav://{}", endpoint.trim_end_matches('/')),
        ))
    }

    /// 容器目录路径（OpenDAL 目录以 / 结尾）
    fn container_dir(container: &str) -> String {
        let container = container.trim_matches('/');
        if container.is_empty() {
            "/".to_string()
        } else {
            format!("{}/", container)
        }
    }

    fn object_path(container: &str, name: &str) -> String {
        let container = container.trim_matches('/');
        if container.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", container, name)
        }
    }
}

#[async_trait]
impl RemoteStore for OperatorStore {
    async fn authorize(&self) -> Result<()> {
        self.operator.check().await?;
        Ok(())
    }

    async fn list(&self, container: &str) -> Result<Vec<RemoteObjectRef>> {
        let dir = Self::container_dir(container);

        let mut lister = match self
            .operator
            .lister_with(&dir)
            .metakey(Metakey::Mode)
            .await
        {
            Ok(lister) => lister,
            // 容器还不存在时视为空
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut objects = Vec::new();
        while let Some(entry) = lister.try_next().await? {
            if entry.metadata().is_dir() {
                continue;
            }

            let id = entry.path().trim_start_matches('/').to_string();
            objects.push(RemoteObjectRef::new(id, entry.name()));
        }

        Ok(objects)
    }

    async fn create(&self, container: &str, name: &str, data: Bytes) -> Result<String> {
        let path = Self::object_path(container, name);
        self.operator.write(&path, data).await?;
        Ok(path)
    }

    async fn update(&self, id: &str, name: &str, data: Bytes) -> Result<()> {
        self.operator.write(id, data).await?;

        let current = id.rsplit('/').next().unwrap_or(id);
        if current != name {
            debug!("路径存储不支持修改名称，保留 {} (新名称 {})", id, name);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
