//! 对账：决定本地文件在远程是创建还是更新，并执行传输

use crate::config::EngineConfig;
use crate::core::resolver::TrackedPath;
use crate::error::{Operation, Result, SyncError};
use crate::storage::{RemoteObjectRef, RemoteStore};
use anyhow::Context;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 启动时获取的远程列表快照，运行期间不再刷新
#[derive(Debug, Clone, Default)]
pub struct RemoteListing {
    objects: Vec<RemoteObjectRef>,
}

impl RemoteListing {
    pub fn new(objects: Vec<RemoteObjectRef>) -> Self {
        Self { objects }
    }

    /// 按名称精确匹配（区分大小写），重名时取第一个
    pub fn find(&self, name: &str) -> Option<&RemoteObjectRef> {
        self.objects.iter().find(|o| o.name == name)
    }
}

/// 对账结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created(RemoteObjectRef),
    Updated(RemoteObjectRef),
}

impl Outcome {
    /// 之后的更新应使用的远程对象
    pub fn target(&self) -> &RemoteObjectRef {
        match self {
            Outcome::Created(r) | Outcome::Updated(r) => r,
        }
    }

    pub fn into_target(self) -> RemoteObjectRef {
        match self {
            Outcome::Created(r) | Outcome::Updated(r) => r,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Outcome::Created(_))
    }
}

/// 对账器
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RemoteStore>,
    container: String,
    max_retries: u32,
    retry_base_delay_ms: u64,
    recheck_before_create: bool,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        container: impl Into<String>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            container: container.into(),
            max_retries: config.max_retries,
            retry_base_delay_ms: config.retry_base_delay_ms,
            recheck_before_create: config.recheck_before_create,
        }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// 获取容器的远程列表快照
    pub async fn fetch_listing(&self) -> Result<RemoteListing> {
        let objects = self
            .store
            .list(&self.container)
            .await
            .with_context(|| format!("列出容器 {} ({})", self.container, self.store.name()))
            .map_err(|e| SyncError::transfer(Operation::List, &self.container, e))?;

        info!("远程容器 {} 中有 {} 个对象", self.container, objects.len());
        Ok(RemoteListing::new(objects))
    }

    /// 对单个路径对账：远程不存在则创建，存在则更新
    pub async fn reconcile(&self, listing: &RemoteListing, path: &TrackedPath) -> Result<Outcome> {
        if let Some(existing) = listing.find(path.name()) {
            debug!("{} 匹配远程对象 {}", path, existing.id);
            return self.update(existing, path).await.map(Outcome::Updated);
        }

        if self.recheck_before_create {
            let fresh = self.fetch_listing().await.map_err(|e| match e {
                SyncError::Transfer { op, source, .. } => {
                    SyncError::transfer(op, path.path(), source)
                }
                other => other,
            })?;
            if let Some(existing) = fresh.find(path.name()) {
                info!("创建前发现同名远程对象，改为更新: {} -> {}", path, existing.id);
                return self.update(existing, path).await.map(Outcome::Updated);
            }
        }

        self.create(path).await.map(Outcome::Created)
    }

    /// 创建远程对象
    pub async fn create(&self, path: &TrackedPath) -> Result<RemoteObjectRef> {
        let data = self.read(path).await?;
        let size = data.len();

        let id = self
            .with_retry(Operation::Create, path, || {
                self.store.create(&self.container, path.name(), data.clone())
            })
            .await?;

        info!("已创建远程对象: {} -> {} ({} 字节)", path, id, size);
        Ok(RemoteObjectRef::new(id, path.name()))
    }

    /// 用本地文件当前内容更新已有的远程对象
    pub async fn update(
        &self,
        target: &RemoteObjectRef,
        path: &TrackedPath,
    ) -> Result<RemoteObjectRef> {
        let data = self.read(path).await?;
        self.update_with(target, path, data).await
    }

    /// 用已读取的内容更新远程对象
    pub async fn update_with(
        &self,
        target: &RemoteObjectRef,
        path: &TrackedPath,
        data: Bytes,
    ) -> Result<RemoteObjectRef> {
        let size = data.len();

        self.with_retry(Operation::Update, path, || {
            self.store.update(&target.id, path.name(), data.clone())
        })
        .await?;

        info!("已更新远程对象: {} -> {} ({} 字节)", path, target.id, size);
        Ok(RemoteObjectRef::new(target.id.clone(), path.name()))
    }

    /// 读取本地文件当前内容
    pub async fn read(&self, path: &TrackedPath) -> Result<Bytes> {
        let data = tokio::fs::read(path.path())
            .await
            .with_context(|| format!("读取本地文件 {}", path))
            .map_err(|e| SyncError::transfer(Operation::Read, path.path(), e))?;
        Ok(Bytes::from(data))
    }

    /// 带指数退避的重试
    async fn with_retry<T, F, Fut>(&self, op: Operation, path: &TrackedPath, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries => {
                    let delay = self
                        .retry_base_delay_ms
                        .saturating_mul(1u64 << attempt.min(16));
                    warn!(
                        "{} 失败，{}ms 后重试 ({}/{}): {} - {:#}",
                        op,
                        delay,
                        attempt + 1,
                        self.max_retries,
                        path,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    if self.max_retries > 0 {
                        error!("{} 最终失败 (已重试{}次): {}", op, self.max_retries, path);
                    }
                    return Err(SyncError::transfer(
                        op,
                        path.path(),
                        e.context(format!("{} {}", self.store.name(), op)),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::PathResolver;
    use crate::storage::{MemoryStore, StoreCall};
    use std::fs;
    use std::path::Path;

    fn no_retry() -> EngineConfig {
        EngineConfig {
            max_retries: 0,
            ..Default::default()
        }
    }

    fn track(dir: &Path, name: &str, content: &[u8]) -> TrackedPath {
        let file = dir.join(name);
        fs::write(&file, content).unwrap();
        PathResolver::new(Vec::new())
            .resolve_paths(&[file], &[])
            .tracked
            .remove(0)
    }

    #[tokio::test]
    async fn test_existing_name_is_updated_missing_name_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new().with_object("c", "1", "a.txt", b"old"));
        let reconciler = Reconciler::new(store.clone(), "c", &no_retry());
        let listing = reconciler.fetch_listing().await.unwrap();

        let a = track(dir.path(), "a.txt", b"new a");
        let outcome = reconciler.reconcile(&listing, &a).await.unwrap();
        assert_eq!(outcome, Outcome::Updated(RemoteObjectRef::new("1", "a.txt")));
        assert_eq!(store.content("1").unwrap(), Bytes::from_static(b"new a"));

        let b = track(dir.path(), "b.txt", b"b");
        let outcome = reconciler.reconcile(&listing, &b).await.unwrap();
        assert!(outcome.is_created());
        assert_eq!(
            store.create_calls(),
            vec![StoreCall::Create {
                container: "c".to_string(),
                name: "b.txt".to_string()
            }]
        );
        assert_eq!(
            store.update_calls(),
            vec![StoreCall::Update {
                id: "1".to_string(),
                name: "a.txt".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_reconciling_twice_gives_same_decision() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new().with_object("c", "1", "a.txt", b"old"));
        let reconciler = Reconciler::new(store.clone(), "c", &no_retry());
        let listing = reconciler.fetch_listing().await.unwrap();
        let a = track(dir.path(), "a.txt", b"a");

        let first = reconciler.reconcile(&listing, &a).await.unwrap();
        let second = reconciler.reconcile(&listing, &a).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.target().id, "1");
        assert!(store.create_calls().is_empty());
        assert_eq!(store.object_count("c"), 1);
    }

    #[tokio::test]
    async fn test_name_match_is_case_sensitive_and_first_wins() {
        let listing = RemoteListing::new(vec![
            RemoteObjectRef::new("1", "A.txt"),
            RemoteObjectRef::new("2", "a.txt"),
            RemoteObjectRef::new("3", "a.txt"),
        ]);
        assert_eq!(listing.find("a.txt").unwrap().id, "2");
        assert_eq!(listing.find("A.txt").unwrap().id, "1");
        assert!(listing.find("b.txt").is_none());
    }

    #[tokio::test]
    async fn test_failure_of_one_path_does_not_affect_another() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.fail_on("a.txt");
        let reconciler = Reconciler::new(store.clone(), "c", &no_retry());
        let listing = RemoteListing::default();

        let a = track(dir.path(), "a.txt", b"a");
        let b = track(dir.path(), "b.txt", b"b");

        let err = reconciler.reconcile(&listing, &a).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Transfer {
                op: Operation::Create,
                ..
            }
        ));
        assert!(err.to_string().contains("a.txt"));

        let outcome = reconciler.reconcile(&listing, &b).await.unwrap();
        assert!(outcome.is_created());
        assert_eq!(store.object_count("c"), 1);
    }

    #[tokio::test]
    async fn test_retries_before_giving_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.fail_on("a.txt");
        let config = EngineConfig {
            max_retries: 2,
            retry_base_delay_ms: 1,
            ..Default::default()
        };
        let reconciler = Reconciler::new(store.clone(), "c", &config);
        let a = track(dir.path(), "a.txt", b"a");

        assert!(reconciler.create(&a).await.is_err());
        assert_eq!(store.create_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_local_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone(), "c", &no_retry());
        let a = track(dir.path(), "a.txt", b"a");
        fs::remove_file(a.path()).unwrap();

        let err = reconciler
            .reconcile(&RemoteListing::default(), &a)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Transfer {
                op: Operation::Read,
                ..
            }
        ));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_recheck_before_create_switches_to_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig {
            max_retries: 0,
            recheck_before_create: true,
            ..Default::default()
        };
        let reconciler = Reconciler::new(store.clone(), "c", &config);
        let stale = reconciler.fetch_listing().await.unwrap();

        // 快照之后被其它客户端创建
        let other = Reconciler::new(store.clone(), "c", &no_retry());
        let a = track(dir.path(), "a.txt", b"a");
        let created = other.create(&a).await.unwrap();

        let outcome = reconciler.reconcile(&stale, &a).await.unwrap();
        assert_eq!(outcome, Outcome::Updated(created));
        assert_eq!(store.create_calls().len(), 1);
    }
}
