//! 内存远程存储，主要用于测试和演练
//!
//! 记录每一次调用，并支持按名称注入失败或延迟。

use super::{RemoteObjectRef, RemoteStore};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// 对存储的一次调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    List { container: String },
    Create { container: String, name: String },
    Update { id: String, name: String },
}

#[derive(Debug, Clone)]
struct MemoryObject {
    id: String,
    container: String,
    name: String,
    data: Bytes,
}

#[derive(Default)]
struct MemoryState {
    objects: Vec<MemoryObject>,
    calls: Vec<StoreCall>,
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    deny_auth: bool,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// 预置一个已存在的远程对象
    pub fn with_object(self, container: &str, id: &str, name: &str, data: &[u8]) -> Self {
        self.lock().objects.push(MemoryObject {
            id: id.to_string(),
            container: container.to_string(),
            name: name.to_string(),
            data: Bytes::copy_from_slice(data),
        });
        self
    }

    /// 之后针对该名称的 create/update 都会失败
    pub fn fail_on(&self, name: &str) {
        self.lock().failing.insert(name.to_string());
    }

    /// 取消失败注入
    pub fn recover(&self, name: &str) {
        self.lock().failing.remove(name);
    }

    /// 针对该名称的 create/update 在完成前等待指定时间
    pub fn delay_on(&self, name: &str, delay: Duration) {
        self.lock().delays.insert(name.to_string(), delay);
    }

    /// 之后的授权检查都会失败
    pub fn deny_authorization(&self) {
        self.lock().deny_auth = true;
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn create_calls(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, StoreCall::Create { .. }))
            .collect()
    }

    pub fn update_calls(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, StoreCall::Update { .. }))
            .collect()
    }

    /// 读取对象内容
    pub fn content(&self, id: &str) -> Option<Bytes> {
        self.lock()
            .objects
            .iter()
            .find(|o| o.id == id)
            .map(|o| o.data.clone())
    }

    /// 按容器和名称读取对象内容（重名时取第一个）
    pub fn content_of(&self, container: &str, name: &str) -> Option<Bytes> {
        self.lock()
            .objects
            .iter()
            .find(|o| o.container == container && o.name == name)
            .map(|o| o.data.clone())
    }

    /// 容器中的对象数量
    pub fn object_count(&self, container: &str) -> usize {
        self.lock()
            .objects
            .iter()
            .filter(|o| o.container == container)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // 测试中 panic 可能使锁中毒，此时仍继续使用内部状态
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 记录调用并返回注入的延迟和失败
    fn record(&self, call: StoreCall, name: &str) -> (Option<Duration>, bool) {
        let mut state = self.lock();
        state.calls.push(call);
        (
            state.delays.get(name).copied(),
            state.failing.contains(name),
        )
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn authorize(&self) -> Result<()> {
        if self.lock().deny_auth {
            anyhow::bail!("invalid credentials");
        }
        Ok(())
    }

    async fn list(&self, container: &str) -> Result<Vec<RemoteObjectRef>> {
        let mut state = self.lock();
        state.calls.push(StoreCall::List {
            container: container.to_string(),
        });

        Ok(state
            .objects
            .iter()
            .filter(|o| o.container == container)
            .map(|o| RemoteObjectRef::new(&o.id, &o.name))
            .collect())
    }

    async fn create(&self, container: &str, name: &str, data: Bytes) -> Result<String> {
        let (delay, fail) = self.record(
            StoreCall::Create {
                container: container.to_string(),
                name: name.to_string(),
            },
            name,
        );

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            anyhow::bail!("simulated create failure for {}", name);
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.lock().objects.push(MemoryObject {
            id: id.clone(),
            container: container.to_string(),
            name: name.to_string(),
            data,
        });
        Ok(id)
    }

    async fn update(&self, id: &str, name: &str, data: Bytes) -> Result<()> {
        let (delay, fail) = self.record(
            StoreCall::Update {
                id: id.to_string(),
                name: name.to_string(),
            },
            name,
        );

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            anyhow::bail!("simulated update failure for {}", name);
        }

        let mut state = self.lock();
        let object = state
            .objects
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| anyhow::anyhow!("object not found: {}", id))?;
        object.name = name.to_string();
        object.data = data;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_assigns_ids_and_records_calls() {
        let store = MemoryStore::new().with_object("c", "1", "a.txt", b"old");

        let id = store
            .create("c", "b.txt", Bytes::from_static(b"new"))
            .await
            .unwrap();
        assert_ne!(id, "1");

        store
            .update("1", "a.txt", Bytes::from_static(b"fresh"))
            .await
            .unwrap();
        assert_eq!(store.content("1").unwrap(), Bytes::from_static(b"fresh"));

        let listing = store.list("c").await.unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(store.create_calls().len(), 1);
        assert_eq!(store.update_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryStore::new();
        store.fail_on("a.txt");
        assert!(store
            .create("c", "a.txt", Bytes::from_static(b"x"))
            .await
            .is_err());
        assert_eq!(store.object_count("c"), 0);

        store.recover("a.txt");
        assert!(store
            .create("c", "a.txt", Bytes::from_static(b"x"))
            .await
            .is_ok());

        store.deny_authorization();
        assert!(store.authorize().await.is_err());
    }
}
