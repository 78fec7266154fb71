use crate::config::{ConfigError, EngineConfig, SyncConfig};
use crate::core::reconciler::{Outcome, Reconciler};
use crate::core::resolver::{resolve_file, PathResolver, Resolution, TrackedPath};
use crate::core::watcher::{ChangeEvent, FsSubscription, WatchLoop, WatchSummary};
use crate::error::{Result, SyncError};
use crate::storage::{RemoteObjectRef, RemoteStore};
use futures::StreamExt;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 同步报告
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub start_time: i64,
    pub end_time: i64,
    pub files_tracked: u32,
    pub files_skipped: u32,
    pub files_created: u32,
    pub files_updated: u32,
    pub files_failed: u32,
    pub files_watched: u32,
    /// 监听期间因变化触发的更新次数
    pub change_updates: u64,
    /// 监听期间失败的更新次数
    pub change_failures: u64,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn record_error(&mut self, error: &SyncError) {
        self.errors.push(error.to_string());
    }

    fn merge_watch(&mut self, summaries: &[WatchSummary]) {
        for summary in summaries {
            self.change_updates += summary.updates;
            self.change_failures += summary.failures;
        }
    }
}

/// 初始化完成、可以开始监听的路径
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub tracked: TrackedPath,
    pub remote: RemoteObjectRef,
}

/// 初始化结果
pub struct Initialized {
    pub report: SyncReport,
    pub targets: Vec<WatchTarget>,
}

/// 已建立的文件系统订阅和它的事件通道
type Subscribed = (FsSubscription, mpsc::UnboundedReceiver<ChangeEvent>);

/// 同步引擎
///
/// 授权一次、列出远程一次，对每个路径做初始对账，然后交给监听循环，
/// 直到收到关闭信号。
pub struct SyncEngine {
    reconciler: Reconciler,
    config: EngineConfig,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        container: impl Into<String>,
        config: EngineConfig,
    ) -> Self {
        let reconciler = Reconciler::new(store, container, &config);
        Self { reconciler, config }
    }

    async fn authorize(&self) -> Result<()> {
        let store = self.reconciler.store();
        store.authorize().await.map_err(|e| {
            error!("授权失败 ({}): {:#}", store.name(), e);
            SyncError::Authorization(e)
        })?;
        debug!("授权成功: {}", store.name());
        Ok(())
    }

    /// 上传单个文件：远程存在同名对象时更新，否则创建
    pub async fn upload(&self, path: &Path) -> Result<Outcome> {
        // 配置错误在任何远程操作之前返回
        let tracked = resolve_file(path)?;

        self.authorize().await?;
        let listing = self.reconciler.fetch_listing().await?;
        let outcome = self.reconciler.reconcile(&listing, &tracked).await?;

        match &outcome {
            Outcome::Created(r) => info!("新文件已创建: {} ({})", tracked, r.id),
            Outcome::Updated(r) => info!("文件已更新: {} ({})", tracked, r.id),
        }
        Ok(outcome)
    }

    /// 授权、列出远程、并对每个路径做初始对账
    pub async fn initialize(&self, config: &SyncConfig) -> Result<Initialized> {
        let (report, prepared) = self.reconcile_all(config, false).await?;
        let targets = prepared.into_iter().map(|(target, _)| target).collect();
        Ok(Initialized { report, targets })
    }

    /// 初始对账；`subscribe` 为真时每个路径在传输前先建立订阅，
    /// 初始传输期间发生的变化会留在事件通道中
    async fn reconcile_all(
        &self,
        config: &SyncConfig,
        subscribe: bool,
    ) -> Result<(SyncReport, Vec<(WatchTarget, Option<Subscribed>)>)> {
        let mut report = SyncReport {
            start_time: chrono::Utc::now().timestamp(),
            ..Default::default()
        };

        let sync_config = config.clone();
        let resolution = resolve_in_background(move || PathResolver::resolve(&sync_config)).await?;

        report.files_tracked = resolution.tracked.len() as u32;
        report.files_skipped = resolution.skipped.len() as u32;
        for (path, reason) in &resolution.skipped {
            report
                .errors
                .push(format!("跳过 {}: {}", path.display(), reason));
        }

        self.authorize().await?;
        let listing = self.reconciler.fetch_listing().await?;

        let outcomes: Vec<_> = futures::stream::iter(resolution.tracked)
            .map(|tracked| {
                let listing = &listing;
                async move {
                    let subscription = subscribe.then(|| FsSubscription::new(tracked.path()));
                    let result = self.reconciler.reconcile(listing, &tracked).await;
                    (tracked, subscription, result)
                }
            })
            .buffered(self.config.max_concurrent_transfers.max(1))
            .collect()
            .await;

        let mut prepared = Vec::new();
        for (tracked, subscription, result) in outcomes {
            let remote = match result {
                Ok(outcome) => {
                    if outcome.is_created() {
                        report.files_created += 1;
                    } else {
                        report.files_updated += 1;
                    }
                    Some(outcome.into_target())
                }
                Err(e) => {
                    report.files_failed += 1;
                    error!("{}", e);
                    report.record_error(&e);

                    // 远程已有对象时更新失败仍然可以监听；创建失败则没有可更新的目标
                    let remote = listing.find(tracked.name()).cloned();
                    if remote.is_none() {
                        warn!("初始创建失败，不监听该文件: {}", tracked);
                    }
                    remote
                }
            };
            let Some(remote) = remote else {
                continue;
            };

            let subscription = match subscription {
                Some(Ok(subscribed)) => Some(subscribed),
                Some(Err(e)) => {
                    error!("无法监听 {}: {:#}", tracked, e);
                    report.errors.push(format!("无法监听 {}: {:#}", tracked, e));
                    None
                }
                None => None,
            };
            prepared.push((WatchTarget { tracked, remote }, subscription));
        }

        info!(
            "初始同步完成: 创建 {}, 更新 {}, 失败 {}, 跳过 {}",
            report.files_created, report.files_updated, report.files_failed, report.files_skipped
        );

        Ok((report, prepared))
    }

    /// 运行同步，直到收到关闭信号
    pub async fn run(
        &self,
        config: &SyncConfig,
        shutdown: CancellationToken,
    ) -> Result<SyncReport> {
        let (mut report, prepared) = self.reconcile_all(config, true).await?;

        let mut watch_loop =
            WatchLoop::new(self.reconciler.clone(), &self.config, shutdown.clone());
        for (target, subscription) in prepared {
            if let Some((subscription, events)) = subscription {
                watch_loop.attach(target.tracked, Some(target.remote), subscription, events);
            }
        }
        report.files_watched = watch_loop.len() as u32;

        if watch_loop.is_empty() {
            warn!("没有可监听的文件，等待关闭信号");
        }

        let summaries = watch_loop.join().await;
        report.merge_watch(&summaries);
        report.end_time = chrono::Utc::now().timestamp();

        info!(
            "同步已停止: 监听 {} 个文件, 变化更新 {} 次, 失败 {} 次",
            report.files_watched, report.change_updates, report.change_failures
        );
        Ok(report)
    }
}

/// 在阻塞线程池中解析路径，解析任务异常时整个运行失败
async fn resolve_in_background<F>(resolve: F) -> Result<Resolution>
where
    F: FnOnce() -> Resolution + Send + 'static,
{
    tokio::task::spawn_blocking(resolve).await.map_err(|e| {
        error!("路径解析任务失败: {}", e);
        SyncError::Config(ConfigError::Invalid(format!("路径解析任务失败: {}", e)))
    })
}
