//! 文件监听循环
//!
//! 每个路径一个监听订阅和一个任务。任务按顺序处理变化事件，同一路径同一时刻
//! 只有一个更新在进行；某个路径的传输卡住不会影响其它路径。

use crate::config::EngineConfig;
use crate::core::checksum::calculate_hash;
use crate::core::reconciler::Reconciler;
use crate::core::resolver::TrackedPath;
use crate::error::SyncError;
use crate::storage::RemoteObjectRef;
use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 单个路径的监听状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Unwatched,
    Watching,
    Reconciling,
}

/// 文件变化事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Changed,
    Removed,
}

/// 单个路径的监听统计
#[derive(Debug, Clone, Default)]
pub struct WatchSummary {
    pub path: PathBuf,
    pub events: u64,
    pub updates: u64,
    pub failures: u64,
    pub skipped: u64,
}

/// 文件系统订阅：监听父目录，只转发目标文件的事件
///
/// 监听父目录而不是文件本身，编辑器用"写临时文件再重命名"的方式保存时订阅不会失效。
/// 路径是符号链接时，同时监听实际文件所在的目录。
pub struct FsSubscription {
    _watcher: RecommendedWatcher,
}

impl FsSubscription {
    pub fn new(path: &Path) -> Result<(Self, mpsc::UnboundedReceiver<ChangeEvent>)> {
        let mut targets = vec![path.to_path_buf()];
        if let Ok(real) = std::fs::canonicalize(path) {
            if real != path {
                debug!("监听实际文件: {} -> {}", path.display(), real.display());
                targets.push(real);
            }
        }

        let mut parents: Vec<PathBuf> = Vec::new();
        for target in &targets {
            let parent = target
                .parent()
                .with_context(|| format!("路径没有父目录: {}", target.display()))?
                .to_path_buf();
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let label = path.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if !event.paths.iter().any(|p| targets.contains(p)) {
                        return;
                    }
                    let change = match event.kind {
                        EventKind::Create(_) | EventKind::Modify(_) => ChangeEvent::Changed,
                        EventKind::Remove(_) => ChangeEvent::Removed,
                        _ => return,
                    };
                    // 接收端关闭说明监听已结束
                    let _ = tx.send(change);
                }
                Err(e) => warn!("文件监听错误 {}: {}", label.display(), e),
            }
        })
        .context("创建文件监听器")?;

        for parent in &parents {
            watcher
                .watch(parent, RecursiveMode::NonRecursive)
                .with_context(|| format!("监听目录 {}", parent.display()))?;
        }

        Ok((Self { _watcher: watcher }, rx))
    }
}

/// 单个路径的监听任务
struct PathWatch {
    _subscription: Option<FsSubscription>,
    tracked: TrackedPath,
    target: Option<RemoteObjectRef>,
    reconciler: Reconciler,
    skip_unchanged: bool,
    debounce: Option<Duration>,
    last_hash: Option<String>,
    state: watch::Sender<WatchState>,
    summary: WatchSummary,
}

impl PathWatch {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ChangeEvent>,
        shutdown: CancellationToken,
    ) -> WatchSummary {
        debug!("开始监听: {}", self.tracked);

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        warn!("监听来源已关闭: {}", self.tracked);
                        break;
                    }
                },
            };

            self.summary.events += 1;
            let mut event = event;

            if let Some(window) = self.debounce {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(window) => {}
                }
                while let Ok(next) = events.try_recv() {
                    self.summary.events += 1;
                    event = next;
                }
            }

            if event == ChangeEvent::Removed {
                warn!("文件已被删除，等待重新出现: {}", self.tracked);
                continue;
            }

            self.state.send_replace(WatchState::Reconciling);
            let cancelled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => true,
                _ = self.sync_change() => false,
            };
            self.state.send_replace(WatchState::Watching);

            if cancelled {
                warn!("更新被中止: {}", self.tracked);
                break;
            }
        }

        self.state.send_replace(WatchState::Unwatched);
        debug!("停止监听: {}", self.tracked);
        self.summary
    }

    /// 处理一次变化：用初始化时获得的远程对象更新，不重新列出远程
    async fn sync_change(&mut self) {
        let Some(target) = self.target.clone() else {
            self.summary.failures += 1;
            error!("{}", SyncError::MissingTarget(self.tracked.path().to_path_buf()));
            return;
        };

        let data = match self.reconciler.read(&self.tracked).await {
            Ok(data) => data,
            Err(e) => {
                self.summary.failures += 1;
                error!("{}", e);
                return;
            }
        };

        let hash = self.skip_unchanged.then(|| calculate_hash(&data));
        if hash.is_some() && hash == self.last_hash {
            debug!("内容未变化，跳过: {}", self.tracked);
            self.summary.skipped += 1;
            return;
        }

        match self.reconciler.update_with(&target, &self.tracked, data).await {
            Ok(_) => {
                self.summary.updates += 1;
                self.last_hash = hash;
            }
            Err(e) => {
                // 继续监听，下一次变化再尝试
                self.summary.failures += 1;
                error!("{}", e);
            }
        }
    }
}

/// 监听循环：管理所有路径的监听任务
pub struct WatchLoop {
    reconciler: Reconciler,
    skip_unchanged: bool,
    debounce: Option<Duration>,
    shutdown: CancellationToken,
    tasks: JoinSet<WatchSummary>,
    states: Vec<(PathBuf, watch::Receiver<WatchState>)>,
}

impl WatchLoop {
    pub fn new(
        reconciler: Reconciler,
        config: &EngineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            skip_unchanged: config.skip_unchanged,
            debounce: (config.debounce_ms > 0).then(|| Duration::from_millis(config.debounce_ms)),
            shutdown,
            tasks: JoinSet::new(),
            states: Vec::new(),
        }
    }

    /// 为路径注册文件系统订阅并开始监听
    pub fn watch(
        &mut self,
        tracked: TrackedPath,
        target: Option<RemoteObjectRef>,
    ) -> Result<watch::Receiver<WatchState>> {
        let (subscription, events) = FsSubscription::new(tracked.path())?;
        Ok(self.attach(tracked, target, subscription, events))
    }

    /// 用已建立的订阅开始监听，订阅建立后积压的事件会被依次处理
    pub fn attach(
        &mut self,
        tracked: TrackedPath,
        target: Option<RemoteObjectRef>,
        subscription: FsSubscription,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> watch::Receiver<WatchState> {
        self.start(tracked, target, events, Some(subscription))
    }

    /// 用外部事件来源开始监听
    pub fn watch_events(
        &mut self,
        tracked: TrackedPath,
        target: Option<RemoteObjectRef>,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> watch::Receiver<WatchState> {
        self.start(tracked, target, events, None)
    }

    fn start(
        &mut self,
        tracked: TrackedPath,
        target: Option<RemoteObjectRef>,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        subscription: Option<FsSubscription>,
    ) -> watch::Receiver<WatchState> {
        // 事件从此刻开始进入通道，路径即处于监听状态
        let (state_tx, state_rx) = watch::channel(WatchState::Watching);
        self.states
            .push((tracked.path().to_path_buf(), state_rx.clone()));

        let task = PathWatch {
            _subscription: subscription,
            summary: WatchSummary {
                path: tracked.path().to_path_buf(),
                ..Default::default()
            },
            tracked,
            target,
            reconciler: self.reconciler.clone(),
            skip_unchanged: self.skip_unchanged,
            debounce: self.debounce,
            last_hash: None,
            state: state_tx,
        };
        self.tasks.spawn(task.run(events, self.shutdown.clone()));
        state_rx
    }

    /// 当前监听的路径数量
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// 每个路径当前的状态
    pub fn states(&self) -> Vec<(PathBuf, WatchState)> {
        self.states
            .iter()
            .map(|(p, rx)| (p.clone(), *rx.borrow()))
            .collect()
    }

    /// 等待关闭信号，然后收集所有任务的统计
    pub async fn join(mut self) -> Vec<WatchSummary> {
        info!("正在监听 {} 个文件", self.states.len());
        self.shutdown.cancelled().await;

        let mut summaries = Vec::new();
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!("监听任务异常退出: {}", e),
            }
        }
        summaries
    }
}
