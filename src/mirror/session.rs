//! 会话控制
//!
//! 唯一面向外部层的编排入口：启动/取消/重试/快照/订阅。
//! 完成判定采用显式屏障：扫描线程是下载任务的唯一生产者，
//! 先等全部扫描线程退出，再收尾下载队列并等全部传输线程退出，
//! 不存在「队列瞬时为空但仍有任务在路上」的竞态

use crate::config::MirrorConfig;
use crate::events::{EventBus, MirrorEvent};
use crate::mirror::ledger::DedupLedger;
use crate::mirror::progress::{ProgressAggregator, ProgressSnapshot};
use crate::mirror::queue::WorkQueue;
use crate::mirror::retry::RetryCoordinator;
use crate::mirror::scanner::ScannerPool;
use crate::mirror::task::{normalize_remote_path, FileTask};
use crate::mirror::worker::TransferWorkerPool;
use crate::mirror::EventPublisher;
use crate::remote::{RemoteError, RemoteFileSystem, ServerInfo};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// 空闲
    Idle,
    /// 扫描与下载并行进行
    Running,
    /// 发现完毕，排空下载队列
    Draining,
    /// 全部完成
    Completed,
    /// 已取消
    Cancelled,
}

impl SessionState {
    /// 获取状态的中文描述
    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Idle => "空闲",
            SessionState::Running => "运行中",
            SessionState::Draining => "排空中",
            SessionState::Completed => "已完成",
            SessionState::Cancelled => "已取消",
        }
    }

    /// 状态名称
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Draining => "draining",
            SessionState::Completed => "completed",
            SessionState::Cancelled => "cancelled",
        }
    }

    /// 是否为运行中状态
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Running | SessionState::Draining)
    }

    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Cancelled)
    }
}

/// 单次运行的内部状态
struct ActiveRun {
    session_id: String,
    config: MirrorConfig,
    cancel: CancellationToken,
    download: Arc<WorkQueue<FileTask>>,
    coordinator: Arc<RetryCoordinator>,
    started_at: i64,
}

/// 会话控制器
pub struct SessionController {
    remote: Arc<dyn RemoteFileSystem>,
    ledger: Arc<DedupLedger>,
    aggregator: Arc<ProgressAggregator>,
    bus: Arc<EventBus>,
    publisher: Arc<EventPublisher>,
    state_tx: watch::Sender<SessionState>,
    run: RwLock<Option<ActiveRun>>,
}

impl SessionController {
    /// 创建会话控制器
    pub fn new(remote: Arc<dyn RemoteFileSystem>) -> Self {
        let aggregator = Arc::new(ProgressAggregator::new());
        let bus = Arc::new(EventBus::new());
        let publisher = Arc::new(EventPublisher::new(aggregator.clone(), bus.clone()));
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            remote,
            ledger: Arc::new(DedupLedger::new()),
            aggregator,
            bus,
            publisher,
            state_tx,
            run: RwLock::new(None),
        }
    }

    /// 当前会话状态
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// 启动镜像会话
    ///
    /// 会话在后台运行，调用方通过快照/事件观察进度。
    /// 返回会话 ID
    pub async fn start(&self, config: MirrorConfig) -> Result<String> {
        if self.state().is_active() {
            bail!("会话仍在运行中，无法重新启动");
        }
        config.validate()?;
        tokio::fs::create_dir_all(&config.local_root)
            .await
            .context("创建本地镜像目录失败")?;

        // 新会话从干净的台账和计数开始
        self.ledger.clear();
        self.aggregator.reset();

        let session_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let discovery: Arc<WorkQueue<String>> = Arc::new(WorkQueue::new());
        let download: Arc<WorkQueue<FileTask>> = Arc::new(WorkQueue::new());
        let pop_timeout = config.pop_timeout();

        let coordinator = Arc::new(RetryCoordinator::new(
            self.ledger.clone(),
            self.publisher.clone(),
            download.clone(),
            config.local_root.clone(),
            config.retry_cap,
            config.auto_retry,
        ));

        // 根目录入队，未处理目录计数从 1 开始
        let outstanding = Arc::new(AtomicUsize::new(1));
        discovery.push(normalize_remote_path(&config.remote_root));

        let scanner_pool = Arc::new(ScannerPool {
            remote: self.remote.clone(),
            discovery: discovery.clone(),
            download: download.clone(),
            outstanding,
            ledger: self.ledger.clone(),
            publisher: self.publisher.clone(),
            cancel: cancel.clone(),
            pop_timeout,
            local_root: config.local_root.clone(),
        });
        let scanner_handles = scanner_pool.spawn(config.scanner_count);

        let worker_pool = Arc::new(TransferWorkerPool {
            remote: self.remote.clone(),
            download: download.clone(),
            ledger: self.ledger.clone(),
            publisher: self.publisher.clone(),
            coordinator: coordinator.clone(),
            cancel: cancel.clone(),
            pop_timeout,
        });
        let worker_handles = worker_pool.spawn(config.worker_count);

        publish_state(&self.state_tx, &self.publisher, SessionState::Running);
        info!(
            "镜像会话 {} 启动: 远端 {} -> 本地 {:?}, 扫描线程 {}, 传输线程 {}",
            session_id, config.remote_root, config.local_root, config.scanner_count, config.worker_count
        );

        self.spawn_completion_monitor(
            session_id.clone(),
            scanner_handles,
            worker_handles,
            download.clone(),
            cancel.clone(),
        );

        *self.run.write().await = Some(ActiveRun {
            session_id: session_id.clone(),
            config,
            cancel,
            download,
            coordinator,
            started_at: chrono::Utc::now().timestamp(),
        });

        Ok(session_id)
    }

    /// 完成屏障：扫描线程全部退出 → 收尾下载队列 → 传输线程全部退出
    fn spawn_completion_monitor(
        &self,
        session_id: String,
        scanner_handles: Vec<JoinHandle<()>>,
        worker_handles: Vec<JoinHandle<()>>,
        download: Arc<WorkQueue<FileTask>>,
        cancel: CancellationToken,
    ) {
        let state_tx = self.state_tx.clone();
        let publisher = self.publisher.clone();
        let aggregator = self.aggregator.clone();

        tokio::spawn(async move {
            for handle in scanner_handles {
                let _ = handle.await;
            }
            if !cancel.is_cancelled() {
                publish_state(&state_tx, &publisher, SessionState::Draining);
            }
            // 扫描线程是下载任务的唯一生产者，此刻收尾是安全的
            download.close();
            for handle in worker_handles {
                let _ = handle.await;
            }

            let final_state = if cancel.is_cancelled() {
                SessionState::Cancelled
            } else {
                SessionState::Completed
            };
            let snap = aggregator.snapshot(final_state);
            info!(
                "镜像会话 {} 结束（{}）: 发现 {} 个文件, 完成 {}, 失败 {}, 跳过 {}, 传输 {} bytes",
                session_id,
                final_state.description(),
                snap.discovered,
                snap.completed,
                snap.failed,
                snap.skipped,
                snap.bytes_transferred
            );
            publish_state(&state_tx, &publisher, final_state);
        });
    }

    /// 取消会话
    ///
    /// 协作式取消：所有阻塞点在一个出队超时周期内观察到信号，
    /// 全部线程退出后状态进入「已取消」
    pub async fn cancel(&self) -> Result<()> {
        if !self.state().is_active() {
            bail!("当前状态无法取消: {}", self.state().description());
        }
        let run = self.run.read().await;
        match run.as_ref() {
            Some(active) => {
                info!("会话 {} 收到取消请求", active.session_id);
                active.cancel.cancel();
                Ok(())
            }
            None => bail!("没有正在运行的会话"),
        }
    }

    /// 重试所有未达上限的失败任务，返回重新排队的数量
    ///
    /// 运行中的会话直接补投到在用队列；已完成的会话重新开放队列、
    /// 补投后立即收尾，并重启一批传输线程排空
    pub async fn retry_failed(&self) -> Result<usize> {
        match self.state() {
            SessionState::Idle | SessionState::Cancelled => {
                bail!("当前状态无法重试失败任务: {}", self.state().description());
            }
            SessionState::Running | SessionState::Draining => {
                let run = self.run.read().await;
                let active = run.as_ref().context("没有正在运行的会话")?;
                Ok(active.coordinator.retry_all_failed())
            }
            SessionState::Completed => self.retry_after_completion().await,
        }
    }

    async fn retry_after_completion(&self) -> Result<usize> {
        let run = self.run.read().await;
        let active = run.as_ref().context("没有可重试的会话")?;

        active.download.reopen();
        let requeued = active.coordinator.retry_all_failed();
        // 没有新的生产者，补投完成后立即回到排空语义
        active.download.close();
        if requeued == 0 {
            return Ok(0);
        }

        publish_state(&self.state_tx, &self.publisher, SessionState::Draining);
        let worker_pool = Arc::new(TransferWorkerPool {
            remote: self.remote.clone(),
            download: active.download.clone(),
            ledger: self.ledger.clone(),
            publisher: self.publisher.clone(),
            coordinator: active.coordinator.clone(),
            cancel: active.cancel.clone(),
            pop_timeout: active.config.pop_timeout(),
        });
        let worker_handles = worker_pool.spawn(active.config.worker_count);

        let state_tx = self.state_tx.clone();
        let publisher = self.publisher.clone();
        let cancel = active.cancel.clone();
        let session_id = active.session_id.clone();
        tokio::spawn(async move {
            for handle in worker_handles {
                let _ = handle.await;
            }
            let final_state = if cancel.is_cancelled() {
                SessionState::Cancelled
            } else {
                SessionState::Completed
            };
            info!("会话 {} 重试批次排空完毕", session_id);
            publish_state(&state_tx, &publisher, final_state);
        });

        Ok(requeued)
    }

    /// 生成进度快照
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.aggregator.snapshot(self.state())
    }

    /// 订阅事件流，返回订阅 ID 与接收端
    pub fn subscribe(&self) -> (u64, mpsc::UnboundedReceiver<MirrorEvent>) {
        self.bus.subscribe()
    }

    /// 取消事件订阅
    pub fn unsubscribe(&self, id: u64) {
        self.bus.unsubscribe(id);
    }

    /// 等待会话进入终止状态（完成或取消）
    pub async fn wait_until_terminal(&self) -> SessionState {
        let mut rx = self.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_terminal() {
                return state;
            }
            if rx.changed().await.is_err() {
                return self.state();
            }
        }
    }

    /// 连接测试，透传远端能力的结果
    pub async fn test_connection(&self) -> Result<ServerInfo, RemoteError> {
        self.remote.test_connection().await
    }

    /// 去重台账引用（状态查询）
    pub fn ledger(&self) -> Arc<DedupLedger> {
        self.ledger.clone()
    }

    /// 当前会话信息 (会话 ID, 启动时间戳)
    pub async fn session_info(&self) -> Option<(String, i64)> {
        self.run
            .read()
            .await
            .as_ref()
            .map(|r| (r.session_id.clone(), r.started_at))
    }

    /// 重置会话，回到空闲状态
    ///
    /// 清空台账与计数；运行中的会话必须先取消
    pub async fn reset(&self) -> Result<()> {
        if self.state().is_active() {
            bail!("会话仍在运行中，请先取消");
        }
        self.ledger.clear();
        self.aggregator.reset();
        *self.run.write().await = None;
        publish_state(&self.state_tx, &self.publisher, SessionState::Idle);
        Ok(())
    }
}

/// 更新状态并广播变更事件
fn publish_state(
    state_tx: &watch::Sender<SessionState>,
    publisher: &Arc<EventPublisher>,
    new_state: SessionState,
) {
    let old_state = *state_tx.borrow();
    if old_state == new_state {
        return;
    }
    state_tx.send_replace(new_state);
    info!(
        "会话状态: {} -> {}",
        old_state.description(),
        new_state.description()
    );
    publisher.emit(MirrorEvent::StateChanged {
        from: old_state.as_str().to_string(),
        to: new_state.as_str().to_string(),
    });
    if new_state == SessionState::Cancelled {
        warn!("会话已取消，未完成的任务保留在台账中");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(SessionState::Running.is_active());
        assert!(SessionState::Draining.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::Draining.is_terminal());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&SessionState::Draining).unwrap();
        assert_eq!(json, "\"draining\"");
    }
}
