//! 传输线程池
//!
//! 多个工作线程共享下载队列：认领任务、调用远端能力拉取文件、
//! 校验落盘结果并更新台账。单个任务的崩溃被就地捕获转为失败，
//! 绝不影响线程池其余成员

use crate::events::{MirrorEvent, ProgressThrottler};
use crate::mirror::ledger::DedupLedger;
use crate::mirror::queue::{PopOutcome, WorkQueue};
use crate::mirror::retry::RetryCoordinator;
use crate::mirror::task::{FileTask, TaskStatus};
use crate::mirror::EventPublisher;
use crate::remote::{FetchRequest, ProgressFn, RemoteError, RemoteFileSystem};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 传输线程池
pub(crate) struct TransferWorkerPool {
    pub remote: Arc<dyn RemoteFileSystem>,
    pub download: Arc<WorkQueue<FileTask>>,
    pub ledger: Arc<DedupLedger>,
    pub publisher: Arc<EventPublisher>,
    pub coordinator: Arc<RetryCoordinator>,
    pub cancel: CancellationToken,
    pub pop_timeout: Duration,
}

impl TransferWorkerPool {
    /// 启动 `count` 个工作线程
    pub fn spawn(self: &Arc<Self>, count: usize) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker_id| {
                let pool = self.clone();
                tokio::spawn(async move { pool.run_worker(worker_id).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker_id: usize) {
        debug!("[传输线程{}] 已启动", worker_id);
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.download.pop(self.pop_timeout, &self.cancel).await {
                PopOutcome::Item(task) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.process_task(worker_id, task).await;
                }
                PopOutcome::Timeout => continue,
                PopOutcome::Closed => break,
                PopOutcome::Cancelled => break,
            }
        }
        debug!("[传输线程{}] 已退出", worker_id);
    }

    async fn process_task(&self, worker_id: usize, task: FileTask) {
        let path = task.remote_path.clone();

        if let Err(e) = self.ledger.transition(&path, TaskStatus::InFlight) {
            error!("任务状态异常，放弃处理: {} ({})", path, e);
            return;
        }
        self.publisher.emit(MirrorEvent::TransferStarted {
            path: path.clone(),
            attempt: task.attempt,
        });
        debug!("[传输线程{}] 开始下载: {}", worker_id, path);

        let started = Instant::now();
        let reported = Arc::new(AtomicU64::new(0));

        // 单个任务内的任何 panic 就地捕获，按失败处理
        let outcome = AssertUnwindSafe(self.transfer_once(&task, reported.clone()))
            .catch_unwind()
            .await;
        let result: Result<u64, RemoteError> = match outcome {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Io("传输过程发生 panic".to_string())),
        };

        match result {
            Ok(bytes) => {
                if let Err(e) = self.ledger.transition(&path, TaskStatus::Completed) {
                    error!("完成状态写入失败: {} ({})", path, e);
                }
                let elapsed = started.elapsed();
                self.publisher.emit(MirrorEvent::TransferCompleted {
                    path: path.clone(),
                    bytes,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
                info!(
                    "[传输线程{}] 下载完成: {} ({} bytes, 耗时 {} ms)",
                    worker_id,
                    path,
                    bytes,
                    elapsed.as_millis()
                );
            }
            Err(e) => {
                let attempt = match self.ledger.fail(&path) {
                    Ok(attempt) => attempt,
                    Err(le) => {
                        error!("失败状态写入失败: {} ({})", path, le);
                        return;
                    }
                };
                let will_retry =
                    self.coordinator
                        .should_auto_retry(&e, attempt, self.cancel.is_cancelled());
                warn!(
                    "[传输线程{}] 下载失败: {} (第 {} 次尝试): {}",
                    worker_id, path, attempt, e
                );
                self.publisher.emit(MirrorEvent::TransferFailed {
                    path: path.clone(),
                    error: e.to_string(),
                    attempt,
                    will_retry,
                });
                if will_retry {
                    self.coordinator.requeue(task);
                }
            }
        }
    }

    /// 执行一次传输：建目录、拉取、字节结算、大小校验、落盘同步
    async fn transfer_once(
        &self,
        task: &FileTask,
        reported: Arc<AtomicU64>,
    ) -> Result<u64, RemoteError> {
        if let Some(parent) = task.local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RemoteError::Io(format!("创建本地目录失败: {}", e)))?;
        }

        let request = FetchRequest {
            remote_path: task.remote_path.clone(),
            local_path: task.local_path.clone(),
            resume: true,
            preserve_timestamp: true,
        };
        let on_progress = self.progress_callback(task, reported.clone());

        let bytes = tokio::select! {
            result = self.remote.fetch(&request, on_progress) => result?,
            _ = self.cancel.cancelled() => {
                return Err(RemoteError::Connection("传输已取消".to_string()));
            }
        };

        // 进度回调可能被节流或根本未被调用，补记剩余字节
        let prev = reported.swap(bytes, Ordering::SeqCst);
        self.publisher.aggregator().add_transferred(bytes.saturating_sub(prev));
        self.publisher.emit(MirrorEvent::TransferProgress {
            path: task.remote_path.clone(),
            bytes_so_far: bytes,
            total: task.size,
        });

        if let Some(expected) = task.size {
            if bytes != expected {
                return Err(RemoteError::Io(format!(
                    "文件大小不匹配: 期望 {} 实际 {}",
                    expected, bytes
                )));
            }
        }

        let file = tokio::fs::File::open(&task.local_path)
            .await
            .map_err(|e| RemoteError::Io(format!("打开本地文件失败: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| RemoteError::Io(format!("落盘同步失败: {}", e)))?;

        Ok(bytes)
    }

    /// 构造进度回调
    ///
    /// 字节入账每次都做（速度窗口依赖完整样本），进度事件按节流间隔发布
    fn progress_callback(&self, task: &FileTask, reported: Arc<AtomicU64>) -> ProgressFn {
        let publisher = self.publisher.clone();
        let throttler = ProgressThrottler::default_interval();
        let path = task.remote_path.clone();
        let total = task.size;
        Arc::new(move |bytes_so_far: u64| {
            let prev = reported.swap(bytes_so_far, Ordering::SeqCst);
            publisher
                .aggregator()
                .add_transferred(bytes_so_far.saturating_sub(prev));
            if throttler.should_emit() {
                publisher.emit(MirrorEvent::TransferProgress {
                    path: path.clone(),
                    bytes_so_far,
                    total,
                });
            }
        })
    }
}
