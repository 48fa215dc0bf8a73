//! 重试协调
//!
//! 失败任务重新进入下载队列的唯一入口。自动模式在失败发生时
//! 逐个补投，手动模式一次性清扫台账里所有未达上限的失败条目

use crate::events::MirrorEvent;
use crate::mirror::ledger::DedupLedger;
use crate::mirror::queue::WorkQueue;
use crate::mirror::task::FileTask;
use crate::mirror::EventPublisher;
use crate::remote::RemoteError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 重试协调器
pub struct RetryCoordinator {
    ledger: Arc<DedupLedger>,
    publisher: Arc<EventPublisher>,
    download: Arc<WorkQueue<FileTask>>,
    local_root: PathBuf,
    retry_cap: u32,
    auto_retry: bool,
}

impl RetryCoordinator {
    pub(crate) fn new(
        ledger: Arc<DedupLedger>,
        publisher: Arc<EventPublisher>,
        download: Arc<WorkQueue<FileTask>>,
        local_root: PathBuf,
        retry_cap: u32,
        auto_retry: bool,
    ) -> Self {
        Self {
            ledger,
            publisher,
            download,
            local_root,
            retry_cap,
            auto_retry,
        }
    }

    /// 重试上限
    pub fn retry_cap(&self) -> u32 {
        self.retry_cap
    }

    /// 判断一次失败是否应该自动重试
    ///
    /// 终态错误（权限、不存在）无论开关如何都不自动重试；
    /// 会话取消后不再补投任何任务
    pub fn should_auto_retry(&self, error: &RemoteError, attempt: u32, cancelled: bool) -> bool {
        self.auto_retry && !cancelled && error.is_transient() && attempt < self.retry_cap
    }

    /// 把一个失败任务重新排队（自动重试路径）
    pub fn requeue(&self, mut task: FileTask) {
        match self.ledger.reclaim(&task.remote_path) {
            Ok(attempt) => {
                task.attempt = attempt;
                self.publisher.emit(MirrorEvent::Requeued {
                    path: task.remote_path.clone(),
                    attempt,
                });
                info!("自动重试: {} (第 {} 次尝试)", task.remote_path, attempt + 1);
                self.download.push(task);
            }
            Err(e) => warn!("重新排队失败: {} ({})", task.remote_path, e),
        }
    }

    /// 清扫台账，把所有未达上限的失败条目重新排队
    ///
    /// 原子地逐条执行失败→已排队迁移并补投任务，保留尝试次数；
    /// 没有候选时不产生任何事件，返回 0
    pub fn retry_all_failed(&self) -> usize {
        let candidates = self.ledger.failed_below(self.retry_cap);
        if candidates.is_empty() {
            debug!("没有可重试的失败任务");
            return 0;
        }

        let mut requeued = 0;
        for (path, _, size) in candidates {
            match self.ledger.reclaim(&path) {
                Ok(attempt) => {
                    self.publisher.emit(MirrorEvent::Requeued {
                        path: path.clone(),
                        attempt,
                    });
                    let task = FileTask::with_attempt(
                        path.clone(),
                        &self.local_root,
                        size,
                        attempt,
                    );
                    self.download.push(task);
                    requeued += 1;
                }
                // 并发竞争下条目状态可能已经变化，跳过即可
                Err(e) => debug!("跳过重试候选 {}: {}", path, e),
            }
        }

        info!("已重新排队 {} 个失败任务", requeued);
        requeued
    }
}
