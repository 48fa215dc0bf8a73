//! 扫描线程池
//!
//! 多个扫描线程共享同一个目录队列：弹出目录、列举子条目，
//! 子目录回填队列，文件经台账认领后进入下载队列。
//! 目录只在入队时计数一次，计数归零即代表整棵树发现完毕

use crate::events::MirrorEvent;
use crate::mirror::ledger::DedupLedger;
use crate::mirror::queue::{PopOutcome, WorkQueue};
use crate::mirror::task::{local_path_for, normalize_remote_path, FileTask};
use crate::mirror::EventPublisher;
use crate::remote::{RemoteEntry, RemoteError, RemoteFileSystem};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 扫描线程池
pub(crate) struct ScannerPool {
    pub remote: Arc<dyn RemoteFileSystem>,
    pub discovery: Arc<WorkQueue<String>>,
    pub download: Arc<WorkQueue<FileTask>>,
    /// 待处理目录计数：入队 +1，展开完成 -1，归零时收尾扫描队列
    pub outstanding: Arc<AtomicUsize>,
    pub ledger: Arc<DedupLedger>,
    pub publisher: Arc<EventPublisher>,
    pub cancel: CancellationToken,
    pub pop_timeout: Duration,
    pub local_root: PathBuf,
}

impl ScannerPool {
    /// 启动 `count` 个扫描线程
    pub fn spawn(self: &Arc<Self>, count: usize) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|scanner_id| {
                let pool = self.clone();
                tokio::spawn(async move { pool.run_scanner(scanner_id).await })
            })
            .collect()
    }

    async fn run_scanner(&self, scanner_id: usize) {
        debug!("[扫描线程{}] 已启动", scanner_id);
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.discovery.pop(self.pop_timeout, &self.cancel).await {
                PopOutcome::Item(dir) => {
                    self.expand_dir(scanner_id, &dir).await;
                    // 最后一个目录展开完毕，通知所有扫描线程收尾
                    if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
                        info!("[扫描线程{}] 目录树发现完毕，扫描队列收尾", scanner_id);
                        self.discovery.close();
                    }
                }
                PopOutcome::Timeout => continue,
                PopOutcome::Closed => break,
                PopOutcome::Cancelled => break,
            }
        }
        debug!("[扫描线程{}] 已退出", scanner_id);
    }

    /// 展开一个目录
    ///
    /// 列举失败只影响该子树：记录事件后放弃，不影响其他目录和线程
    async fn expand_dir(&self, scanner_id: usize, dir: &str) {
        let entries = match self.list_with_retry(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("[扫描线程{}] 目录扫描失败: {} ({})", scanner_id, dir, e);
                self.publisher.emit(MirrorEvent::ScanDirFailed {
                    path: dir.to_string(),
                    error: e.to_string(),
                });
                return;
            }
        };

        debug!("[扫描线程{}] 目录 {} 包含 {} 个条目", scanner_id, dir, entries.len());

        for entry in entries {
            if self.cancel.is_cancelled() {
                return;
            }
            let path = normalize_remote_path(&entry.path);
            if entry.is_directory {
                self.outstanding.fetch_add(1, Ordering::SeqCst);
                self.discovery.push(path.clone());
                self.publisher.emit(MirrorEvent::DirQueued { path });
            } else {
                self.register_file(path, &entry).await;
            }
        }
    }

    /// 登记一个文件
    ///
    /// 台账认领必须先于任何事件：两个线程同时发现同一路径时，
    /// 只有认领成功的一方产生事件和任务
    async fn register_file(&self, path: String, entry: &RemoteEntry) {
        let local_path = local_path_for(&self.local_root, &path);

        if local_copy_present(&local_path, entry.size).await {
            if self.ledger.mark_present(&path, entry.size) {
                debug!("本地已有同名文件，跳过下载: {}", path);
                self.publisher.emit(MirrorEvent::Discovered {
                    path: path.clone(),
                    size: entry.size,
                });
                self.publisher.emit(MirrorEvent::Skipped {
                    path,
                    size: entry.size.unwrap_or(0),
                });
            }
            return;
        }

        if self.ledger.try_claim(&path, entry.size) {
            self.publisher.emit(MirrorEvent::Discovered {
                path: path.clone(),
                size: entry.size,
            });
            let task = FileTask::new(path.clone(), &self.local_root, entry.size);
            self.download.push(task);
            self.publisher.emit(MirrorEvent::Queued { path });
        }
    }

    /// 列举目录，瞬时错误立即重试一次
    async fn list_with_retry(&self, dir: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        match self.remote.list(dir).await {
            Ok(entries) => Ok(entries),
            Err(e) if e.is_transient() && !self.cancel.is_cancelled() => {
                warn!("目录 {} 列举失败，重试一次: {}", dir, e);
                self.remote.list(dir).await
            }
            Err(e) => Err(e),
        }
    }
}

/// 检查本地镜像文件是否已存在且大小吻合
///
/// 远端未提供大小时，沿用「非空即视为已下载」的判断
async fn local_copy_present(local_path: &Path, expected_size: Option<u64>) -> bool {
    match tokio::fs::metadata(local_path).await {
        Ok(meta) if meta.is_file() => match expected_size {
            Some(size) => meta.len() == size,
            None => meta.len() > 0,
        },
        _ => false,
    }
}
