//! 进度聚合
//!
//! 从事件流累计计数与字节总量，维护滑动窗口瞬时速度。
//! 快照读取只触碰原子量和一把短临界区的锁，绝不阻塞事件生产者

use crate::events::MirrorEvent;
use crate::mirror::session::SessionState;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 默认速度窗口（秒）
const DEFAULT_SPEED_WINDOW_SECS: u64 = 5;

/// 滑动窗口速度计算器
///
/// 记录 (时刻, 字节数) 样本，瞬时速度 = 窗口内字节总量 / 窗口时长
#[derive(Debug)]
pub struct SpeedCalculator {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedCalculator {
    /// 创建指定窗口的计算器
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// 使用默认窗口（5 秒）
    pub fn with_default_window() -> Self {
        Self::new(Duration::from_secs(DEFAULT_SPEED_WINDOW_SECS))
    }

    /// 记录一次传输样本
    pub fn add_sample(&mut self, bytes: u64) {
        let now = Instant::now();
        self.prune(now);
        self.samples.push_back((now, bytes));
    }

    /// 计算瞬时速度 (bytes/s)
    pub fn bytes_per_sec(&mut self) -> u64 {
        let now = Instant::now();
        self.prune(now);
        let total: u64 = self.samples.iter().map(|(_, b)| b).sum();
        (total as f64 / self.window.as_secs_f64()) as u64
    }

    fn prune(&mut self, now: Instant) {
        while let Some((t, _)) = self.samples.front() {
            if now.duration_since(*t) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// 扫描失败记录
#[derive(Debug, Clone, Serialize)]
pub struct ScanFailure {
    /// 失败的目录路径
    pub path: String,
    /// 失败原因
    pub error: String,
}

/// 进度快照
///
/// 派生数据，每次读取即时计算，外部层只读
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    /// 会话状态
    pub state: SessionState,
    /// 已发现文件数
    pub discovered: u64,
    /// 已发现目录数
    pub dirs_discovered: u64,
    /// 排队中文件数
    pub queued: u64,
    /// 传输中文件数
    pub in_flight: u64,
    /// 已完成文件数（实际传输）
    pub completed: u64,
    /// 失败文件数
    pub failed: u64,
    /// 本地已有、跳过传输的文件数
    pub skipped: u64,
    /// 扫描失败的目录数
    pub scan_failed_dirs: u64,
    /// 待传输字节总量（已发现且未跳过）
    pub bytes_expected: u64,
    /// 已传输字节总量
    pub bytes_transferred: u64,
    /// 瞬时速度 (bytes/s)
    pub speed_bps: u64,
    /// 预计剩余时间（秒），速度为零时为 None
    pub eta_secs: Option<u64>,
    /// 会话已运行时间（秒）
    pub elapsed_secs: u64,
}

impl ProgressSnapshot {
    /// 字节进度百分比
    pub fn progress_percent(&self) -> f64 {
        if self.bytes_expected == 0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / self.bytes_expected as f64) * 100.0
    }
}

/// 进度聚合器
#[derive(Debug)]
pub struct ProgressAggregator {
    discovered: AtomicU64,
    dirs_discovered: AtomicU64,
    queued: AtomicU64,
    in_flight: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    scan_failed_dirs: AtomicU64,
    bytes_expected: AtomicU64,
    bytes_transferred: AtomicU64,
    speed: Mutex<SpeedCalculator>,
    scan_failures: Mutex<Vec<ScanFailure>>,
    started_at: Mutex<Instant>,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self {
            discovered: AtomicU64::new(0),
            dirs_discovered: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            scan_failed_dirs: AtomicU64::new(0),
            bytes_expected: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            speed: Mutex::new(SpeedCalculator::with_default_window()),
            scan_failures: Mutex::new(Vec::new()),
            started_at: Mutex::new(Instant::now()),
        }
    }
}

impl ProgressAggregator {
    /// 创建聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 消费一个事件，更新计数
    pub fn observe(&self, event: &MirrorEvent) {
        match event {
            MirrorEvent::Discovered { size, .. } => {
                self.discovered.fetch_add(1, Ordering::SeqCst);
                self.bytes_expected
                    .fetch_add(size.unwrap_or(0), Ordering::SeqCst);
            }
            MirrorEvent::DirQueued { .. } => {
                self.dirs_discovered.fetch_add(1, Ordering::SeqCst);
            }
            MirrorEvent::Queued { .. } => {
                self.queued.fetch_add(1, Ordering::SeqCst);
            }
            MirrorEvent::Skipped { size, .. } => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
                saturating_sub(&self.bytes_expected, *size);
            }
            MirrorEvent::Requeued { .. } => {
                saturating_sub(&self.failed, 1);
                self.queued.fetch_add(1, Ordering::SeqCst);
            }
            MirrorEvent::TransferStarted { .. } => {
                saturating_sub(&self.queued, 1);
                self.in_flight.fetch_add(1, Ordering::SeqCst);
            }
            // 字节入账经由 add_transferred，进度事件本身可能被节流
            MirrorEvent::TransferProgress { .. } => {}
            MirrorEvent::TransferCompleted { .. } => {
                saturating_sub(&self.in_flight, 1);
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            MirrorEvent::TransferFailed { .. } => {
                saturating_sub(&self.in_flight, 1);
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            MirrorEvent::ScanDirFailed { path, error } => {
                self.scan_failed_dirs.fetch_add(1, Ordering::SeqCst);
                self.scan_failures.lock().push(ScanFailure {
                    path: path.clone(),
                    error: error.clone(),
                });
            }
            MirrorEvent::StateChanged { .. } => {}
        }
    }

    /// 累计已传输字节并记录速度样本
    pub fn add_transferred(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        self.bytes_transferred.fetch_add(delta, Ordering::SeqCst);
        self.speed.lock().add_sample(delta);
    }

    /// 生成进度快照
    pub fn snapshot(&self, state: SessionState) -> ProgressSnapshot {
        let bytes_expected = self.bytes_expected.load(Ordering::SeqCst);
        let bytes_transferred = self.bytes_transferred.load(Ordering::SeqCst);
        let speed_bps = self.speed.lock().bytes_per_sec();

        let remaining = bytes_expected.saturating_sub(bytes_transferred);
        let eta_secs = if speed_bps > 0 && remaining > 0 {
            Some(remaining / speed_bps)
        } else {
            None
        };

        ProgressSnapshot {
            state,
            discovered: self.discovered.load(Ordering::SeqCst),
            dirs_discovered: self.dirs_discovered.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            scan_failed_dirs: self.scan_failed_dirs.load(Ordering::SeqCst),
            bytes_expected,
            bytes_transferred,
            speed_bps,
            eta_secs,
            elapsed_secs: self.started_at.lock().elapsed().as_secs(),
        }
    }

    /// 扫描失败明细
    pub fn scan_failures(&self) -> Vec<ScanFailure> {
        self.scan_failures.lock().clone()
    }

    /// 清零（新会话开始时调用）
    pub fn reset(&self) {
        self.discovered.store(0, Ordering::SeqCst);
        self.dirs_discovered.store(0, Ordering::SeqCst);
        self.queued.store(0, Ordering::SeqCst);
        self.in_flight.store(0, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.skipped.store(0, Ordering::SeqCst);
        self.scan_failed_dirs.store(0, Ordering::SeqCst);
        self.bytes_expected.store(0, Ordering::SeqCst);
        self.bytes_transferred.store(0, Ordering::SeqCst);
        *self.speed.lock() = SpeedCalculator::with_default_window();
        self.scan_failures.lock().clear();
        *self.started_at.lock() = Instant::now();
    }
}

fn saturating_sub(counter: &AtomicU64, value: u64) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
        Some(v.saturating_sub(value))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovered(path: &str, size: u64) -> MirrorEvent {
        MirrorEvent::Discovered {
            path: path.to_string(),
            size: Some(size),
        }
    }

    #[test]
    fn test_speed_window_sum() {
        let mut calc = SpeedCalculator::new(Duration::from_secs(5));
        calc.add_sample(500);
        calc.add_sample(1000);
        // 样本都在窗口内：(500 + 1000) / 5
        assert_eq!(calc.bytes_per_sec(), 300);
    }

    #[test]
    fn test_speed_empty_window() {
        let mut calc = SpeedCalculator::with_default_window();
        assert_eq!(calc.bytes_per_sec(), 0);
    }

    #[test]
    fn test_counting_through_lifecycle() {
        let agg = ProgressAggregator::new();
        agg.observe(&discovered("/a.txt", 100));
        agg.observe(&MirrorEvent::Queued { path: "/a.txt".into() });
        agg.observe(&MirrorEvent::TransferStarted { path: "/a.txt".into(), attempt: 0 });
        agg.add_transferred(100);
        agg.observe(&MirrorEvent::TransferCompleted {
            path: "/a.txt".into(),
            bytes: 100,
            elapsed_ms: 3,
        });

        let snap = agg.snapshot(SessionState::Running);
        assert_eq!(snap.discovered, 1);
        assert_eq!(snap.queued, 0);
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.bytes_expected, 100);
        assert_eq!(snap.bytes_transferred, 100);
    }

    #[test]
    fn test_skip_removes_expected_bytes() {
        let agg = ProgressAggregator::new();
        agg.observe(&discovered("/a.txt", 100));
        agg.observe(&MirrorEvent::Skipped { path: "/a.txt".into(), size: 100 });

        let snap = agg.snapshot(SessionState::Running);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.bytes_expected, 0);
    }

    #[test]
    fn test_requeue_moves_failed_back_to_queued() {
        let agg = ProgressAggregator::new();
        agg.observe(&discovered("/x.txt", 10));
        agg.observe(&MirrorEvent::Queued { path: "/x.txt".into() });
        agg.observe(&MirrorEvent::TransferStarted { path: "/x.txt".into(), attempt: 0 });
        agg.observe(&MirrorEvent::TransferFailed {
            path: "/x.txt".into(),
            error: "连接错误".into(),
            attempt: 1,
            will_retry: true,
        });
        agg.observe(&MirrorEvent::Requeued { path: "/x.txt".into(), attempt: 1 });

        let snap = agg.snapshot(SessionState::Running);
        assert_eq!(snap.failed, 0);
        assert_eq!(snap.queued, 1);
    }

    #[test]
    fn test_eta_undefined_at_zero_speed() {
        let agg = ProgressAggregator::new();
        agg.observe(&discovered("/a.bin", 1_000_000));
        let snap = agg.snapshot(SessionState::Running);
        assert_eq!(snap.eta_secs, None);
        assert_eq!(snap.progress_percent(), 0.0);
    }

    #[test]
    fn test_scan_failures_recorded() {
        let agg = ProgressAggregator::new();
        agg.observe(&MirrorEvent::ScanDirFailed {
            path: "/private".into(),
            error: "权限不足: 550".into(),
        });
        assert_eq!(agg.snapshot(SessionState::Running).scan_failed_dirs, 1);
        assert_eq!(agg.scan_failures()[0].path, "/private");
    }

    #[test]
    fn test_reset() {
        let agg = ProgressAggregator::new();
        agg.observe(&discovered("/a.txt", 100));
        agg.add_transferred(50);
        agg.reset();

        let snap = agg.snapshot(SessionState::Idle);
        assert_eq!(snap.discovered, 0);
        assert_eq!(snap.bytes_transferred, 0);
        assert_eq!(snap.speed_bps, 0);
    }
}
