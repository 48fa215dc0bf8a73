//! 进度事件节流器
//!
//! 控制单个文件进度事件的发布频率，避免小块写入造成事件风暴

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 200;

/// 进度事件节流器
///
/// 线程安全，使用 CAS 更新时间戳，不持锁
#[derive(Debug)]
pub struct ProgressThrottler {
    /// 计时起点
    origin: Instant,
    /// 上次发布时刻相对起点的纳秒数（0 表示尚未发布过）
    last_emit_nanos: AtomicU64,
    /// 节流间隔（纳秒）
    interval_nanos: u64,
}

impl ProgressThrottler {
    /// 创建新的节流器
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_emit_nanos: AtomicU64::new(0),
            interval_nanos: interval.as_nanos() as u64,
        }
    }

    /// 使用默认间隔（200ms）创建节流器
    pub fn default_interval() -> Self {
        Self::new(Duration::from_millis(DEFAULT_THROTTLE_INTERVAL_MS))
    }

    /// 检查是否应该发布事件
    ///
    /// 距上次发布超过节流间隔时返回 true 并更新时间戳；
    /// 多个线程同时通过间隔检查时，只有 CAS 成功的一方返回 true
    pub fn should_emit(&self) -> bool {
        // 偏移 1ns，保证首次发布时存储值非 0
        let now_nanos = self.origin.elapsed().as_nanos() as u64 + 1;
        let last = self.last_emit_nanos.load(Ordering::Relaxed);

        if last != 0 && now_nanos.saturating_sub(last) < self.interval_nanos {
            return false;
        }

        self.last_emit_nanos
            .compare_exchange(last, now_nanos, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// 强制发布（用于最后一次进度或完成事件）
    pub fn force_emit(&self) {
        let now_nanos = self.origin.elapsed().as_nanos() as u64 + 1;
        self.last_emit_nanos.store(now_nanos, Ordering::Relaxed);
    }
}
