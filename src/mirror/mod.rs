//! 镜像协调核心
//!
//! 扫描/下载双队列、去重台账、进度聚合与会话编排

pub mod ledger;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod scanner;
pub mod session;
pub mod task;
pub mod worker;

pub use ledger::{DedupLedger, LedgerCounts, LedgerEntry, LedgerError};
pub use progress::{ProgressAggregator, ProgressSnapshot, ScanFailure, SpeedCalculator};
pub use queue::{PopOutcome, WorkQueue};
pub use retry::RetryCoordinator;
pub use session::{SessionController, SessionState};
pub use task::{FileTask, TaskStatus};

use crate::events::{EventBus, MirrorEvent};
use std::sync::Arc;

/// 事件出口
///
/// 所有事件的统一发布路径：先送进度聚合器计数，再广播给订阅者
#[derive(Debug)]
pub(crate) struct EventPublisher {
    aggregator: Arc<ProgressAggregator>,
    bus: Arc<EventBus>,
}

impl EventPublisher {
    pub fn new(aggregator: Arc<ProgressAggregator>, bus: Arc<EventBus>) -> Self {
        Self { aggregator, bus }
    }

    /// 发布一个事件
    pub fn emit(&self, event: MirrorEvent) {
        self.aggregator.observe(&event);
        self.bus.publish(event);
    }

    /// 进度聚合器引用（字节入账走直达路径，见 worker）
    pub fn aggregator(&self) -> &Arc<ProgressAggregator> {
        &self.aggregator
    }
}
