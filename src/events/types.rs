//! 镜像事件类型定义
//!
//! 扫描线程与传输线程产生的全部事件，供进度聚合与外部订阅者消费

use serde::{Deserialize, Serialize};

/// 事件优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// 低优先级：进度更新
    Low = 0,
    /// 中优先级：发现、排队、状态变更
    Medium = 1,
    /// 高优先级：完成、失败等关键事件
    High = 2,
}

/// 镜像事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum MirrorEvent {
    /// 发现一个待下载文件
    Discovered {
        path: String,
        size: Option<u64>,
    },
    /// 发现一个子目录并排入扫描队列
    DirQueued {
        path: String,
    },
    /// 文件已排入下载队列
    Queued {
        path: String,
    },
    /// 本地已有相同文件，跳过下载
    Skipped {
        path: String,
        size: u64,
    },
    /// 失败任务重新排队
    Requeued {
        path: String,
        attempt: u32,
    },
    /// 开始传输
    TransferStarted {
        path: String,
        attempt: u32,
    },
    /// 传输进度
    TransferProgress {
        path: String,
        bytes_so_far: u64,
        total: Option<u64>,
    },
    /// 传输完成
    TransferCompleted {
        path: String,
        bytes: u64,
        elapsed_ms: u64,
    },
    /// 传输失败
    TransferFailed {
        path: String,
        error: String,
        attempt: u32,
        will_retry: bool,
    },
    /// 目录扫描失败
    ScanDirFailed {
        path: String,
        error: String,
    },
    /// 会话状态变更
    StateChanged {
        from: String,
        to: String,
    },
}

impl MirrorEvent {
    /// 事件涉及的远端路径（状态变更事件没有路径）
    pub fn path(&self) -> Option<&str> {
        match self {
            MirrorEvent::Discovered { path, .. } => Some(path),
            MirrorEvent::DirQueued { path } => Some(path),
            MirrorEvent::Queued { path } => Some(path),
            MirrorEvent::Skipped { path, .. } => Some(path),
            MirrorEvent::Requeued { path, .. } => Some(path),
            MirrorEvent::TransferStarted { path, .. } => Some(path),
            MirrorEvent::TransferProgress { path, .. } => Some(path),
            MirrorEvent::TransferCompleted { path, .. } => Some(path),
            MirrorEvent::TransferFailed { path, .. } => Some(path),
            MirrorEvent::ScanDirFailed { path, .. } => Some(path),
            MirrorEvent::StateChanged { .. } => None,
        }
    }

    /// 获取事件优先级
    pub fn priority(&self) -> EventPriority {
        match self {
            MirrorEvent::TransferProgress { .. } => EventPriority::Low,
            MirrorEvent::Discovered { .. } => EventPriority::Medium,
            MirrorEvent::DirQueued { .. } => EventPriority::Medium,
            MirrorEvent::Queued { .. } => EventPriority::Medium,
            MirrorEvent::Skipped { .. } => EventPriority::Medium,
            MirrorEvent::Requeued { .. } => EventPriority::Medium,
            MirrorEvent::TransferStarted { .. } => EventPriority::Medium,
            MirrorEvent::TransferCompleted { .. } => EventPriority::High,
            MirrorEvent::TransferFailed { .. } => EventPriority::High,
            MirrorEvent::ScanDirFailed { .. } => EventPriority::High,
            MirrorEvent::StateChanged { .. } => EventPriority::High,
        }
    }

    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            MirrorEvent::Discovered { .. } => "discovered",
            MirrorEvent::DirQueued { .. } => "dir_queued",
            MirrorEvent::Queued { .. } => "queued",
            MirrorEvent::Skipped { .. } => "skipped",
            MirrorEvent::Requeued { .. } => "requeued",
            MirrorEvent::TransferStarted { .. } => "transfer_started",
            MirrorEvent::TransferProgress { .. } => "transfer_progress",
            MirrorEvent::TransferCompleted { .. } => "transfer_completed",
            MirrorEvent::TransferFailed { .. } => "transfer_failed",
            MirrorEvent::ScanDirFailed { .. } => "scan_dir_failed",
            MirrorEvent::StateChanged { .. } => "state_changed",
        }
    }
}
