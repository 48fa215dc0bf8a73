//! 去重台账
//!
//! 以规范化远端路径为键的全局任务状态表。所有读改写都经由分片锁
//! 的 entry 接口，单个路径上的操作可线性化：同一路径同一时刻最多
//! 只有一个任务处于 {已排队, 传输中}

use crate::mirror::task::TaskStatus;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

/// 台账条目
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// 当前状态
    pub status: TaskStatus,
    /// 已尝试次数
    pub attempt: u32,
    /// 发现时记录的预期大小
    pub size: Option<u64>,
}

/// 台账操作错误
///
/// 非法状态迁移属于编程错误，调用方必须显式处理，台账绝不静默接受
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// 路径从未登记
    #[error("路径未登记: {0}")]
    UnknownPath(String),
    /// 不允许的状态迁移
    #[error("非法状态迁移: {path} {from:?} -> {to:?}")]
    InvalidTransition {
        path: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// 按状态统计的台账快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounts {
    pub queued: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
}

/// 去重台账
#[derive(Debug, Default)]
pub struct DedupLedger {
    entries: DashMap<String, LedgerEntry>,
}

impl DedupLedger {
    /// 创建空台账
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试认领一个路径
    ///
    /// 路径未登记时登记为「已排队」并返回 true；已有任何状态的条目
    /// 时不做修改返回 false。两个扫描线程同时认领同一路径，恰好
    /// 只有一个成功
    pub fn try_claim(&self, path: &str, size: Option<u64>) -> bool {
        match self.entries.entry(path.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(LedgerEntry {
                    status: TaskStatus::Queued,
                    attempt: 0,
                    size,
                });
                true
            }
        }
    }

    /// 登记一个本地已存在、无需下载的路径
    ///
    /// 路径未登记时直接记为「已完成」并返回 true
    pub fn mark_present(&self, path: &str, size: Option<u64>) -> bool {
        match self.entries.entry(path.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(LedgerEntry {
                    status: TaskStatus::Completed,
                    attempt: 0,
                    size,
                });
                true
            }
        }
    }

    /// 状态迁移
    ///
    /// 允许的迁移：已排队→传输中、传输中→已完成、传输中→失败、
    /// 失败→已排队（重试）。其余一律拒绝
    pub fn transition(&self, path: &str, to: TaskStatus) -> Result<(), LedgerError> {
        match self.entries.get_mut(path) {
            None => Err(LedgerError::UnknownPath(path.to_string())),
            Some(mut entry) => {
                let from = entry.status;
                if Self::is_valid_transition(from, to) {
                    entry.status = to;
                    Ok(())
                } else {
                    Err(LedgerError::InvalidTransition {
                        path: path.to_string(),
                        from,
                        to,
                    })
                }
            }
        }
    }

    fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        matches!(
            (from, to),
            (TaskStatus::Queued, TaskStatus::InFlight)
                | (TaskStatus::InFlight, TaskStatus::Completed)
                | (TaskStatus::InFlight, TaskStatus::Failed)
                | (TaskStatus::Failed, TaskStatus::Queued)
        )
    }

    /// 记录一次失败：传输中→失败，尝试次数加一，返回新的尝试次数
    pub fn fail(&self, path: &str) -> Result<u32, LedgerError> {
        match self.entries.get_mut(path) {
            None => Err(LedgerError::UnknownPath(path.to_string())),
            Some(mut entry) => {
                if entry.status != TaskStatus::InFlight {
                    return Err(LedgerError::InvalidTransition {
                        path: path.to_string(),
                        from: entry.status,
                        to: TaskStatus::Failed,
                    });
                }
                entry.status = TaskStatus::Failed;
                entry.attempt += 1;
                Ok(entry.attempt)
            }
        }
    }

    /// 重新认领一个失败路径：失败→已排队，保留尝试次数并返回
    pub fn reclaim(&self, path: &str) -> Result<u32, LedgerError> {
        match self.entries.get_mut(path) {
            None => Err(LedgerError::UnknownPath(path.to_string())),
            Some(mut entry) => {
                if entry.status != TaskStatus::Failed {
                    return Err(LedgerError::InvalidTransition {
                        path: path.to_string(),
                        from: entry.status,
                        to: TaskStatus::Queued,
                    });
                }
                entry.status = TaskStatus::Queued;
                Ok(entry.attempt)
            }
        }
    }

    /// 查询路径状态
    pub fn status_of(&self, path: &str) -> Option<TaskStatus> {
        self.entries.get(path).map(|e| e.status)
    }

    /// 查询路径的尝试次数
    pub fn attempt_of(&self, path: &str) -> Option<u32> {
        self.entries.get(path).map(|e| e.attempt)
    }

    /// 收集尝试次数低于上限的失败路径（重试候选）
    pub fn failed_below(&self, cap: u32) -> Vec<(String, u32, Option<u64>)> {
        self.entries
            .iter()
            .filter(|e| e.status == TaskStatus::Failed && e.attempt < cap)
            .map(|e| (e.key().clone(), e.attempt, e.size))
            .collect()
    }

    /// 按状态统计
    pub fn snapshot(&self) -> LedgerCounts {
        let mut counts = LedgerCounts::default();
        for entry in self.entries.iter() {
            counts.total += 1;
            match entry.status {
                TaskStatus::Queued => counts.queued += 1,
                TaskStatus::InFlight => counts.in_flight += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// 条目数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 清空台账（新会话开始时调用）
    pub fn clear(&self) {
        self.entries.clear();
    }
}
