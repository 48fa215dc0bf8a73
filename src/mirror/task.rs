use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 下载任务状态
///
/// 状态由去重台账统一维护，见 `DedupLedger`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 已排队
    Queued,
    /// 传输中
    InFlight,
    /// 已完成
    Completed,
    /// 失败
    Failed,
}

impl TaskStatus {
    /// 获取状态的中文描述
    pub fn description(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "已排队",
            TaskStatus::InFlight => "传输中",
            TaskStatus::Completed => "已完成",
            TaskStatus::Failed => "失败",
        }
    }

    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// 下载任务
///
/// 在下载队列与工作线程之间按值移动，同一时刻只有一个持有者
#[derive(Debug, Clone)]
pub struct FileTask {
    /// 远端路径（已规范化）
    pub remote_path: String,
    /// 本地保存路径
    pub local_path: PathBuf,
    /// 预期文件大小（远端未提供时为 None）
    pub size: Option<u64>,
    /// 已尝试次数
    pub attempt: u32,
}

impl FileTask {
    /// 创建新任务
    pub fn new(remote_path: String, local_root: &Path, size: Option<u64>) -> Self {
        let remote_path = normalize_remote_path(&remote_path);
        let local_path = local_path_for(local_root, &remote_path);
        Self {
            remote_path,
            local_path,
            size,
            attempt: 0,
        }
    }

    /// 创建携带已有尝试次数的任务（重试时使用）
    pub fn with_attempt(
        remote_path: String,
        local_root: &Path,
        size: Option<u64>,
        attempt: u32,
    ) -> Self {
        let mut task = Self::new(remote_path, local_root, size);
        task.attempt = attempt;
        task
    }
}

/// 规范化远端路径
///
/// 统一分隔符为 `/`，保证以 `/` 开头，折叠重复分隔符并去掉尾部分隔符
pub fn normalize_remote_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let parts: Vec<&str> = unified.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// 由远端路径推导本地镜像路径（1:1 保留目录结构）
pub fn local_path_for(local_root: &Path, remote_path: &str) -> PathBuf {
    let relative = remote_path.trim_start_matches('/');
    local_root.join(relative)
}
