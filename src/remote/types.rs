// 远端文件系统类型定义

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 远端目录条目
///
/// 由 `RemoteFileSystem::list` 返回，创建后不再修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// 远端绝对路径
    pub path: String,
    /// 是否为目录
    pub is_directory: bool,
    /// 文件大小（目录或服务器未提供时为 None）
    pub size: Option<u64>,
    /// 修改时间 (Unix timestamp)
    pub modified_at: Option<i64>,
}

impl RemoteEntry {
    /// 创建文件条目
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
            size: Some(size),
            modified_at: None,
        }
    }

    /// 创建目录条目
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
            size: None,
            modified_at: None,
        }
    }
}

/// 单文件拉取请求
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// 远端路径
    pub remote_path: String,
    /// 本地保存路径
    pub local_path: PathBuf,
    /// 本地已有部分数据时是否断点续传
    pub resume: bool,
    /// 是否保留远端修改时间
    pub preserve_timestamp: bool,
}

/// 服务器信息（连接测试结果）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    /// 服务器类型（SYST 响应）
    pub server_type: Option<String>,
    /// 服务器声明的扩展能力（FEAT 响应）
    pub features: Vec<String>,
    /// 欢迎信息
    pub banner: Option<String>,
}
