//! 远端文件系统能力接口
//!
//! 镜像核心只依赖这里定义的抽象能力，具体协议（FTP/FTPS 连接协商、
//! MLSD/LIST 方言回退等）由实现方提供

pub mod types;

pub use types::{FetchRequest, RemoteEntry, ServerInfo};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// 传输进度回调（参数为该文件累计已传输字节数）
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// 远端操作错误
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// 连接或认证错误（瞬时，可重试）
    #[error("连接错误: {0}")]
    Connection(String),
    /// 服务器响应异常（瞬时，可重试）
    #[error("协议错误: {0}")]
    Protocol(String),
    /// 权限不足（终态，不自动重试）
    #[error("权限不足: {0}")]
    Permission(String),
    /// 远端文件或目录不存在（终态，不自动重试）
    #[error("文件不存在: {0}")]
    NotFound(String),
    /// 本地磁盘写入错误（瞬时，可重试）
    #[error("IO 错误: {0}")]
    Io(String),
}

impl RemoteError {
    /// 是否为瞬时错误
    ///
    /// 瞬时错误在达到重试上限前可以自动重试，终态错误不参与自动重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Connection(_) | RemoteError::Protocol(_) | RemoteError::Io(_)
        )
    }

    /// 错误类别名称
    pub fn kind_name(&self) -> &'static str {
        match self {
            RemoteError::Connection(_) => "connection",
            RemoteError::Protocol(_) => "protocol",
            RemoteError::Permission(_) => "permission",
            RemoteError::NotFound(_) => "not_found",
            RemoteError::Io(_) => "io",
        }
    }
}

/// 远端文件系统能力
///
/// 每个实现内部自行管理连接；调用方保证同一个工作线程同一时刻
/// 只有一个进行中的调用
#[async_trait]
pub trait RemoteFileSystem: Send + Sync {
    /// 列出目录的直接子条目
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// 下载单个文件到本地路径，返回实际传输的字节数
    ///
    /// 实现方负责写入 `request.local_path`，并在有数据落盘时
    /// 以累计字节数调用 `on_progress`
    async fn fetch(&self, request: &FetchRequest, on_progress: ProgressFn)
        -> Result<u64, RemoteError>;

    /// 连接测试，返回服务器信息
    async fn test_connection(&self) -> Result<ServerInfo, RemoteError>;
}
