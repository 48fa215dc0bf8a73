// FTP Mirror Rust Library
// FTP/FTPS 站点镜像核心库：并发发现 + 并发传输

// 配置管理模块
pub mod config;

// 事件模块
pub mod events;

// 日志模块
pub mod logging;

// 镜像协调核心
pub mod mirror;

// 远端文件系统能力接口
pub mod remote;

// 导出常用类型
pub use config::{AppConfig, ConnectionConfig, LogConfig, MirrorConfig};
pub use events::{EventBus, EventPriority, MirrorEvent, ProgressThrottler};
pub use mirror::{
    DedupLedger, FileTask, LedgerCounts, LedgerError, PopOutcome, ProgressAggregator,
    ProgressSnapshot, ScanFailure, SessionController, SessionState, SpeedCalculator, TaskStatus,
    WorkQueue,
};
pub use remote::{FetchRequest, ProgressFn, RemoteEntry, RemoteError, RemoteFileSystem, ServerInfo};
