// 配置管理模块

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 连接配置
    pub connection: ConnectionConfig,
    /// 镜像配置
    pub mirror: MirrorConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 连接配置
///
/// 镜像核心不解析这些字段，原样交给远端能力的实现方
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// 服务器地址
    pub host: String,
    /// 端口（默认 21）
    #[serde(default = "default_port")]
    pub port: u16,
    /// 用户名（默认 anonymous）
    #[serde(default = "default_username")]
    pub username: String,
    /// 密码
    #[serde(default)]
    pub password: String,
    /// 是否使用 TLS/SSL
    #[serde(default)]
    pub use_tls: bool,
}

/// 镜像配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// 远端根路径（默认 /）
    #[serde(default = "default_remote_root")]
    pub remote_root: String,
    /// 本地镜像目录
    pub local_root: PathBuf,
    /// 扫描线程数（默认 4）
    #[serde(default = "default_pool_size")]
    pub scanner_count: usize,
    /// 传输线程数（默认 4）
    #[serde(default = "default_pool_size")]
    pub worker_count: usize,
    /// 失败任务是否自动重试
    #[serde(default)]
    pub auto_retry: bool,
    /// 重试次数上限（默认 3）
    #[serde(default = "default_retry_cap")]
    pub retry_cap: u32,
    /// 队列出队超时（毫秒，默认 500；同时是取消信号的最大响应延迟）
    #[serde(default = "default_pop_timeout_ms")]
    pub pop_timeout_ms: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_port() -> u16 {
    21
}

fn default_username() -> String {
    "anonymous".to_string()
}

fn default_remote_root() -> String {
    "/".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_retry_cap() -> u32 {
    3
}

fn default_pop_timeout_ms() -> u64 {
    500
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_port(),
            username: default_username(),
            password: String::new(),
            use_tls: false,
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            remote_root: default_remote_root(),
            local_root: PathBuf::from("downloads"),
            scanner_count: default_pool_size(),
            worker_count: default_pool_size(),
            auto_retry: false,
            retry_cap: default_retry_cap(),
            pop_timeout_ms: default_pop_timeout_ms(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            mirror: MirrorConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// 校验连接配置
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("服务器地址不能为空");
        }
        Ok(())
    }
}

impl MirrorConfig {
    /// 出队超时
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    /// 校验镜像配置
    pub fn validate(&self) -> Result<()> {
        if !self.remote_root.starts_with('/') {
            bail!("远端根路径必须以 / 开头: {}", self.remote_root);
        }
        if self.local_root.as_os_str().is_empty() {
            bail!("本地镜像目录不能为空");
        }
        if self.scanner_count == 0 || self.scanner_count > 32 {
            bail!("扫描线程数必须在 1-32 之间: {}", self.scanner_count);
        }
        if self.worker_count == 0 || self.worker_count > 64 {
            bail!("传输线程数必须在 1-64 之间: {}", self.worker_count);
        }
        if self.retry_cap == 0 {
            bail!("重试次数上限必须大于 0");
        }
        if self.pop_timeout_ms < 50 || self.pop_timeout_ms > 60_000 {
            bail!("出队超时必须在 50-60000 毫秒之间: {}", self.pop_timeout_ms);
        }
        Ok(())
    }
}

impl AppConfig {
    /// 校验全部配置
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        self.mirror.validate()?;
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {}", path))?;
        let config: AppConfig =
            toml::from_str(&content).with_context(|| format!("解析配置文件失败: {}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.context("创建配置目录失败")?;
            }
        }
        fs::write(path, content)
            .await
            .with_context(|| format!("写入配置文件失败: {}", path))?;
        Ok(())
    }

    /// 加载配置，失败时回落到默认值
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("加载配置失败，使用默认配置: {}", e);
                Self::default()
            }
        }
    }
}
