//! 测试用内存远端文件系统
//!
//! 以脚本化的目录树和故障注入模拟远端能力，并记录全部调用，
//! 供并发正确性断言（去重、取消后无新调用、同路径无并发拉取）

use async_trait::async_trait;
use ftp_mirror_rust::remote::{
    FetchRequest, ProgressFn, RemoteEntry, RemoteError, RemoteFileSystem, ServerInfo,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 故障注入计划
struct FailPlan {
    error: RemoteError,
    /// None 表示永远失败，Some(n) 表示前 n 次失败
    remaining: Option<usize>,
}

/// 内存远端文件系统
pub struct MockRemoteFs {
    dirs: Mutex<HashMap<String, Vec<RemoteEntry>>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    fetch_failures: Mutex<HashMap<String, FailPlan>>,
    list_failures: Mutex<HashMap<String, RemoteError>>,
    fetch_delay: Mutex<Option<Duration>>,
    fetch_log: Mutex<Vec<String>>,
    list_log: Mutex<Vec<String>>,
    active_per_path: Mutex<HashMap<String, usize>>,
    overlap_violations: AtomicUsize,
}

impl MockRemoteFs {
    pub fn new() -> Self {
        let mut dirs = HashMap::new();
        dirs.insert("/".to_string(), Vec::new());
        Self {
            dirs: Mutex::new(dirs),
            contents: Mutex::new(HashMap::new()),
            fetch_failures: Mutex::new(HashMap::new()),
            list_failures: Mutex::new(HashMap::new()),
            fetch_delay: Mutex::new(None),
            fetch_log: Mutex::new(Vec::new()),
            list_log: Mutex::new(Vec::new()),
            active_per_path: Mutex::new(HashMap::new()),
            overlap_violations: AtomicUsize::new(0),
        }
    }

    /// 添加一个文件，父目录链自动登记
    pub fn with_file(self, path: &str, size: usize) -> Self {
        {
            let mut dirs = self.dirs.lock();
            let parent = parent_of(path);
            ensure_dir(&mut dirs, &parent);
            dirs.get_mut(&parent)
                .unwrap()
                .push(RemoteEntry::file(path, size as u64));
        }
        self.contents
            .lock()
            .insert(path.to_string(), vec![0xA5; size]);
        self
    }

    /// 让同一个文件出现在多个目录的列举结果里（制造发现竞争）
    pub fn with_file_listed_in(self, listed_in: &[&str], path: &str, size: usize) -> Self {
        {
            let mut dirs = self.dirs.lock();
            for dir in listed_in {
                ensure_dir(&mut dirs, dir);
                dirs.get_mut(*dir)
                    .unwrap()
                    .push(RemoteEntry::file(path, size as u64));
            }
        }
        self.contents
            .lock()
            .insert(path.to_string(), vec![0xA5; size]);
        self
    }

    /// 注入拉取故障：times 为 None 时永远失败，Some(n) 时前 n 次失败
    pub fn with_fetch_failures(self, path: &str, error: RemoteError, times: Option<usize>) -> Self {
        self.fetch_failures.lock().insert(
            path.to_string(),
            FailPlan {
                error,
                remaining: times,
            },
        );
        self
    }

    /// 注入列举故障（该目录永远失败）
    pub fn with_list_failure(self, dir: &str, error: RemoteError) -> Self {
        {
            let mut dirs = self.dirs.lock();
            ensure_dir(&mut dirs, dir);
        }
        self.list_failures.lock().insert(dir.to_string(), error);
        self
    }

    /// 每次拉取前的固定延迟
    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        *self.fetch_delay.lock() = Some(delay);
        self
    }

    pub fn fetch_count(&self, path: &str) -> usize {
        self.fetch_log.lock().iter().filter(|p| *p == path).count()
    }

    pub fn list_count(&self, dir: &str) -> usize {
        self.list_log.lock().iter().filter(|p| *p == dir).count()
    }

    pub fn total_fetch_calls(&self) -> usize {
        self.fetch_log.lock().len()
    }

    pub fn total_list_calls(&self) -> usize {
        self.list_log.lock().len()
    }

    /// 同一路径并发拉取的违例次数（镜像核心应保证恒为 0）
    pub fn overlap_violations(&self) -> usize {
        self.overlap_violations.load(Ordering::SeqCst)
    }

    async fn fetch_inner(
        &self,
        request: &FetchRequest,
        on_progress: ProgressFn,
    ) -> Result<u64, RemoteError> {
        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.fetch_failures.lock();
            if let Some(plan) = failures.get_mut(&request.remote_path) {
                match &mut plan.remaining {
                    None => return Err(plan.error.clone()),
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        return Err(plan.error.clone());
                    }
                    _ => {}
                }
            }
        }

        let content = self
            .contents
            .lock()
            .get(&request.remote_path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("文件不存在: {}", request.remote_path)))?;

        if let Some(parent) = request.local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RemoteError::Io(e.to_string()))?;
        }
        tokio::fs::write(&request.local_path, &content)
            .await
            .map_err(|e| RemoteError::Io(e.to_string()))?;

        let len = content.len() as u64;
        on_progress(len / 2);
        on_progress(len);
        Ok(len)
    }
}

#[async_trait]
impl RemoteFileSystem for MockRemoteFs {
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.list_log.lock().push(path.to_string());
        if let Some(error) = self.list_failures.lock().get(path) {
            return Err(error.clone());
        }
        match self.dirs.lock().get(path) {
            Some(entries) => Ok(entries.clone()),
            None => Err(RemoteError::NotFound(format!("目录不存在: {}", path))),
        }
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        on_progress: ProgressFn,
    ) -> Result<u64, RemoteError> {
        let path = request.remote_path.clone();
        self.fetch_log.lock().push(path.clone());
        {
            let mut active = self.active_per_path.lock();
            let counter = active.entry(path.clone()).or_insert(0);
            *counter += 1;
            if *counter > 1 {
                self.overlap_violations.fetch_add(1, Ordering::SeqCst);
            }
        }

        let result = self.fetch_inner(request, on_progress).await;

        if let Some(counter) = self.active_per_path.lock().get_mut(&path) {
            *counter -= 1;
        }
        result
    }

    async fn test_connection(&self) -> Result<ServerInfo, RemoteError> {
        Ok(ServerInfo {
            server_type: Some("MockFTP 1.0".to_string()),
            features: vec!["MLSD".to_string()],
            banner: Some("220 mock ready".to_string()),
        })
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn ensure_dir(dirs: &mut HashMap<String, Vec<RemoteEntry>>, dir: &str) {
    if dirs.contains_key(dir) {
        return;
    }
    dirs.insert(dir.to_string(), Vec::new());
    if dir != "/" {
        let parent = parent_of(dir);
        ensure_dir(dirs, &parent);
        dirs.get_mut(&parent)
            .unwrap()
            .push(RemoteEntry::directory(dir));
    }
}
