//! 工作队列
//!
//! 扫描队列与下载队列共用的无界多生产者多消费者队列。
//! 出队带超时并响应取消令牌，保证工作线程在取消后一个超时周期内退出

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 出队结果
#[derive(Debug, PartialEq, Eq)]
pub enum PopOutcome<T> {
    /// 取到一项
    Item(T),
    /// 超时，队列仍然开放，调用方应重新检查控制标志后再次出队
    Timeout,
    /// 队列已收尾且为空，消费者应退出
    Closed,
    /// 取消令牌已触发
    Cancelled,
}

/// 工作队列
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }
}

impl<T> WorkQueue<T> {
    /// 创建空队列
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队
    ///
    /// 收尾之后仍然允许入队（重试任务可能在排空阶段到达），
    /// 收尾只改变空队列上出队的行为
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.notify.notify_one();
    }

    /// 出队，最多等待 `timeout`
    ///
    /// 取消令牌触发时立即返回，不等满超时
    pub async fn pop(&self, timeout: Duration, cancel: &CancellationToken) -> PopOutcome<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return PopOutcome::Cancelled;
            }
            if let Some(item) = self.items.lock().pop_front() {
                return PopOutcome::Item(item);
            }
            if self.closed.load(Ordering::SeqCst) {
                return PopOutcome::Closed;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return PopOutcome::Timeout;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return PopOutcome::Cancelled,
                _ = tokio::time::sleep(remaining) => return PopOutcome::Timeout,
            }
        }
    }

    /// 发出收尾信号
    ///
    /// 之后空队列上的出队返回 `Closed` 而不是阻塞，已有条目仍会被取走
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// 重新开放队列（会话结束后补投重试任务时使用）
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// 是否已收尾
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 当前长度
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_push_pop() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        queue.push(1);
        queue.push(2);

        assert_eq!(queue.pop(SHORT, &cancel).await, PopOutcome::Item(1));
        assert_eq!(queue.pop(SHORT, &cancel).await, PopOutcome::Item(2));
        assert_eq!(queue.pop(SHORT, &cancel).await, PopOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_close_drains_remaining_items() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        queue.push(1);
        queue.close();

        // 收尾后先排空已有条目，再返回 Closed
        assert_eq!(queue.pop(SHORT, &cancel).await, PopOutcome::Item(1));
        assert_eq!(queue.pop(SHORT, &cancel).await, PopOutcome::Closed);
    }

    #[tokio::test]
    async fn test_push_after_close_is_still_consumed() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        queue.close();
        queue.push(7);

        assert_eq!(queue.pop(SHORT, &cancel).await, PopOutcome::Item(7));
        assert_eq!(queue.pop(SHORT, &cancel).await, PopOutcome::Closed);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_waiting_pop() {
        let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(30), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), PopOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_waiting_pop_wakes_on_push() {
        let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(30), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(42);
        assert_eq!(waiter.await.unwrap(), PopOutcome::Item(42));
    }

    #[tokio::test]
    async fn test_concurrent_consumers_each_item_taken_once() {
        let queue: Arc<WorkQueue<u64>> = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();
        for i in 0..100 {
            queue.push(i);
        }
        queue.close();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                loop {
                    match queue.pop(SHORT, &cancel).await {
                        PopOutcome::Item(v) => taken.push(v),
                        PopOutcome::Timeout => continue,
                        PopOutcome::Closed | PopOutcome::Cancelled => break,
                    }
                }
                taken
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_reopen() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        let cancel = CancellationToken::new();
        queue.close();
        assert_eq!(queue.pop(SHORT, &cancel).await, PopOutcome::Closed);

        queue.reopen();
        assert_eq!(queue.pop(SHORT, &cancel).await, PopOutcome::Timeout);
    }
}
