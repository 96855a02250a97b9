//! 线程安全的 FIFO 任务队列
//!
//! 网络侧（tokio 任务）通过 [`TaskQueue::push`] 投递，工作线程通过
//! [`TaskQueue::pop`] 阻塞等待或 [`TaskQueue::try_pop`] 立即返回。
//!
//! 队列关闭后拒绝新任务，阻塞中的 `pop` 立即返回；已入队的任务仍可取出。

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// 任务队列
#[derive(Debug)]
pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    // 持锁期间不会执行用户代码，毒化后数据仍然一致
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 入队并唤醒至多一个等待者；队列已关闭时原样退回任务
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.lock();
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// 阻塞出队，超时或队列关闭且为空时返回 `None`
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// 非阻塞出队
    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    pub fn size(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// 关闭队列并唤醒所有阻塞在 [`pop`](Self::pop) 上的等待者
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    /// 重新接受任务
    pub fn reopen(&self) {
        self.lock().closed = false;
    }
}
