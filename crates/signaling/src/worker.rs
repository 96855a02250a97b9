//! 工作线程与工作线程池
//!
//! 每个 [`Worker`] 在独立的 OS 线程上从共享 [`TaskQueue`] 取任务，
//! 同步调用注入的 [`TaskProcessor`]。处理结果写入 [`ResultSink`]，
//! 所有工作线程共享同一个结果通道，由 [`WorkerPool::start`] 返回的接收端统一消费。
//!
//! 状态机：`Idle → Running → Draining → Stopped`。停止时工作线程先进入
//! `Draining`，把队列里剩余的任务处理完才退出，保证 `stop()` 之前提交的任务不会丢失。

use crate::error::PoolError;
use crate::task_queue::TaskQueue;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 工作线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// 处理结果的汇聚端
///
/// 工作线程在同步上下文中调用 [`emit`](Self::emit)，接收端在 tokio 侧消费。
#[derive(Debug)]
pub struct ResultSink<R> {
    tx: mpsc::UnboundedSender<R>,
}

impl<R> Clone for ResultSink<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<R> ResultSink<R> {
    pub fn new(tx: mpsc::UnboundedSender<R>) -> Self {
        Self { tx }
    }

    /// 输出一个结果；接收端已关闭时丢弃并返回 false
    pub fn emit(&self, result: R) -> bool {
        if self.tx.send(result).is_err() {
            debug!("结果接收端已关闭，丢弃处理结果");
            return false;
        }
        true
    }
}

/// 任务处理器
///
/// 在工作线程上同步执行，禁止重新进入线程池（例如在处理中调用 `stop()`）。
pub trait TaskProcessor<T, R>: Send + Sync + 'static {
    fn process(&self, task: T, sink: &ResultSink<R>);
}

impl<T, R, F> TaskProcessor<T, R> for F
where
    F: Fn(T, &ResultSink<R>) + Send + Sync + 'static,
{
    fn process(&self, task: T, sink: &ResultSink<R>) {
        self(task, sink)
    }
}

/// 单个工作线程
#[derive(Debug)]
pub struct Worker {
    id: usize,
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            state: Arc::new(AtomicU8::new(WorkerState::Idle as u8)),
            handle: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 在新线程上启动工作循环（仅从 Idle 状态有效）
    pub fn start<T, R>(
        &mut self,
        queue: Arc<TaskQueue<T>>,
        processor: Arc<dyn TaskProcessor<T, R>>,
        sink: ResultSink<R>,
        pop_timeout: Duration,
    ) -> Result<(), PoolError>
    where
        T: Send + 'static,
        R: Send + 'static,
    {
        if self
            .state
            .compare_exchange(
                WorkerState::Idle as u8,
                WorkerState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(PoolError::AlreadyRunning);
        }

        let state = self.state.clone();
        let id = self.id;
        let spawned = std::thread::Builder::new()
            .name(format!("signaling-worker-{id}"))
            .spawn(move || run_loop(id, state, queue, processor, sink, pop_timeout));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.state.store(WorkerState::Stopped as u8, Ordering::Release);
                Err(PoolError::Spawn(e))
            }
        }
    }

    /// 请求排空后停止
    pub fn request_drain(&self) {
        let _ = self.state.compare_exchange(
            WorkerState::Running as u8,
            WorkerState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let _ = self.state.compare_exchange(
            WorkerState::Idle as u8,
            WorkerState::Stopped as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// 等待线程退出
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("❌ 工作线程 {} 异常退出", self.id);
        }
    }
}

fn run_loop<T: 'static, R: 'static>(
    id: usize,
    state: Arc<AtomicU8>,
    queue: Arc<TaskQueue<T>>,
    processor: Arc<dyn TaskProcessor<T, R>>,
    sink: ResultSink<R>,
    pop_timeout: Duration,
) {
    debug!("工作线程 {} 启动", id);
    loop {
        match WorkerState::from_u8(state.load(Ordering::Acquire)) {
            WorkerState::Running => {
                if let Some(task) = queue.pop(pop_timeout) {
                    process_one(id, processor.as_ref(), task, &sink);
                }
            }
            WorkerState::Draining => match queue.try_pop() {
                Some(task) => process_one(id, processor.as_ref(), task, &sink),
                None => {
                    state.store(WorkerState::Stopped as u8, Ordering::Release);
                    break;
                }
            },
            WorkerState::Idle | WorkerState::Stopped => break,
        }
    }
    debug!("工作线程 {} 已停止", id);
}

fn process_one<T: 'static, R: 'static>(
    id: usize,
    processor: &dyn TaskProcessor<T, R>,
    task: T,
    sink: &ResultSink<R>,
) {
    // 单个任务处理失败不能带走工作线程
    if catch_unwind(AssertUnwindSafe(|| processor.process(task, sink))).is_err() {
        error!("❌ 工作线程 {} 处理任务时 panic，已跳过该任务", id);
    }
}

/// 工作线程池
///
/// `submit_task` 是唯一的生产者入口，只在队列锁内判断是否接受任务，
/// 不会被正在排空的 `stop()` 阻塞。`stop()` 幂等，返回时保证不再有任何任务在执行。
pub struct WorkerPool<T> {
    running: AtomicBool,
    pop_timeout: Duration,
    queue: Arc<TaskQueue<T>>,
    workers: Mutex<Vec<Worker>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(pop_timeout: Duration) -> Self {
        let queue = TaskQueue::new();
        // 启动前不接受任务
        queue.close();
        Self {
            running: AtomicBool::new(false),
            pop_timeout,
            queue: Arc::new(queue),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// 启动 `n` 个工作线程，返回汇聚所有工作线程结果的接收端
    pub fn start<R, P>(
        &self,
        n: usize,
        processor: P,
    ) -> Result<mpsc::UnboundedReceiver<R>, PoolError>
    where
        R: Send + 'static,
        P: TaskProcessor<T, R>,
    {
        if n == 0 {
            error!("❌ 工作线程数为 0，拒绝启动");
            return Err(PoolError::ZeroWorkers);
        }

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            error!("❌ 工作线程池已在运行，拒绝重复启动");
            return Err(PoolError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = ResultSink::new(tx);
        let processor: Arc<dyn TaskProcessor<T, R>> = Arc::new(processor);

        self.queue.reopen();
        for id in 0..n {
            let mut worker = Worker::new(id);
            if let Err(e) = worker.start(
                self.queue.clone(),
                processor.clone(),
                sink.clone(),
                self.pop_timeout,
            ) {
                error!("❌ 启动工作线程 {} 失败: {}", id, e);
                self.running.store(false, Ordering::Release);
                shutdown_workers(&self.queue, &mut workers);
                return Err(e);
            }
            workers.push(worker);
        }

        info!("✅ 工作线程池已启动: {} 个工作线程", n);
        Ok(rx)
    }

    /// 提交任务；线程池未运行时返回 [`PoolError::NotRunning`]
    pub fn submit_task(&self, task: T) -> Result<(), PoolError> {
        // 队列在排空之前已关闭，关闭之后到达的任务在这里被拒绝
        if !self.running.load(Ordering::Acquire) || self.queue.push(task).is_err() {
            warn!("⚠️ 工作线程池未运行，拒绝任务");
            return Err(PoolError::NotRunning);
        }
        Ok(())
    }

    /// 停止线程池：排空队列并等待所有工作线程退出
    ///
    /// 返回 false 表示线程池本来就未运行。会阻塞调用线程。
    pub fn stop(&self) -> bool {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        shutdown_workers(&self.queue, &mut workers);
        info!("🛑 工作线程池已停止");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 队列中等待处理的任务数
    pub fn pending(&self) -> usize {
        self.queue.size()
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if self.running.swap(false, Ordering::AcqRel) {
            let workers = self.workers.get_mut().unwrap_or_else(PoisonError::into_inner);
            shutdown_workers(&self.queue, workers);
        }
    }
}

/// 两阶段停止：关闭队列并通知所有工作线程排空，唤醒阻塞的等待者，再逐个 join
fn shutdown_workers<T>(queue: &TaskQueue<T>, workers: &mut Vec<Worker>) {
    for worker in workers.iter() {
        worker.request_drain();
    }
    queue.close();
    for worker in workers.iter_mut() {
        worker.join();
    }
    workers.clear();
}
