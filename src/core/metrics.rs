//! 中枢运行指标：启动时间与进程级计数器
//!
//! 随 Bot 创建而初始化，由 Bot 独占持有；stats 命令从这里读取 uptime 等数据。

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct BotMetrics {
    started_at: Instant,
    messages_received: AtomicU64,
    handler_faults: AtomicU64,
    load_failures: AtomicU64,
    in_flight: AtomicUsize,
}

impl BotMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            messages_received: AtomicU64::new(0),
            handler_faults: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn handler_faults(&self) -> u64 {
        self.handler_faults.load(Ordering::Relaxed)
    }

    pub fn load_failures(&self) -> u64 {
        self.load_failures.load(Ordering::Relaxed)
    }

    /// 正在执行的插件消息处理任务数
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self) {
        self.handler_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// 登记一个分发任务，返回的 guard 在 drop 时注销
    pub(crate) fn track_task(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { metrics: self }
    }
}

impl Default for BotMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct InFlightGuard<'a> {
    metrics: &'a BotMetrics,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 格式化为 HH:MM:SS（小时可超过 24）
pub fn format_uptime(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
