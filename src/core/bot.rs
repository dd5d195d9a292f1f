//! Bot（中枢）：服务/插件注册表与生命周期
//!
//! 生命周期：`BotBuilder` 注册 → `build` → `open`（打开服务、加载插件、启动监听）→
//! 运行（消息分发、周期 `save`）→ `close`（按注册顺序执行关闭回调）。
//!
//! 每个服务一个监听任务；每条消息对每个插件各开一个任务（不等待完成），
//! 任务外包一层 panic 边界，单个插件出错不影响监听循环与其他插件。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::FutureExt;

use super::message::Message;
use super::metrics::BotMetrics;
use super::plugin::Plugin;
use super::service::{MessageStream, Service};
use super::storage::BlobStorage;

/// 单个服务的状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Unopened,
    Opening,
    Listening,
    Closed,
}

/// 注册表条目：服务实例及挂在其上的插件
pub struct ServiceEntry {
    pub(crate) service: Arc<dyn Service>,
    pub(crate) plugins: HashMap<String, Arc<dyn Plugin>>,
    state: RwLock<ServiceState>,
}

impl ServiceEntry {
    pub(crate) fn new(service: Arc<dyn Service>) -> Self {
        Self {
            service,
            plugins: HashMap::new(),
            state: RwLock::new(ServiceState::Unopened),
        }
    }

    fn state(&self) -> ServiceState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ServiceState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// 一次 save 的结果汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// 写盘成功
    pub written: usize,
    /// 插件返回 None，无需写盘
    pub skipped: usize,
    /// 序列化失败、写盘失败或超时
    pub failed: usize,
}

enum SaveOutcome {
    Written,
    Skipped,
    Failed,
}

type CloseFn = Box<dyn FnOnce() + Send>;

/// 中枢
pub struct Bot {
    services: HashMap<String, ServiceEntry>,
    storage: BlobStorage,
    save_timeout: Duration,
    close_fns: Mutex<Vec<CloseFn>>,
    metrics: BotMetrics,
}

impl Bot {
    pub(crate) fn new(
        services: HashMap<String, ServiceEntry>,
        storage: BlobStorage,
        save_timeout: Duration,
    ) -> Self {
        Self {
            services,
            storage,
            save_timeout,
            close_fns: Mutex::new(Vec::new()),
            metrics: BotMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &BotMetrics {
        &self.metrics
    }

    pub fn storage(&self) -> &BlobStorage {
        &self.storage
    }

    /// 已注册的服务名（无序）
    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(|s| s.as_str()).collect()
    }

    pub fn service(&self, name: &str) -> Option<&Arc<dyn Service>> {
        self.services.get(name).map(|e| &e.service)
    }

    /// 某个服务上注册的插件
    pub fn plugins(&self, service_name: &str) -> Option<&HashMap<String, Arc<dyn Plugin>>> {
        self.services.get(service_name).map(|e| &e.plugins)
    }

    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.services.get(name).map(|e| e.state())
    }

    /// 打开所有服务：加载插件后启动各自的监听任务，返回成功打开的服务数
    ///
    /// 某个服务打开失败只记录日志并跳过，不影响其他服务。
    pub async fn open(self: &Arc<Self>) -> usize {
        let mut opened = 0;
        for (name, entry) in &self.services {
            if entry.state() != ServiceState::Unopened {
                tracing::warn!("Service {} already opened", name);
                continue;
            }
            entry.set_state(ServiceState::Opening);

            let stream = match entry.service.open().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!("Error opening service {}: {}", name, e);
                    entry.set_state(ServiceState::Unopened);
                    continue;
                }
            };

            for (plugin_name, plugin) in &entry.plugins {
                self.load_plugin(name, plugin_name, plugin, &entry.service).await;
            }

            entry.set_state(ServiceState::Listening);
            tracing::info!("Service {} listening with {} plugins", name, entry.plugins.len());

            let bot = Arc::clone(self);
            let service_name = name.clone();
            tokio::spawn(async move { bot.listen(service_name, stream).await });
            opened += 1;
        }
        opened
    }

    /// 加载失败的插件仍保留在注册表中，照常接收消息
    async fn load_plugin(
        self: &Arc<Self>,
        service_name: &str,
        plugin_name: &str,
        plugin: &Arc<dyn Plugin>,
        service: &Arc<dyn Service>,
    ) {
        let data = match self.storage.read(service_name, plugin_name).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Error reading state for {}/{}: {}", service_name, plugin_name, e);
                None
            }
        };

        let result = AssertUnwindSafe(plugin.load(self, service, data)).catch_unwind().await;
        match result {
            Ok(Ok(())) => tracing::debug!("Loaded plugin {}/{}", service_name, plugin_name),
            Ok(Err(e)) => {
                self.metrics.record_load_failure();
                tracing::error!("Error loading plugin {}/{}: {}", service_name, plugin_name, e);
            }
            Err(panic) => {
                self.metrics.record_load_failure();
                tracing::error!(
                    "Plugin {}/{} panicked during load: {}",
                    service_name,
                    plugin_name,
                    panic_message(panic.as_ref())
                );
            }
        }
    }

    /// 监听循环：只在服务的消息流关闭时结束
    async fn listen(self: Arc<Self>, service_name: String, mut stream: MessageStream) {
        let Some(entry) = self.services.get(&service_name) else {
            return;
        };

        while let Some(message) = stream.recv().await {
            tracing::debug!(
                "<{}> {}: {}",
                message.channel_id,
                message.user_name,
                message.text
            );
            self.metrics.record_message();

            let message = Arc::new(message);
            for plugin in entry.plugins.values() {
                self.dispatch(&entry.service, plugin, &message);
            }
        }

        entry.set_state(ServiceState::Closed);
        tracing::info!("Service {} message stream closed", service_name);
    }

    /// 不等待：每个 (消息, 插件) 一个独立任务，panic 在任务内被捕获并记录
    fn dispatch(self: &Arc<Self>, service: &Arc<dyn Service>, plugin: &Arc<dyn Plugin>, message: &Arc<Message>) {
        let bot = Arc::clone(self);
        let service = Arc::clone(service);
        let plugin = Arc::clone(plugin);
        let message = Arc::clone(message);

        tokio::spawn(async move {
            let _guard = bot.metrics.track_task();
            let result = AssertUnwindSafe(plugin.on_message(&bot, &service, &message))
                .catch_unwind()
                .await;
            if let Err(panic) = result {
                bot.metrics.record_fault();
                tracing::error!(
                    service = service.name(),
                    plugin = plugin.name(),
                    channel = %message.channel_id,
                    message_id = %message.message_id,
                    "Recovered from plugin panic: {}",
                    panic_message(panic.as_ref())
                );
            }
        });
    }

    /// 保存所有服务上所有插件的状态
    ///
    /// 各插件并发保存且各自有超时，慢插件不会拖住其他插件；失败只记录日志。
    pub async fn save(&self) -> SaveReport {
        let jobs = self.services.iter().flat_map(|(service_name, entry)| {
            entry
                .plugins
                .iter()
                .map(move |(plugin_name, plugin)| self.save_plugin(service_name, plugin_name, plugin))
        });

        let mut report = SaveReport::default();
        for outcome in join_all(jobs).await {
            match outcome {
                SaveOutcome::Written => report.written += 1,
                SaveOutcome::Skipped => report.skipped += 1,
                SaveOutcome::Failed => report.failed += 1,
            }
        }
        tracing::debug!("Saved plugin state: {:?}", report);
        report
    }

    async fn save_plugin(&self, service_name: &str, plugin_name: &str, plugin: &Arc<dyn Plugin>) -> SaveOutcome {
        let data = match tokio::time::timeout(self.save_timeout, plugin.save()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => return SaveOutcome::Skipped,
            Ok(Err(e)) => {
                tracing::error!("Error saving plugin {}/{}: {}", service_name, plugin_name, e);
                return SaveOutcome::Failed;
            }
            Err(_) => {
                tracing::warn!(
                    "Saving plugin {}/{} timed out after {:?}",
                    service_name,
                    plugin_name,
                    self.save_timeout
                );
                return SaveOutcome::Failed;
            }
        };

        match self.storage.write(service_name, plugin_name, &data).await {
            Ok(()) => SaveOutcome::Written,
            Err(e) => {
                tracing::error!("Error saving plugin {}/{}: {}", service_name, plugin_name, e);
                SaveOutcome::Failed
            }
        }
    }

    /// 注册关闭回调（通常由插件在 load 中调用，如关闭自己的存储）
    pub fn add_close_fn(&self, f: impl FnOnce() + Send + 'static) {
        self.close_fns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(f));
    }

    /// 按注册顺序执行所有关闭回调；重复调用不会再次执行
    pub fn close(&self) {
        let callbacks = std::mem::take(&mut *self.close_fns.lock().unwrap_or_else(PoisonError::into_inner));
        tracing::info!("Running {} close callbacks", callbacks.len());
        for f in callbacks {
            f();
        }
        for entry in self.services.values() {
            entry.set_state(ServiceState::Closed);
        }
    }
}

/// 取出 panic 负载中的文本
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BotBuilder;
    use crate::services::MockService;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_close_runs_callbacks_in_order_once() {
        let bot = BotBuilder::new("unused").without_help().build();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            bot.add_close_fn(move || order.lock().unwrap().push(i));
        }
        bot.close();
        bot.close();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_service_state_transitions() {
        let service = Arc::new(MockService::new("irc"));
        let mut builder = BotBuilder::new("unused").without_help();
        builder.register_service(service.clone()).unwrap();
        let bot = builder.build();

        assert_eq!(bot.service_state("irc"), Some(ServiceState::Unopened));
        assert_eq!(bot.open().await, 1);
        assert_eq!(bot.service_state("irc"), Some(ServiceState::Listening));

        service.close_stream();
        for _ in 0..100 {
            if bot.service_state("irc") == Some(ServiceState::Closed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bot.service_state("irc"), Some(ServiceState::Closed));
        assert_eq!(bot.service_state("slack"), None);
    }

    #[tokio::test]
    async fn test_open_failure_skips_service() {
        let broken = Arc::new(MockService::new("broken").failing_open());
        let healthy = Arc::new(MockService::new("healthy"));
        let mut builder = BotBuilder::new("unused").without_help();
        builder.register_service(broken).unwrap();
        builder.register_service(healthy).unwrap();
        let bot = builder.build();

        assert_eq!(bot.open().await, 1);
        assert_eq!(bot.service_state("broken"), Some(ServiceState::Unopened));
        assert_eq!(bot.service_state("healthy"), Some(ServiceState::Listening));
    }
}
