//! Plugin（功能模块）能力接口
//!
//! 中枢统一对待所有插件：load 一次、save 周期调用、on_message 并发分发、help/stats 供聚合展示。
//! 无状态插件可在多个服务间共享同一实例；有状态插件每个服务新建一个实例。

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use super::bot::Bot;
use super::error::PluginError;
use super::message::Message;
use super::service::Service;

/// 插件 trait
///
/// `on_message` 会在中枢为每条消息新开的任务中执行，必须能与自身并发运行；
/// 耗时 I/O 应自行 spawn，不要长时间持有自身的锁。
#[async_trait]
pub trait Plugin: Send + Sync {
    /// 插件名（同一服务内唯一，区分大小写；同时作为持久化文件名）
    fn name(&self) -> &str;

    /// 服务打开后、监听开始前调用一次；`data` 为上次 save 的内容，首次运行为 None
    async fn load(
        &self,
        _bot: &Arc<Bot>,
        _service: &Arc<dyn Service>,
        _data: Option<Vec<u8>>,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    /// 序列化状态；返回 None 表示无需写盘
    async fn save(&self) -> Result<Option<Vec<u8>>, PluginError> {
        Ok(None)
    }

    /// 处理一条消息
    async fn on_message(&self, bot: &Arc<Bot>, service: &Arc<dyn Service>, message: &Arc<Message>);

    /// 帮助文本；detailed 为 true 时返回该插件的详细帮助（帮助主题）
    async fn help(
        &self,
        _bot: &Arc<Bot>,
        _service: &Arc<dyn Service>,
        _message: &Message,
        _detailed: bool,
    ) -> Vec<String> {
        Vec::new()
    }

    /// 统计行
    async fn stats(&self, _bot: &Arc<Bot>, _service: &Arc<dyn Service>, _message: &Message) -> Vec<String> {
        Vec::new()
    }
}

type LoadFn = dyn Fn(&Arc<Bot>, &Arc<dyn Service>, Option<Vec<u8>>) -> Result<(), PluginError> + Send + Sync;
type SaveFn = dyn Fn() -> Result<Option<Vec<u8>>, PluginError> + Send + Sync;
type MessageFn = dyn Fn(Arc<Bot>, Arc<dyn Service>, Arc<Message>) -> BoxFuture<'static, ()> + Send + Sync;
type HelpFn = dyn Fn(&Bot, &dyn Service, &Message, bool) -> Vec<String> + Send + Sync;
type StatsFn = dyn Fn(&Bot, &dyn Service, &Message) -> Vec<String> + Send + Sync;

/// 由闭包拼装的无状态插件
pub struct SimplePlugin {
    name: String,
    load_fn: Option<Box<LoadFn>>,
    save_fn: Option<Box<SaveFn>>,
    message_fn: Option<Box<MessageFn>>,
    help_fn: Option<Box<HelpFn>>,
    stats_fn: Option<Box<StatsFn>>,
}

impl SimplePlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            load_fn: None,
            save_fn: None,
            message_fn: None,
            help_fn: None,
            stats_fn: None,
        }
    }

    pub fn with_load<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Bot>, &Arc<dyn Service>, Option<Vec<u8>>) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        self.load_fn = Some(Box::new(f));
        self
    }

    pub fn with_save<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<Option<Vec<u8>>, PluginError> + Send + Sync + 'static,
    {
        self.save_fn = Some(Box::new(f));
        self
    }

    pub fn with_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Bot>, Arc<dyn Service>, Arc<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.message_fn = Some(Box::new(move |bot, service, message| Box::pin(f(bot, service, message))));
        self
    }

    pub fn with_help<F>(mut self, f: F) -> Self
    where
        F: Fn(&Bot, &dyn Service, &Message, bool) -> Vec<String> + Send + Sync + 'static,
    {
        self.help_fn = Some(Box::new(f));
        self
    }

    pub fn with_stats<F>(mut self, f: F) -> Self
    where
        F: Fn(&Bot, &dyn Service, &Message) -> Vec<String> + Send + Sync + 'static,
    {
        self.stats_fn = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl Plugin for SimplePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(
        &self,
        bot: &Arc<Bot>,
        service: &Arc<dyn Service>,
        data: Option<Vec<u8>>,
    ) -> Result<(), PluginError> {
        match &self.load_fn {
            Some(f) => f(bot, service, data),
            None => Ok(()),
        }
    }

    async fn save(&self) -> Result<Option<Vec<u8>>, PluginError> {
        match &self.save_fn {
            Some(f) => f(),
            None => Ok(None),
        }
    }

    async fn on_message(&self, bot: &Arc<Bot>, service: &Arc<dyn Service>, message: &Arc<Message>) {
        if let Some(f) = &self.message_fn {
            f(Arc::clone(bot), Arc::clone(service), Arc::clone(message)).await;
        }
    }

    async fn help(
        &self,
        bot: &Arc<Bot>,
        service: &Arc<dyn Service>,
        message: &Message,
        detailed: bool,
    ) -> Vec<String> {
        match &self.help_fn {
            Some(f) => f(bot, service.as_ref(), message, detailed),
            None => Vec::new(),
        }
    }

    async fn stats(&self, bot: &Arc<Bot>, service: &Arc<dyn Service>, message: &Message) -> Vec<String> {
        match &self.stats_fn {
            Some(f) => f(bot, service.as_ref(), message),
            None => Vec::new(),
        }
    }
}
