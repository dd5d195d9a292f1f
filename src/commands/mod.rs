//! 命令路由：按命令名把消息交给处理器
//!
//! 一个 `CommandPlugin` 实例在所有服务间共享（自身无状态）。匹配规则：
//! - 公共频道必须带服务的命令前缀，私聊频道前缀可省略
//! - 首词与命令名不区分大小写比较，之后必须是文本结尾或空白
//! - 参数保留原始大小写，`parts` 为参数按空白切分的结果
//!
//! 未匹配的文本直接忽略，其他插件仍会收到这条消息。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Bot, Message, Plugin, Service};

/// 一次命令调用的上下文
#[derive(Clone)]
pub struct CommandContext {
    pub bot: Arc<Bot>,
    pub service: Arc<dyn Service>,
    pub message: Arc<Message>,
    /// 命令名之后的原始参数（已去掉首尾空白）
    pub args: String,
    pub parts: Vec<String>,
}

impl CommandContext {
    /// 在消息所在频道回复
    pub async fn reply(&self, text: &str) {
        if let Err(e) = self.service.send_message(&self.message.channel_id, text).await {
            tracing::warn!("Error replying in {}: {}", self.message.channel_id, e);
        }
    }
}

/// 命令处理器；任何 `Fn(CommandContext) -> impl Future<Output = ()>` 闭包都自动实现
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: CommandContext);
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, ctx: CommandContext) {
        (self)(ctx).await
    }
}

/// 一条命令的帮助
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHelp {
    pub args: String,
    pub description: String,
}

/// 帮助提供者：返回 None 表示对该用户隐藏（如仅所有者可用的命令）
pub type HelpProvider = Arc<dyn Fn(&Bot, &dyn Service, &Message) -> Option<CommandHelp> + Send + Sync>;

impl CommandHelp {
    pub fn new(args: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            args: args.into(),
            description: description.into(),
        }
    }

    /// 固定文本的帮助提供者
    pub fn fixed(args: impl Into<String>, description: impl Into<String>) -> HelpProvider {
        let help = Self::new(args, description);
        Arc::new(move |_: &Bot, _: &dyn Service, _: &Message| Some(help.clone()))
    }
}

struct CommandEntry {
    handler: Arc<dyn CommandHandler>,
    help: Option<HelpProvider>,
}

/// 命令路由插件
#[derive(Default)]
pub struct CommandPlugin {
    commands: HashMap<String, CommandEntry>,
}

impl CommandPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册命令；名称统一转小写，重复注册覆盖旧处理器
    pub fn add_command(
        &mut self,
        name: &str,
        handler: Arc<dyn CommandHandler>,
        help: Option<HelpProvider>,
    ) -> &mut Self {
        let name = name.to_lowercase();
        if self.commands.contains_key(&name) {
            tracing::warn!("Command {} registered twice, replacing", name);
        }
        self.commands.insert(name, CommandEntry { handler, help });
        self
    }

    /// 已注册的命令名（排序）
    pub fn command_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl Plugin for CommandPlugin {
    fn name(&self) -> &str {
        "Command"
    }

    async fn on_message(&self, bot: &Arc<Bot>, service: &Arc<dyn Service>, message: &Arc<Message>) {
        if service.is_self(message) {
            return;
        }
        let Some((name, args)) = split_command(service.as_ref(), message) else {
            return;
        };
        let Some(entry) = self.commands.get(&name) else {
            return;
        };

        tracing::debug!("Dispatching command {} on {}", name, service.name());
        let parts = args.split_whitespace().map(str::to_string).collect();
        let ctx = CommandContext {
            bot: Arc::clone(bot),
            service: Arc::clone(service),
            message: Arc::clone(message),
            args,
            parts,
        };
        entry.handler.handle(ctx).await;
    }

    async fn help(
        &self,
        bot: &Arc<Bot>,
        service: &Arc<dyn Service>,
        message: &Message,
        detailed: bool,
    ) -> Vec<String> {
        // 命令只出现在总帮助中，没有单独的帮助主题
        if detailed {
            return Vec::new();
        }
        let mut lines = Vec::new();
        for name in self.command_names() {
            let Some(provider) = self.commands.get(name).and_then(|e| e.help.as_ref()) else {
                continue;
            };
            if let Some(help) = provider(bot, service.as_ref(), message) {
                lines.push(command_help(service.as_ref(), name, &help.args, &help.description));
            }
        }
        lines
    }
}

/// 去掉命令前缀；公共频道没有前缀时返回 None
fn strip_prefix<'a>(service: &dyn Service, message: &'a Message) -> Option<&'a str> {
    let text = message.text.trim_start();
    let prefix = service.command_prefix();
    if prefix.is_empty() {
        return Some(text);
    }
    match text.strip_prefix(prefix) {
        Some(rest) => Some(rest),
        None if service.is_private(message) => Some(text),
        None => None,
    }
}

/// (小写命令名, 参数)
fn split_command(service: &dyn Service, message: &Message) -> Option<(String, String)> {
    let text = strip_prefix(service, message)?;
    let (first, rest) = match text.find(char::is_whitespace) {
        Some(i) => text.split_at(i),
        None => (text, ""),
    };
    if first.is_empty() {
        return None;
    }
    Some((first.to_lowercase(), rest.trim().to_string()))
}

/// 消息是否为命令 `name`
pub fn matches_command(service: &dyn Service, name: &str, message: &Message) -> bool {
    split_command(service, message).is_some_and(|(first, _)| first == name.to_lowercase())
}

/// 取出命令参数与按空白切分的 parts；不是命令时返回空
pub fn parse_command(service: &dyn Service, message: &Message) -> (String, Vec<String>) {
    match split_command(service, message) {
        Some((_, args)) => {
            let parts = args.split_whitespace().map(str::to_string).collect();
            (args, parts)
        }
        None => (String::new(), Vec::new()),
    }
}

/// 一行命令帮助：`<prefix><name> <args> - <description>`
pub fn command_help(service: &dyn Service, name: &str, args: &str, description: &str) -> String {
    if args.is_empty() {
        format!("{}{} - {}", service.command_prefix(), name, description)
    } else {
        format!("{}{} {} - {}", service.command_prefix(), name, args, description)
    }
}
